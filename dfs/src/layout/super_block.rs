use vfs::Result;

use super::{OnDisk, Reader, Writer};
use crate::{SIGNATURE, VERSION};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 记录全局几何参数与空闲计数；
/// - 定位块组描述符表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuperBlock {
    /// 签名：用于校验文件系统合法性
    pub signature: u32,
    pub version: u32,
    /// 块大小的以2为底的对数
    pub log_block_size: u32,
    pub groupdesc_table_block: u32,
    pub reserved_inodes: u32,
    pub group_count: u32,
    pub inode_count: u32,
    pub block_count: u32,
    pub free_inode_count: u32,
    pub free_block_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub first_reserved_block: u32,
    pub reserved_blocks: u32,
    /// 挂载时块缓存容量的建议值
    pub cache_buffers: u32,
}

impl SuperBlock {
    /// 超级块总是位于设备的第1个扇区
    pub const BYTE_OFFSET: usize = 512;

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.signature == SIGNATURE && self.version == VERSION
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        1 << self.log_block_size
    }
}

impl OnDisk for SuperBlock {
    const SIZE: usize = 60;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw);
        Ok(Self {
            signature: r.u32(),
            version: r.u32(),
            log_block_size: r.u32(),
            groupdesc_table_block: r.u32(),
            reserved_inodes: r.u32(),
            group_count: r.u32(),
            inode_count: r.u32(),
            block_count: r.u32(),
            free_inode_count: r.u32(),
            free_block_count: r.u32(),
            blocks_per_group: r.u32(),
            inodes_per_group: r.u32(),
            first_reserved_block: r.u32(),
            reserved_blocks: r.u32(),
            cache_buffers: r.u32(),
        })
    }

    fn encode(&self, raw: &mut [u8]) {
        let mut w = Writer::new(raw);
        w.u32(self.signature);
        w.u32(self.version);
        w.u32(self.log_block_size);
        w.u32(self.groupdesc_table_block);
        w.u32(self.reserved_inodes);
        w.u32(self.group_count);
        w.u32(self.inode_count);
        w.u32(self.block_count);
        w.u32(self.free_inode_count);
        w.u32(self.free_block_count);
        w.u32(self.blocks_per_group);
        w.u32(self.inodes_per_group);
        w.u32(self.first_reserved_block);
        w.u32(self.reserved_blocks);
        w.u32(self.cache_buffers);
    }
}
