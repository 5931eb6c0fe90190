use vfs::Result;

use super::{OnDisk, Reader, Writer};

/// 块组描述符，整张表在挂载时常驻内存
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDesc {
    /// 本组实际包含的块数，最后一组可能不满
    pub block_count: u32,
    pub block_bitmap_block: u32,
    pub inode_bitmap_block: u32,
    /// inode 表的首块
    pub inode_table_block: u32,
    pub free_block_count: u32,
    pub free_inode_count: u32,
}

impl OnDisk for GroupDesc {
    /// 末尾8字节保留
    const SIZE: usize = 32;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw);
        Ok(Self {
            block_count: r.u32(),
            block_bitmap_block: r.u32(),
            inode_bitmap_block: r.u32(),
            inode_table_block: r.u32(),
            free_block_count: r.u32(),
            free_inode_count: r.u32(),
        })
    }

    fn encode(&self, raw: &mut [u8]) {
        let mut w = Writer::new(raw);
        w.u32(self.block_count);
        w.u32(self.block_bitmap_block);
        w.u32(self.inode_bitmap_block);
        w.u32(self.inode_table_block);
        w.u32(self.free_block_count);
        w.u32(self.free_inode_count);
        w.zero(8);
    }
}
