//! # 磁盘数据结构层
//!
//! dfs 的磁盘布局（块组 0）：
//! 引导块 | 超级块 | 块组描述符表 | 保留块 | 块位图 | inode 位图 | inode 表 | 数据块
//!
//! 其余块组：块位图 | inode 位图 | inode 表 | 数据块
//!
//! 所有多字节字段均为小端序。

pub mod bitmap;

mod super_block;
pub use super_block::SuperBlock;

mod group_desc;
pub use group_desc::GroupDesc;

mod block_dir;
pub use block_dir::{BlockDir, Route, Shape};

mod inode;
pub use inode::{DiskInode, InodeFlag};

/// 目录项，也属于磁盘文件系统数据结构
pub mod dir_entry;

use vfs::Result;

/// 有固定长度磁盘表示的结构
pub trait OnDisk: Sized {
    const SIZE: usize;

    fn decode(raw: &[u8]) -> Result<Self>;
    fn encode(&self, raw: &mut [u8]);
}

/// 顺序读取小端字段
pub(crate) struct Reader<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline]
    pub fn new(raw: &'a [u8]) -> Self {
        Self { raw, pos: 0 }
    }

    pub fn u32(&mut self) -> u32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.raw[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_le_bytes(bytes)
    }

    pub fn u64(&mut self) -> u64 {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(&self.raw[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(bytes)
    }

    #[inline]
    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

/// 顺序写入小端字段
pub(crate) struct Writer<'a> {
    raw: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    #[inline]
    pub fn new(raw: &'a mut [u8]) -> Self {
        Self { raw, pos: 0 }
    }

    pub fn u32(&mut self, v: u32) {
        self.raw[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    pub fn u64(&mut self, v: u64) {
        self.raw[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    pub fn zero(&mut self, n: usize) {
        self.raw[self.pos..self.pos + n].fill(0);
        self.pos += n;
    }
}

/// 读取块内第`index`个块指针
#[inline]
pub fn read_ptr(raw: &[u8], index: usize) -> u32 {
    Reader::new(&raw[index * 4..]).u32()
}

#[inline]
pub fn write_ptr(raw: &mut [u8], index: usize, ptr: u32) {
    Writer::new(&mut raw[index * 4..]).u32(ptr)
}
