#![no_std]

extern crate alloc;

/* dfs 的整体架构，自上而下 */

// 操作层：对外提供文件、目录操作，实现 `vfs::FileSystem`
mod fs;

// 路径解析层：逐级解析路径分量
mod path;

// 目录层：变长目录项的增删改查
mod dir;

// 索引节点层：逻辑块到物理块的映射树，以及按字节读写
mod inode;

// 分配器层：位图上的块与 inode 分配
mod group;

// 磁盘块管理器层：超级块与块组描述符
mod dfs;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod buffer;

mod options;

use derive_more::{Add, Display, From, Into};

pub use self::{
    buffer::{Buffer, BufferPool, BufferRef},
    dfs::DiskFileSystem,
    fs::{Dfs, File},
    inode::Inode,
    layout::{BlockDir, DiskInode, GroupDesc, InodeFlag, OnDisk, Route, Shape, SuperBlock},
    options::FsOptions,
};

/// 超级块签名 "DFS\0"
pub const SIGNATURE: u32 = 0x0053_4644;
pub const VERSION: u32 = 1;

/// inode 内块目录的槽位数
pub const TOPBLOCKDIR_SIZE: usize = 16;
/// 索引树的最大深度，同时也是路径解析的最大层数
pub const MAX_DEPTH: usize = 6;
/// 文件名的最大字节数
pub const MAXFNAME: usize = 255;

/// 根目录
pub const ROOT_INODE: InodeNo = InodeNo(0);
/// 保留给内核的 inode，永不分配
pub const KRNL_INODE: InodeNo = InodeNo(1);

/// 块编号
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, From, Into)]
#[repr(transparent)]
pub struct BlockNo(u32);

/// inode 编号
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct InodeNo(u32);

impl core::ops::Add<u32> for BlockNo {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        self + Self(rhs)
    }
}

impl BlockNo {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl InodeNo {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}
