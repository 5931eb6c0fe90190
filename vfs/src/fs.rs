//! 文件系统后端的操作表
//!
//! 每种磁盘格式实现一次 [`FileSystem`]，挂载时确定后端类型，
//! 此后所有调用都静态分派到该后端。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use enumflags2::BitFlags;

use crate::{DirEntry, OpenFlag, Result, Stat, StatFs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    End(i64),
    Current(i64),
}

/// 修改时间戳，`None` 表示保持原值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UTime {
    pub ctime: Option<u64>,
    pub mtime: Option<u64>,
}

pub trait FileSystem: Sized + Send + Sync {
    /// 格式化与挂载参数
    type Options;
    /// 已打开的文件或目录
    type File;

    /// 后端能否被递归进入
    const REENTRANT: bool;

    fn format(dev: Arc<dyn BlockDevice>, options: &Self::Options) -> Result<()>;
    fn mount(dev: Arc<dyn BlockDevice>, options: &Self::Options) -> Result<Self>;
    fn unmount(self) -> Result<()>;
    fn sync(&self) -> Result<()>;
    fn statfs(&self) -> Result<StatFs>;

    fn open(&self, path: &str, flags: BitFlags<OpenFlag>) -> Result<Self::File>;
    fn close(&self, file: Self::File) -> Result<()>;
    fn flush(&self, file: &mut Self::File) -> Result<()>;
    fn read(&self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, file: &mut Self::File, buf: &[u8]) -> Result<usize>;
    fn tell(&self, file: &Self::File) -> u64;
    fn lseek(&self, file: &mut Self::File, pos: SeekFrom) -> Result<u64>;
    fn chsize(&self, file: &mut Self::File, size: u64) -> Result<()>;
    fn futime(&self, file: &mut Self::File, times: UTime) -> Result<()>;
    fn utime(&self, path: &str, times: UTime) -> Result<()>;
    fn fstat(&self, file: &Self::File) -> Result<Stat>;
    fn stat(&self, path: &str) -> Result<Stat>;

    fn mkdir(&self, path: &str) -> Result<()>;
    fn rmdir(&self, path: &str) -> Result<()>;
    fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;
    fn link(&self, old_path: &str, new_path: &str) -> Result<()>;
    fn unlink(&self, path: &str) -> Result<()>;
    fn opendir(&self, path: &str) -> Result<Self::File>;
    /// 读取至多`count`个目录项，返回空表示已读完
    fn readdir(&self, dir: &mut Self::File, count: usize) -> Result<Vec<DirEntry>>;
}
