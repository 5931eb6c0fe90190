use crate::DirEntryType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub inode: u64,
    pub mode: DirEntryType,
    /// Hard link count
    pub links: u32,
    /// File size
    pub size: u64,
    /// Optimal I/O block size
    pub block_size: u64,
    /// Occupying blocks, index blocks included
    pub blocks: u64,
    /// Creation time, seconds since the epoch
    pub ctime: u64,
    /// Last modification time
    pub mtime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u64,
    pub blocks: u64,
    pub free_blocks: u64,
    pub inodes: u64,
    pub free_inodes: u64,
}
