use enumflags2::{BitFlags, bitflags};
use vfs::{Error, Result};

use super::{BlockDir, OnDisk, Reader, Writer};
use crate::{MAX_DEPTH, TOPBLOCKDIR_SIZE};

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeFlag {
    Directory = 1,
}

/// 磁盘上的 inode 描述符，128 字节
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInode {
    pub flags: BitFlags<InodeFlag>,
    pub ctime: u32,
    pub mtime: u32,
    pub size: u64,
    pub links: u32,
    /// 数据块与索引块的总数
    pub blocks: u32,
    pub dir: BlockDir,
}

impl DiskInode {
    pub fn new(flags: BitFlags<InodeFlag>, now: u32) -> Self {
        let links = if flags.contains(InodeFlag::Directory) { 2 } else { 1 };
        Self {
            flags,
            ctime: now,
            mtime: now,
            links,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(InodeFlag::Directory)
    }
}

impl OnDisk for DiskInode {
    const SIZE: usize = 128;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw);
        let flags = BitFlags::from_bits_truncate(r.u32());
        let ctime = r.u32();
        let mtime = r.u32();
        let size = r.u64();
        let links = r.u32();
        let blocks = r.u32();
        let depth = r.u32();
        r.skip(32);

        if depth as usize > MAX_DEPTH {
            log::error!("inode depth {depth} exceeds {MAX_DEPTH}");
            return Err(Error::Corrupted);
        }
        let mut slots = [0; TOPBLOCKDIR_SIZE];
        for slot in &mut slots {
            *slot = r.u32();
        }

        Ok(Self {
            flags,
            ctime,
            mtime,
            size,
            links,
            blocks,
            dir: BlockDir::from_raw(depth, slots),
        })
    }

    fn encode(&self, raw: &mut [u8]) {
        let mut w = Writer::new(raw);
        w.u32(self.flags.bits());
        w.u32(self.ctime);
        w.u32(self.mtime);
        w.u64(self.size);
        w.u32(self.links);
        w.u32(self.blocks);
        w.u32(self.dir.depth());
        w.zero(32);
        for &slot in self.dir.raw_slots() {
            w.u32(slot);
        }
    }
}
