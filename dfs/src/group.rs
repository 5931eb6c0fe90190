//! # 分配器层
//!
//! 块与 inode 都从块组位图中分配。每组在内存中维护“首个可能空闲”的提示，
//! 提示以下的位全部已置位，扫描从提示开始。

use enumflags2::BitFlags;
use vfs::{Error, Result};

use crate::dfs::DiskFileSystem;
use crate::layout::{DiskInode, GroupDesc, InodeFlag, OnDisk, bitmap};
use crate::{BlockNo, InodeNo};

/// 块组描述符与其运行时提示
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub desc: GroupDesc,
    /// 组内相对块号
    pub first_free_block: u32,
    /// 组内相对 inode 号
    pub first_free_inode: u32,
}

impl Group {
    pub fn new(desc: GroupDesc, first_free_inode: u32) -> Self {
        Self {
            desc,
            first_free_block: 0,
            first_free_inode,
        }
    }
}

/* 块分配 */

impl DiskFileSystem {
    #[inline]
    fn group_of_block(&self, block: BlockNo) -> usize {
        (block.raw() / self.sb.blocks_per_group) as usize
    }

    #[inline]
    pub(crate) fn group_of_inode(&self, ino: InodeNo) -> usize {
        (ino.raw() / self.sb.inodes_per_group) as usize
    }

    /// 分配一个数据块，优先在`goal`所在的组内、`goal`之后寻找
    pub fn new_block(&mut self, goal: Option<BlockNo>) -> Result<BlockNo> {
        let count = self.groups.len();
        let start = goal
            .map(|b| self.group_of_block(b))
            .filter(|&g| g < count)
            .unwrap_or(0);

        for i in 0..count {
            let g = (start + i) % count;
            if self.groups[g].desc.free_block_count == 0 {
                continue;
            }

            let base = g as u32 * self.sb.blocks_per_group;
            let goal = goal
                .filter(|_| i == 0)
                .map(|b| b.raw() - base);
            if let Some(rel) = self.take_block_bit(g, goal)? {
                let block = BlockNo::new(base + rel);
                self.groups[g].desc.free_block_count -= 1;
                self.sb.free_block_count -= 1;
                self.super_dirty = true;
                self.put_group_desc(g)?;
                log::debug!("new block {block} in group {g}");
                return Ok(block);
            }

            log::error!("group {g} claims free blocks but its bitmap is full");
            return Err(Error::Corrupted);
        }

        Err(Error::NoSpace)
    }

    /// 在第`g`组的块位图中找到并置位一个 0 位
    fn take_block_bit(&mut self, g: usize, goal: Option<u32>) -> Result<Option<u32>> {
        let group = &self.groups[g];
        let hint = group.first_free_block;
        let end = group.desc.block_count as usize;
        let buf = self
            .pool
            .get(BlockNo::new(group.desc.block_bitmap_block))?;
        let mut bitmap = buf.lock();

        let from = (goal.map_or(hint, |goal| goal.max(hint)) as usize).min(end);
        let found = bitmap::find_zero(bitmap.data(), from, end)
            .map(|bit| (bit, from == hint as usize))
            .or_else(|| {
                bitmap::find_zero(bitmap.data(), hint as usize, from).map(|bit| (bit, true))
            });

        let Some((bit, from_hint)) = found else {
            return Ok(None);
        };
        bitmap::set(bitmap.data_mut(), bit);
        if from_hint {
            self.groups[g].first_free_block = bit as u32 + 1;
        }

        Ok(Some(bit as u32))
    }

    /// 释放一批块，同组的连续项共享一次位图读取
    pub fn free_blocks(&mut self, blocks: &[BlockNo]) -> Result<()> {
        let mut rest = blocks;
        while let Some(&first) = rest.first() {
            let g = self.group_of_block(first);
            if g >= self.groups.len() {
                log::error!("free of block {first} beyond the filesystem");
                return Err(Error::Corrupted);
            }
            let run = rest
                .iter()
                .take_while(|&&b| self.group_of_block(b) == g)
                .count();
            self.free_in_group(g, &rest[..run])?;
            rest = &rest[run..];
        }
        Ok(())
    }

    fn free_in_group(&mut self, g: usize, blocks: &[BlockNo]) -> Result<()> {
        let base = g as u32 * self.sb.blocks_per_group;
        let desc = &self.groups[g].desc;
        let data_start = desc.inode_table_block + self.geo.inode_table_blocks;
        let end = base + desc.block_count;
        let buf = self.pool.get(BlockNo::new(desc.block_bitmap_block))?;

        let mut freed = 0;
        let mut lowest = self.groups[g].first_free_block;
        let mut result = Ok(());
        {
            let mut bitmap = buf.lock();
            for &block in blocks {
                let raw = block.raw();
                if raw < data_start
                    || raw >= end
                    || !bitmap::clear(bitmap.data_mut(), (raw - base) as usize)
                {
                    log::error!("bad free of block {block}");
                    result = Err(Error::Corrupted);
                    break;
                }
                freed += 1;
                lowest = lowest.min(raw - base);
            }
        }

        let group = &mut self.groups[g];
        group.first_free_block = lowest;
        group.desc.free_block_count += freed;
        self.sb.free_block_count += freed;
        self.super_dirty = true;
        self.put_group_desc(g)?;
        log::debug!("freed {freed} blocks in group {g}");

        result
    }
}

/* inode 分配 */

impl DiskFileSystem {
    /// inode 描述符所在的块与块内偏移
    pub(crate) fn inode_pos(&self, ino: InodeNo) -> Result<(BlockNo, usize)> {
        if ino.raw() >= self.sb.inode_count {
            log::error!("inode {ino} out of range");
            return Err(Error::Corrupted);
        }
        let ipg = self.sb.inodes_per_group;
        let index = ino.raw() % ipg;
        let table = self.groups[self.group_of_inode(ino)].desc.inode_table_block;
        let block = table + index / self.geo.inodes_per_block;
        let offset = (index % self.geo.inodes_per_block) as usize * DiskInode::SIZE;

        Ok((BlockNo::new(block), offset))
    }

    /// 分配一个 inode，优先放在父目录所在的组
    pub fn new_inode(
        &mut self,
        parent: Option<InodeNo>,
        flags: BitFlags<InodeFlag>,
    ) -> Result<InodeNo> {
        let count = self.groups.len();
        let start = parent
            .map(|p| self.group_of_inode(p))
            .filter(|&g| g < count)
            .unwrap_or(0);

        let Some(g) = (0..count)
            .map(|i| (start + i) % count)
            .find(|&g| self.groups[g].desc.free_inode_count != 0)
        else {
            return Err(Error::NoSpace);
        };

        let ipg = self.sb.inodes_per_group;
        let hint = self.groups[g].first_free_inode as usize;
        let found = {
            let buf = self
                .pool
                .get(BlockNo::new(self.groups[g].desc.inode_bitmap_block))?;
            let mut bitmap = buf.lock();
            let found = bitmap::find_zero(bitmap.data(), hint, ipg as usize)
                .map(|bit| (bit, g as u32 * ipg + bit as u32))
                .filter(|&(_, ino)| ino >= self.sb.reserved_inodes);
            if let Some((bit, _)) = found {
                bitmap::set(bitmap.data_mut(), bit);
            }
            found
        };

        let Some((_, ino)) = found else {
            log::error!("inode bitmap of group {g} disagrees with its counter");
            return Err(Error::Corrupted);
        };
        let ino = InodeNo::new(ino);

        let group = &mut self.groups[g];
        group.first_free_inode = (ino.raw() - g as u32 * ipg) + 1;
        group.desc.free_inode_count -= 1;
        self.sb.free_inode_count -= 1;
        self.super_dirty = true;
        self.put_group_desc(g)?;

        let (block, offset) = self.inode_pos(ino)?;
        let desc = DiskInode::new(flags, self.now());
        self.pool.get(block)?.lock().write(offset, &desc);
        log::debug!("new inode {ino} in group {g}");

        Ok(ino)
    }

    /// 释放 inode，调用者应已将其截断为空
    pub fn free_inode(&mut self, ino: InodeNo) -> Result<()> {
        if ino.raw() < self.sb.reserved_inodes {
            log::error!("free of reserved inode {ino}");
            return Err(Error::Corrupted);
        }
        let (block, offset) = self.inode_pos(ino)?;
        let g = self.group_of_inode(ino);
        let rel = ino.raw() - g as u32 * self.sb.inodes_per_group;

        let was_set = self
            .pool
            .get(BlockNo::new(self.groups[g].desc.inode_bitmap_block))?
            .lock()
            .map_mut(|raw| bitmap::clear(raw, rel as usize));
        if !was_set {
            log::error!("double free of inode {ino}");
            return Err(Error::Corrupted);
        }

        self.pool
            .get(block)?
            .lock()
            .write(offset, &DiskInode::default());

        let group = &mut self.groups[g];
        group.first_free_inode = group.first_free_inode.min(rel);
        group.desc.free_inode_count += 1;
        self.sb.free_inode_count += 1;
        self.super_dirty = true;
        self.put_group_desc(g)?;
        log::debug!("freed inode {ino}");

        Ok(())
    }

    /// 块是否已分配
    pub fn block_in_use(&self, block: BlockNo) -> Result<bool> {
        let g = self.group_of_block(block);
        if g >= self.groups.len() {
            return Err(Error::InvalidInput);
        }
        let rel = block.raw() - g as u32 * self.sb.blocks_per_group;
        let buf = self
            .pool
            .get(BlockNo::new(self.groups[g].desc.block_bitmap_block))?;
        let used = buf.lock().map(|raw| bitmap::test(raw, rel as usize));
        Ok(used)
    }

    /// 所有组位图中 0 位的总数
    pub fn count_free_blocks(&self) -> Result<u64> {
        let mut free = 0;
        for group in &self.groups {
            let buf = self
                .pool
                .get(BlockNo::new(group.desc.block_bitmap_block))?;
            free += buf
                .lock()
                .map(|raw| bitmap::count_zeros(raw, group.desc.block_count as usize));
        }
        Ok(free as u64)
    }
}
