//! # 索引节点层
//!
//! inode 的块目录是一棵统一深度的索引树：深度为`d`时，
//! 16 个槽位各自是一棵`d`层索引树的根。逻辑块越界时树长高一层，
//! 截断后能装进更矮的树时再降低。

use alloc::vec::Vec;

use vfs::{Error, Result};

use crate::buffer::BufferRef;
use crate::dfs::DiskFileSystem;
use crate::layout::{BlockDir, DiskInode};
use crate::{BlockNo, InodeNo, MAX_DEPTH, TOPBLOCKDIR_SIZE};

/// inode 的运行时句柄，持有描述符所在的缓冲区
#[derive(Clone)]
pub struct Inode {
    ino: InodeNo,
    buf: BufferRef,
    offset: usize,
}

impl Inode {
    #[inline]
    pub fn ino(&self) -> InodeNo {
        self.ino
    }

    pub fn desc(&self) -> Result<DiskInode> {
        self.buf.lock().read(self.offset)
    }

    pub fn put(&self, desc: &DiskInode) {
        self.buf.lock().write(self.offset, desc);
    }

    /// 读出描述符，修改后写回
    pub fn update<V>(&self, f: impl FnOnce(&mut DiskInode) -> V) -> Result<V> {
        let mut buf = self.buf.lock();
        let mut desc: DiskInode = buf.read(self.offset)?;
        let ret = f(&mut desc);
        buf.write(self.offset, &desc);
        Ok(ret)
    }

    #[inline]
    pub fn is_dir(&self) -> Result<bool> {
        Ok(self.desc()?.is_dir())
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode").field("ino", &self.ino).finish()
    }
}

/* 块映射 */

impl DiskFileSystem {
    pub fn get_inode(&self, ino: InodeNo) -> Result<Inode> {
        let (block, offset) = self.inode_pos(ino)?;
        Ok(Inode {
            ino,
            buf: self.pool.get(block)?,
            offset,
        })
    }

    /// `levels`层索引树能寻址的逻辑块数，溢出时饱和
    #[inline]
    fn span(&self, levels: u32) -> u64 {
        1u64.checked_shl(self.geo.log_ptrs * levels).unwrap_or(u64::MAX)
    }

    /// 逻辑块`iblock`对应的物理块，路径上任一层缺失时为空洞
    pub fn get_inode_block(&self, inode: &Inode, iblock: u64) -> Result<Option<BlockNo>> {
        let desc = inode.desc()?;
        let Some(route) = desc.dir.route(iblock, self.geo.log_ptrs) else {
            return Ok(None);
        };

        let mut cur = desc.dir.slot(route.slot);
        for &index in route.indices() {
            let Some(block) = cur else {
                return Ok(None);
            };
            cur = self.pool.get(block)?.lock().ptr(index);
        }

        Ok(cur)
    }

    /// 把逻辑块`iblock`映射到`block`，返回原先的映射
    ///
    /// 缺失的索引块按需分配，超出当前容量时树长高
    pub fn set_inode_block(
        &mut self,
        inode: &Inode,
        iblock: u64,
        block: BlockNo,
    ) -> Result<Option<BlockNo>> {
        let mut desc = inode.desc()?;
        let ret = self.map_route(&mut desc, iblock, block);
        inode.put(&desc);
        ret
    }

    fn map_route(
        &mut self,
        desc: &mut DiskInode,
        iblock: u64,
        block: BlockNo,
    ) -> Result<Option<BlockNo>> {
        let log_ptrs = self.geo.log_ptrs;
        let route = loop {
            if let Some(route) = desc.dir.route(iblock, log_ptrs) {
                break route;
            }
            if desc.dir.depth() as usize >= MAX_DEPTH {
                return Err(Error::FileTooLarge);
            }

            if desc.dir.is_empty() {
                desc.dir.grow(None);
            } else {
                let root = self.new_index_block(block)?;
                {
                    let buf = self.pool.get(root)?;
                    let mut buf = buf.lock();
                    for i in 0..TOPBLOCKDIR_SIZE {
                        buf.set_ptr(i, desc.dir.slot(i));
                    }
                }
                desc.dir.grow(Some(root));
                desc.blocks += 1;
            }
            log::debug!("block tree grows to depth {}", desc.dir.depth());
        };

        let Some((&last, inner)) = route.indices().split_last() else {
            let old = desc.dir.slot(route.slot);
            desc.dir.set_slot(route.slot, Some(block));
            if old.is_none() {
                desc.blocks += 1;
            }
            return Ok(old);
        };

        let mut parent = match desc.dir.slot(route.slot) {
            Some(b) => b,
            None => {
                let b = self.new_index_block(block)?;
                desc.dir.set_slot(route.slot, Some(b));
                desc.blocks += 1;
                b
            }
        };
        for &index in inner {
            let child = self.pool.get(parent)?.lock().ptr(index);
            parent = match child {
                Some(b) => b,
                None => {
                    let b = self.new_index_block(block)?;
                    self.pool.get(parent)?.lock().set_ptr(index, Some(b));
                    desc.blocks += 1;
                    b
                }
            };
        }

        let buf = self.pool.get(parent)?;
        let mut buf = buf.lock();
        let old = buf.ptr(last);
        buf.set_ptr(last, Some(block));
        if old.is_none() {
            desc.blocks += 1;
        }

        Ok(old)
    }

    fn new_index_block(&mut self, goal: BlockNo) -> Result<BlockNo> {
        let block = self.new_block(Some(goal))?;
        self.pool.get_zeroed(block)?;
        Ok(block)
    }

    /// 新数据块的位置提示：紧跟前一个逻辑块，否则靠近 inode 表
    fn block_goal(&self, inode: &Inode, iblock: u64) -> Result<BlockNo> {
        if let Some(iblock) = iblock.checked_sub(1) {
            if let Some(prev) = self.get_inode_block(inode, iblock)? {
                return Ok(prev + 1);
            }
        }
        Ok(self.inode_pos(inode.ino())?.0)
    }

    /// 取得逻辑块对应的物理块，空洞处分配一个清零的新块
    pub(crate) fn map_block(&mut self, inode: &Inode, iblock: u64) -> Result<BlockNo> {
        if let Some(block) = self.get_inode_block(inode, iblock)? {
            return Ok(block);
        }

        let goal = self.block_goal(inode, iblock)?;
        let block = self.new_block(Some(goal))?;
        self.pool.get_zeroed(block)?;
        if let Err(e) = self.set_inode_block(inode, iblock, block) {
            self.free_blocks(&[block])?;
            return Err(e);
        }

        Ok(block)
    }

    /// 在文件末尾追加一个清零的块，文件大小随之延伸到块尾
    pub fn expand_inode(&mut self, inode: &Inode) -> Result<BlockNo> {
        let bs = self.geo.block_size as u64;
        let iblock = inode.desc()?.size.div_ceil(bs);
        let block = self.map_block(inode, iblock)?;

        let now = self.now();
        inode.update(|desc| {
            desc.size = (iblock + 1) * bs;
            desc.mtime = now;
        })?;

        Ok(block)
    }
}

/* 截断 */

impl DiskFileSystem {
    /// 只保留前`blocks`个逻辑块，其余自尾向头释放
    pub fn truncate_inode(&mut self, inode: &Inode, blocks: u64) -> Result<()> {
        let mut desc = inode.desc()?;
        let ret = self.truncate_desc(&mut desc, blocks);
        inode.put(&desc);
        ret
    }

    fn truncate_desc(&mut self, desc: &mut DiskInode, keep: u64) -> Result<()> {
        let depth = desc.dir.depth();
        let span = self.span(depth);

        for slot in (0..TOPBLOCKDIR_SIZE).rev() {
            let start = (slot as u64).saturating_mul(span);
            let Some(root) = desc.dir.slot(slot) else {
                if start < keep {
                    break;
                }
                continue;
            };

            if start >= keep {
                desc.dir.set_slot(slot, None);
                self.free_tree(desc, root, depth)?;
                continue;
            }

            let partial = depth > 0 && keep - start < span;
            if partial && self.truncate_tree(desc, root, depth, keep - start)? {
                desc.dir.set_slot(slot, None);
                self.free_blocks(&[root])?;
                desc.blocks = desc.blocks.saturating_sub(1);
            }
            break;
        }

        // 能装进更矮的树时降低深度
        while desc.dir.depth() > 0
            && keep <= BlockDir::capacity_at(desc.dir.depth() - 1, self.geo.log_ptrs)
        {
            let mut slots = [0; TOPBLOCKDIR_SIZE];
            match desc.dir.slot(0) {
                Some(root) => {
                    self.pool.get(root)?.lock().map(|raw| {
                        for (i, slot) in slots.iter_mut().enumerate() {
                            *slot = crate::layout::read_ptr(raw, i);
                        }
                    });
                    desc.dir.shrink(slots);
                    self.free_blocks(&[root])?;
                    desc.blocks = desc.blocks.saturating_sub(1);
                }
                None => desc.dir.shrink(slots),
            }
            log::debug!("block tree shrinks to depth {}", desc.dir.depth());
        }

        let bs = self.geo.block_size as u64;
        desc.size = desc.size.min(keep.saturating_mul(bs));

        Ok(())
    }

    /// 截断以`block`为根的`levels`层索引树，只保留前`keep`个逻辑块
    ///
    /// 返回该索引块是否已经变空
    fn truncate_tree(
        &mut self,
        desc: &mut DiskInode,
        block: BlockNo,
        levels: u32,
        keep: u64,
    ) -> Result<bool> {
        let ptrs = 1usize << self.geo.log_ptrs;
        let span = self.span(levels - 1);
        let whole = keep.div_ceil(span);
        if whole >= ptrs as u64 {
            return Ok(false);
        }
        let first = whole as usize;

        let buf = self.pool.get(block)?;
        let doomed: Vec<(usize, BlockNo)> = {
            let buf = buf.lock();
            (first..ptrs)
                .filter_map(|i| buf.ptr(i).map(|child| (i, child)))
                .collect()
        };

        if levels == 1 {
            {
                let mut buf = buf.lock();
                for &(i, _) in &doomed {
                    buf.set_ptr(i, None);
                }
            }
            let blocks = doomed.iter().rev().map(|&(_, b)| b).collect::<Vec<_>>();
            self.free_blocks(&blocks)?;
            desc.blocks = desc.blocks.saturating_sub(blocks.len() as u32);
        } else {
            for &(i, child) in doomed.iter().rev() {
                buf.lock().set_ptr(i, None);
                self.free_tree(desc, child, levels - 1)?;
            }

            // 跨越边界的子树
            if keep % span != 0 {
                let index = first - 1;
                let child = buf.lock().ptr(index);
                if let Some(child) = child {
                    let rest = keep - index as u64 * span;
                    if self.truncate_tree(desc, child, levels - 1, rest)? {
                        buf.lock().set_ptr(index, None);
                        self.free_blocks(&[child])?;
                        desc.blocks = desc.blocks.saturating_sub(1);
                    }
                }
            }
        }

        let empty = buf.lock().map(|raw| raw.iter().all(|&b| b == 0));
        Ok(empty)
    }

    /// 释放以`block`为根的整棵树
    fn free_tree(&mut self, desc: &mut DiskInode, block: BlockNo, levels: u32) -> Result<()> {
        if levels > 0 {
            self.truncate_tree(desc, block, levels, 0)?;
        }
        self.free_blocks(&[block])?;
        desc.blocks = desc.blocks.saturating_sub(1);
        Ok(())
    }
}

/* 按字节读写 */

impl DiskFileSystem {
    /// 从`offset`处读取，空洞读出 0，至文件末尾为止
    pub fn read_inode(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = inode.desc()?.size;
        if offset >= size {
            return Ok(0);
        }

        let bs = self.geo.block_size as u64;
        let end = size.min(offset.saturating_add(buf.len() as u64));
        let mut pos = offset;
        while pos < end {
            let within = (pos % bs) as usize;
            let n = (bs - within as u64).min(end - pos) as usize;
            let dst = &mut buf[(pos - offset) as usize..][..n];

            match self.get_inode_block(inode, pos / bs)? {
                Some(block) => self
                    .pool
                    .get(block)?
                    .lock()
                    .map(|raw| dst.copy_from_slice(&raw[within..within + n])),
                None => dst.fill(0),
            }
            pos += n as u64;
        }

        Ok((end - offset) as usize)
    }

    /// 向`offset`处写入，按需分配块并延伸文件
    ///
    /// 中途失败时返回已写入的字节数，一个字节都没写入才返回错误
    pub fn write_inode(&mut self, inode: &Inode, offset: u64, data: &[u8]) -> Result<usize> {
        offset
            .checked_add(data.len() as u64)
            .ok_or(Error::FileTooLarge)?;

        let bs = self.geo.block_size as usize;
        let mut written = 0;
        let mut failure = None;
        while written < data.len() {
            let pos = offset + written as u64;
            let within = (pos % bs as u64) as usize;
            let n = (bs - within).min(data.len() - written);

            let src = &data[written..written + n];
            if let Err(e) = self.write_in_block(inode, pos / bs as u64, within, src) {
                log::debug!("write to inode {} stops at {pos}: {e}", inode.ino());
                failure = Some(e);
                break;
            }
            written += n;
        }

        if written > 0 {
            let end = offset + written as u64;
            let now = self.now();
            inode.update(|desc| {
                desc.size = desc.size.max(end);
                desc.mtime = now;
            })?;
        }

        match failure {
            Some(e) if written == 0 => Err(e),
            _ => Ok(written),
        }
    }

    fn write_in_block(
        &mut self,
        inode: &Inode,
        iblock: u64,
        within: usize,
        src: &[u8],
    ) -> Result<()> {
        let block = self.map_block(inode, iblock)?;
        self.pool
            .get(block)?
            .lock()
            .map_mut(|raw| raw[within..within + src.len()].copy_from_slice(src));
        Ok(())
    }

    /// 改变文件大小：变小时截断并清零末块尾部，变大时留下空洞
    pub fn resize_inode(&mut self, inode: &Inode, size: u64) -> Result<()> {
        let bs = self.geo.block_size as u64;
        if size.div_ceil(bs) > BlockDir::capacity_at(MAX_DEPTH as u32, self.geo.log_ptrs) {
            return Err(Error::FileTooLarge);
        }

        if size < inode.desc()?.size {
            self.truncate_inode(inode, size.div_ceil(bs))?;
            let within = (size % bs) as usize;
            if within != 0 {
                if let Some(block) = self.get_inode_block(inode, size / bs)? {
                    self.pool.get(block)?.lock().data_mut()[within..].fill(0);
                }
            }
        }

        let now = self.now();
        inode.update(|desc| {
            desc.size = size;
            desc.mtime = now;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FsOptions;
    use alloc::sync::Arc;
    use alloc::vec;
    use block_dev::RamDisk;
    use enumflags2::BitFlags;

    fn mkfs() -> DiskFileSystem {
        let disk = Arc::new(RamDisk::with_bytes(8 << 20));
        let options = FsOptions {
            block_size: 1024,
            ..Default::default()
        };
        DiskFileSystem::create(disk.clone(), &options).unwrap();
        DiskFileSystem::open(disk, &options).unwrap()
    }

    #[test]
    fn sparse_write_and_read() {
        let mut fs = mkfs();
        let ino = fs.new_inode(None, BitFlags::empty()).unwrap();
        let inode = fs.get_inode(ino).unwrap();

        assert_eq!(fs.write_inode(&inode, 5000, b"hello").unwrap(), 5);
        let desc = inode.desc().unwrap();
        assert_eq!(desc.size, 5005);
        assert_eq!(desc.blocks, 1);
        assert_eq!(fs.get_inode_block(&inode, 0).unwrap(), None);

        let mut buf = vec![0xFF; 6000];
        assert_eq!(fs.read_inode(&inode, 0, &mut buf).unwrap(), 5005);
        assert!(buf[..5000].iter().all(|&b| b == 0));
        assert_eq!(&buf[5000..5005], b"hello");
    }

    #[test]
    fn grow_and_shrink_tree() {
        let mut fs = mkfs();
        let free = fs.statfs().free_blocks;
        let ino = fs.new_inode(None, BitFlags::empty()).unwrap();
        let inode = fs.get_inode(ino).unwrap();

        // 跨过 16 个直接块，树长到 1 层
        let data = vec![0x5A; 1024 * 20];
        assert_eq!(fs.write_inode(&inode, 0, &data).unwrap(), data.len());
        let desc = inode.desc().unwrap();
        assert_eq!(desc.dir.depth(), 1);
        assert_eq!(desc.blocks, 21);
        assert_eq!(fs.statfs().free_blocks, free - 21);

        fs.resize_inode(&inode, 1500).unwrap();
        let desc = inode.desc().unwrap();
        assert_eq!(desc.dir.depth(), 0);
        assert_eq!(desc.blocks, 2);
        assert_eq!(desc.size, 1500);

        // 截断点之后的字节被清零
        fs.resize_inode(&inode, 2048).unwrap();
        let mut buf = [0xFF; 548];
        fs.read_inode(&inode, 1500, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        fs.truncate_inode(&inode, 0).unwrap();
        let desc = inode.desc().unwrap();
        assert_eq!((desc.blocks, desc.dir.depth(), desc.size), (0, 0, 0));
        assert_eq!(fs.statfs().free_blocks, free);
    }

    #[test]
    fn too_deep() {
        let mut fs = mkfs();
        let ino = fs.new_inode(None, BitFlags::empty()).unwrap();
        let inode = fs.get_inode(ino).unwrap();
        let block = fs.new_block(None).unwrap();

        let beyond = BlockDir::capacity_at(MAX_DEPTH as u32, 8);
        assert_eq!(
            fs.set_inode_block(&inode, beyond, block),
            Err(Error::FileTooLarge)
        );
    }
}
