//! # 目录层
//!
//! 目录的数据块由变长目录项铺满，见 [`crate::layout::dir_entry`]。
//! 目录大小总是块大小的整数倍。

use alloc::vec::Vec;
use core::ops::ControlFlow;

use vfs::{Error, Result};

use crate::dfs::DiskFileSystem;
use crate::inode::Inode;
use crate::layout::dir_entry::{self, Slot};
use crate::{InodeNo, MAXFNAME};

/// 检查目录项名字
pub(crate) fn check_name(name: &[u8]) -> Result<()> {
    if name.len() > MAXFNAME {
        return Err(Error::NameTooLong);
    }
    if name.is_empty() || name.contains(&b'/') || name.contains(&0) {
        return Err(Error::InvalidInput);
    }
    Ok(())
}

impl DiskFileSystem {
    /// 目录的块数
    fn dir_blocks(&self, dir: &Inode) -> Result<u64> {
        Ok(dir.desc()?.size / self.geo.block_size as u64)
    }

    /// 在`dir`的每个数据块上执行`f`，直到它返回`Some`
    fn scan_dir<V>(
        &self,
        dir: &Inode,
        mut f: impl FnMut(&[u8]) -> Result<Option<V>>,
    ) -> Result<Option<V>> {
        for iblock in 0..self.dir_blocks(dir)? {
            let Some(block) = self.get_inode_block(dir, iblock)? else {
                continue;
            };
            let found = self.pool.get(block)?.lock().map(&mut f)?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// 按名字查找目录项
    pub fn find_dir_entry(&self, dir: &Inode, name: &[u8]) -> Result<Option<InodeNo>> {
        self.scan_dir(dir, |raw| {
            Ok(dir_entry::find(raw, name)?.map(|rec| InodeNo::new(rec.ino)))
        })
    }

    /// 添加目录项，首次适配已有的空位，没有空位时目录增长一块
    pub fn add_dir_entry(&mut self, dir: &Inode, name: &[u8], ino: InodeNo) -> Result<()> {
        check_name(name)?;
        if self.find_dir_entry(dir, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let needed = dir_entry::record_len(name.len());
        for iblock in 0..self.dir_blocks(dir)? {
            let Some(block) = self.get_inode_block(dir, iblock)? else {
                continue;
            };
            let buf = self.pool.get(block)?;
            let mut buf = buf.lock();
            if let Some(slot) = dir_entry::find_slot(buf.data(), needed)? {
                dir_entry::place(buf.data_mut(), slot, name, ino.raw());
                drop(buf);
                self.touch(dir)?;
                return Ok(());
            }
        }

        let block = self.expand_inode(dir)?;
        let block_size = self.geo.block_size;
        self.pool.get(block)?.lock().map_mut(|raw| {
            dir_entry::init_block(raw);
            let slot = Slot::Tombstone {
                offset: 0,
                reclen: block_size,
            };
            dir_entry::place(raw, slot, name, ino.raw());
        });
        log::debug!("directory {} grows to {} bytes", dir.ino(), dir.desc()?.size);

        Ok(())
    }

    /// 改写目录项指向的 inode，返回原先的 inode
    pub fn modify_dir_entry(&mut self, dir: &Inode, name: &[u8], ino: InodeNo) -> Result<InodeNo> {
        for iblock in 0..self.dir_blocks(dir)? {
            let Some(block) = self.get_inode_block(dir, iblock)? else {
                continue;
            };
            let buf = self.pool.get(block)?;
            let mut buf = buf.lock();
            if let Some((offset, prev)) =
                dir_entry::find(buf.data(), name)?.map(|rec| (rec.offset, rec.ino))
            {
                dir_entry::set_ino(buf.data_mut(), offset, ino.raw());
                drop(buf);
                self.touch(dir)?;
                return Ok(InodeNo::new(prev));
            }
        }

        Err(Error::NotFound)
    }

    /// 删除目录项，返回它指向的 inode
    pub fn delete_dir_entry(&mut self, dir: &Inode, name: &[u8]) -> Result<InodeNo> {
        for iblock in 0..self.dir_blocks(dir)? {
            let Some(block) = self.get_inode_block(dir, iblock)? else {
                continue;
            };
            let removed = self
                .pool
                .get(block)?
                .lock()
                .map_mut(|raw| dir_entry::remove(raw, name))?;
            if let Some(ino) = removed {
                self.touch(dir)?;
                return Ok(InodeNo::new(ino));
            }
        }

        Err(Error::NotFound)
    }

    /// 按顺序对每个活目录项调用`filldir`，它返回`Break`时停止
    ///
    /// 回调在缓冲区锁之外执行
    pub fn iterate_dir(
        &self,
        dir: &Inode,
        mut filldir: impl FnMut(&[u8], InodeNo) -> ControlFlow<()>,
    ) -> Result<()> {
        for iblock in 0..self.dir_blocks(dir)? {
            let Some(block) = self.get_inode_block(dir, iblock)? else {
                continue;
            };
            let entries = self.pool.get(block)?.lock().map(collect_live)?;
            for (name, ino) in entries {
                if filldir(&name, InodeNo::new(ino)).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    pub fn is_empty_dir(&self, dir: &Inode) -> Result<bool> {
        let mut empty = true;
        self.iterate_dir(dir, |_, _| {
            empty = false;
            ControlFlow::Break(())
        })?;
        Ok(empty)
    }

    /// 从游标`pos`起读取至多`count`个活目录项，返回目录项与新的游标
    ///
    /// 游标是目录内的字节偏移，目录在两次调用之间被修改时仍然有效
    pub fn read_dir(
        &self,
        dir: &Inode,
        mut pos: u64,
        count: usize,
    ) -> Result<(Vec<(Vec<u8>, InodeNo)>, u64)> {
        let bs = self.geo.block_size as u64;
        let nblocks = self.dir_blocks(dir)?;
        let mut entries = Vec::new();

        while entries.len() < count && pos / bs < nblocks {
            let iblock = pos / bs;
            let within = (pos % bs) as usize;
            let Some(block) = self.get_inode_block(dir, iblock)? else {
                pos = (iblock + 1) * bs;
                continue;
            };

            let buf = self.pool.get(block)?;
            let buf = buf.lock();
            let mut next = (iblock + 1) * bs;
            for rec in dir_entry::records(buf.data()) {
                let rec = rec?;
                if rec.offset < within || !rec.is_live() {
                    continue;
                }
                if entries.len() == count {
                    next = iblock * bs + rec.offset as u64;
                    break;
                }
                entries.push((rec.name.to_vec(), InodeNo::new(rec.ino)));
            }
            pos = next;
        }

        Ok((entries, pos))
    }

    /// 更新目录的修改时间
    fn touch(&self, dir: &Inode) -> Result<()> {
        let now = self.now();
        dir.update(|desc| desc.mtime = now)
    }
}

fn collect_live(raw: &[u8]) -> Result<Vec<(Vec<u8>, u32)>> {
    let mut entries = Vec::new();
    for rec in dir_entry::records(raw) {
        let rec = rec?;
        if rec.is_live() {
            entries.push((rec.name.to_vec(), rec.ino));
        }
    }
    Ok(entries)
}
