//! # 操作层
//!
//! 以 [`vfs::FileSystem`] 的形式对外提供文件与目录操作。
//! 整个文件系统由一把自旋锁保护，每个操作从头到尾持有它。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use enumflags2::BitFlags;
use spin::{Mutex, MutexGuard};
use vfs::{
    DirEntry, DirEntryType, Error, FileSystem, OpenFlag, Result, SeekFrom, Stat, StatFs, UTime,
};

use crate::dfs::DiskFileSystem;
use crate::inode::Inode;
use crate::layout::InodeFlag;
use crate::path::components;
use crate::{FsOptions, InodeNo, ROOT_INODE};

/// 可共享的已挂载 dfs
pub struct Dfs {
    inner: Mutex<DiskFileSystem>,
}

impl Dfs {
    #[inline]
    pub fn new(fs: DiskFileSystem) -> Self {
        Self {
            inner: Mutex::new(fs),
        }
    }

    /// 独占底层引擎
    #[inline]
    pub fn engine(&self) -> MutexGuard<'_, DiskFileSystem> {
        self.inner.lock()
    }
}

/// 打开的文件或目录
#[derive(Debug)]
pub struct File {
    inode: Inode,
    /// 文件的读写位置，目录的读取游标
    pos: u64,
    readable: bool,
    writable: bool,
    append: bool,
    kind: DirEntryType,
}

impl File {
    #[inline]
    pub fn ino(&self) -> InodeNo {
        self.inode.ino()
    }
}

impl FileSystem for Dfs {
    type Options = FsOptions;
    type File = File;

    const REENTRANT: bool = false;

    fn format(dev: Arc<dyn BlockDevice>, options: &FsOptions) -> Result<()> {
        DiskFileSystem::create(dev, options)
    }

    fn mount(dev: Arc<dyn BlockDevice>, options: &FsOptions) -> Result<Self> {
        DiskFileSystem::open(dev, options).map(Self::new)
    }

    fn unmount(self) -> Result<()> {
        self.inner.into_inner().close()
    }

    fn sync(&self) -> Result<()> {
        self.engine().sync()
    }

    fn statfs(&self) -> Result<StatFs> {
        Ok(self.engine().statfs())
    }

    fn open(&self, path: &str, flags: BitFlags<OpenFlag>) -> Result<File> {
        let [readable, writable] = OpenFlag::access(flags);
        let mut fs = self.engine();

        let ino = if components(path).next().is_none() {
            ROOT_INODE
        } else {
            let (parent, name) = fs.parse_name(path)?;
            match fs.find_dir_entry(&parent, name)? {
                Some(_) if flags.contains(OpenFlag::CREATE | OpenFlag::EXCL) => {
                    return Err(Error::AlreadyExists);
                }
                Some(ino) => ino,
                None if flags.contains(OpenFlag::CREATE) => {
                    fs.create_node(&parent, name, BitFlags::empty())?
                }
                None => return Err(Error::NotFound),
            }
        };

        let inode = fs.get_inode(ino)?;
        let is_dir = inode.is_dir()?;
        if is_dir && writable {
            return Err(Error::IsADirectory);
        }
        if flags.contains(OpenFlag::TRUNC) && writable {
            fs.resize_inode(&inode, 0)?;
        }
        *fs.open_inodes.entry(ino).or_insert(0) += 1;

        Ok(File {
            inode,
            pos: 0,
            readable,
            writable,
            append: flags.contains(OpenFlag::APPEND),
            kind: if is_dir {
                DirEntryType::Directory
            } else {
                DirEntryType::Regular
            },
        })
    }

    fn close(&self, file: File) -> Result<()> {
        self.engine().release(file.ino())
    }

    fn flush(&self, _file: &mut File) -> Result<()> {
        self.engine().sync()
    }

    fn read(&self, file: &mut File, buf: &mut [u8]) -> Result<usize> {
        if file.kind == DirEntryType::Directory {
            return Err(Error::IsADirectory);
        }
        if !file.readable {
            return Err(Error::InvalidInput);
        }

        let n = self.engine().read_inode(&file.inode, file.pos, buf)?;
        file.pos += n as u64;
        Ok(n)
    }

    fn write(&self, file: &mut File, buf: &[u8]) -> Result<usize> {
        if !file.writable {
            return Err(Error::InvalidInput);
        }

        let mut fs = self.engine();
        if file.append {
            file.pos = file.inode.desc()?.size;
        }
        let n = fs.write_inode(&file.inode, file.pos, buf)?;
        file.pos += n as u64;
        Ok(n)
    }

    fn tell(&self, file: &File) -> u64 {
        file.pos
    }

    fn lseek(&self, file: &mut File, pos: SeekFrom) -> Result<u64> {
        let _fs = self.engine();
        let pos = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => file.inode.desc()?.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => file.pos.checked_add_signed(delta),
        }
        .ok_or(Error::InvalidInput)?;

        file.pos = pos;
        Ok(pos)
    }

    fn chsize(&self, file: &mut File, size: u64) -> Result<()> {
        if file.kind == DirEntryType::Directory {
            return Err(Error::IsADirectory);
        }
        if !file.writable {
            return Err(Error::InvalidInput);
        }
        self.engine().resize_inode(&file.inode, size)
    }

    fn futime(&self, file: &mut File, times: UTime) -> Result<()> {
        let _fs = self.engine();
        set_times(&file.inode, times)
    }

    fn utime(&self, path: &str, times: UTime) -> Result<()> {
        let fs = self.engine();
        let inode = fs.get_inode(fs.lookup_name(ROOT_INODE, path)?)?;
        set_times(&inode, times)
    }

    fn fstat(&self, file: &File) -> Result<Stat> {
        self.engine().stat_of(&file.inode)
    }

    fn stat(&self, path: &str) -> Result<Stat> {
        let fs = self.engine();
        let inode = fs.get_inode(fs.lookup_name(ROOT_INODE, path)?)?;
        fs.stat_of(&inode)
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        if components(path).next().is_none() {
            return Err(Error::AlreadyExists);
        }
        let mut fs = self.engine();
        let (parent, name) = fs.parse_name(path)?;
        fs.create_node(&parent, name, InodeFlag::Directory.into())?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        if components(path).next().is_none() {
            return Err(Error::InvalidInput);
        }
        let mut fs = self.engine();
        let (parent, name) = fs.parse_name(path)?;
        let ino = fs.find_dir_entry(&parent, name)?.ok_or(Error::NotFound)?;
        let inode = fs.get_inode(ino)?;
        if !inode.is_dir()? {
            return Err(Error::NotADirectory);
        }
        if !fs.is_empty_dir(&inode)? {
            return Err(Error::DirectoryNotEmpty);
        }

        fs.delete_dir_entry(&parent, name)?;
        fs.drop_link(&inode)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old: Vec<&[u8]> = components(old_path).collect();
        let new: Vec<&[u8]> = components(new_path).collect();
        if old.is_empty() || new.is_empty() {
            return Err(Error::InvalidInput);
        }

        let mut fs = self.engine();
        let (src_dir, src_name) = fs.parse_name(old_path)?;
        let ino = fs.find_dir_entry(&src_dir, src_name)?.ok_or(Error::NotFound)?;
        let is_dir = fs.get_inode(ino)?.is_dir()?;
        // 目录不能移入自己的子树
        if is_dir && new.len() > old.len() && new.starts_with(&old) {
            return Err(Error::InvalidInput);
        }
        if old == new {
            return Ok(());
        }

        let (dst_dir, dst_name) = fs.parse_name(new_path)?;
        match fs.find_dir_entry(&dst_dir, dst_name)? {
            Some(target) if target == ino => return Ok(()),
            Some(target) => {
                let target = fs.get_inode(target)?;
                match (is_dir, target.is_dir()?) {
                    (true, false) => return Err(Error::NotADirectory),
                    (false, true) => return Err(Error::IsADirectory),
                    (true, true) if !fs.is_empty_dir(&target)? => {
                        return Err(Error::DirectoryNotEmpty);
                    }
                    _ => (),
                }
                fs.modify_dir_entry(&dst_dir, dst_name, ino)?;
                fs.drop_link(&target)?;
            }
            None => fs.add_dir_entry(&dst_dir, dst_name, ino)?,
        }

        fs.delete_dir_entry(&src_dir, src_name)?;
        Ok(())
    }

    fn link(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut fs = self.engine();
        let inode = fs.get_inode(fs.lookup_name(ROOT_INODE, old_path)?)?;
        if inode.is_dir()? {
            return Err(Error::IsADirectory);
        }
        if components(new_path).next().is_none() {
            return Err(Error::AlreadyExists);
        }

        let (parent, name) = fs.parse_name(new_path)?;
        fs.add_dir_entry(&parent, name, inode.ino())?;
        inode.update(|desc| desc.links += 1)
    }

    fn unlink(&self, path: &str) -> Result<()> {
        if components(path).next().is_none() {
            return Err(Error::IsADirectory);
        }
        let mut fs = self.engine();
        let (parent, name) = fs.parse_name(path)?;
        let ino = fs.find_dir_entry(&parent, name)?.ok_or(Error::NotFound)?;
        let inode = fs.get_inode(ino)?;
        if inode.is_dir()? {
            return Err(Error::IsADirectory);
        }

        fs.delete_dir_entry(&parent, name)?;
        fs.drop_link(&inode)
    }

    fn opendir(&self, path: &str) -> Result<File> {
        let mut fs = self.engine();
        let ino = fs.lookup_name(ROOT_INODE, path)?;
        let inode = fs.get_inode(ino)?;
        if !inode.is_dir()? {
            return Err(Error::NotADirectory);
        }
        *fs.open_inodes.entry(ino).or_insert(0) += 1;

        Ok(File {
            inode,
            pos: 0,
            readable: true,
            writable: false,
            append: false,
            kind: DirEntryType::Directory,
        })
    }

    fn readdir(&self, dir: &mut File, count: usize) -> Result<Vec<DirEntry>> {
        if dir.kind != DirEntryType::Directory {
            return Err(Error::NotADirectory);
        }

        let fs = self.engine();
        let (entries, pos) = fs.read_dir(&dir.inode, dir.pos, count)?;
        dir.pos = pos;

        entries
            .into_iter()
            .map(|(name, ino)| {
                let ty = if fs.get_inode(ino)?.is_dir()? {
                    DirEntryType::Directory
                } else {
                    DirEntryType::Regular
                };
                Ok(DirEntry {
                    inode: ino.raw() as u64,
                    ty,
                    name: String::from_utf8_lossy(&name).into_owned(),
                })
            })
            .collect()
    }
}

fn set_times(inode: &Inode, times: UTime) -> Result<()> {
    let to_secs = |t: Option<u64>| {
        t.map(|t| u32::try_from(t).map_err(|_| Error::InvalidInput))
            .transpose()
    };
    let ctime = to_secs(times.ctime)?;
    let mtime = to_secs(times.mtime)?;

    inode.update(|desc| {
        if let Some(ctime) = ctime {
            desc.ctime = ctime;
        }
        if let Some(mtime) = mtime {
            desc.mtime = mtime;
        }
    })
}

/* 链接计数与打开计数 */

impl DiskFileSystem {
    /// 在`parent`下新建一个文件或目录
    pub(crate) fn create_node(
        &mut self,
        parent: &Inode,
        name: &[u8],
        flags: BitFlags<InodeFlag>,
    ) -> Result<InodeNo> {
        crate::dir::check_name(name)?;
        if self.find_dir_entry(parent, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let ino = self.new_inode(Some(parent.ino()), flags)?;
        if let Err(e) = self.add_dir_entry(parent, name, ino) {
            self.free_inode(ino)?;
            return Err(e);
        }
        Ok(ino)
    }

    /// 去掉一个指向`inode`的目录项，没有链接也没有打开者时释放它
    pub(crate) fn drop_link(&mut self, inode: &Inode) -> Result<()> {
        let links = inode.update(|desc| {
            desc.links = if desc.is_dir() {
                0
            } else {
                desc.links.saturating_sub(1)
            };
            desc.links
        })?;

        if links == 0 && !self.open_inodes.contains_key(&inode.ino()) {
            self.destroy(inode)?;
        }
        Ok(())
    }

    /// 关闭一次打开，最后一次关闭时回收已无链接的 inode
    pub(crate) fn release(&mut self, ino: InodeNo) -> Result<()> {
        match self.open_inodes.get_mut(&ino) {
            Some(count) if *count > 1 => {
                *count -= 1;
                return Ok(());
            }
            Some(_) => {
                self.open_inodes.remove(&ino);
            }
            None => {
                log::warn!("release of inode {ino} which is not open");
                return Ok(());
            }
        }

        let inode = self.get_inode(ino)?;
        if inode.desc()?.links == 0 {
            self.destroy(&inode)?;
        }
        Ok(())
    }

    fn destroy(&mut self, inode: &Inode) -> Result<()> {
        self.truncate_inode(inode, 0)?;
        self.free_inode(inode.ino())?;
        log::debug!("inode {} destroyed", inode.ino());
        Ok(())
    }

    pub(crate) fn stat_of(&self, inode: &Inode) -> Result<Stat> {
        let desc = inode.desc()?;
        Ok(Stat {
            inode: inode.ino().raw() as u64,
            mode: if desc.is_dir() {
                DirEntryType::Directory
            } else {
                DirEntryType::Regular
            },
            links: desc.links,
            size: desc.size,
            block_size: self.geo.block_size as u64,
            blocks: desc.blocks as u64,
            ctime: desc.ctime as u64,
            mtime: desc.mtime as u64,
        })
    }
}
