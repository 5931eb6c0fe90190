//! # 路径解析层
//!
//! 分隔符`/`在开头、结尾或重复出现时都被忽略，`.`不起作用。
//! `..`不在此解释，调用者应先规范化路径。

use vfs::{Error, Result};

use crate::dfs::DiskFileSystem;
use crate::dir::check_name;
use crate::inode::Inode;
use crate::{InodeNo, MAX_DEPTH, ROOT_INODE};

/// 路径的有效分量
pub(crate) fn components(path: &str) -> impl DoubleEndedIterator<Item = &[u8]> {
    path.as_bytes()
        .split(|&c| c == b'/')
        .filter(|c| !c.is_empty() && *c != b".")
}

impl DiskFileSystem {
    /// 从`dir`出发解析完整路径
    pub fn lookup_name(&self, dir: InodeNo, path: &str) -> Result<InodeNo> {
        let mut cur = dir;
        for (depth, name) in components(path).enumerate() {
            if depth > MAX_DEPTH {
                return Err(Error::NameTooLong);
            }
            cur = self.step(cur, name)?;
        }
        Ok(cur)
    }

    /// 解析除最后一个分量外的全部分量，返回父目录与最后一个分量
    ///
    /// 路径没有分量（即根目录）时返回`InvalidInput`
    pub fn parse_name<'a>(&self, path: &'a str) -> Result<(Inode, &'a [u8])> {
        let mut cmps = components(path);
        let Some(last) = cmps.next_back() else {
            return Err(Error::InvalidInput);
        };
        if last.len() > crate::MAXFNAME {
            return Err(Error::NameTooLong);
        }

        let mut cur = ROOT_INODE;
        for (depth, name) in cmps.enumerate() {
            if depth >= MAX_DEPTH {
                return Err(Error::NameTooLong);
            }
            cur = self.step(cur, name)?;
        }

        let parent = self.get_inode(cur)?;
        if !parent.is_dir()? {
            return Err(Error::NotADirectory);
        }
        Ok((parent, last))
    }

    /// 在目录`dir`中查找一个分量
    fn step(&self, dir: InodeNo, name: &[u8]) -> Result<InodeNo> {
        check_name(name)?;
        let dir = self.get_inode(dir)?;
        if !dir.is_dir()? {
            return Err(Error::NotADirectory);
        }
        self.find_dir_entry(&dir, name)?.ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn split_components() {
        let cmps: Vec<_> = components("//a/./b//c/").collect();
        assert_eq!(cmps, [&b"a"[..], b"b", b"c"]);
        assert_eq!(components("/").count(), 0);
        assert_eq!(components("./.").count(), 0);
        assert_eq!(components("a/..").count(), 2);
    }
}
