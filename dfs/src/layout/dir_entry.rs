//! 目录块由变长记录无缝铺满：
//!
//! | ino: u32 | reclen: u32 | namelen: u32 | name | 填充至 4 字节对齐 |
//!
//! `ino == 0` 的记录是墓碑，可以被复用。

use vfs::{Error, Result};

use super::{Reader, Writer};

pub const HEADER_SIZE: usize = 12;
pub const ALIGN: usize = 4;
/// 能容纳最短文件名的记录长度
pub const MIN_RECLEN: usize = 16;

/// 容纳`namelen`字节的文件名所需的记录长度
#[inline]
pub const fn record_len(namelen: usize) -> usize {
    (HEADER_SIZE + namelen + ALIGN - 1) & !(ALIGN - 1)
}

/// 目录块内一条记录的视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirRecord<'a> {
    pub offset: usize,
    pub ino: u32,
    pub reclen: usize,
    pub name: &'a [u8],
}

impl DirRecord<'_> {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.ino != 0
    }

    /// 名字实际占用的长度，墓碑不占用
    #[inline]
    pub fn used(&self) -> usize {
        if self.is_live() {
            record_len(self.name.len())
        } else {
            0
        }
    }
}

/// 按顺序遍历块内记录，遇到不合法的记录时产出`Corrupted`并终止
pub struct Records<'a> {
    raw: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<DirRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.raw.len() {
            return None;
        }

        let offset = self.offset;
        match decode(self.raw, offset) {
            Some(record) => {
                self.offset += record.reclen;
                Some(Ok(record))
            }
            None => {
                log::error!("bad directory record at offset {offset}");
                self.failed = true;
                Some(Err(Error::Corrupted))
            }
        }
    }
}

fn decode(raw: &[u8], offset: usize) -> Option<DirRecord<'_>> {
    if offset + HEADER_SIZE > raw.len() {
        return None;
    }
    let mut r = Reader::new(&raw[offset..]);
    let ino = r.u32();
    let reclen = r.u32() as usize;
    let namelen = r.u32() as usize;

    let valid = reclen >= HEADER_SIZE
        && reclen % ALIGN == 0
        && offset + reclen <= raw.len()
        && HEADER_SIZE + namelen <= reclen;
    if !valid {
        return None;
    }

    let start = offset + HEADER_SIZE;
    Some(DirRecord {
        offset,
        ino,
        reclen,
        name: &raw[start..start + namelen],
    })
}

#[inline]
pub fn records(raw: &[u8]) -> Records<'_> {
    Records {
        raw,
        offset: 0,
        failed: false,
    }
}

fn write_header(raw: &mut [u8], offset: usize, ino: u32, reclen: usize, namelen: usize) {
    let mut w = Writer::new(&mut raw[offset..]);
    w.u32(ino);
    w.u32(reclen as u32);
    w.u32(namelen as u32);
}

fn write_record(raw: &mut [u8], offset: usize, ino: u32, reclen: usize, name: &[u8]) {
    write_header(raw, offset, ino, reclen, name.len());
    let start = offset + HEADER_SIZE;
    raw[start..start + name.len()].copy_from_slice(name);
    raw[start + name.len()..offset + record_len(name.len())].fill(0);
}

/// 新目录块：一条覆盖整块的墓碑
pub fn init_block(raw: &mut [u8]) {
    raw.fill(0);
    let len = raw.len();
    write_header(raw, 0, 0, len, 0);
}

/// 在块内按名字查找活记录
pub fn find<'a>(raw: &'a [u8], name: &[u8]) -> Result<Option<DirRecord<'a>>> {
    for record in records(raw) {
        let record = record?;
        if record.is_live() && record.name == name {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// 可以放下新记录的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// 足够长的墓碑
    Tombstone { offset: usize, reclen: usize },
    /// 活记录尾部的空闲空间
    Slack {
        offset: usize,
        used: usize,
        reclen: usize,
    },
}

/// 首次适配：返回第一个能容纳`needed`字节的位置
pub fn find_slot(raw: &[u8], needed: usize) -> Result<Option<Slot>> {
    for record in records(raw) {
        let record = record?;
        if !record.is_live() {
            if record.reclen >= needed {
                return Ok(Some(Slot::Tombstone {
                    offset: record.offset,
                    reclen: record.reclen,
                }));
            }
        } else if record.reclen - record.used() >= needed {
            return Ok(Some(Slot::Slack {
                offset: record.offset,
                used: record.used(),
                reclen: record.reclen,
            }));
        }
    }
    Ok(None)
}

/// 在`slot`处写入新记录
pub fn place(raw: &mut [u8], slot: Slot, name: &[u8], ino: u32) {
    let needed = record_len(name.len());
    match slot {
        Slot::Tombstone { offset, reclen } => {
            if reclen - needed >= MIN_RECLEN {
                write_record(raw, offset, ino, needed, name);
                write_header(raw, offset + needed, 0, reclen - needed, 0);
            } else {
                write_record(raw, offset, ino, reclen, name);
            }
        }
        Slot::Slack {
            offset,
            used,
            reclen,
        } => {
            Writer::new(&mut raw[offset + 4..]).u32(used as u32);
            write_record(raw, offset + used, ino, reclen - used, name);
        }
    }
}

/// 改写`offset`处记录的 inode 编号
pub fn set_ino(raw: &mut [u8], offset: usize, ino: u32) {
    Writer::new(&mut raw[offset..]).u32(ino);
}

/// 把名为`name`的记录变为墓碑，并与前后相邻的墓碑合并
///
/// 返回被删除记录的 inode 编号
pub fn remove(raw: &mut [u8], name: &[u8]) -> Result<Option<u32>> {
    let mut prev: Option<DirRecord> = None;
    let mut found = None;
    let mut iter = records(raw);
    while let Some(record) = iter.next() {
        let record = record?;
        if record.is_live() && record.name == name {
            let next = iter.next().transpose()?;
            found = Some((prev, record, next));
            break;
        }
        prev = Some(record);
    }

    let Some((prev, record, next)) = found else {
        return Ok(None);
    };
    let ino = record.ino;
    let mut offset = record.offset;
    let mut reclen = record.reclen;
    if let Some(next) = next.filter(|n| !n.is_live()) {
        reclen += next.reclen;
    }
    if let Some(prev) = prev.filter(|p| !p.is_live()) {
        offset = prev.offset;
        reclen += prev.reclen;
    }

    write_header(raw, offset, 0, reclen, 0);
    Ok(Some(ino))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn live(raw: &[u8]) -> Vec<(&[u8], u32)> {
        records(raw)
            .map(Result::unwrap)
            .filter(DirRecord::is_live)
            .map(|r| (r.name, r.ino))
            .collect()
    }

    fn insert(raw: &mut [u8], name: &[u8], ino: u32) {
        let slot = find_slot(raw, record_len(name.len())).unwrap().unwrap();
        place(raw, slot, name, ino);
    }

    #[test]
    fn record_length() {
        assert_eq!(record_len(1), MIN_RECLEN);
        assert_eq!(record_len(4), 16);
        assert_eq!(record_len(5), 20);
        assert_eq!(record_len(255), 268);
    }

    #[test]
    fn fill_and_find() {
        let mut raw = vec![0u8; 512];
        init_block(&mut raw);
        assert!(live(&raw).is_empty());

        insert(&mut raw, b"alpha", 3);
        insert(&mut raw, b"b", 4);
        insert(&mut raw, b"gamma-long-name", 5);

        assert_eq!(
            live(&raw),
            [(&b"alpha"[..], 3), (&b"b"[..], 4), (&b"gamma-long-name"[..], 5)]
        );
        assert_eq!(find(&raw, b"b").unwrap().unwrap().ino, 4);
        assert!(find(&raw, b"beta").unwrap().is_none());

        // 记录恰好铺满整块
        let total: usize = records(&raw).map(|r| r.unwrap().reclen).sum();
        assert_eq!(total, raw.len());
    }

    #[test]
    fn remove_merges_tombstones() {
        let mut raw = vec![0u8; 512];
        init_block(&mut raw);
        for (i, name) in [&b"aaaa"[..], b"bbbb", b"cccc", b"dddd"].iter().enumerate() {
            insert(&mut raw, name, i as u32 + 2);
        }
        assert_eq!(remove(&mut raw, b"bbbb").unwrap(), Some(3));
        assert_eq!(remove(&mut raw, b"cccc").unwrap(), Some(4));
        assert_eq!(remove(&mut raw, b"cccc").unwrap(), None);

        let recs: Vec<_> = records(&raw).map(Result::unwrap).collect();
        assert_eq!(recs.len(), 4);
        assert!(!recs[1].is_live());
        assert_eq!(recs[1].reclen, 32);
        assert_eq!(recs[2].name, b"dddd");

        // 合并后的墓碑被首次适配复用
        insert(&mut raw, b"0123456789ab", 9);
        assert_eq!(find(&raw, b"0123456789ab").unwrap().unwrap().offset, 16);
    }

    #[test]
    fn tombstone_split() {
        let mut raw = vec![0u8; 64];
        init_block(&mut raw);
        insert(&mut raw, b"x", 2);

        let recs: Vec<_> = records(&raw).map(Result::unwrap).collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].reclen, 16);
        assert_eq!(recs[1].reclen, 48);
        assert!(!recs[1].is_live());
    }

    #[test]
    fn corrupted_record() {
        let mut raw = vec![0u8; 64];
        init_block(&mut raw);
        raw[4] = 6;
        assert_eq!(find(&raw, b"a"), Err(Error::Corrupted));
    }
}
