mod common;

use std::collections::HashSet;
use std::ops::ControlFlow;

use dfs::{DiskFileSystem, Inode, InodeNo, ROOT_INODE};
use vfs::Error;

use common::MIB;

fn names(fs: &DiskFileSystem, dir: &Inode) -> Vec<(Vec<u8>, InodeNo)> {
    let mut entries = Vec::new();
    fs.iterate_dir(dir, |name, ino| {
        entries.push((name.to_vec(), ino));
        ControlFlow::Continue(())
    })
    .unwrap();
    entries
}

#[test]
fn add_find_delete() {
    let (_disk, mut fs) = common::mkfs(2 * MIB, &common::options(512));
    let root = fs.get_inode(ROOT_INODE).unwrap();
    assert!(fs.is_empty_dir(&root).unwrap());

    fs.add_dir_entry(&root, b"hello", InodeNo::new(20)).unwrap();
    assert_eq!(
        fs.find_dir_entry(&root, b"hello").unwrap(),
        Some(InodeNo::new(20))
    );
    assert_eq!(fs.find_dir_entry(&root, b"hell").unwrap(), None);
    assert_eq!(root.desc().unwrap().size, 512);
    assert!(!fs.is_empty_dir(&root).unwrap());

    assert_eq!(
        fs.add_dir_entry(&root, b"hello", InodeNo::new(21)),
        Err(Error::AlreadyExists)
    );
    assert_eq!(
        fs.modify_dir_entry(&root, b"hello", InodeNo::new(22)).unwrap(),
        InodeNo::new(20)
    );
    assert_eq!(
        fs.delete_dir_entry(&root, b"hello").unwrap(),
        InodeNo::new(22)
    );
    assert_eq!(fs.find_dir_entry(&root, b"hello").unwrap(), None);
    assert_eq!(
        fs.delete_dir_entry(&root, b"hello"),
        Err(Error::NotFound)
    );
    assert_eq!(
        fs.modify_dir_entry(&root, b"hello", InodeNo::new(1)),
        Err(Error::NotFound)
    );
    assert!(fs.is_empty_dir(&root).unwrap());
}

#[test]
fn bad_names() {
    let (_disk, mut fs) = common::mkfs(2 * MIB, &common::options(512));
    let root = fs.get_inode(ROOT_INODE).unwrap();

    let long = [b'n'; 256];
    assert_eq!(
        fs.add_dir_entry(&root, &long, InodeNo::new(20)),
        Err(Error::NameTooLong)
    );
    assert_eq!(
        fs.add_dir_entry(&root, b"", InodeNo::new(20)),
        Err(Error::InvalidInput)
    );
    assert_eq!(
        fs.add_dir_entry(&root, b"a/b", InodeNo::new(20)),
        Err(Error::InvalidInput)
    );

    // 最长的名字恰好可以放入 512 字节的块
    fs.add_dir_entry(&root, &long[..255], InodeNo::new(20)).unwrap();
    assert_eq!(
        fs.find_dir_entry(&root, &long[..255]).unwrap(),
        Some(InodeNo::new(20))
    );
}

#[test]
fn iterate_after_fragmentation() {
    let (_disk, mut fs) = common::mkfs(2 * MIB, &common::options(512));
    let root = fs.get_inode(ROOT_INODE).unwrap();

    let mut live = HashSet::new();
    for i in 0..200u32 {
        let name = format!("file-{i:03}").into_bytes();
        fs.add_dir_entry(&root, &name, InodeNo::new(100 + i)).unwrap();
        live.insert((name, InodeNo::new(100 + i)));
    }
    assert!(root.desc().unwrap().size > 512 * 4);

    for i in (0..200u32).step_by(3) {
        let name = format!("file-{i:03}").into_bytes();
        assert_eq!(
            fs.delete_dir_entry(&root, &name).unwrap(),
            InodeNo::new(100 + i)
        );
        live.remove(&(name, InodeNo::new(100 + i)));
    }

    // 短名字复用墓碑，目录不再增长
    let size = root.desc().unwrap().size;
    for i in 0..30u32 {
        let name = format!("x{i}").into_bytes();
        fs.add_dir_entry(&root, &name, InodeNo::new(1000 + i)).unwrap();
        live.insert((name, InodeNo::new(1000 + i)));
    }
    assert_eq!(root.desc().unwrap().size, size);

    let seen = names(&fs, &root);
    assert_eq!(seen.len(), live.len());
    assert_eq!(seen.into_iter().collect::<HashSet<_>>(), live);
}

#[test]
fn iterate_stops_early() {
    let (_disk, mut fs) = common::mkfs(2 * MIB, &common::options(512));
    let root = fs.get_inode(ROOT_INODE).unwrap();
    for i in 0..10u32 {
        fs.add_dir_entry(&root, format!("e{i}").as_bytes(), InodeNo::new(30 + i))
            .unwrap();
    }

    let mut visited = 0;
    fs.iterate_dir(&root, |_, _| {
        visited += 1;
        if visited == 4 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .unwrap();
    assert_eq!(visited, 4);
}

#[test]
fn resumable_read_dir() {
    let (_disk, mut fs) = common::mkfs(2 * MIB, &common::options(512));
    let root = fs.get_inode(ROOT_INODE).unwrap();
    for i in 0..60u32 {
        fs.add_dir_entry(&root, format!("entry-{i:02}").as_bytes(), InodeNo::new(40 + i))
            .unwrap();
    }

    let mut pos = 0;
    let mut seen = Vec::new();
    loop {
        let (batch, next) = fs.read_dir(&root, pos, 7).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 7);
        // 删除刚读到的目录项不影响后续读取
        if seen.is_empty() {
            let (name, _) = batch.last().unwrap();
            fs.delete_dir_entry(&root, name).unwrap();
        }
        seen.extend(batch);
        pos = next;
    }

    assert_eq!(seen.len(), 60);
    let unique: HashSet<_> = seen.iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(unique.len(), 60);
}
