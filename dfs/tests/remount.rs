mod common;

use std::sync::Arc;

use block_dev::{BlockDevice, RamDisk, SECTOR_SIZE};
use dfs::{Dfs, DiskFileSystem, FsOptions};
use vfs::{DirEntryType, Error, FileSystem};

use common::MIB;

fn tree(fs: &Dfs) {
    fs.mkdir("/etc").unwrap();
    fs.mkdir("/etc/init").unwrap();
    common::write_file(fs, "/etc/passwd", b"root:x:0:0");
    common::write_file(fs, "/etc/init/big", &pattern(70_000));
    fs.link("/etc/passwd", "/pw").unwrap();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn check(fs: &Dfs) {
    assert_eq!(common::read_file(fs, "/pw"), b"root:x:0:0");
    assert_eq!(common::read_file(fs, "/etc/init/big"), pattern(70_000));
    assert_eq!(fs.stat("/etc/passwd").unwrap().links, 2);
    assert_eq!(fs.stat("/etc/init").unwrap().mode, DirEntryType::Directory);
}

fn survives(block_size: u32) {
    let options = common::options(block_size);
    let (disk, fs) = common::mount(4 * MIB, &options);
    tree(&fs);
    let statfs = fs.statfs().unwrap();
    fs.unmount().unwrap();

    let fs = Dfs::mount(disk.clone(), &options).unwrap();
    check(&fs);
    assert_eq!(fs.statfs().unwrap(), statfs);

    fs.unlink("/pw").unwrap();
    fs.unmount().unwrap();

    let fs = Dfs::mount(disk, &options).unwrap();
    assert_eq!(fs.stat("/etc/passwd").unwrap().links, 1);
    assert_eq!(fs.stat("/pw"), Err(Error::NotFound));
}

#[test]
fn survives_remount() {
    survives(1024);
    survives(4096);
}

#[test]
fn small_blocks() {
    survives(512);

    let options = common::options(512);
    let (_disk, fs) = common::mkfs(MIB, &options);
    let sb = fs.super_block();
    assert_eq!(sb.block_size(), 512);
    assert_eq!(sb.groupdesc_table_block, 2);
}

#[test]
fn sync_without_unmount() {
    let options = common::options(1024);
    let (disk, fs) = common::mount(2 * MIB, &options);
    tree(&fs);
    fs.sync().unwrap();

    // 同步后的映像本身就是一个完整的文件系统
    let copy = Arc::new(RamDisk::with_bytes(2 * MIB));
    copy.write_block(0, &disk.snapshot()).unwrap();
    let fs = Dfs::mount(copy, &options).unwrap();
    check(&fs);
}

#[test]
fn bad_signature() {
    let options = common::options(1024);
    let (disk, fs) = common::mkfs(MIB, &options);
    fs.close().unwrap();

    let mut sector = [0; SECTOR_SIZE];
    disk.read_block(1, &mut sector).unwrap();
    sector[0] ^= 0xFF;
    disk.write_block(1, &sector).unwrap();

    assert_eq!(
        DiskFileSystem::open(disk, &options).err(),
        Some(Error::Corrupted)
    );
}

#[test]
fn unformatted_disk() {
    let disk = Arc::new(RamDisk::with_bytes(MIB));
    assert_eq!(
        Dfs::mount(disk, &FsOptions::default()).err(),
        Some(Error::Corrupted)
    );
}

#[test]
fn tampered_counts() {
    let options = common::options(1024);
    let (disk, fs) = common::mkfs(MIB, &options);
    let mut sb = fs.super_block().clone();
    fs.close().unwrap();

    sb.free_block_count -= 1;
    let mut sector = [0; SECTOR_SIZE];
    disk.read_block(1, &mut sector).unwrap();
    dfs::OnDisk::encode(&sb, &mut sector);
    disk.write_block(1, &sector).unwrap();

    assert_eq!(
        DiskFileSystem::open(disk, &options).err(),
        Some(Error::Corrupted)
    );
}
