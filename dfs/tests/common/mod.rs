#![allow(dead_code)]

use std::sync::Arc;

use block_dev::RamDisk;
use dfs::{Dfs, DiskFileSystem, FsOptions};
use vfs::{FileSystem, OpenFlag};

pub const MIB: usize = 1 << 20;

pub fn options(block_size: u32) -> FsOptions {
    FsOptions {
        block_size,
        ..Default::default()
    }
}

/// 格式化一块内存盘并挂载引擎
pub fn mkfs(bytes: usize, options: &FsOptions) -> (Arc<RamDisk>, DiskFileSystem) {
    let disk = Arc::new(RamDisk::with_bytes(bytes));
    DiskFileSystem::create(disk.clone(), options).unwrap();
    let fs = DiskFileSystem::open(disk.clone(), options).unwrap();
    (disk, fs)
}

/// 格式化一块内存盘并以 vfs 后端挂载
pub fn mount(bytes: usize, options: &FsOptions) -> (Arc<RamDisk>, Dfs) {
    let disk = Arc::new(RamDisk::with_bytes(bytes));
    Dfs::format(disk.clone(), options).unwrap();
    let fs = Dfs::mount(disk.clone(), options).unwrap();
    (disk, fs)
}

pub fn write_file(fs: &Dfs, path: &str, data: &[u8]) {
    let mut file = fs
        .open(path, OpenFlag::CREATE | OpenFlag::WRONLY | OpenFlag::TRUNC)
        .unwrap();
    assert_eq!(fs.write(&mut file, data).unwrap(), data.len());
    fs.close(file).unwrap();
}

pub fn read_file(fs: &Dfs, path: &str) -> Vec<u8> {
    let mut file = fs.open(path, OpenFlag::read_only()).unwrap();
    let mut data = Vec::new();
    let mut chunk = [0; 700];
    loop {
        let n = fs.read(&mut file, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    fs.close(file).unwrap();
    data
}
