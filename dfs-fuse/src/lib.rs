//! 在宿主机上读写 dfs 映像


use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path as HostPath;
use std::sync::{Mutex, PoisonError};

use block_dev::{BlockDevice, DeviceError, SECTOR_SIZE, check_transfer};
use derive_more::{Display, From};
use dfs::Dfs;
use vfs::{DirEntryType, FileSystem, OpenFlag, Path};

/// 以宿主文件充当块设备
pub struct BlockFile {
    file: Mutex<File>,
    sectors: usize,
}

impl BlockFile {
    pub fn new(file: File) -> io::Result<Self> {
        let sectors = (file.metadata()?.len() / SECTOR_SIZE as u64) as usize;
        Ok(Self {
            file: Mutex::new(file),
            sectors,
        })
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, sector: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        check_transfer(self, sector, buf.len())?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| {
                log::error!("read at sector {sector}: {e}");
                DeviceError::ReadFailed(sector)
            })
    }

    fn write_block(&self, sector: usize, buf: &[u8]) -> Result<(), DeviceError> {
        check_transfer(self, sector, buf.len())?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .and_then(|_| file.write_all(buf))
            .map_err(|e| {
                log::error!("write at sector {sector}: {e}");
                DeviceError::WriteFailed(sector)
            })
    }

    fn num_blocks(&self) -> usize {
        self.sectors
    }
}

/// 打包或读取映像时的错误
#[derive(Debug, Display, From)]
pub enum PackError {
    #[display(fmt = "host: {}", _0)]
    Host(io::Error),
    #[display(fmt = "dfs: {}", _0)]
    Fs(vfs::Error),
}

impl std::error::Error for PackError {}

/// 把宿主目录`src`下的整棵树复制到映像中的目录`dest`
pub fn pack_dir(fs: &Dfs, src: &HostPath, dest: &str) -> Result<(), PackError> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skip non-UTF-8 name {:?}", entry.file_name());
            continue;
        };
        let path = join(dest, &name);

        let ty = entry.file_type()?;
        if ty.is_dir() {
            fs.mkdir(&path)?;
            pack_dir(fs, &entry.path(), &path)?;
        } else if ty.is_file() {
            let data = fs::read(entry.path())?;
            let mut file = fs.open(
                &path,
                OpenFlag::CREATE | OpenFlag::WRONLY | OpenFlag::TRUNC,
            )?;
            let written = fs.write(&mut file, &data);
            fs.close(file)?;
            if written? < data.len() {
                return Err(vfs::Error::NoSpace.into());
            }
            log::info!("{path}: {} bytes", data.len());
        } else {
            log::warn!("skip {:?}: neither file nor directory", entry.path());
        }
    }
    Ok(())
}

/// 读出映像中一个文件的全部内容
pub fn read_all(fs: &Dfs, path: &str) -> vfs::Result<Vec<u8>> {
    let mut file = fs.open(path, OpenFlag::read_only())?;
    let mut data = Vec::new();
    let mut chunk = vec![0; 16 * 1024];
    let ret = loop {
        match fs.read(&mut file, &mut chunk) {
            Ok(0) => break Ok(()),
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) => break Err(e),
        }
    };
    fs.close(file)?;
    ret.map(|_| data)
}

/// 列出目录，子目录名后缀`/`，按名字排序
pub fn list_dir(fs: &Dfs, path: &str) -> vfs::Result<Vec<String>> {
    let mut dir = fs.opendir(path)?;
    let mut names = Vec::new();
    let ret = loop {
        match fs.readdir(&mut dir, 64) {
            Ok(batch) if batch.is_empty() => break Ok(()),
            Ok(batch) => names.extend(batch.into_iter().map(|e| match e.ty {
                DirEntryType::Directory => e.name + "/",
                DirEntryType::Regular => e.name,
            })),
            Err(e) => break Err(e),
        }
    };
    fs.close(dir)?;
    names.sort();
    ret.map(|_| names)
}

/// 把命令行给出的映像内路径规范化为绝对路径，相对路径以根目录为基准
pub fn image_path(arg: &str) -> Result<String, PackError> {
    arg.canonicalize("/").ok_or(PackError::Fs(vfs::Error::InvalidInput))
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
