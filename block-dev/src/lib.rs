//! # 块设备接口层
//!
//! 块设备是以**扇区**为单位存储数据的设备，例如磁盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统的块可以跨越多个连续扇区，读写时传入的缓冲区长度
//! 必须是 [`SECTOR_SIZE`] 的整数倍。

#![no_std]

extern crate alloc;

mod ram_disk;

use core::any::Any;

use derive_more::Display;

pub use self::ram_disk::RamDisk;

/// 设备扇区的字节数
pub const SECTOR_SIZE: usize = 512;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 从第 `sector` 个扇区开始读满 `buf`
    fn read_block(&self, sector: usize, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// 从第 `sector` 个扇区开始写入 `buf`
    fn write_block(&self, sector: usize, buf: &[u8]) -> Result<(), DeviceError>;

    /// 设备的扇区总数
    fn num_blocks(&self) -> usize;
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[display(fmt = "sector {} is beyond the end of the device", _0)]
    OutOfRange(usize),
    #[display(fmt = "buffer length {} is not a whole number of sectors", _0)]
    Misaligned(usize),
    #[display(fmt = "read failed at sector {}", _0)]
    ReadFailed(usize),
    #[display(fmt = "write failed at sector {}", _0)]
    WriteFailed(usize),
}

/// 检查一次传输是否落在设备范围内且按扇区对齐
pub fn check_transfer(
    dev: &dyn BlockDevice,
    sector: usize,
    len: usize,
) -> Result<(), DeviceError> {
    if len % SECTOR_SIZE != 0 {
        return Err(DeviceError::Misaligned(len));
    }
    let end = sector + len / SECTOR_SIZE;
    if end > dev.num_blocks() {
        return Err(DeviceError::OutOfRange(end - 1));
    }
    Ok(())
}
