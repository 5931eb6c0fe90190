use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{BlockDevice, DeviceError, SECTOR_SIZE, check_transfer};

/// 内存盘：以一段内存模拟块设备
#[derive(Debug)]
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    sectors: usize,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; sectors * SECTOR_SIZE]),
            sectors,
        }
    }

    /// 以字节数创建，不足一个扇区的尾部被舍去
    #[inline]
    pub fn with_bytes(bytes: usize) -> Self {
        Self::new(bytes / SECTOR_SIZE)
    }

    /// 复制出整个设备的内容
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, sector: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        check_transfer(self, sector, buf.len())?;
        let start = sector * SECTOR_SIZE;
        buf.copy_from_slice(&self.data.lock()[start..start + buf.len()]);
        Ok(())
    }

    fn write_block(&self, sector: usize, buf: &[u8]) -> Result<(), DeviceError> {
        check_transfer(self, sector, buf.len())?;
        let start = sector * SECTOR_SIZE;
        self.data.lock()[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    #[inline]
    fn num_blocks(&self) -> usize {
        self.sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_bounds() {
        let disk = RamDisk::new(4);
        let mut buf = [0u8; SECTOR_SIZE * 2];

        assert_eq!(disk.write_block(2, &[7; SECTOR_SIZE * 2]), Ok(()));
        assert_eq!(disk.read_block(2, &mut buf), Ok(()));
        assert!(buf.iter().all(|&b| b == 7));

        assert_eq!(disk.read_block(3, &mut buf), Err(DeviceError::OutOfRange(4)));
        assert_eq!(
            disk.write_block(0, &[0; 100]),
            Err(DeviceError::Misaligned(100))
        );
    }
}
