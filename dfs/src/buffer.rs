//! # 块缓存层
//!
//! 引擎对块设备的所有读写都经过缓冲池，**操作块时一定在缓冲区当中**。
//! 同一个块在池中至多驻留一份，持有同一块的多个句柄看到的是同一份数据。
//!
//! 句柄是 [`BufferRef`]，丢弃即释放；池只会踢走没有外部引用的缓冲区，
//! 踢走前先写回脏数据。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::{BlockDevice, SECTOR_SIZE};
use spin::Mutex;
use vfs::Result;

use crate::BlockNo;
use crate::layout::OnDisk;

pub type BufferRef = Arc<Mutex<Buffer>>;

/// 内存中的块
pub struct Buffer {
    /// 缓存的数据
    data: Box<[u8]>,
    /// 对应的块号
    block: BlockNo,
    /// 底层块设备的引用
    dev: Arc<dyn BlockDevice>,
    /// 是否为脏块
    dirty: bool,
}

impl Buffer {
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 取得可变数据，同时标记为脏块
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    pub fn read<T: OnDisk>(&self, offset: usize) -> Result<T> {
        T::decode(&self.data[offset..offset + T::SIZE])
    }

    pub fn write<T: OnDisk>(&mut self, offset: usize, value: &T) {
        value.encode(&mut self.data[offset..offset + T::SIZE]);
        self.dirty = true;
    }

    #[inline]
    pub fn map<V>(&self, f: impl FnOnce(&[u8]) -> V) -> V {
        f(&self.data)
    }

    #[inline]
    pub fn map_mut<V>(&mut self, f: impl FnOnce(&mut [u8]) -> V) -> V {
        f(self.data_mut())
    }

    /// 块内第`index`个块指针
    #[inline]
    pub fn ptr(&self, index: usize) -> Option<BlockNo> {
        match crate::layout::read_ptr(&self.data, index) {
            0 => None,
            b => Some(BlockNo::new(b)),
        }
    }

    #[inline]
    pub fn set_ptr(&mut self, index: usize, block: Option<BlockNo>) {
        crate::layout::write_ptr(self.data_mut(), index, block.map_or(0, BlockNo::raw));
    }

    #[inline]
    pub fn zeroize(&mut self) {
        self.data.fill(0);
        self.dirty = true;
    }

    /// 写回脏数据
    pub fn sync(&mut self) -> Result<()> {
        if self.dirty {
            let sector = self.block.raw() as usize * (self.data.len() / SECTOR_SIZE);
            self.dev.write_block(sector, &self.data)?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            log::error!("lost write-back of block {}: {e}", self.block);
        }
    }
}

/// 缓冲池，调度块缓存
pub struct BufferPool {
    dev: Arc<dyn BlockDevice>,
    block_size: usize,
    /// 缓冲区个数的上限，所有缓冲区都被引用时可暂时超出
    capacity: usize,
    queue: Mutex<Vec<(BlockNo, BufferRef)>>,
}

impl BufferPool {
    pub fn new(dev: Arc<dyn BlockDevice>, block_size: usize, capacity: usize) -> Self {
        Self {
            dev,
            block_size,
            capacity: capacity.max(1),
            queue: Mutex::default(),
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 驻留的缓冲区个数
    pub fn resident(&self) -> usize {
        self.queue.lock().len()
    }

    /// 取得一个块，不在池中时从设备读入
    pub fn get(&self, block: BlockNo) -> Result<BufferRef> {
        self.acquire(block, |buf| {
            let sector = block.raw() as usize * (buf.data.len() / SECTOR_SIZE);
            buf.dev.read_block(sector, &mut buf.data)?;
            Ok(())
        })
    }

    /// 取得一个块并清零，不读设备
    pub fn get_zeroed(&self, block: BlockNo) -> Result<BufferRef> {
        let buf = self.acquire(block, |buf| {
            buf.dirty = true;
            Ok(())
        })?;
        buf.lock().zeroize();
        Ok(buf)
    }

    /// 写回全部脏块
    pub fn flush(&self) -> Result<()> {
        let queue = self.queue.lock();
        for (_, buf) in queue.iter() {
            buf.lock().sync()?;
        }
        Ok(())
    }

    // 调度策略：踢走闲置块
    fn acquire(
        &self,
        block: BlockNo,
        fill: impl FnOnce(&mut Buffer) -> Result<()>,
    ) -> Result<BufferRef> {
        let mut queue = self.queue.lock();

        // 尝试从池中读取块
        if let Some(buf) = queue
            .iter()
            .find_map(|(id, buf)| (block == *id).then_some(buf))
        {
            return Ok(Arc::clone(buf));
        }

        // 触及上限，写回一个没有其它引用的块
        if queue.len() >= self.capacity {
            match queue
                .iter()
                .position(|(_, buf)| Arc::strong_count(buf) == 1)
            {
                Some(index) => {
                    queue[index].1.lock().sync()?;
                    queue.remove(index);
                }
                None => log::warn!(
                    "all {} buffers are referenced, growing the pool",
                    queue.len()
                ),
            }
        }

        let mut buf = Buffer {
            data: vec![0; self.block_size].into_boxed_slice(),
            block,
            dev: Arc::clone(&self.dev),
            dirty: false,
        };
        if let Err(e) = fill(&mut buf) {
            // 没读成功的块不能写回
            buf.dirty = false;
            return Err(e);
        }

        let buf = Arc::new(Mutex::new(buf));
        queue.push((block, Arc::clone(&buf)));

        Ok(buf)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("failed to flush buffer pool: {e}");
        }
    }
}
