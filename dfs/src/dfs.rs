//! # 磁盘块管理器层
//!
//! 超级块与块组描述符表常驻内存，每次分配后描述符立即写回其缓冲区，
//! 超级块则在同步或卸载时写回。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::{BlockDevice, SECTOR_SIZE};
use vfs::{Error, Result, StatFs};

use crate::buffer::BufferPool;
use crate::group::Group;
use crate::layout::{DiskInode, GroupDesc, InodeFlag, OnDisk, SuperBlock, bitmap};
use crate::{BlockNo, FsOptions, InodeNo, KRNL_INODE, ROOT_INODE, SIGNATURE, VERSION};

/// 由块大小推出的常量
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    pub block_size: usize,
    /// 每个索引块所含指针数的对数
    pub log_ptrs: u32,
    pub inodes_per_block: u32,
    pub descs_per_block: u32,
    /// 每组 inode 表占用的块数
    pub inode_table_blocks: u32,
}

impl Geometry {
    fn new(log_block_size: u32, inodes_per_group: u32) -> Self {
        let block_size = 1usize << log_block_size;
        let inodes_per_block = (block_size / DiskInode::SIZE) as u32;
        Self {
            block_size,
            log_ptrs: log_block_size - 2,
            inodes_per_block,
            descs_per_block: (block_size / GroupDesc::SIZE) as u32,
            inode_table_blocks: inodes_per_group / inodes_per_block,
        }
    }
}

/// 已挂载的 dfs
pub struct DiskFileSystem {
    pub(crate) pool: BufferPool,
    pub(crate) sb: SuperBlock,
    pub(crate) super_dirty: bool,
    pub(crate) groups: Vec<Group>,
    pub(crate) geo: Geometry,
    pub(crate) clock: fn() -> u32,
    /// 每个 inode 被打开的次数
    pub(crate) open_inodes: BTreeMap<InodeNo, u32>,
}

/// 超级块所在的块与块内偏移
#[inline]
fn super_block_pos(block_size: usize) -> (BlockNo, usize) {
    (
        BlockNo::new((SuperBlock::BYTE_OFFSET / block_size) as u32),
        SuperBlock::BYTE_OFFSET % block_size,
    )
}

impl DiskFileSystem {
    /// 在`dev`上格式化出一个新的 dfs，并创建根目录
    pub fn create(dev: Arc<dyn BlockDevice>, options: &FsOptions) -> Result<()> {
        let sb = plan(dev.num_blocks(), options)?;
        let geo = Geometry::new(sb.log_block_size, sb.inodes_per_group);
        let bs = geo.block_size;
        log::info!(
            "format: {} blocks of {bs} bytes, {} groups, {} inodes",
            sb.block_count,
            sb.group_count,
            sb.inode_count
        );

        let pool = BufferPool::new(dev, bs, sb.cache_buffers as usize);

        // 块组描述符表
        let descs = (0..sb.group_count)
            .map(|g| group_layout(&sb, &geo, g))
            .collect::<Result<Vec<_>>>()?;
        let gdt_blocks = sb.first_reserved_block - sb.groupdesc_table_block;
        for i in 0..gdt_blocks {
            let buf = pool.get_zeroed(BlockNo::new(sb.groupdesc_table_block + i))?;
            let mut buf = buf.lock();
            let first = (i * geo.descs_per_block) as usize;
            for (j, desc) in descs
                .iter()
                .skip(first)
                .take(geo.descs_per_block as usize)
                .enumerate()
            {
                buf.write(j * GroupDesc::SIZE, desc);
            }
        }

        for (g, desc) in descs.iter().enumerate() {
            let base = g as u32 * sb.blocks_per_group;
            let data_start = desc.inode_table_block + geo.inode_table_blocks;

            pool.get_zeroed(BlockNo::new(desc.block_bitmap_block))?
                .lock()
                .map_mut(|raw| bitmap::set_range(raw, 0, (data_start - base) as usize));

            pool.get_zeroed(BlockNo::new(desc.inode_bitmap_block))?
                .lock()
                .map_mut(|raw| {
                    if g == 0 {
                        bitmap::set_range(raw, 0, sb.reserved_inodes as usize);
                    }
                });

            if !options.quick {
                for i in 0..geo.inode_table_blocks {
                    pool.get_zeroed(BlockNo::new(desc.inode_table_block + i))?;
                }
            }
        }

        // 根目录与内核 inode
        let table = BlockNo::new(descs[0].inode_table_block);
        let now = (options.clock)();
        {
            let buf = if options.quick {
                pool.get(table)?
            } else {
                pool.get_zeroed(table)?
            };
            let mut buf = buf.lock();
            buf.write(
                ROOT_INODE.raw() as usize * DiskInode::SIZE,
                &DiskInode::new(InodeFlag::Directory.into(), now),
            );
            buf.write(
                KRNL_INODE.raw() as usize * DiskInode::SIZE,
                &DiskInode::default(),
            );
        }

        let (block, offset) = super_block_pos(bs);
        pool.get(block)?.lock().write(offset, &sb);
        pool.flush()
    }

    /// 挂载`dev`上的 dfs
    pub fn open(dev: Arc<dyn BlockDevice>, options: &FsOptions) -> Result<Self> {
        let mut sector = [0; SECTOR_SIZE];
        dev.read_block(SuperBlock::BYTE_OFFSET / SECTOR_SIZE, &mut sector)?;
        let sb = SuperBlock::decode(&sector)?;

        if !sb.is_valid() {
            log::error!(
                "bad signature {:#x} or version {}",
                sb.signature,
                sb.version
            );
            return Err(Error::Corrupted);
        }
        validate(&sb, dev.num_blocks())?;

        let geo = Geometry::new(sb.log_block_size, sb.inodes_per_group);
        let capacity = match options.cache_buffers {
            0 if sb.cache_buffers != 0 => sb.cache_buffers,
            0 => FsOptions::DEFAULT_CACHE_BUFFERS,
            n => n,
        };
        let pool = BufferPool::new(dev, geo.block_size, capacity as usize);

        let mut groups = Vec::with_capacity(sb.group_count as usize);
        for g in 0..sb.group_count {
            let block = sb.groupdesc_table_block + g / geo.descs_per_block;
            let offset = (g % geo.descs_per_block) as usize * GroupDesc::SIZE;
            let desc: GroupDesc = pool.get(BlockNo::new(block))?.lock().read(offset)?;
            if desc != group_layout_checked(&sb, &geo, g, &desc)? {
                log::error!("group {g} descriptor does not match the geometry");
                return Err(Error::Corrupted);
            }
            groups.push(Group::new(desc, if g == 0 { sb.reserved_inodes } else { 0 }));
        }

        let free_blocks: u64 = groups.iter().map(|g| g.desc.free_block_count as u64).sum();
        let free_inodes: u64 = groups.iter().map(|g| g.desc.free_inode_count as u64).sum();
        if free_blocks != sb.free_block_count as u64 || free_inodes != sb.free_inode_count as u64
        {
            log::error!(
                "free counts disagree: superblock {}/{}, groups {free_blocks}/{free_inodes}",
                sb.free_block_count,
                sb.free_inode_count
            );
            return Err(Error::Corrupted);
        }

        log::info!(
            "mount: {} blocks of {} bytes, {} free",
            sb.block_count,
            geo.block_size,
            sb.free_block_count
        );

        Ok(Self {
            pool,
            sb,
            super_dirty: false,
            groups,
            geo,
            clock: options.clock,
            open_inodes: BTreeMap::new(),
        })
    }

    /// 卸载，写回所有脏数据
    pub fn close(mut self) -> Result<()> {
        if !self.open_inodes.is_empty() {
            log::warn!("unmount with {} inodes still open", self.open_inodes.len());
        }
        self.sync()?;
        log::info!("unmount");
        Ok(())
    }

    /// 写回超级块与全部脏块
    pub fn sync(&mut self) -> Result<()> {
        if self.super_dirty {
            let (block, offset) = super_block_pos(self.geo.block_size);
            self.pool.get(block)?.lock().write(offset, &self.sb);
            self.super_dirty = false;
        }
        self.pool.flush()
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: self.geo.block_size as u64,
            blocks: self.sb.block_count as u64,
            free_blocks: self.sb.free_block_count as u64,
            inodes: self.sb.inode_count as u64,
            free_inodes: self.sb.free_inode_count as u64,
        }
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.sb
    }

    #[inline]
    pub fn group_desc(&self, group: usize) -> &GroupDesc {
        &self.groups[group].desc
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.geo.block_size
    }

    #[inline]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[inline]
    pub(crate) fn now(&self) -> u32 {
        (self.clock)()
    }

    /// 把第`group`组的描述符写入其缓冲区
    pub(crate) fn put_group_desc(&self, group: usize) -> Result<()> {
        let g = group as u32;
        let block = self.sb.groupdesc_table_block + g / self.geo.descs_per_block;
        let offset = (g % self.geo.descs_per_block) as usize * GroupDesc::SIZE;
        self.pool
            .get(BlockNo::new(block))?
            .lock()
            .write(offset, &self.groups[group].desc);
        Ok(())
    }
}

/// 根据设备大小与参数计算超级块
fn plan(sectors: usize, options: &FsOptions) -> Result<SuperBlock> {
    let bs = options.block_size;
    if !bs.is_power_of_two() || !(512..=65536).contains(&bs) {
        log::error!("unsupported block size {bs}");
        return Err(Error::InvalidInput);
    }
    let log_block_size = bs.trailing_zeros();

    let bpg = options.blocks_per_group.unwrap_or(bs * 8);
    if bpg == 0 || bpg > bs * 8 || bpg % 8 != 0 || options.inode_ratio == 0 {
        log::error!("bad group geometry: {bpg} blocks per group");
        return Err(Error::InvalidInput);
    }

    let device_blocks = (sectors as u64 * SECTOR_SIZE as u64 / bs as u64).min(u32::MAX as u64);
    // 设备不足一组时按实际块数配 inode
    let ipb = bs / DiskInode::SIZE as u32;
    let group_blocks = device_blocks.min(bpg as u64);
    let raw_ipg = (group_blocks * bs as u64).div_ceil(options.inode_ratio as u64);
    let reserved_inodes = options.reserved_inodes.max(2);
    // 至少容纳保留 inode 之外的一个
    let min_ipg = (reserved_inodes as u64 + 1).div_ceil(ipb as u64) * ipb as u64;
    let ipg = (raw_ipg.div_ceil(ipb as u64) * ipb as u64)
        .max(min_ipg)
        .min(bs as u64 * 8) as u32;
    if reserved_inodes >= ipg {
        log::error!("{reserved_inodes} reserved inodes do not fit a group of {ipg}");
        return Err(Error::InvalidInput);
    }

    let itb = ipg / ipb;
    if group_meta(0, itb) >= bpg as u64 {
        log::error!("inode table of {itb} blocks leaves no data block in a group of {bpg}");
        return Err(Error::InvalidInput);
    }
    let dpb = bs / GroupDesc::SIZE as u32;
    let gdt_block = if bs == 512 { 2 } else { 1 };

    let mut block_count = device_blocks as u32;
    let mut group_count = block_count.div_ceil(bpg);
    loop {
        if group_count == 0 {
            log::error!("device of {sectors} sectors is too small");
            return Err(Error::NoSpace);
        }
        let gdt_blocks = group_count.div_ceil(dpb);
        let reserved = gdt_block as u64 + gdt_blocks as u64 + options.reserved_blocks as u64;
        // 0 号组在保留区之后仍要放下元数据与一个数据块
        if group_meta(reserved, itb) >= bpg as u64 {
            log::error!("{reserved} reserved blocks leave no room in group 0");
            return Err(Error::InvalidInput);
        }

        let last = group_count - 1;
        let base = last * bpg;
        let used = if last == 0 {
            group_meta(reserved, itb)
        } else {
            base as u64 + group_meta(0, itb)
        };
        // 最后一组至少要放下元数据与一个数据块
        if used < block_count as u64 {
            break;
        }
        block_count = base;
        group_count = last;
    }
    let gdt_blocks = group_count.div_ceil(dpb);

    let mut sb = SuperBlock {
        signature: SIGNATURE,
        version: VERSION,
        log_block_size,
        groupdesc_table_block: gdt_block,
        reserved_inodes,
        group_count,
        inode_count: group_count * ipg,
        block_count,
        free_inode_count: group_count * ipg - reserved_inodes,
        free_block_count: 0,
        blocks_per_group: bpg,
        inodes_per_group: ipg,
        first_reserved_block: gdt_block + gdt_blocks,
        reserved_blocks: options.reserved_blocks,
        cache_buffers: match options.cache_buffers {
            0 => FsOptions::DEFAULT_CACHE_BUFFERS,
            n => n,
        },
    };
    let geo = Geometry::new(log_block_size, ipg);
    sb.free_block_count = (0..group_count)
        .map(|g| group_layout(&sb, &geo, g).map(|desc| desc.free_block_count))
        .sum::<Result<u32>>()?;

    Ok(sb)
}

/// 组内从`start`起的两张位图、inode 表与一个数据块之后的位置
#[inline]
fn group_meta(start: u64, itb: u32) -> u64 {
    start + 2 + itb as u64
}

/// 第`g`组刚格式化时的描述符，放不下元数据时报告损坏
fn group_layout(sb: &SuperBlock, geo: &Geometry, g: u32) -> Result<GroupDesc> {
    let bad = || {
        log::error!("group {g} cannot hold its metadata");
        Error::Corrupted
    };

    let base = g.checked_mul(sb.blocks_per_group).ok_or_else(bad)?;
    let block_count = sb
        .block_count
        .checked_sub(base)
        .ok_or_else(bad)?
        .min(sb.blocks_per_group);
    let start = if g == 0 {
        sb.first_reserved_block
            .checked_add(sb.reserved_blocks)
            .ok_or_else(bad)?
    } else {
        base
    };
    let meta = (start - base)
        .checked_add(2 + geo.inode_table_blocks)
        .ok_or_else(bad)?;
    let reserved = if g == 0 { sb.reserved_inodes } else { 0 };

    Ok(GroupDesc {
        block_count,
        block_bitmap_block: start,
        inode_bitmap_block: start + 1,
        inode_table_block: start + 2,
        free_block_count: block_count.checked_sub(meta).ok_or_else(bad)?,
        free_inode_count: sb.inodes_per_group.checked_sub(reserved).ok_or_else(bad)?,
    })
}

/// 挂载时检查描述符：位置由几何参数决定，空闲计数只需不越界
fn group_layout_checked(
    sb: &SuperBlock,
    geo: &Geometry,
    g: u32,
    desc: &GroupDesc,
) -> Result<GroupDesc> {
    let fresh = group_layout(sb, geo, g)?;
    let mut expected = fresh.clone();
    if desc.free_block_count <= fresh.free_block_count {
        expected.free_block_count = desc.free_block_count;
    }
    if desc.free_inode_count <= fresh.free_inode_count {
        expected.free_inode_count = desc.free_inode_count;
    }
    Ok(expected)
}

/// 超级块自身的一致性
fn validate(sb: &SuperBlock, sectors: usize) -> Result<()> {
    let ok = (9..=16).contains(&sb.log_block_size) && {
        let bs = 1u32 << sb.log_block_size;
        let ipb = bs / DiskInode::SIZE as u32;
        let bpg = sb.blocks_per_group;
        let ipg = sb.inodes_per_group;
        let gdt_block = if bs == 512 { 2 } else { 1 };
        let itb = ipg / ipb;
        let reserved = sb.first_reserved_block as u64 + sb.reserved_blocks as u64;
        let last_blocks = (sb.group_count as u64)
            .checked_sub(1)
            .and_then(|n| (sb.block_count as u64).checked_sub(n * bpg as u64))
            .unwrap_or(0);
        let last_start = if sb.group_count > 1 { 0 } else { reserved };

        bpg != 0
            && bpg <= bs * 8
            && bpg % 8 == 0
            && ipg != 0
            && ipg <= bs * 8
            && ipg % ipb == 0
            && sb.groupdesc_table_block == gdt_block
            && sb.group_count == sb.block_count.div_ceil(bpg)
            && sb.group_count.div_ceil(bs / GroupDesc::SIZE as u32)
                == sb.first_reserved_block.wrapping_sub(gdt_block)
            && sb.inode_count as u64 == sb.group_count as u64 * ipg as u64
            && (2..ipg).contains(&sb.reserved_inodes)
            && sb.free_block_count <= sb.block_count
            && sb.free_inode_count <= sb.inode_count
            && sb.block_count as u64 * bs as u64 <= sectors as u64 * SECTOR_SIZE as u64
            && group_meta(reserved, itb) < bpg as u64
            && group_meta(last_start, itb) < last_blocks
    };

    if ok {
        Ok(())
    } else {
        log::error!("inconsistent superblock: {sb:?}");
        Err(Error::Corrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_dev::RamDisk;

    fn options(block_size: u32) -> FsOptions {
        FsOptions {
            block_size,
            ..Default::default()
        }
    }

    #[test]
    fn plan_small_blocks() {
        // 4 MiB, 1 KiB 块：每组 8192 块，恰好 0.5 组
        let sb = plan(8192, &options(1024)).unwrap();
        assert_eq!(sb.block_count, 4096);
        assert_eq!(sb.group_count, 1);
        assert_eq!(sb.groupdesc_table_block, 1);
        assert_eq!(sb.first_reserved_block, 2);
        // 4096 块 * 1 KiB / 4 KiB = 1024 个 inode，128 块 inode 表
        assert_eq!(sb.inodes_per_group, 1024);
        assert_eq!(sb.free_block_count, 4096 - (2 + 16 + 2 + 128));
        assert_eq!(sb.free_inode_count, 1024 - 16);

        // 4 KiB 块的小盘同样放得下
        let sb = plan(8192, &options(4096)).unwrap();
        assert_eq!(sb.block_count, 1024);
        assert_eq!(sb.inodes_per_group, 1024);

        let sb = plan(8192, &options(512)).unwrap();
        assert_eq!(sb.groupdesc_table_block, 2);
    }

    #[test]
    fn drop_tiny_last_group() {
        let opts = FsOptions {
            block_size: 1024,
            blocks_per_group: Some(1024),
            ..Default::default()
        };
        // 两个整组加上 10 块的尾巴，放不下位图与 inode 表
        let sb = plan((2048 + 10) * 2, &opts).unwrap();
        assert_eq!(sb.group_count, 2);
        assert_eq!(sb.block_count, 2048);

        assert_eq!(plan(8, &opts).unwrap_err(), Error::NoSpace);
    }

    #[test]
    fn reject_bad_options() {
        assert_eq!(plan(8192, &options(1000)).unwrap_err(), Error::InvalidInput);
        assert_eq!(plan(8192, &options(256)).unwrap_err(), Error::InvalidInput);
        let opts = FsOptions {
            block_size: 1024,
            blocks_per_group: Some(8192 * 2),
            ..Default::default()
        };
        assert_eq!(plan(1 << 16, &opts).unwrap_err(), Error::InvalidInput);
    }

    #[test]
    fn reject_crowded_groups() {
        // 保留区把 0 号组的位图与 inode 表挤出了组外
        let opts = FsOptions {
            block_size: 1024,
            blocks_per_group: Some(64),
            inode_ratio: 1024,
            reserved_blocks: 60,
            ..Default::default()
        };
        assert_eq!(plan(2048, &opts).unwrap_err(), Error::InvalidInput);

        // inode 表本身就占满了一组
        let opts = FsOptions {
            block_size: 1024,
            blocks_per_group: Some(16),
            inode_ratio: 128,
            ..Default::default()
        };
        assert_eq!(plan(2048, &opts).unwrap_err(), Error::InvalidInput);

        let opts = FsOptions {
            block_size: 1024,
            blocks_per_group: Some(64),
            inode_ratio: 1024,
            reserved_blocks: 40,
            ..Default::default()
        };
        let sb = plan(2048, &opts).unwrap();
        let geo = Geometry::new(sb.log_block_size, sb.inodes_per_group);
        // 1 + 1 + 40 块保留区之后是 2 块位图与 8 块 inode 表
        assert_eq!(group_layout(&sb, &geo, 0).unwrap().free_block_count, 12);
    }

    #[test]
    fn mount_rejects_bad_reserved_blocks() {
        let disk = Arc::new(RamDisk::with_bytes(1 << 20));
        DiskFileSystem::create(disk.clone(), &options(1024)).unwrap();

        let mut sector = [0u8; SECTOR_SIZE];
        disk.read_block(1, &mut sector).unwrap();
        sector[52..56].copy_from_slice(&5000u32.to_le_bytes());
        disk.write_block(1, &sector).unwrap();
        assert_eq!(
            DiskFileSystem::open(disk, &FsOptions::default()).err(),
            Some(Error::Corrupted)
        );
    }

    #[test]
    fn layout_of_impossible_group() {
        let mut sb = plan(2048, &options(1024)).unwrap();
        let geo = Geometry::new(sb.log_block_size, sb.inodes_per_group);
        sb.reserved_blocks = u32::MAX;
        assert_eq!(group_layout(&sb, &geo, 0), Err(Error::Corrupted));
        sb.reserved_blocks = 0;
        assert_eq!(group_layout(&sb, &geo, 1), Err(Error::Corrupted));
    }

    #[test]
    fn format_then_mount() {
        let disk = Arc::new(RamDisk::with_bytes(4 << 20));
        DiskFileSystem::create(disk.clone(), &options(1024)).unwrap();

        let raw = disk.snapshot();
        assert_eq!(&raw[512..516], b"DFS\0");

        let fs = DiskFileSystem::open(disk.clone(), &FsOptions::default()).unwrap();
        let stat = fs.statfs();
        assert_eq!(stat.block_size, 1024);
        assert_eq!(stat.blocks, 4096);
        assert_eq!(stat.free_inodes, 1024 - 16);
        assert_eq!(fs.group_desc(0).block_bitmap_block, 18);
        fs.close().unwrap();
    }

    #[test]
    fn mount_rejects_garbage() {
        let disk = Arc::new(RamDisk::with_bytes(1 << 20));
        assert_eq!(
            DiskFileSystem::open(disk.clone(), &FsOptions::default()).err(),
            Some(Error::Corrupted)
        );

        DiskFileSystem::create(disk.clone(), &options(1024)).unwrap();
        // 篡改超级块中的空闲块数
        let mut sector = [0u8; SECTOR_SIZE];
        disk.read_block(1, &mut sector).unwrap();
        sector[36] ^= 1;
        disk.write_block(1, &sector).unwrap();
        assert_eq!(
            DiskFileSystem::open(disk, &FsOptions::default()).err(),
            Some(Error::Corrupted)
        );
    }
}
