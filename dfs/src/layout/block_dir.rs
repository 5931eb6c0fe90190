use crate::{BlockNo, MAX_DEPTH, TOPBLOCKDIR_SIZE};

/// 块目录的解释方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Shape {
    /// 16 个槽位都直接指向数据块
    #[default]
    Direct,
    /// 每个槽位都是一棵给定层数的索引树的根
    Indirect(u8),
}

impl Shape {
    #[inline]
    pub fn depth(self) -> u32 {
        match self {
            Shape::Direct => 0,
            Shape::Indirect(depth) => depth as u32,
        }
    }

    #[inline]
    fn from_depth(depth: u32) -> Self {
        match depth {
            0 => Shape::Direct,
            d => Shape::Indirect(d as u8),
        }
    }
}

/// 逻辑块在索引树中的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// 块目录的槽位
    pub slot: usize,
    path: [usize; MAX_DEPTH],
    levels: usize,
}

impl Route {
    /// 自顶向下，每层索引块内的下标；直接形态时为空
    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.path[..self.levels]
    }
}

/// inode 的块目录：16 个槽位加上形态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDir {
    shape: Shape,
    slots: [u32; TOPBLOCKDIR_SIZE],
}

impl BlockDir {
    pub(super) fn from_raw(depth: u32, slots: [u32; TOPBLOCKDIR_SIZE]) -> Self {
        Self {
            shape: Shape::from_depth(depth),
            slots,
        }
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.shape.depth()
    }

    #[inline]
    pub(super) fn raw_slots(&self) -> &[u32; TOPBLOCKDIR_SIZE] {
        &self.slots
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<BlockNo> {
        match self.slots[index] {
            0 => None,
            b => Some(BlockNo::new(b)),
        }
    }

    #[inline]
    pub fn set_slot(&mut self, index: usize, block: Option<BlockNo>) {
        self.slots[index] = block.map_or(0, BlockNo::raw);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|&s| s == 0)
    }

    /// 层数为`depth`时可寻址的逻辑块数，溢出时饱和
    pub fn capacity_at(depth: u32, log_ptrs: u32) -> u64 {
        let shift = 4 + log_ptrs * depth;
        if shift >= u64::BITS {
            u64::MAX
        } else {
            1 << shift
        }
    }

    #[inline]
    pub fn capacity(&self, log_ptrs: u32) -> u64 {
        Self::capacity_at(self.depth(), log_ptrs)
    }

    /// 计算逻辑块`iblock`的寻址路径，超出容量时返回`None`
    ///
    /// `log_ptrs`为每个索引块所含指针数的对数
    pub fn route(&self, iblock: u64, log_ptrs: u32) -> Option<Route> {
        if iblock >= self.capacity(log_ptrs) {
            return None;
        }

        let depth = self.depth() as usize;
        let mask = (1u64 << log_ptrs) - 1;
        let mut path = [0; MAX_DEPTH];
        for (level, index) in path.iter_mut().enumerate().take(depth) {
            let shift = log_ptrs * (depth - 1 - level) as u32;
            *index = (iblock.checked_shr(shift).unwrap_or(0) & mask) as usize;
        }
        let slot = iblock
            .checked_shr(log_ptrs * depth as u32)
            .unwrap_or(0) as usize;

        Some(Route {
            slot,
            path,
            levels: depth,
        })
    }

    /// 树长高一层：新的根块接管原先的 16 个槽位，挂在槽位 0 上
    ///
    /// 返回原槽位，调用者负责把它们写入`new_root`的前 16 个指针。
    /// 空树长高不需要根块。
    pub fn grow(&mut self, new_root: Option<BlockNo>) -> [u32; TOPBLOCKDIR_SIZE] {
        let old = self.slots;
        self.slots = [0; TOPBLOCKDIR_SIZE];
        self.set_slot(0, new_root);
        self.shape = Shape::from_depth(self.depth() + 1);
        old
    }

    /// 树降低一层，`slots`为原槽位 0 所指根块的前 16 个指针
    pub fn shrink(&mut self, slots: [u32; TOPBLOCKDIR_SIZE]) {
        debug_assert!(self.depth() > 0);
        self.slots = slots;
        self.shape = Shape::from_depth(self.depth().saturating_sub(1));
    }
}
