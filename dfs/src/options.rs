use vfs::{Error, Result};

/// 格式化与挂载参数
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// 块大小，512 到 65536 之间的 2 的幂
    pub block_size: u32,
    /// 每组块数，缺省为一个位图块能描述的最大值
    pub blocks_per_group: Option<u32>,
    /// 每多少字节分配一个 inode
    pub inode_ratio: u32,
    /// 保留的 inode 个数，至少包括根目录与内核 inode
    pub reserved_inodes: u32,
    /// 块组描述符表之后保留的块数
    pub reserved_blocks: u32,
    /// 缓冲池容量，0 表示采用超级块中的建议值
    pub cache_buffers: u32,
    /// 快速格式化：不清零 inode 表
    pub quick: bool,
    /// 以秒计的当前时间
    pub clock: fn() -> u32,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            blocks_per_group: None,
            inode_ratio: 4096,
            reserved_inodes: 16,
            reserved_blocks: 16,
            cache_buffers: 0,
            quick: false,
            clock: || 0,
        }
    }
}

impl FsOptions {
    /// 缺省的缓冲池容量
    pub const DEFAULT_CACHE_BUFFERS: u32 = 128;

    /// 解析形如`blocksize=1024,inoderatio=2048,quick`的选项串
    pub fn parse(s: &str) -> Result<Self> {
        let mut options = Self::default();

        for opt in s.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            let (key, value) = match opt.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (opt, None),
            };
            let number = || -> Result<u32> {
                value
                    .and_then(|v| v.parse().ok())
                    .ok_or(Error::InvalidInput)
            };

            match key {
                "blocksize" => options.block_size = number()?,
                "blockspergroup" => options.blocks_per_group = Some(number()?),
                "inoderatio" => options.inode_ratio = number()?,
                "resvinodes" => options.reserved_inodes = number()?,
                "resvblocks" => options.reserved_blocks = number()?,
                "cache" => options.cache_buffers = number()?,
                "quick" if value.is_none() => options.quick = true,
                _ => {
                    log::warn!("unknown filesystem option `{opt}`");
                    return Err(Error::InvalidInput);
                }
            }
        }

        Ok(options)
    }

    #[inline]
    pub fn with_clock(self, clock: fn() -> u32) -> Self {
        Self { clock, ..self }
    }
}
