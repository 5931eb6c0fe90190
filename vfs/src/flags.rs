use enumflags2::{BitFlags, bitflags};

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 只写
    WRONLY = 0b0000_0000_0001,
    /// 读写兼备
    RDWR   = 0b0000_0000_0010,
    /// 每次写入前移到文件末尾
    APPEND = 0b0000_0000_1000,
    /// 文件不存在时创建
    CREATE = 0b0010_0000_0000,
    /// 先清空文件，再交给用户
    TRUNC  = 0b0100_0000_0000,
    /// 与 CREATE 同用，文件已存在则失败
    EXCL   = 0b1000_0000_0000,
}

impl OpenFlag {
    // enumflags2拒绝值为0的标志
    /// 只读
    pub const RDONLY: u32 = 0b0000_0000_0000;

    #[inline]
    pub fn read_only() -> BitFlags<OpenFlag> {
        BitFlags::from_bits_truncate(Self::RDONLY)
    }

    /// 返回 `[可读, 可写]`
    pub fn access(flags: BitFlags<OpenFlag>) -> [bool; 2] {
        if flags.contains(OpenFlag::RDWR) {
            [true, true]
        } else if flags.contains(OpenFlag::WRONLY) {
            [false, true]
        } else {
            [true, false]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode() {
        assert_eq!(OpenFlag::access(OpenFlag::read_only()), [true, false]);
        assert_eq!(OpenFlag::access(OpenFlag::WRONLY.into()), [false, true]);
        assert_eq!(
            OpenFlag::access(OpenFlag::RDWR | OpenFlag::CREATE),
            [true, true]
        );
    }
}
