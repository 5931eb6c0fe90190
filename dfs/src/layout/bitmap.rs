//! 位图：第`i`位位于第`i / 8`字节的第`i % 8`位，1 表示已分配

#[inline]
pub fn test(raw: &[u8], bit: usize) -> bool {
    raw[bit / 8] & (1 << (bit % 8)) != 0
}

#[inline]
pub fn set(raw: &mut [u8], bit: usize) {
    raw[bit / 8] |= 1 << (bit % 8);
}

/// 清除一位，返回它原先是否被置位
#[inline]
pub fn clear(raw: &mut [u8], bit: usize) -> bool {
    let was = test(raw, bit);
    raw[bit / 8] &= !(1 << (bit % 8));
    was
}

/// 在`[from, to)`中寻找第一个 0 位
pub fn find_zero(raw: &[u8], from: usize, to: usize) -> Option<usize> {
    let mut bit = from;
    while bit < to {
        let byte = raw[bit / 8];
        if bit % 8 == 0 && byte == 0xFF {
            bit += 8;
            continue;
        }
        let first = (byte >> (bit % 8)).trailing_ones() as usize;
        if first < 8 - bit % 8 {
            let found = bit + first;
            return (found < to).then_some(found);
        }
        bit = (bit / 8 + 1) * 8;
    }
    None
}

/// `[0, to)`中 0 位的个数
pub fn count_zeros(raw: &[u8], to: usize) -> usize {
    let whole = to / 8;
    let mut zeros: usize = raw[..whole].iter().map(|b| b.count_zeros() as usize).sum();
    for bit in whole * 8..to {
        zeros += !test(raw, bit) as usize;
    }
    zeros
}

/// 置位`[from, to)`
pub fn set_range(raw: &mut [u8], from: usize, to: usize) {
    for bit in from..to {
        set(raw, bit);
    }
}
