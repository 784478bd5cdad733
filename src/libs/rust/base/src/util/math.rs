/*
 * Copyright (C) 2018 Nils Asmussen <nils@os.inf.tu-dresden.de>
 * Economic rights: Technische Universitaet Dresden (Germany)
 *
 * Copyright (C) 2019-2022 Nils Asmussen, Barkhausen Institut
 *
 * This file is part of M3 (Microkernel-based SysteM for Heterogeneous Manycores).
 *
 * M3 is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * M3 is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License version 2 for more details.
 */

use num_traits::PrimInt;

/// Returns the next power of 2
///
/// # Examples
///
/// ```
/// use base::util::math;
/// assert_eq!(math::next_log2(4), 2);
/// assert_eq!(math::next_log2(5), 3);
/// ```
pub const fn next_log2(size: usize) -> u32 {
    if size <= 1 {
        0
    }
    else {
        usize::BITS - (size - 1).leading_zeros()
    }
}

/// Rounds the given value up to the given alignment
///
/// # Examples
///
/// ```
/// use base::util::math;
/// assert_eq!(math::round_up(0x123, 0x1000), 0x1000);
/// ```
pub fn round_up<T: PrimInt>(value: T, align: T) -> T {
    (value + align - T::one()) & !(align - T::one())
}

/// Rounds the given value down to the given alignment
///
/// # Examples
///
/// ```
/// use base::util::math;
/// assert_eq!(math::round_dn(0x123, 0x1000), 0x0);
/// ```
pub fn round_dn<T: PrimInt>(value: T, align: T) -> T {
    value & !(align - T::one())
}

/// Returns true if `addr` is aligned to `align`
pub fn is_aligned<T: PrimInt>(addr: T, align: T) -> bool {
    (addr & (align - T::one())) == T::zero()
}

/// Assuming that `startx` < `endx` and `endx` is not included (that means with start=0 and end=10
/// 0 .. 9 is used), the function determines whether the two ranges overlap anywhere.
pub fn overlaps<T: Ord>(start1: T, end1: T, start2: T, end2: T) -> bool {
    (start1 >= start2 && start1 < end2) // start in range
    || (end1 > start2 && end1 <= end2)  // end in range
    || (start1 < start2 && end1 > end2) // complete overlapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2() {
        assert_eq!(next_log2(0), 0);
        assert_eq!(next_log2(1), 0);
        assert_eq!(next_log2(64), 6);
        assert_eq!(next_log2(65), 7);
    }

    #[test]
    fn rounding() {
        assert_eq!(round_up(0x123usize, 0x1000), 0x1000);
        assert_eq!(round_dn(0x1123usize, 0x1000), 0x1000);
        assert!(is_aligned(0x40u64, 8));
        assert!(!is_aligned(0x41u64, 8));
    }

    #[test]
    fn ranges() {
        assert!(overlaps(0, 10, 5, 15));
        assert!(overlaps(5, 15, 0, 10));
        assert!(overlaps(0, 20, 5, 15));
        assert!(!overlaps(0, 10, 10, 20));
    }
}
