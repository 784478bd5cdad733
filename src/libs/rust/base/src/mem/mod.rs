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

//! Contains memory management abstractions

mod map;

use std::mem;
use std::ptr;
use std::slice;

pub use self::map::MemMap;

/// An offset within a memory region that is accessed via a memory endpoint
pub type GlobOff = u64;

/// Types that can be transferred via memory endpoints as plain bytes
///
/// # Safety
///
/// Implementors need to be valid for every bit pattern of `size_of::<Self>()` bytes and must not
/// contain padding.
pub unsafe trait Pod: Copy {
}

macro_rules! impl_pod {
    ($($t:ty),*) => {
        $(unsafe impl Pod for $t {})*
    };
}

impl_pod!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

unsafe impl<T: Pod, const N: usize> Pod for [T; N] {
}

/// Returns the bytes of the given object
pub fn as_bytes<T: Pod>(obj: &T) -> &[u8] {
    // safety: T is Pod and thus has no padding
    unsafe { slice::from_raw_parts(obj as *const T as *const u8, mem::size_of::<T>()) }
}

/// Creates an object of type `T` from the first `size_of::<T>()` bytes of `bytes`
pub fn from_bytes<T: Pod>(bytes: &[u8]) -> T {
    assert!(bytes.len() >= mem::size_of::<T>());
    // safety: the length is checked above and every bit pattern is valid for T
    unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) }
}
