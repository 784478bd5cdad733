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

use std::fmt;
use std::ops;

use num_traits::PrimInt;

use crate::errors::{Code, Error};
use crate::util::math;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Area<T: PrimInt> {
    addr: T,
    size: T,
}

impl<T: PrimInt> Area<T> {
    pub fn new(addr: T, size: T) -> Self {
        Area { addr, size }
    }
}

impl<T: PrimInt + fmt::LowerHex> fmt::Debug for Area<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Area[addr={:#x}, size={:#x}]", self.addr, self.size)
    }
}

/// The memory map, allowing allocs and frees of memory areas
///
/// The free areas are kept sorted by address; adjacent areas are merged on free.
pub struct MemMap<T: PrimInt> {
    areas: Vec<Area<T>>,
}

impl<T: PrimInt + ops::AddAssign + ops::SubAssign> MemMap<T> {
    /// Creates a new memory map from `addr` to `addr`+`size`.
    pub fn new(addr: T, size: T) -> Self {
        MemMap {
            areas: vec![Area::new(addr, size)],
        }
    }

    /// Allocates a region of `size` bytes, aligned by `align`.
    pub fn allocate(&mut self, size: T, align: T) -> Result<T, Error> {
        // find an area with sufficient space
        let idx = self
            .areas
            .iter()
            .position(|a| {
                let diff = math::round_up(a.addr, align) - a.addr;
                a.size > diff && a.size - diff >= size
            })
            .ok_or_else(|| Error::new(Code::OutOfMem))?;

        // if we need to do some alignment, create a new area in front of it
        let mut idx = idx;
        let diff = math::round_up(self.areas[idx].addr, align) - self.areas[idx].addr;
        if diff != T::zero() {
            let front = Area::new(self.areas[idx].addr, diff);
            self.areas[idx].addr += diff;
            self.areas[idx].size -= diff;
            self.areas.insert(idx, front);
            idx += 1;
        }

        // take it from the front
        let a = &mut self.areas[idx];
        let res = a.addr;
        a.size -= size;
        a.addr += size;

        // if the area is empty now, remove it
        if a.size == T::zero() {
            self.areas.remove(idx);
        }

        Ok(res)
    }

    /// Free's the given memory region defined by `addr` and `size`.
    pub fn free(&mut self, addr: T, size: T) {
        // find the area behind ours
        let next = self.areas.iter().position(|n| addr <= n.addr);
        let prev = match next {
            Some(0) => None,
            Some(n) => Some(n - 1),
            None if self.areas.is_empty() => None,
            None => Some(self.areas.len() - 1),
        };

        let merge_prev = prev
            .map(|p| self.areas[p].addr + self.areas[p].size == addr)
            .unwrap_or(false);
        let merge_next = next
            .map(|n| addr + size == self.areas[n].addr)
            .unwrap_or(false);

        match (prev, next) {
            // merge with prev and next
            (Some(p), Some(n)) if merge_prev && merge_next => {
                let nsize = self.areas[n].size;
                self.areas[p].size += size + nsize;
                self.areas.remove(n);
            },

            // merge with prev
            (Some(p), _) if merge_prev => self.areas[p].size += size,

            // merge with next
            (_, Some(n)) if merge_next => {
                self.areas[n].addr -= size;
                self.areas[n].size += size;
            },

            (_, Some(n)) => self.areas.insert(n, Area::new(addr, size)),
            (_, None) => self.areas.push(Area::new(addr, size)),
        }
    }

    /// Returns the size of the largest contiguous free space
    pub fn largest_contiguous(&self) -> Option<T> {
        self.areas
            .iter()
            .max_by(|a, b| a.size.cmp(&b.size))
            .map(|a| a.size)
    }

    /// Returns a pair of the remaining space and the number of areas.
    pub fn size(&self) -> (T, usize) {
        let mut total = T::zero();
        for a in self.areas.iter() {
            total += a.size;
        }
        (total, self.areas.len())
    }
}

impl<T: PrimInt + fmt::LowerHex> fmt::Debug for MemMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for a in &self.areas {
            writeln!(f, "    {:?}", a)?;
        }
        write!(f, "  ]")
    }
}
