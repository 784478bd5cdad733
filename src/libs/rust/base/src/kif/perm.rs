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

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// The permission bitmap that is used for memory endpoints and memory gates.
    ///
    /// On the wire, the permissions are packed into the lower bits of a memory endpoint's label,
    /// which is why memory regions are aligned to [`Perm::ALIGN`] bytes.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Perm : u32 {
        /// Read permission
        const R = 1;
        /// Write permission
        const W = 2;
        /// Execute permission
        const X = 4;
        /// Read + write permission
        const RW = Self::R.bits() | Self::W.bits();
        /// Read + write + execute permission
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

impl Perm {
    /// The alignment of memory regions that leaves room for the permission bits in a label
    pub const ALIGN: u64 = 8;

    /// Packs `base` and these permissions into a label
    pub fn pack(self, base: u64) -> u64 {
        assert!(base % Self::ALIGN == 0);
        base | self.bits() as u64
    }

    /// Splits the given label into the base address and the permissions
    pub fn unpack(label: u64) -> (u64, Perm) {
        (
            label & !(Self::ALIGN - 1),
            Perm::from_bits_truncate((label & (Self::ALIGN - 1)) as u32),
        )
    }
}
