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

//! Contains the ring buffer that manages the message slots of receive endpoints

use crate::cfg::MAX_RB_SLOTS;
use crate::errors::{Code, Error};

fn is_bit_set(mask: u64, idx: usize) -> bool {
    (mask & (1 << idx)) != 0
}

fn set_bit(mask: u64, idx: usize, val: bool) -> u64 {
    if val {
        mask | (1 << idx)
    }
    else {
        mask & !(1 << idx)
    }
}

/// The slot bookkeeping of a receive endpoint
///
/// The buffer consists of `2^(order - msg_order)` slots of `2^msg_order` bytes each. A slot is
/// *occupied* from the delivery of a message until the message is acknowledged and *unread* from
/// the delivery until it is fetched. Thus, the unread slots are always a subset of the occupied
/// slots and the number of unread slots equals the message count.
///
/// The read and write positions are kept modulo the slot count; whether the buffer is full or
/// empty is determined by the bitmaps, not by the positions.
///
/// In single-slot mode, the buffer has exactly one slot that is overwritten by every new message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingBuf {
    order: u32,
    msg_order: u32,
    single: bool,
    roff: usize,
    woff: usize,
    msg_count: usize,
    unread: u64,
    occupied: u64,
}

impl RingBuf {
    /// Creates a new ring buffer of `2^order` bytes with slots of `2^msg_order` bytes
    pub fn new(order: u32, msg_order: u32) -> Result<Self, Error> {
        if order >= usize::BITS
            || msg_order > order
            || (1usize << (order - msg_order)) > MAX_RB_SLOTS
        {
            return Err(Error::new(Code::InvArgs));
        }

        Ok(Self::with_geometry(order, msg_order, false))
    }

    /// Creates a new ring buffer with a single, always overwritable slot of `2^order` bytes
    pub fn new_single(order: u32) -> Result<Self, Error> {
        if order >= usize::BITS {
            return Err(Error::new(Code::InvArgs));
        }

        Ok(Self::with_geometry(order, order, true))
    }

    fn with_geometry(order: u32, msg_order: u32, single: bool) -> Self {
        RingBuf {
            order,
            msg_order,
            single,
            roff: 0,
            woff: 0,
            msg_count: 0,
            unread: 0,
            occupied: 0,
        }
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn msg_order(&self) -> u32 {
        self.msg_order
    }

    /// Returns true if this buffer has a single, always overwritable slot
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Returns the total size of the buffer in bytes
    pub fn size(&self) -> usize {
        1 << self.order
    }

    pub fn slot_count(&self) -> usize {
        1 << (self.order - self.msg_order)
    }

    pub fn slot_size(&self) -> usize {
        1 << self.msg_order
    }

    pub fn msg_count(&self) -> usize {
        self.msg_count
    }

    pub fn read_pos(&self) -> usize {
        self.roff
    }

    pub fn write_pos(&self) -> usize {
        self.woff
    }

    pub fn unread_mask(&self) -> u64 {
        self.unread
    }

    pub fn occupied_mask(&self) -> u64 {
        self.occupied
    }

    /// Returns true if there is at least one unread message
    pub fn has_msgs(&self) -> bool {
        self.msg_count > 0
    }

    pub fn is_occupied(&self, idx: usize) -> bool {
        idx < self.slot_count() && is_bit_set(self.occupied, idx)
    }

    pub fn is_unread(&self, idx: usize) -> bool {
        idx < self.slot_count() && is_bit_set(self.unread, idx)
    }

    /// Returns the indices of all unread slots
    pub fn unread_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.slot_count()).filter(move |i| is_bit_set(self.unread, *i))
    }

    fn find_from(&self, start: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
        let count = self.slot_count();
        (0..count).map(|i| (start + i) % count).find(|i| pred(*i))
    }

    /// Allocates a free slot for a new message and marks it occupied and unread
    ///
    /// Returns the slot index or `None` if all slots are occupied.
    pub fn alloc_slot(&mut self) -> Option<usize> {
        if self.single {
            // the previous message is overwritten, if still present
            if !is_bit_set(self.unread, 0) {
                self.msg_count += 1;
            }
            self.unread = 1;
            self.occupied = 1;
            return Some(0);
        }

        let occupied = self.occupied;
        let idx = self.find_from(self.woff, |i| !is_bit_set(occupied, i))?;

        self.occupied = set_bit(self.occupied, idx, true);
        self.unread = set_bit(self.unread, idx, true);
        self.msg_count += 1;
        self.woff = (idx + 1) % self.slot_count();
        self.check_invariants();
        Some(idx)
    }

    /// Fetches the next unread message, starting at the read position
    ///
    /// The slot stays occupied until it is acknowledged. Returns `None` if there is no unread
    /// message.
    pub fn fetch_unread(&mut self) -> Option<usize> {
        if self.msg_count == 0 {
            return None;
        }

        let unread = self.unread;
        let idx = self.find_from(self.roff, |i| is_bit_set(unread, i))?;
        assert!(is_bit_set(self.occupied, idx));

        self.unread = set_bit(self.unread, idx, false);
        self.msg_count -= 1;
        self.roff = (idx + 1) % self.slot_count();
        self.check_invariants();
        Some(idx)
    }

    /// Acknowledges the message in slot `idx`, making the slot free again
    ///
    /// Acknowledging an unread message implicitly marks it read. In single-slot mode, the slot is
    /// always acknowledgeable.
    pub fn ack(&mut self, idx: usize) -> Result<(), Error> {
        if idx >= self.slot_count() || (!self.single && !is_bit_set(self.occupied, idx)) {
            return Err(Error::new(Code::InvMsgOff));
        }

        if is_bit_set(self.unread, idx) {
            self.unread = set_bit(self.unread, idx, false);
            self.msg_count -= 1;
        }
        self.occupied = set_bit(self.occupied, idx, false);
        self.check_invariants();
        Ok(())
    }

    fn check_invariants(&self) {
        debug_assert_eq!(self.unread.count_ones() as usize, self.msg_count);
        debug_assert_eq!(self.unread & !self.occupied, 0);
    }
}
