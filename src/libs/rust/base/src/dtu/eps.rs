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

//! Contains the endpoint store

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::dtu::ringbuf::RingBuf;
use crate::dtu::{EpId, Label, NodeId, Reg, INVALID_EP};
use crate::errors::{Code, Error};
use crate::kif::Perm;
use crate::mem::GlobOff;
use crate::util::math;

bitflags! {
    /// The flags of receive endpoints
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RecvFlags : u32 {
        /// Store only the payload of messages, cropped to the slot size
        const NO_HEADER     = 1 << 0;
        /// Use a single slot that is overwritten by every message
        const NO_RINGBUF    = 1 << 1;
    }
}

/// The configuration of a send endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendEp {
    pub label: Label,
    pub dest_node: NodeId,
    pub dest_ep: EpId,
    pub credits: u64,
    /// The receive endpoint that replies are directed to if SEND does not name one
    pub reply_ep: EpId,
}

/// The configuration of a receive endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecvEp {
    pub buf_addr: usize,
    pub flags: RecvFlags,
    pub ring: RingBuf,
    /// The payload length of the last message stored without header
    pub last_len: usize,
}

impl RecvEp {
    /// Returns the local memory address of slot `idx`
    pub fn addr_of(&self, idx: usize) -> usize {
        self.buf_addr + (idx << self.ring.msg_order())
    }

    /// Returns the slot that starts at the local memory address `addr`
    pub fn idx_of(&self, addr: usize) -> Result<usize, Error> {
        if addr < self.buf_addr || !math::is_aligned(addr - self.buf_addr, self.ring.slot_size()) {
            return Err(Error::new(Code::InvMsgOff));
        }

        let idx = (addr - self.buf_addr) >> self.ring.msg_order();
        if idx >= self.ring.slot_count() {
            return Err(Error::new(Code::InvMsgOff));
        }
        Ok(idx)
    }
}

/// The configuration of a memory endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemEp {
    pub dest_node: NodeId,
    /// The endpoint on the destination node that serves memory requests
    pub dest_ep: EpId,
    pub base: GlobOff,
    pub size: GlobOff,
    pub perm: Perm,
}

impl MemEp {
    /// Returns the label that transports base and permissions to the destination
    pub fn label(&self) -> Label {
        self.perm.pack(self.base)
    }
}

/// The configuration of an endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EpConfig {
    Invalid,
    Send(SendEp),
    Recv(RecvEp),
    Mem(MemEp),
}

/// The numeric type of an endpoint as exposed via [`EpField::Type`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum EpType {
    Invalid = 0,
    Send    = 1,
    Recv    = 2,
    Mem     = 3,
}

/// The fields of an endpoint that are accessible via [`EpStore::field`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EpField {
    Type,
    Label,
    DestNode,
    DestEp,
    Credits,
    ReplyEp,
    BufAddr,
    BufOrder,
    BufMsgOrder,
    BufFlags,
    BufRoff,
    BufWoff,
    BufMsgCount,
    BufUnread,
    BufOccupied,
    MemBase,
    MemSize,
    MemPerm,
}

/// The endpoints of a DTU
#[derive(Debug)]
pub struct EpStore {
    eps: Vec<EpConfig>,
}

impl EpStore {
    pub fn new(count: usize) -> Self {
        EpStore {
            eps: vec![EpConfig::Invalid; count],
        }
    }

    /// Returns the number of endpoints
    pub fn count(&self) -> usize {
        self.eps.len()
    }

    pub fn get(&self, ep: EpId) -> Result<&EpConfig, Error> {
        self.eps
            .get(ep as usize)
            .ok_or_else(|| Error::new(Code::InvEP))
    }

    fn get_mut(&mut self, ep: EpId) -> Result<&mut EpConfig, Error> {
        self.eps
            .get_mut(ep as usize)
            .ok_or_else(|| Error::new(Code::InvEP))
    }

    pub fn send_ep(&self, ep: EpId) -> Result<&SendEp, Error> {
        match self.get(ep)? {
            EpConfig::Send(s) => Ok(s),
            _ => Err(Error::new(Code::NoSEP)),
        }
    }

    pub fn send_ep_mut(&mut self, ep: EpId) -> Result<&mut SendEp, Error> {
        match self.get_mut(ep)? {
            EpConfig::Send(s) => Ok(s),
            _ => Err(Error::new(Code::NoSEP)),
        }
    }

    pub fn recv_ep(&self, ep: EpId) -> Result<&RecvEp, Error> {
        match self.get(ep)? {
            EpConfig::Recv(r) => Ok(r),
            _ => Err(Error::new(Code::NoREP)),
        }
    }

    pub fn recv_ep_mut(&mut self, ep: EpId) -> Result<&mut RecvEp, Error> {
        match self.get_mut(ep)? {
            EpConfig::Recv(r) => Ok(r),
            _ => Err(Error::new(Code::NoREP)),
        }
    }

    pub fn mem_ep(&self, ep: EpId) -> Result<&MemEp, Error> {
        match self.get(ep)? {
            EpConfig::Mem(m) => Ok(m),
            _ => Err(Error::new(Code::NoMEP)),
        }
    }

    /// Configures `ep` as send endpoint to `dest_node`:`dest_ep`
    pub fn configure_send(
        &mut self,
        ep: EpId,
        label: Label,
        dest_node: NodeId,
        dest_ep: EpId,
        credits: u64,
    ) -> Result<(), Error> {
        *self.get_mut(ep)? = EpConfig::Send(SendEp {
            label,
            dest_node,
            dest_ep,
            credits,
            reply_ep: INVALID_EP,
        });
        Ok(())
    }

    /// Configures `ep` as receive endpoint with a buffer of `2^order` bytes at `buf_addr`
    ///
    /// `NO_HEADER` is only supported in combination with `NO_RINGBUF`.
    pub fn configure_recv(
        &mut self,
        ep: EpId,
        buf_addr: usize,
        order: u32,
        msg_order: u32,
        flags: RecvFlags,
    ) -> Result<(), Error> {
        let cfg = self.get_mut(ep)?;
        if flags.contains(RecvFlags::NO_HEADER) && !flags.contains(RecvFlags::NO_RINGBUF) {
            return Err(Error::new(Code::NotSup));
        }

        let ring = if flags.contains(RecvFlags::NO_RINGBUF) {
            RingBuf::new_single(order)?
        }
        else {
            RingBuf::new(order, msg_order)?
        };
        if !math::is_aligned(buf_addr, ring.slot_size().min(8)) {
            return Err(Error::new(Code::InvArgs));
        }

        *cfg = EpConfig::Recv(RecvEp {
            buf_addr,
            flags,
            ring,
            last_len: 0,
        });
        Ok(())
    }

    /// Configures `ep` as memory endpoint for `size` bytes at `base` on `dest_node`
    pub fn configure_mem(
        &mut self,
        ep: EpId,
        dest_node: NodeId,
        dest_ep: EpId,
        base: GlobOff,
        size: GlobOff,
        perm: Perm,
    ) -> Result<(), Error> {
        let cfg = self.get_mut(ep)?;
        // the base is transferred in the label together with the permissions
        if !math::is_aligned(base, Perm::ALIGN) {
            return Err(Error::new(Code::InvArgs));
        }

        *cfg = EpConfig::Mem(MemEp {
            dest_node,
            dest_ep,
            base,
            size,
            perm,
        });
        Ok(())
    }

    pub fn invalidate(&mut self, ep: EpId) -> Result<(), Error> {
        *self.get_mut(ep)? = EpConfig::Invalid;
        Ok(())
    }

    pub fn is_valid(&self, ep: EpId) -> bool {
        !matches!(self.get(ep), Err(_) | Ok(EpConfig::Invalid))
    }

    /// Returns true if `ep` is a receive endpoint with unread messages
    pub fn has_msgs(&self, ep: EpId) -> bool {
        self.recv_ep(ep).map(|r| r.ring.has_msgs()).unwrap_or(false)
    }

    /// Returns the credits of a send endpoint or the region size of a memory endpoint
    pub fn credits(&self, ep: EpId) -> Result<u64, Error> {
        match self.get(ep)? {
            EpConfig::Send(s) => Ok(s.credits),
            EpConfig::Mem(m) => Ok(m.size),
            _ => Err(Error::new(Code::NoSEP)),
        }
    }

    /// Reads the given field of `ep`
    ///
    /// Fields that do not apply to the endpoint's type read as zero.
    pub fn field(&self, ep: EpId, field: EpField) -> Result<Reg, Error> {
        let cfg = self.get(ep)?;
        Ok(match (cfg, field) {
            (EpConfig::Invalid, EpField::Type) => EpType::Invalid as Reg,
            (EpConfig::Send(_), EpField::Type) => EpType::Send as Reg,
            (EpConfig::Recv(_), EpField::Type) => EpType::Recv as Reg,
            (EpConfig::Mem(_), EpField::Type) => EpType::Mem as Reg,

            (EpConfig::Send(s), EpField::Label) => s.label,
            (EpConfig::Send(s), EpField::DestNode) => s.dest_node as Reg,
            (EpConfig::Send(s), EpField::DestEp) => s.dest_ep as Reg,
            (EpConfig::Send(s), EpField::Credits) => s.credits,
            (EpConfig::Send(s), EpField::ReplyEp) => s.reply_ep as Reg,

            (EpConfig::Recv(r), EpField::BufAddr) => r.buf_addr as Reg,
            (EpConfig::Recv(r), EpField::BufOrder) => r.ring.order() as Reg,
            (EpConfig::Recv(r), EpField::BufMsgOrder) => r.ring.msg_order() as Reg,
            (EpConfig::Recv(r), EpField::BufFlags) => r.flags.bits() as Reg,
            (EpConfig::Recv(r), EpField::BufRoff) => r.ring.read_pos() as Reg,
            (EpConfig::Recv(r), EpField::BufWoff) => r.ring.write_pos() as Reg,
            (EpConfig::Recv(r), EpField::BufMsgCount) => r.ring.msg_count() as Reg,
            (EpConfig::Recv(r), EpField::BufUnread) => r.ring.unread_mask(),
            (EpConfig::Recv(r), EpField::BufOccupied) => r.ring.occupied_mask(),

            (EpConfig::Mem(m), EpField::Label) => m.label(),
            (EpConfig::Mem(m), EpField::DestNode) => m.dest_node as Reg,
            (EpConfig::Mem(m), EpField::DestEp) => m.dest_ep as Reg,
            (EpConfig::Mem(m), EpField::Credits) => m.size,
            (EpConfig::Mem(m), EpField::MemBase) => m.base,
            (EpConfig::Mem(m), EpField::MemSize) => m.size,
            (EpConfig::Mem(m), EpField::MemPerm) => m.perm.bits() as Reg,

            _ => 0,
        })
    }

    /// Writes `val` to the given field of `ep`
    ///
    /// Only the fields of send and memory endpoints are writable. The geometry and the state of
    /// receive buffers are set via [`EpStore::configure_recv`] and changed by the DTU only.
    pub fn set_field(&mut self, ep: EpId, field: EpField, val: Reg) -> Result<(), Error> {
        match (self.get_mut(ep)?, field) {
            (EpConfig::Send(s), EpField::Label) => s.label = val,
            (EpConfig::Send(s), EpField::DestNode) => s.dest_node = Self::narrow(val)?,
            (EpConfig::Send(s), EpField::DestEp) => s.dest_ep = Self::narrow(val)?,
            (EpConfig::Send(s), EpField::Credits) => s.credits = val,
            (EpConfig::Send(s), EpField::ReplyEp) => s.reply_ep = Self::narrow(val)?,

            (EpConfig::Mem(m), EpField::DestNode) => m.dest_node = Self::narrow(val)?,
            (EpConfig::Mem(m), EpField::DestEp) => m.dest_ep = Self::narrow(val)?,
            (EpConfig::Mem(m), EpField::MemBase) if math::is_aligned(val, Perm::ALIGN) => {
                m.base = val
            },
            (EpConfig::Mem(m), EpField::Credits | EpField::MemSize) => m.size = val,
            (EpConfig::Mem(m), EpField::MemPerm) => m.perm = Perm::from_bits_truncate(val as u32),

            _ => return Err(Error::new(Code::InvArgs)),
        }
        Ok(())
    }

    fn narrow<T: TryFrom<Reg>>(val: Reg) -> Result<T, Error> {
        T::try_from(val).map_err(|_| Error::new(Code::InvArgs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types() {
        let mut eps = EpStore::new(4);
        assert!(!eps.is_valid(0));
        assert!(!eps.is_valid(4));

        eps.configure_send(1, 0x1234, 2, 3, 128).unwrap();
        eps.configure_recv(2, 0x1000, 8, 6, RecvFlags::empty()).unwrap();
        eps.configure_mem(3, 1, 0, 0x2000, 0x100, Perm::RW).unwrap();

        assert!(eps.is_valid(1) && eps.is_valid(2) && eps.is_valid(3));
        assert_eq!(eps.send_ep(1).map(|s| s.credits), Ok(128));
        assert_eq!(eps.send_ep(2).err(), Some(Error::new(Code::NoSEP)));
        assert_eq!(eps.recv_ep(1).err(), Some(Error::new(Code::NoREP)));
        assert_eq!(eps.mem_ep(2).err(), Some(Error::new(Code::NoMEP)));
        assert_eq!(eps.get(4).err(), Some(Error::new(Code::InvEP)));

        assert_eq!(eps.credits(1), Ok(128));
        assert_eq!(eps.credits(3), Ok(0x100));
        assert_eq!(eps.credits(2), Err(Error::new(Code::NoSEP)));

        eps.invalidate(1).unwrap();
        assert!(!eps.is_valid(1));
        assert_eq!(eps.invalidate(9), Err(Error::new(Code::InvEP)));
    }

    #[test]
    fn recv_config() {
        let mut eps = EpStore::new(2);
        assert_eq!(
            eps.configure_recv(0, 0, 6, 7, RecvFlags::empty()),
            Err(Error::new(Code::InvArgs))
        );
        assert_eq!(
            eps.configure_recv(0, 0, 8, 6, RecvFlags::NO_HEADER),
            Err(Error::new(Code::NotSup))
        );
        assert_eq!(
            eps.configure_recv(1, 0, 8, 6, RecvFlags::empty()),
            Ok(())
        );
        assert_eq!(eps.field(1, EpField::BufAddr), Ok(0));
        eps.configure_recv(0, 0x100, 6, 0, RecvFlags::NO_HEADER | RecvFlags::NO_RINGBUF)
            .unwrap();
        let rep = eps.recv_ep(0).unwrap();
        assert!(rep.ring.is_single());
        assert_eq!(rep.ring.slot_size(), 64);
        assert_eq!(rep.addr_of(0), 0x100);
    }

    #[test]
    fn addr_of() {
        let mut eps = EpStore::new(1);
        eps.configure_recv(0, 0x1000, 8, 6, RecvFlags::empty()).unwrap();
        let rep = eps.recv_ep(0).unwrap();
        assert_eq!(rep.addr_of(3), 0x10C0);
        assert_eq!(rep.idx_of(0x1040), Ok(1));
        assert_eq!(rep.idx_of(0x1041), Err(Error::new(Code::InvMsgOff)));
        assert_eq!(rep.idx_of(0x1100), Err(Error::new(Code::InvMsgOff)));
        assert_eq!(rep.idx_of(0x0FC0), Err(Error::new(Code::InvMsgOff)));
    }

    #[test]
    fn raw_fields() {
        let mut eps = EpStore::new(3);
        eps.configure_send(0, 5, 1, 2, 64).unwrap();
        eps.configure_mem(1, 2, 0, 0x40, 0x80, Perm::R).unwrap();

        assert_eq!(eps.field(0, EpField::Type), Ok(EpType::Send as Reg));
        assert_eq!(eps.field(0, EpField::ReplyEp), Ok(INVALID_EP as Reg));
        assert_eq!(eps.field(0, EpField::BufAddr), Ok(0));
        assert_eq!(eps.field(1, EpField::Label), Ok(Perm::R.pack(0x40)));
        assert_eq!(eps.field(2, EpField::Type), Ok(EpType::Invalid as Reg));
        assert_eq!(eps.field(3, EpField::Type), Err(Error::new(Code::InvEP)));

        eps.set_field(0, EpField::Credits, 32).unwrap();
        assert_eq!(eps.credits(0), Ok(32));
        eps.set_field(0, EpField::ReplyEp, 2).unwrap();
        assert_eq!(eps.send_ep(0).map(|s| s.reply_ep), Ok(2));
        assert_eq!(
            eps.set_field(0, EpField::DestNode, 0x100),
            Err(Error::new(Code::InvArgs))
        );

        assert_eq!(
            eps.set_field(1, EpField::MemBase, 0x41),
            Err(Error::new(Code::InvArgs))
        );
        eps.set_field(1, EpField::MemPerm, Perm::RW.bits() as Reg).unwrap();
        assert_eq!(eps.mem_ep(1).map(|m| m.perm), Ok(Perm::RW));

        assert_eq!(
            eps.set_field(2, EpField::Label, 1),
            Err(Error::new(Code::InvArgs))
        );
    }
}
