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

use std::cmp;
use std::fmt;

use crate::cfg;
use crate::com::gate::Gate;
use crate::dtu::{EpConfig, EpId, NodeId};
use crate::errors::{Code, Error};
use crate::io::LogFlags;
use crate::kdtu::KDtu;
use crate::log;
use crate::mem::{self, GlobOff, Pod};
use crate::util::math;
use crate::Node;

pub use crate::kif::Perm;

/// The arguments for [`MemGate`] creations.
pub struct MGateArgs {
    size: usize,
    perm: Perm,
}

impl MGateArgs {
    /// Creates a new `MGateArgs` object for a region of `size` bytes with permissions `perm`.
    pub fn new(size: usize, perm: Perm) -> Self {
        MGateArgs { size, perm }
    }

    /// Sets the size of the region to `size` bytes.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Sets the permissions to `perm`.
    pub fn perm(mut self, perm: Perm) -> Self {
        self.perm = perm;
        self
    }
}

/// A memory gate (`MemGate`) has access to a contiguous memory region and allows RDMA-like memory
/// accesses via DTU.
///
/// The region lives in the local memory of some node. Accesses are performed by sending memory
/// requests to that node, which checks the permissions of the gate and the bounds of its local
/// memory and answers with a response. Reads are staged in the transfer buffer of the own node
/// and split into chunks of [`cfg::XFER_BUF_SIZE`] bytes, as are writes.
///
/// A `MemGate` created via [`MemGate::new`] owns its region and frees it when dropped. Gates
/// derived from it via [`MemGate::derive`] do not own their region and must not outlive the gate
/// they have been derived from.
pub struct MemGate {
    gate: Gate,
    dest: NodeId,
    base: GlobOff,
    size: GlobOff,
    perm: Perm,
    region: Option<(usize, usize)>,
}

impl MemGate {
    /// Creates a new `MemGate` that has access to a new region of `size` bytes with permissions
    /// `perm` in the local memory of `node`.
    pub fn new(node: &Node, size: usize, perm: Perm) -> Result<Self, Error> {
        Self::new_with(node, MGateArgs::new(size, perm))
    }

    /// Creates a new `MemGate` with given arguments.
    ///
    /// The region is zeroed before the gate is handed out.
    pub fn new_with(node: &Node, args: MGateArgs) -> Result<Self, Error> {
        let size = math::round_up(args.size.max(1), Perm::ALIGN as usize);
        let addr = node.alloc_mem(size, Perm::ALIGN as usize)?;
        let res = node
            .dtu()
            .write_mem(addr, &vec![0u8; size])
            .and_then(|_| {
                Self::new_foreign(node, node.id(), addr as GlobOff, size as GlobOff, args.perm)
            });

        match res {
            Ok(mut mgate) => {
                mgate.region = Some((addr, size));
                Ok(mgate)
            },
            Err(e) => {
                node.free_mem(addr, size);
                Err(e)
            },
        }
    }

    /// Creates a new `MemGate` on `node` for the region `base`..`base`+`size` in the local memory
    /// of `dest_node`.
    ///
    /// The region is not owned by the gate. `base` needs to be aligned to [`Perm::ALIGN`].
    pub fn new_foreign(
        node: &Node,
        dest_node: NodeId,
        base: GlobOff,
        size: GlobOff,
        perm: Perm,
    ) -> Result<Self, Error> {
        let gate = Gate::new(node)?;
        node.dtu().configure_mem(
            gate.ep(),
            dest_node,
            cfg::MEM_REQ_EP,
            base,
            size,
            perm,
        )?;
        log!(
            LogFlags::LibGates,
            "MemGate[ep={}]: created for N{}:{:#x}:{:#x} ({:?})",
            gate.ep(),
            dest_node,
            base,
            size,
            perm
        );
        Ok(MemGate {
            gate,
            dest: dest_node,
            base,
            size,
            perm,
            region: None,
        })
    }

    /// Binds a new `MemGate` to the memory endpoint `ep` of `node`, which has been configured
    /// before (e.g., via [`MemGate::activate_for`]).
    ///
    /// The endpoint is taken over and freed when the gate is dropped.
    pub fn new_bind(node: &Node, ep: EpId) -> Result<Self, Error> {
        let mep = match node.dtu().ep_config(ep)? {
            EpConfig::Mem(mep) => mep,
            _ => return Err(Error::new(Code::NoMEP)),
        };
        Ok(MemGate {
            gate: Gate::new_with_ep(node, ep),
            dest: mep.dest_node,
            base: mep.base,
            size: mep.size,
            perm: mep.perm,
            region: None,
        })
    }

    /// Returns the node this gate belongs to
    pub fn node(&self) -> &Node {
        self.gate.node()
    }

    /// Returns the endpoint of this gate
    pub fn ep(&self) -> EpId {
        self.gate.ep()
    }

    /// Returns the node that holds the memory region
    pub fn dest_node(&self) -> NodeId {
        self.dest
    }

    /// Returns the size of the memory region
    pub fn size(&self) -> GlobOff {
        self.size
    }

    /// Returns the permissions of this gate
    pub fn perm(&self) -> Perm {
        self.perm
    }

    /// Returns the local address of the region, if this gate owns it
    pub fn local_addr(&self) -> Option<usize> {
        self.region.map(|(addr, _)| addr)
    }

    /// Derives a new `MemGate` from `self` that has access to a subset of the memory region,
    /// defined by `offset` and `size` and the permissions `perm`.
    ///
    /// Note that the derived gate does not own the region and therefore needs to be dropped
    /// before `self`.
    pub fn derive(&self, offset: GlobOff, size: GlobOff, perm: Perm) -> Result<Self, Error> {
        if !self.perm.contains(perm) {
            return Err(Error::new(Code::NoPerm));
        }
        let in_range = offset
            .checked_add(size)
            .map_or(false, |end| end <= self.size);
        if !in_range || !math::is_aligned(offset, Perm::ALIGN) {
            return Err(Error::new(Code::InvArgs));
        }

        Self::new_foreign(self.node(), self.dest, self.base + offset, size, perm)
    }

    /// Configures a newly allocated endpoint of `node` for the region of this gate and returns
    /// the endpoint. The other node can use it via [`MemGate::new_bind`].
    pub fn activate_for(&self, node: &Node) -> Result<EpId, Error> {
        let ep = node.alloc_ep()?;
        if let Err(e) = KDtu::new(node).config_mem(ep, self.dest, self.base, self.size, self.perm)
        {
            node.free_ep(ep);
            return Err(e);
        }
        Ok(ep)
    }

    /// Reads `data.len()` bytes from the region at offset `off` into `data`
    pub fn read(&self, data: &mut [u8], off: GlobOff) -> Result<(), Error> {
        let dtu = self.gate.dtu();
        // keep the transfer buffer for us until we copied the data out
        let _xfer = dtu.reserve();

        let mut pos = 0;
        while pos < data.len() {
            let amount = cmp::min(data.len() - pos, cfg::XFER_BUF_SIZE);
            dtu.read(
                self.ep(),
                cfg::XFER_BUF_ADDR,
                amount,
                off + pos as GlobOff,
            )?;
            dtu.read_mem(cfg::XFER_BUF_ADDR, &mut data[pos..pos + amount])?;
            pos += amount;
        }
        Ok(())
    }

    /// Writes `data` to the region at offset `off`
    pub fn write(&self, data: &[u8], off: GlobOff) -> Result<(), Error> {
        let dtu = self.gate.dtu();
        for (i, chunk) in data.chunks(cfg::XFER_BUF_SIZE).enumerate() {
            let pos = (i * cfg::XFER_BUF_SIZE) as GlobOff;
            dtu.write(self.ep(), chunk, off + pos)?;
        }
        Ok(())
    }

    /// Reads an object of type `T` from the region at offset `off`
    pub fn read_obj<T: Pod>(&self, off: GlobOff) -> Result<T, Error> {
        let mut buf = vec![0u8; std::mem::size_of::<T>()];
        self.read(&mut buf, off)?;
        Ok(mem::from_bytes(&buf))
    }

    /// Writes `obj` to the region at offset `off`
    pub fn write_obj<T: Pod>(&self, obj: &T, off: GlobOff) -> Result<(), Error> {
        self.write(mem::as_bytes(obj), off)
    }

    /// Atomically replaces `expected` by `new` at offset `off`.
    ///
    /// Returns true if the value has been replaced and false if the region did not contain
    /// `expected`.
    pub fn cmpxchg<T: Pod>(&self, expected: &T, new: &T, off: GlobOff) -> Result<bool, Error> {
        match self.gate.dtu().cmpxchg(
            self.ep(),
            mem::as_bytes(expected),
            mem::as_bytes(new),
            off,
        ) {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Code::CmpXchgFailed => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for MemGate {
    fn drop(&mut self) {
        if let Some((addr, size)) = self.region.take() {
            self.node().free_mem(addr, size);
        }
    }
}

impl fmt::Debug for MemGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "MemGate[node: {}, ep: {}, dest: N{}:{:#x}:{:#x}, perm: {:?}]",
            self.node().id(),
            self.ep(),
            self.dest,
            self.base,
            self.size,
            self.perm
        )
    }
}
