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

//! The privileged access to the endpoints of other nodes
//!
//! Endpoints are normally configured by the node that uses them. `KDtu` allows a privileged
//! party to write the endpoints of another node instead, which is how communication channels are
//! delegated: the privileged party configures a send or memory endpoint in the target node and
//! tells the target which endpoint to use.

use crate::cfg;
use crate::dtu::{EpField, EpId, Label, NodeId, Reg, RecvFlags};
use crate::errors::Error;
use crate::io::LogFlags;
use crate::kif::Perm;
use crate::log;
use crate::mem::GlobOff;
use crate::Node;

/// Configures the endpoints of a node on behalf of someone else
pub struct KDtu<'n> {
    node: &'n Node,
}

impl<'n> KDtu<'n> {
    /// Creates a new `KDtu` for the endpoints of `node`
    pub fn new(node: &'n Node) -> Self {
        KDtu { node }
    }

    /// Configures `ep` as send endpoint to `dest_node`:`dest_ep`
    pub fn config_send(
        &self,
        ep: EpId,
        label: Label,
        dest_node: NodeId,
        dest_ep: EpId,
        credits: u64,
    ) -> Result<(), Error> {
        log!(
            LogFlags::LibEPs,
            "kdtu: N{}:EP{} = send to N{}:{}",
            self.node.id(),
            ep,
            dest_node,
            dest_ep
        );
        self.node
            .dtu()
            .configure_send(ep, label, dest_node, dest_ep, credits)
    }

    /// Configures `ep` as receive endpoint with the buffer at `buf_addr`
    pub fn config_recv(
        &self,
        ep: EpId,
        buf_addr: usize,
        order: u32,
        msg_order: u32,
        flags: RecvFlags,
    ) -> Result<(), Error> {
        log!(
            LogFlags::LibEPs,
            "kdtu: N{}:EP{} = recv at {:#x}",
            self.node.id(),
            ep,
            buf_addr
        );
        self.node
            .dtu()
            .configure_recv(ep, buf_addr, order, msg_order, flags)
    }

    /// Configures `ep` as memory endpoint for `base`..`base`+`size` on `dest_node`
    pub fn config_mem(
        &self,
        ep: EpId,
        dest_node: NodeId,
        base: GlobOff,
        size: GlobOff,
        perm: Perm,
    ) -> Result<(), Error> {
        log!(
            LogFlags::LibEPs,
            "kdtu: N{}:EP{} = mem at N{}:{:#x}:{:#x}",
            self.node.id(),
            ep,
            dest_node,
            base,
            size
        );
        self.node
            .dtu()
            .configure_mem(ep, dest_node, cfg::MEM_REQ_EP, base, size, perm)
    }

    /// Invalidates `ep`
    pub fn invalidate(&self, ep: EpId) -> Result<(), Error> {
        self.node.dtu().invalidate(ep)
    }

    /// Reads the field `field` of `ep`
    pub fn ep_field(&self, ep: EpId, field: EpField) -> Result<Reg, Error> {
        self.node.dtu().ep_field(ep, field)
    }

    /// Writes `val` to the field `field` of `ep`
    pub fn set_ep_field(&self, ep: EpId, field: EpField, val: Reg) -> Result<(), Error> {
        self.node.dtu().set_ep_field(ep, field, val)
    }
}
