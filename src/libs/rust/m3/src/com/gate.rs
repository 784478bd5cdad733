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

use std::sync::Arc;

use crate::dtu::{Dtu, EpId};
use crate::errors::Error;
use crate::Node;

/// A gate is one side of a DTU-based communication channel and exists in the variants
/// [`MemGate`](`crate::com::MemGate`), [`SendGate`](`crate::com::SendGate`), and
/// [`RecvGate`](`crate::com::RecvGate`).
///
/// The gate owns its endpoint, which is invalidated and freed when the gate is dropped.
pub struct Gate {
    node: Node,
    ep: EpId,
}

impl Gate {
    /// Creates a new gate on `node` with a newly allocated endpoint
    pub fn new(node: &Node) -> Result<Self, Error> {
        let ep = node.alloc_ep()?;
        Ok(Self::new_with_ep(node, ep))
    }

    /// Creates a new gate on `node` with the endpoint `ep`, which needs to be free
    pub fn new_at(node: &Node, ep: EpId) -> Result<Self, Error> {
        let ep = node.alloc_ep_at(ep)?;
        Ok(Self::new_with_ep(node, ep))
    }

    /// Creates a new gate on `node` that takes over the already allocated endpoint `ep`
    pub fn new_with_ep(node: &Node, ep: EpId) -> Self {
        Gate {
            node: node.clone(),
            ep,
        }
    }

    /// Returns the node this gate belongs to
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Returns the DTU of the node
    pub fn dtu(&self) -> &Arc<Dtu> {
        self.node.dtu()
    }

    /// Returns the endpoint
    pub fn ep(&self) -> EpId {
        self.ep
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        self.node.free_ep(self.ep);
    }
}
