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
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cfg;
use crate::com::EpMng;
use crate::dtu::{ChannelBackend, Dtu, DtuConfig, EpId, Fabric, NodeId};
use crate::errors::{Error, VerboseError};
use crate::io::{self, LogFlags};
use crate::log;
use crate::mem::MemMap;

/// The state of a node that is shared by all handles
struct NodeInner {
    dtu: Arc<Dtu>,
    eps: Mutex<EpMng>,
    mem: Mutex<MemMap<usize>>,
}

/// A node in the system
///
/// A node owns one DTU together with its local memory. The first [`cfg::XFER_BUF_SIZE`] bytes of
/// the local memory are used as transfer buffer for memory reads; the rest is handed out for
/// receive buffers and memory regions of [`MemGate`](crate::com::MemGate)s.
///
/// `Node` is a cheap handle; all clones refer to the same DTU. The DTU is stopped as soon as the
/// last handle (including the ones held by gates) is dropped.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Creates a new node with the backend specified in `cfg`
    pub fn new(cfg: DtuConfig) -> Result<Self, VerboseError> {
        Ok(Self::with_dtu(Dtu::new(cfg)?))
    }

    /// Creates a new node that is attached to the given in-process fabric
    pub fn with_fabric(cfg: DtuConfig, fabric: &Arc<Fabric>) -> Result<Self, VerboseError> {
        let backend = ChannelBackend::new(fabric, cfg.node_id).map_err(|e| {
            VerboseError::new(
                e.code(),
                format!("unable to attach node {} to fabric", cfg.node_id),
            )
        })?;
        Ok(Self::with_dtu(Dtu::with_backend(cfg, Box::new(backend))?))
    }

    fn with_dtu(dtu: Arc<Dtu>) -> Self {
        io::init(dtu.node_id(), "app");

        let mem_size = dtu.mem_size();
        let inner = NodeInner {
            eps: Mutex::new(EpMng::new(dtu.ep_count())),
            mem: Mutex::new(MemMap::new(
                cfg::XFER_BUF_SIZE,
                mem_size - cfg::XFER_BUF_SIZE,
            )),
            dtu,
        };
        Node {
            inner: Arc::new(inner),
        }
    }

    /// Returns the id of this node
    pub fn id(&self) -> NodeId {
        self.inner.dtu.node_id()
    }

    /// Returns the DTU of this node
    pub fn dtu(&self) -> &Arc<Dtu> {
        &self.inner.dtu
    }

    /// Allocates a free endpoint
    pub fn alloc_ep(&self) -> Result<EpId, Error> {
        self.inner.eps.lock().acquire()
    }

    /// Allocates the endpoint `ep`, which needs to be free
    pub fn alloc_ep_at(&self, ep: EpId) -> Result<EpId, Error> {
        self.inner.eps.lock().acquire_specific(ep)
    }

    /// Invalidates and frees the given endpoint
    pub fn free_ep(&self, ep: EpId) {
        if let Err(e) = self.inner.dtu.invalidate(ep) {
            log!(LogFlags::LibEPs, "unable to invalidate EP{}: {:?}", ep, e);
        }
        self.inner.eps.lock().release(ep);
    }

    /// Allocates `size` bytes of local memory, aligned by `align`
    pub fn alloc_mem(&self, size: usize, align: usize) -> Result<usize, Error> {
        let addr = self.inner.mem.lock().allocate(size, align)?;
        log!(
            LogFlags::LibMem,
            "allocated local memory {:#x}..{:#x}",
            addr,
            addr + size
        );
        Ok(addr)
    }

    /// Frees the local memory area at `addr` with `size` bytes
    pub fn free_mem(&self, addr: usize, size: usize) {
        log!(
            LogFlags::LibMem,
            "freeing local memory {:#x}..{:#x}",
            addr,
            addr + size
        );
        self.inner.mem.lock().free(addr, size);
    }

    /// Returns the number of free bytes of local memory and the number of free areas
    pub fn free_memory(&self) -> (usize, usize) {
        self.inner.mem.lock().size()
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.dtu.shutdown();
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node[id: {}, eps: {}, mem: {:#x}]",
            self.id(),
            self.inner.dtu.ep_count(),
            self.inner.dtu.mem_size()
        )
    }
}
