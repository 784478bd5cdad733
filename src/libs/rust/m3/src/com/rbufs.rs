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

use crate::errors::Error;
use crate::Node;

/// A buffer in the local memory of a node to receive messages from a
/// [`RecvGate`](crate::com::RecvGate).
///
/// The buffer is aligned to its size and freed when dropped.
pub struct RecvBuf {
    node: Node,
    addr: usize,
    size: usize,
}

impl RecvBuf {
    /// Returns the base address of the receive buffer
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Returns the size of the receive buffer
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for RecvBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "RecvBuf[addr={:#x}, size={:#x}]", self.addr, self.size)
    }
}

/// Allocates a new receive buffer with given size on `node`
pub(crate) fn alloc_rbuf(node: &Node, size: usize) -> Result<RecvBuf, Error> {
    let addr = node.alloc_mem(size, size)?;
    Ok(RecvBuf {
        node: node.clone(),
        addr,
        size,
    })
}

impl Drop for RecvBuf {
    fn drop(&mut self) {
        self.node.free_mem(self.addr, self.size);
    }
}
