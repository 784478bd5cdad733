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

//! Contains the backends that transport messages between DTUs

mod chan;

use std::time::Duration;

use cfg_if::cfg_if;

use crate::dtu::config::{BackendKind, DtuConfig};
use crate::dtu::{EpId, NodeId};
use crate::errors::Error;

pub use self::chan::{ChannelBackend, Fabric};

cfg_if! {
    if #[cfg(unix)] {
        mod socket;

        pub use self::socket::SocketBackend;
    }
}

/// A message that arrived at a node, addressed to endpoint `ep`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub ep: EpId,
    pub data: Vec<u8>,
}

/// The transport between DTUs
///
/// A backend needs to preserve the order of packets between a pair of nodes. Packets are never
/// lost silently by the backend itself: if the destination cannot be reached, `send` fails.
pub trait Backend: Send + Sync {
    /// Sends `data` to endpoint `ep` of node `node`
    fn send(&self, node: NodeId, ep: EpId, data: &[u8]) -> Result<(), Error>;

    /// Receives the next packet for this node
    ///
    /// With `None` as timeout, the call does not block. Otherwise, it waits at most `timeout` or
    /// until [`Backend::wakeup`] is called.
    fn receive(&self, timeout: Option<Duration>) -> Option<Packet>;

    /// Interrupts a blocking [`Backend::receive`]
    fn wakeup(&self);

    /// Stops accepting new packets; already queued packets can still be received
    fn shutdown(&self);
}

/// Creates the backend as specified in the given configuration
pub fn create(cfg: &DtuConfig) -> Result<Box<dyn Backend>, Error> {
    match &cfg.backend {
        BackendKind::Channel => Ok(Box::new(ChannelBackend::new(
            &Fabric::global(),
            cfg.node_id,
        )?)),

        #[cfg(unix)]
        BackendKind::Socket { dir } => Ok(Box::new(SocketBackend::new(dir, cfg.node_id)?)),

        #[cfg(not(unix))]
        BackendKind::Socket { .. } => Err(Error::new(crate::errors::Code::NotSup)),
    }
}
