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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cfg::MAX_NODES;
use crate::dtu::backend::{Backend, Packet};
use crate::dtu::{EpId, NodeId};
use crate::errors::{Code, Error};
use crate::io::LogFlags;
use crate::log;

#[derive(Debug)]
enum Inbound {
    Packet(Packet),
    Wake,
}

/// Connects the DTUs of all nodes within one process
///
/// Every node has an inbox; the fabric maps node ids to the inboxes of attached nodes.
#[derive(Debug)]
pub struct Fabric {
    nodes: Mutex<Vec<Option<Sender<Inbound>>>>,
}

impl Fabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Fabric {
            nodes: Mutex::new((0..MAX_NODES).map(|_| None).collect()),
        })
    }

    /// Returns the process-wide fabric
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Fabric>> = OnceLock::new();
        GLOBAL.get_or_init(Fabric::new).clone()
    }

    /// Returns true if a node with given id is attached
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.lookup(node).is_some()
    }

    fn attach(&self, node: NodeId) -> Result<(Sender<Inbound>, Receiver<Inbound>), Error> {
        let mut nodes = self.nodes.lock();
        let slot = nodes
            .get_mut(node as usize)
            .ok_or_else(|| Error::new(Code::InvArgs))?;
        if slot.is_some() {
            return Err(Error::new(Code::Exists));
        }

        let (tx, rx) = channel();
        *slot = Some(tx.clone());
        Ok((tx, rx))
    }

    fn detach(&self, node: NodeId) {
        if let Some(slot) = self.nodes.lock().get_mut(node as usize) {
            *slot = None;
        }
    }

    fn lookup(&self, node: NodeId) -> Option<Sender<Inbound>> {
        self.nodes.lock().get(node as usize).and_then(|s| s.clone())
    }
}

/// The backend that uses in-process channels
#[derive(Debug)]
pub struct ChannelBackend {
    node: NodeId,
    fabric: Arc<Fabric>,
    inbox: Sender<Inbound>,
    rx: Mutex<Receiver<Inbound>>,
    detached: AtomicBool,
}

impl ChannelBackend {
    /// Attaches node `node` to the given fabric
    ///
    /// Fails with [`Code::Exists`] if the node is already attached.
    pub fn new(fabric: &Arc<Fabric>, node: NodeId) -> Result<Self, Error> {
        let (inbox, rx) = fabric.attach(node)?;
        log!(LogFlags::DtuBackend, "attached node {} to fabric", node);
        Ok(ChannelBackend {
            node,
            fabric: fabric.clone(),
            inbox,
            rx: Mutex::new(rx),
            detached: AtomicBool::new(false),
        })
    }

    fn detach(&self) {
        if !self.detached.swap(true, Ordering::AcqRel) {
            self.fabric.detach(self.node);
            log!(LogFlags::DtuBackend, "detached node {} from fabric", self.node);
        }
    }
}

impl Backend for ChannelBackend {
    fn send(&self, node: NodeId, ep: EpId, data: &[u8]) -> Result<(), Error> {
        let tx = self
            .fabric
            .lookup(node)
            .ok_or_else(|| Error::new(Code::RecvGone))?;
        tx.send(Inbound::Packet(Packet {
            ep,
            data: data.to_vec(),
        }))
        .map_err(|_| Error::new(Code::RecvGone))
    }

    fn receive(&self, timeout: Option<Duration>) -> Option<Packet> {
        let rx = self.rx.lock();
        match timeout {
            None => loop {
                match rx.try_recv() {
                    Ok(Inbound::Packet(p)) => break Some(p),
                    Ok(Inbound::Wake) => continue,
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break None,
                }
            },
            Some(to) => match rx.recv_timeout(to) {
                Ok(Inbound::Packet(p)) => Some(p),
                Ok(Inbound::Wake) => None,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    fn wakeup(&self) {
        // our own sender keeps the channel open
        self.inbox.send(Inbound::Wake).ok();
    }

    fn shutdown(&self) {
        self.detach();
    }
}

impl Drop for ChannelBackend {
    fn drop(&mut self) {
        self.detach();
    }
}
