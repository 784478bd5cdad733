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

use crate::cfg;
use crate::com::gate::Gate;
use crate::com::{ReceivingGate, RecvGate, RecvMsg};
use crate::dtu::{EpId, Label, NodeId, INVALID_EP, UNLIM_CREDITS};
use crate::errors::Error;
use crate::io::LogFlags;
use crate::log;
use crate::mem::{self, Pod};
use crate::Node;

/// The arguments for [`SendGate`] creations.
pub struct SGateArgs {
    dest_node: NodeId,
    dest_ep: EpId,
    label: Label,
    credits: u64,
}

impl SGateArgs {
    /// Creates a new `SGateArgs` to send messages to `rgate` with default settings.
    pub fn new<R: ReceivingGate>(rgate: &R) -> Self {
        let (dest_node, dest_ep) = rgate.dest();
        Self::new_for(dest_node, dest_ep)
    }

    /// Creates a new `SGateArgs` to send messages to the receive endpoint `dest_ep` on
    /// `dest_node`.
    ///
    /// This is used if the receive gate lives in a different process.
    pub fn new_for(dest_node: NodeId, dest_ep: EpId) -> Self {
        SGateArgs {
            dest_node,
            dest_ep,
            label: 0,
            credits: UNLIM_CREDITS,
        }
    }

    /// Sets the credits in bytes to `credits`. Every message consumes its size plus the size of
    /// the header.
    pub fn credits(mut self, credits: u64) -> Self {
        self.credits = credits;
        self
    }

    /// Sets the credits to allow `count` messages of up to `2^msg_order` bytes each (including
    /// the header).
    pub fn msg_credits(self, count: u64, msg_order: u32) -> Self {
        self.credits(count << msg_order)
    }

    /// Sets the label to `label`.
    pub fn label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }
}

/// A send gate (`SendGate`) can send messages via DTU to an associated [`RecvGate`].
///
/// Every message consumes credits of the gate in the amount of the message size plus the header
/// size. The credits are refunded as soon as the receiver replies to the message and the reply
/// arrives. Acknowledging a message without a reply does not refund them. Once the credits are
/// exhausted, sending fails with
/// [`Code::NoCredits`](crate::errors::Code::NoCredits). By default, a `SendGate` has unlimited
/// credits.
pub struct SendGate {
    gate: Gate,
    label: Label,
}

impl SendGate {
    /// Creates a new `SendGate` on `node` that can send messages to `rgate`.
    pub fn new<R: ReceivingGate>(node: &Node, rgate: &R) -> Result<Self, Error> {
        Self::new_with(node, SGateArgs::new(rgate))
    }

    /// Creates a new `SendGate` on `node` with given arguments.
    pub fn new_with(node: &Node, args: SGateArgs) -> Result<Self, Error> {
        let gate = Gate::new(node)?;
        node.dtu().configure_send(
            gate.ep(),
            args.label,
            args.dest_node,
            args.dest_ep,
            args.credits,
        )?;
        log!(
            LogFlags::LibGates,
            "SendGate[ep={}]: created for N{}:{} (lbl={:#x})",
            gate.ep(),
            args.dest_node,
            args.dest_ep,
            args.label
        );
        Ok(SendGate {
            gate,
            label: args.label,
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

    /// Returns the label that is attached to every message
    pub fn label(&self) -> Label {
        self.label
    }

    /// Returns the remaining credits in bytes
    pub fn credits(&self) -> Result<u64, Error> {
        self.gate.dtu().credits(self.ep())
    }

    /// Returns true if there are enough credits left to send at least a message without payload
    pub fn can_send(&self) -> bool {
        self.credits().map_or(false, |c| c >= cfg::HEADER_SIZE as u64)
    }

    /// Sends the message `msg` to the associated [`RecvGate`]. If `reply_gate` is not `None`,
    /// the receiver can reply once and the reply is delivered to `reply_gate`.
    pub fn send(&self, msg: &[u8], reply_gate: Option<&RecvGate>) -> Result<(), Error> {
        match reply_gate {
            Some(rg) => self.send_with_rlabel(msg, rg, 0),
            None => self.gate.dtu().send(self.ep(), msg, 0, INVALID_EP),
        }
    }

    /// Sends the message `msg` to the associated [`RecvGate`] and uses `rlabel` as the label for
    /// the reply to be received at `reply_gate`.
    pub fn send_with_rlabel(
        &self,
        msg: &[u8],
        reply_gate: &RecvGate,
        rlabel: Label,
    ) -> Result<(), Error> {
        self.gate
            .dtu()
            .send(self.ep(), msg, rlabel, reply_gate.ep())
    }

    /// Sends the object `obj` as message
    pub fn send_obj<T: Pod>(&self, obj: &T, reply_gate: Option<&RecvGate>) -> Result<(), Error> {
        self.send(mem::as_bytes(obj), reply_gate)
    }

    /// Sends `msg` and waits for the reply, which is received via `reply_gate`.
    pub fn call<'r>(&self, msg: &[u8], reply_gate: &'r RecvGate) -> Result<RecvMsg<'r>, Error> {
        self.send_with_rlabel(msg, reply_gate, 0)?;
        reply_gate.receive(Some(self))
    }

    /// Grants credits for `size` bytes of payload to the send endpoint `crd_ep` on the node this
    /// gate sends to. This does not consume credits of this gate.
    pub fn grant_credits(&self, crd_ep: EpId, size: usize) -> Result<(), Error> {
        log!(
            LogFlags::LibGates,
            "SendGate[ep={}]: granting {} bytes to EP{}",
            self.ep(),
            size,
            crd_ep
        );
        self.gate.dtu().send_credits(self.ep(), crd_ep, size)
    }
}

impl fmt::Debug for SendGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "SendGate[node: {}, ep: {}, lbl: {:#x}]",
            self.node().id(),
            self.ep(),
            self.label
        )
    }
}
