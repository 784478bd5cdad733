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
use std::hint;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cfg;
use crate::com::gate::Gate;
use crate::com::rbufs::{alloc_rbuf, RecvBuf};
use crate::com::SendGate;
use crate::dtu::{Dtu, EpId, Header, Label, NodeId, RecvFlags};
use crate::errors::{Code, Error};
use crate::io::LogFlags;
use crate::log;
use crate::mem::{self, Pod};
use crate::Node;

/// The arguments for [`RecvGate`] creations
pub struct RGateArgs {
    order: u32,
    msg_order: u32,
    flags: RecvFlags,
    ep: Option<EpId>,
}

impl Default for RGateArgs {
    fn default() -> Self {
        RGateArgs {
            order: cfg::DEF_RBUF_ORD,
            msg_order: cfg::DEF_MSG_ORD,
            flags: RecvFlags::empty(),
            ep: None,
        }
    }
}

impl RGateArgs {
    /// Sets the size of the receive buffer as a power of two. That is, the size in bytes is
    /// `2^order`. This overwrites the default size of 256 bytes.
    pub fn order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Sets the size of message slots in the receive buffer as a power of two. That is, the size in
    /// bytes is `2^order`. This overwrites the default size of 64 bytes.
    pub fn msg_order(mut self, msg_order: u32) -> Self {
        self.msg_order = msg_order;
        self
    }

    /// Sets the receive-buffer flags to `flags`.
    pub fn flags(mut self, flags: RecvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Uses the endpoint `ep` instead of the next free one. This allows senders in other
    /// processes to know the endpoint in advance.
    pub fn ep(mut self, ep: EpId) -> Self {
        self.ep = Some(ep);
        self
    }
}

/// Represents a gate that can receive
///
/// This trait exists to create [`SendGate`]s for everything that denotes a receive endpoint.
pub trait ReceivingGate {
    /// Returns the node and the receive endpoint that messages are sent to
    fn dest(&self) -> (NodeId, EpId);
}

/// A receive gate (`RecvGate`) can receive messages via DTU from one or multiple [`SendGate`]s
/// and can reply to the received messages.
///
/// On creation, the `RecvGate` allocates an endpoint and a receive buffer in the local memory of
/// its node and configures the endpoint accordingly. The receive buffer consists of `2^order`
/// bytes, split into slots of `2^msg_order` bytes. Each slot holds one message including its
/// header, so that at most `2^(order - msg_order)` messages can be unread at a time. Messages
/// that arrive while all slots are occupied are dropped by the DTU.
///
/// Received messages are handed out as [`RecvMsg`]s, which acknowledge the message when dropped,
/// allowing the DTU to reuse the slot.
pub struct RecvGate {
    gate: Gate,
    buf: RecvBuf,
    order: u32,
    msg_order: u32,
}

impl RecvGate {
    /// Creates a new `RecvGate` on `node` with a `2^order` bytes receive buffer and `2^msg_order`
    /// bytes message slots.
    pub fn new(node: &Node, order: u32, msg_order: u32) -> Result<Self, Error> {
        Self::new_with(node, RGateArgs::default().order(order).msg_order(msg_order))
    }

    /// Creates a new `RecvGate` on `node` with given arguments.
    pub fn new_with(node: &Node, args: RGateArgs) -> Result<Self, Error> {
        let size = 1usize
            .checked_shl(args.order)
            .filter(|s| *s < node.dtu().mem_size())
            .ok_or_else(|| Error::new(Code::InvArgs))?;

        let gate = match args.ep {
            Some(ep) => Gate::new_at(node, ep)?,
            None => Gate::new(node)?,
        };
        let buf = alloc_rbuf(node, size)?;
        node.dtu().configure_recv(
            gate.ep(),
            buf.addr(),
            args.order,
            args.msg_order,
            args.flags,
        )?;

        log!(
            LogFlags::LibGates,
            "RecvGate[ep={}]: created with {:?} (msg_order={})",
            gate.ep(),
            buf,
            args.msg_order
        );
        Ok(RecvGate {
            gate,
            buf,
            order: args.order,
            msg_order: args.msg_order,
        })
    }

    /// Returns the node this gate belongs to
    pub fn node(&self) -> &Node {
        self.gate.node()
    }

    fn dtu(&self) -> &Arc<Dtu> {
        self.gate.dtu()
    }

    /// Returns the endpoint of this gate
    pub fn ep(&self) -> EpId {
        self.gate.ep()
    }

    /// Returns the address of the receive buffer
    pub fn address(&self) -> usize {
        self.buf.addr()
    }

    /// Returns the size of the receive buffer in bytes as a power of two
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Returns the size of a message slot in bytes as a power of two
    pub fn msg_order(&self) -> u32 {
        self.msg_order
    }

    /// Returns true if there are messages that can be fetched
    pub fn has_msgs(&self) -> bool {
        self.dtu().has_msgs(self.ep())
    }

    /// Returns the number of unread messages
    pub fn msg_count(&self) -> usize {
        self.dtu().msg_count(self.ep()).unwrap_or(0)
    }

    /// Tries to fetch a message from the receive gate. If there is an unread message, it returns
    /// the message. Otherwise it returns an error with [`Code::NotFound`].
    pub fn fetch(&self) -> Result<RecvMsg<'_>, Error> {
        if !self.has_msgs() {
            return Err(Error::new(Code::NotFound));
        }
        match self.dtu().fetch_msg(self.ep()) {
            Some(addr) => RecvMsg::new(self, addr),
            None => Err(Error::new(Code::NotFound)),
        }
    }

    /// Waits until a message arrives and returns the message.
    ///
    /// In contrast to [`RecvGate::fetch`], this method blocks until a message is received via this
    /// `RecvGate`. Waiting starts with polling and falls back to yielding and finally to short
    /// sleeps if no message arrives.
    ///
    /// If not `None`, the argument `sgate` denotes the [`SendGate`] that was used to send the
    /// request to the communication partner for which this method should receive the reply now. If
    /// the endpoint associated with `sgate` becomes invalid, the method stops waiting for a reply
    /// assuming that the communication partner is no longer interested in the communication.
    pub fn receive(&self, sgate: Option<&SendGate>) -> Result<RecvMsg<'_>, Error> {
        self.wait_for(sgate, None)
    }

    /// Like [`RecvGate::receive`], but gives up with [`Code::Timeout`] after `timeout`.
    pub fn receive_for(&self, timeout: Duration) -> Result<RecvMsg<'_>, Error> {
        self.wait_for(None, Some(Instant::now() + timeout))
    }

    fn wait_for(
        &self,
        sgate: Option<&SendGate>,
        deadline: Option<Instant>,
    ) -> Result<RecvMsg<'_>, Error> {
        let mut rounds = 0u32;
        loop {
            match self.fetch() {
                Err(e) if e.code() == Code::NotFound => {},
                res => return res,
            }

            if let Some(sg) = sgate {
                if !self.dtu().is_valid(sg.ep()) {
                    return Err(Error::new(Code::NoSEP));
                }
            }
            if !self.dtu().is_running() {
                return Err(Error::new(Code::InvState));
            }
            if let Some(end) = deadline {
                if Instant::now() >= end {
                    return Err(Error::new(Code::Timeout));
                }
            }

            rounds = rounds.saturating_add(1);
            match rounds {
                0..=100 => hint::spin_loop(),
                101..=1000 => thread::yield_now(),
                _ => thread::sleep(Duration::from_micros(10)),
            }
        }
    }

    /// Sends `reply` as a reply to the message at `msg_addr` and acknowledges the message.
    pub fn reply(&self, reply: &[u8], msg_addr: usize) -> Result<(), Error> {
        self.dtu().reply(self.ep(), reply, msg_addr)
    }

    /// Marks the message at `msg_addr` as 'read', allowing the DTU to overwrite it with a new
    /// message.
    pub fn ack_msg(&self, msg_addr: usize) -> Result<(), Error> {
        self.dtu().ack_msg(self.ep(), msg_addr)
    }

    /// Drops all messages with given label. That is, these messages will be marked as read.
    ///
    /// This may be required when clients are removed at the server side to ensure that no further
    /// messages from that client are already stored in the receive buffer. Note that the send EP of
    /// the client has to be invalidated *before* calling this method to ensure that no further
    /// message of the client can arrive.
    pub fn drop_msgs_with(&self, label: Label) -> Result<(), Error> {
        self.dtu().drop_msgs_with(self.ep(), label)
    }
}

impl ReceivingGate for RecvGate {
    fn dest(&self) -> (NodeId, EpId) {
        (self.node().id(), self.ep())
    }
}

impl fmt::Debug for RecvGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "RecvGate[node: {}, ep: {}, buf: {:#x}, size: {:#x}, msg_size: {:#x}]",
            self.node().id(),
            self.ep(),
            self.address(),
            1usize << self.order,
            1usize << self.msg_order
        )
    }
}

/// A message that has been fetched from a [`RecvGate`]
///
/// The message is acknowledged when dropped, unless it has been replied to or claimed.
pub struct RecvMsg<'r> {
    rgate: &'r RecvGate,
    addr: usize,
    header: Option<Header>,
    data: Vec<u8>,
    done: bool,
}

impl<'r> RecvMsg<'r> {
    fn new(rgate: &'r RecvGate, addr: usize) -> Result<Self, Error> {
        match rgate.dtu().read_msg(rgate.ep(), addr) {
            Ok((header, data)) => Ok(RecvMsg {
                rgate,
                addr,
                header,
                data,
                done: false,
            }),
            Err(e) => {
                rgate.ack_msg(addr).ok();
                Err(e)
            },
        }
    }

    /// Returns the label of the message (0 for receive buffers without headers)
    pub fn label(&self) -> Label {
        self.header.map_or(0, |h| h.label)
    }

    /// Returns the header of the message, if the receive buffer stores headers
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Returns the payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the address of the message within the receive buffer
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Interprets the beginning of the payload as `T`
    pub fn get<T: Pod>(&self) -> Result<T, Error> {
        if self.data.len() < std::mem::size_of::<T>() {
            return Err(Error::new(Code::InvArgs));
        }
        Ok(mem::from_bytes(&self.data))
    }

    /// Replies with `reply` to this message, which acknowledges it as well.
    ///
    /// If the reply fails, the message is still acknowledged when dropped.
    pub fn reply(mut self, reply: &[u8]) -> Result<(), Error> {
        self.rgate.reply(reply, self.addr)?;
        self.done = true;
        Ok(())
    }

    /// Acknowledges the message explicitly
    pub fn finish(mut self) -> Result<(), Error> {
        self.done = true;
        self.rgate.ack_msg(self.addr)
    }

    /// Keeps the slot occupied and returns the message address for a later
    /// [`RecvGate::reply`] or [`RecvGate::ack_msg`].
    pub fn claim(mut self) -> usize {
        self.done = true;
        self.addr
    }
}

impl Drop for RecvMsg<'_> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.rgate.ack_msg(self.addr) {
                log!(
                    LogFlags::LibGates,
                    "RecvGate[ep={}]: unable to ack msg at {:#x}: {:?}",
                    self.rgate.ep(),
                    self.addr,
                    e
                );
            }
        }
    }
}

impl fmt::Debug for RecvMsg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "RecvMsg[addr: {:#x}, label: {:#x}, len: {}]",
            self.addr,
            self.label(),
            self.data.len()
        )
    }
}
