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

//! Contains the data transfer unit (DTU)
//!
//! Every node has a DTU with a number of endpoints and a local memory. Endpoints are configured as
//! send, receive, or memory endpoints. Software issues commands on these endpoints, which are
//! executed by the node's transport loop in a separate thread. The transport loop also delivers
//! inbound messages into the receive buffers, serves memory requests of other nodes, and applies
//! credit refunds.
//!
//! Commands are handed over via the command registers: the issuing thread stores the command and
//! sets [`Control::START`]; the transport loop executes it and clears the control register, leaving
//! an error code in it on failure. Memory commands additionally wait for the response of the
//! remote node ([`Control::AWAIT_RESP`]).

mod backend;
mod cmds;
mod config;
mod eps;
mod msg;
mod recv;
mod ringbuf;
mod thread;

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread as os;
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;
use derivative::Derivative;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::cfg::{HEADER_SIZE, XFER_BUF_SIZE};
use crate::errors::{Code, Error, VerboseError};
use crate::io::LogFlags;
use crate::kif::Perm;
use crate::log;
use crate::mem::GlobOff;

pub use self::backend::{Backend, ChannelBackend, Fabric, Packet};
#[cfg(unix)]
pub use self::backend::SocketBackend;
pub use self::cmds::{Command, Status, MAX_MEM_XFER};
pub use self::config::{BackendKind, DtuConfig};
pub use self::eps::{EpConfig, EpField, EpStore, EpType, MemEp, RecvEp, RecvFlags, SendEp};
pub use self::msg::{Header, HeaderFlags, Message, Opcode};
pub use self::ringbuf::RingBuf;

/// An endpoint id
pub type EpId = u16;
/// A node id
pub type NodeId = u8;
/// A message label
pub type Label = u64;
/// A register value
pub type Reg = u64;

/// The endpoint id that denotes "no endpoint"
pub const INVALID_EP: EpId = 0xFF;
/// The credit value that denotes unlimited credits
pub const UNLIM_CREDITS: u64 = u64::MAX;

const CODE_SHIFT: u32 = 32;

bitflags! {
    /// The flags in the lower half of the control register; the upper half holds the error code
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Control : Reg {
        /// A command has been started and not yet executed
        const START         = 1 << 0;
        /// The command waits for the response of a remote node
        const AWAIT_RESP    = 1 << 1;
        /// The command failed
        const ERROR         = 1 << 2;
        /// Revoke the reply capability of the message that is replied to
        const DEL_REPLY_CAP = 1 << 3;
    }
}

/// The registers used to hand over commands to the transport loop
#[derive(Debug)]
struct CmdRegs {
    ctrl: AtomicU64,
    /// The result of the last command (e.g., the address of a fetched message)
    arg: AtomicU64,
    /// The tag of the last memory request, echoed by the response
    tag: AtomicU64,
    cmd: Mutex<Option<Command>>,
}

/// The endpoints and the local memory of a DTU
pub(crate) struct DtuState {
    pub eps: EpStore,
    pub mem: Vec<u8>,
}

/// The DTU of one node
///
/// The transport loop holds a reference to the DTU until [`Dtu::shutdown`] is called.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Dtu {
    node: NodeId,
    cfg: DtuConfig,
    #[derivative(Debug = "ignore")]
    state: Mutex<DtuState>,
    regs: CmdRegs,
    #[derivative(Debug = "ignore")]
    issue: ReentrantMutex<()>,
    #[derivative(Debug = "ignore")]
    backend: Box<dyn Backend>,
    run: AtomicBool,
    stopped: AtomicBool,
    #[derivative(Debug = "ignore")]
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Dtu {
    /// Creates a new DTU with the backend specified in `cfg` and starts its transport loop
    pub fn new(cfg: DtuConfig) -> Result<Arc<Self>, VerboseError> {
        cfg.validate()?;
        let backend = backend::create(&cfg).map_err(|e| {
            VerboseError::new(
                e.code(),
                format!("unable to create backend for node {}", cfg.node_id),
            )
        })?;
        Self::with_backend(cfg, backend)
    }

    /// Creates a new DTU that uses the given backend and starts its transport loop
    pub fn with_backend(
        cfg: DtuConfig,
        backend: Box<dyn Backend>,
    ) -> Result<Arc<Self>, VerboseError> {
        cfg.validate()?;

        let dtu = Arc::new(Dtu {
            node: cfg.node_id,
            state: Mutex::new(DtuState {
                eps: EpStore::new(cfg.ep_count),
                mem: vec![0; cfg.mem_size],
            }),
            regs: CmdRegs {
                ctrl: AtomicU64::new(0),
                arg: AtomicU64::new(0),
                tag: AtomicU64::new(0),
                cmd: Mutex::new(None),
            },
            issue: ReentrantMutex::new(()),
            backend,
            run: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
            cfg,
        });

        let loop_dtu = dtu.clone();
        let handle = os::Builder::new()
            .name(format!("dtu{}", dtu.node))
            .spawn(move || {
                thread::run(loop_dtu.clone());
                loop_dtu.stopped.store(true, Ordering::Release);
            })
            .map_err(|e| {
                VerboseError::new(Code::InvState, format!("unable to spawn DTU thread: {}", e))
            })?;
        *dtu.thread.lock() = Some(handle);

        log!(
            LogFlags::DtuEPs,
            "created DTU for node {} ({} EPs, {:#x} bytes memory)",
            dtu.node,
            dtu.cfg.ep_count,
            dtu.cfg.mem_size
        );
        Ok(dtu)
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &DtuConfig {
        &self.cfg
    }

    pub fn ep_count(&self) -> usize {
        self.cfg.ep_count
    }

    pub fn mem_size(&self) -> usize {
        self.cfg.mem_size
    }

    /// Returns true until [`Dtu::shutdown`] has been called
    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }

    /// Stops the transport loop
    ///
    /// Messages that have already arrived are still delivered; afterwards, all commands fail with
    /// [`Code::InvState`].
    pub fn shutdown(&self) {
        if !self.run.swap(false, Ordering::AcqRel) {
            return;
        }

        self.backend.wakeup();
        let handle = self.thread.lock().take();
        if let Some(h) = handle {
            // the loop itself never calls shutdown, but a panicking loop should not take us down
            if h.thread().id() != os::current().id() && h.join().is_err() {
                log!(LogFlags::Error, "DTU thread of node {} panicked", self.node);
            }
        }
    }

    // endpoint configuration

    /// Configures `ep` as send endpoint to `dest_node`:`dest_ep` with given label and credits
    pub fn configure_send(
        &self,
        ep: EpId,
        label: Label,
        dest_node: NodeId,
        dest_ep: EpId,
        credits: u64,
    ) -> Result<(), Error> {
        log!(
            LogFlags::DtuEPs,
            "EP{}: send EP to N{}:{} (lbl={:#x}, crd={:#x})",
            ep,
            dest_node,
            dest_ep,
            label,
            credits
        );
        self.state
            .lock()
            .eps
            .configure_send(ep, label, dest_node, dest_ep, credits)
    }

    /// Configures `ep` as receive endpoint with a buffer of `2^order` bytes at local address
    /// `buf_addr`, split into slots of `2^msg_order` bytes
    pub fn configure_recv(
        &self,
        ep: EpId,
        buf_addr: usize,
        order: u32,
        msg_order: u32,
        flags: RecvFlags,
    ) -> Result<(), Error> {
        log!(
            LogFlags::DtuEPs,
            "EP{}: recv EP at {:#x} (order={}, msg_order={}, flags={:?})",
            ep,
            buf_addr,
            order,
            msg_order,
            flags
        );

        let mut state = self.state.lock();
        let end = 1usize
            .checked_shl(order)
            .and_then(|size| buf_addr.checked_add(size));
        if end.map_or(true, |e| e > state.mem.len()) || buf_addr < XFER_BUF_SIZE {
            return Err(Error::new(Code::OutOfBounds));
        }
        state
            .eps
            .configure_recv(ep, buf_addr, order, msg_order, flags)
    }

    /// Configures `ep` as memory endpoint for the region `base`..`base + size` of `dest_node`
    pub fn configure_mem(
        &self,
        ep: EpId,
        dest_node: NodeId,
        dest_ep: EpId,
        base: GlobOff,
        size: GlobOff,
        perm: Perm,
    ) -> Result<(), Error> {
        log!(
            LogFlags::DtuEPs,
            "EP{}: mem EP to N{}:{} ({:#x}:{:#x}, perm={:?})",
            ep,
            dest_node,
            dest_ep,
            base,
            size,
            perm
        );
        self.state
            .lock()
            .eps
            .configure_mem(ep, dest_node, dest_ep, base, size, perm)
    }

    pub fn invalidate(&self, ep: EpId) -> Result<(), Error> {
        log!(LogFlags::DtuEPs, "EP{}: invalidated", ep);
        self.state.lock().eps.invalidate(ep)
    }

    /// Returns a copy of the configuration of `ep`
    pub fn ep_config(&self, ep: EpId) -> Result<EpConfig, Error> {
        self.state.lock().eps.get(ep).cloned()
    }

    pub fn ep_field(&self, ep: EpId, field: EpField) -> Result<Reg, Error> {
        self.state.lock().eps.field(ep, field)
    }

    pub fn set_ep_field(&self, ep: EpId, field: EpField, val: Reg) -> Result<(), Error> {
        self.state.lock().eps.set_field(ep, field, val)
    }

    /// Returns the credits of the given send endpoint or the size of the given memory endpoint
    pub fn credits(&self, ep: EpId) -> Result<u64, Error> {
        self.state.lock().eps.credits(ep)
    }

    pub fn is_valid(&self, ep: EpId) -> bool {
        self.state.lock().eps.is_valid(ep)
    }

    /// Returns true if the receive endpoint `ep` has unread messages
    pub fn has_msgs(&self, ep: EpId) -> bool {
        self.state.lock().eps.has_msgs(ep)
    }

    /// Returns the number of unread messages of the receive endpoint `ep`
    pub fn msg_count(&self, ep: EpId) -> Result<usize, Error> {
        Ok(self.state.lock().eps.recv_ep(ep)?.ring.msg_count())
    }

    // commands

    /// Sends `msg` via send endpoint `ep`
    ///
    /// If `reply_ep` is not [`INVALID_EP`], the receiver can reply once to the message; the reply
    /// is delivered to `reply_ep` with label `reply_lbl`. Without `reply_ep`, the reply endpoint
    /// configured in `ep` ([`EpField::ReplyEp`]) is used, if any.
    pub fn send(&self, ep: EpId, msg: &[u8], reply_lbl: Label, reply_ep: EpId) -> Result<(), Error> {
        self.exec(
            Command::Send {
                ep,
                msg: msg.to_vec(),
                reply_lbl,
                reply_ep,
            },
            Control::empty(),
        )
        .map(|_| ())
    }

    /// Replies with `msg` to the message at `msg_addr` in receive endpoint `ep`
    ///
    /// The message is acknowledged afterwards and its reply capability is revoked.
    pub fn reply(&self, ep: EpId, msg: &[u8], msg_addr: usize) -> Result<(), Error> {
        self.exec(
            Command::Reply {
                ep,
                msg: msg.to_vec(),
                msg_addr,
            },
            Control::DEL_REPLY_CAP,
        )
        .map(|_| ())
    }

    /// Reads `len` bytes at offset `off` of memory endpoint `ep` into local address `dest`
    pub fn read(&self, ep: EpId, dest: usize, len: usize, off: GlobOff) -> Result<(), Error> {
        self.exec(Command::Read { ep, dest, len, off }, Control::empty())
            .map(|_| ())
    }

    /// Writes `data` to offset `off` of memory endpoint `ep`
    pub fn write(&self, ep: EpId, data: &[u8], off: GlobOff) -> Result<(), Error> {
        self.exec(
            Command::Write {
                ep,
                data: data.to_vec(),
                off,
            },
            Control::empty(),
        )
        .map(|_| ())
    }

    /// Replaces `expected` by `new` at offset `off` of memory endpoint `ep`
    ///
    /// Fails with [`Code::CmpXchgFailed`] if the memory did not contain `expected`.
    pub fn cmpxchg(&self, ep: EpId, expected: &[u8], new: &[u8], off: GlobOff) -> Result<(), Error> {
        self.exec(
            Command::CmpXchg {
                ep,
                expected: expected.to_vec(),
                new: new.to_vec(),
                off,
            },
            Control::empty(),
        )
        .map(|_| ())
    }

    /// Grants `size` bytes worth of credits to send endpoint `crd_ep` on the destination of `ep`
    pub fn send_credits(&self, ep: EpId, crd_ep: EpId, size: usize) -> Result<(), Error> {
        self.exec(Command::SendCrd { ep, crd_ep, size }, Control::empty())
            .map(|_| ())
    }

    /// Fetches the next unread message of receive endpoint `ep` and returns its address
    pub fn fetch_msg(&self, ep: EpId) -> Option<usize> {
        match self.exec(Command::FetchMsg { ep }, Control::empty()) {
            Ok(addr) => Some(addr as usize),
            Err(e) => {
                if e.code() != Code::NotFound {
                    log!(LogFlags::DtuErrs, "EP{}: fetch failed: {:?}", ep, e);
                }
                None
            },
        }
    }

    /// Acknowledges the message at `msg_addr` in receive endpoint `ep`
    pub fn ack_msg(&self, ep: EpId, msg_addr: usize) -> Result<(), Error> {
        self.exec(Command::AckMsg { ep, msg_addr }, Control::empty())
            .map(|_| ())
    }

    /// Acknowledges all unread messages of receive endpoint `ep` with given label
    pub fn drop_msgs_with(&self, ep: EpId, label: Label) -> Result<(), Error> {
        self.exec(Command::DropMsgs { ep, label }, Control::empty())
            .map(|_| ())
    }

    // local memory

    /// Reads `buf.len()` bytes at local address `addr` into `buf`
    pub fn read_mem(&self, addr: usize, buf: &mut [u8]) -> Result<(), Error> {
        let state = self.state.lock();
        let src = addr
            .checked_add(buf.len())
            .and_then(|end| state.mem.get(addr..end))
            .ok_or_else(|| Error::new(Code::OutOfBounds))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Writes `data` to local address `addr`
    pub fn write_mem(&self, addr: usize, data: &[u8]) -> Result<(), Error> {
        let mut state = self.state.lock();
        let dst = addr
            .checked_add(data.len())
            .and_then(|end| state.mem.get_mut(addr..end))
            .ok_or_else(|| Error::new(Code::OutOfBounds))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Returns the header (if the endpoint stores headers) and the payload of the message at
    /// `msg_addr` in receive endpoint `ep`
    pub fn read_msg(&self, ep: EpId, msg_addr: usize) -> Result<(Option<Header>, Vec<u8>), Error> {
        let state = self.state.lock();
        let rep = state.eps.recv_ep(ep)?;
        let idx = rep.idx_of(msg_addr)?;
        if !rep.ring.is_occupied(idx) {
            return Err(Error::new(Code::InvMsgOff));
        }

        let (hd, start, len) = if rep.flags.contains(RecvFlags::NO_HEADER) {
            (None, msg_addr, rep.last_len)
        }
        else {
            let hd = Header::decode(&state.mem[msg_addr..])?;
            (Some(hd), msg_addr + HEADER_SIZE, hd.length)
        };

        // the slot might have been overwritten via write_mem
        let data = state
            .mem
            .get(start..start + len)
            .ok_or_else(|| Error::new(Code::InvMsgOff))?;
        Ok((hd, data.to_vec()))
    }

    /// Reserves the command interface for the current thread
    ///
    /// While the returned guard is alive, other threads cannot issue commands on this DTU. This is
    /// used to keep the transfer buffer stable across a READ and the subsequent copy-out.
    pub fn reserve(&self) -> ReentrantMutexGuard<'_, ()> {
        self.issue.lock()
    }

    // command registers

    pub(crate) fn ctrl(&self) -> Control {
        Control::from_bits_truncate(self.regs.ctrl.load(Ordering::Acquire))
    }

    pub(crate) fn set_ctrl(&self, ctrl: Control) {
        self.regs.ctrl.store(ctrl.bits(), Ordering::Release);
    }

    /// Returns the tag that the response to the current memory request carries
    pub(crate) fn resp_tag(&self) -> u64 {
        self.regs.tag.load(Ordering::Acquire)
    }

    pub(crate) fn next_resp_tag(&self) -> u64 {
        self.regs.tag.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Finishes the current command with given result
    pub(crate) fn complete(&self, res: Result<Reg, Error>) {
        match res {
            Ok(val) => {
                self.regs.arg.store(val, Ordering::Relaxed);
                self.regs.ctrl.store(0, Ordering::Release);
            },
            Err(e) => {
                let code = u32::from(e.code()) as Reg;
                self.regs.ctrl.store(
                    Control::ERROR.bits() | (code << CODE_SHIFT),
                    Ordering::Release,
                );
            },
        }
    }

    /// Hands `msg` to the backend for delivery to `node`:`ep`
    pub(crate) fn transmit(&self, node: NodeId, ep: EpId, msg: &Message) -> Result<(), Error> {
        log!(
            LogFlags::DtuMsgs,
            "{} {:?} {:3}b lbl={:#016x} to N{}:{} (rpl={}, crd={:#x}@{})",
            if msg.header.opcode == Opcode::Reply { ">>" } else { "->" },
            msg.header.opcode,
            msg.header.length,
            msg.header.label,
            node,
            ep,
            msg.header.rpl_ep,
            msg.header.credits,
            msg.header.crd_ep,
        );

        self.backend.send(node, ep, &msg.encode()).map_err(|e| {
            log!(
                LogFlags::DtuErrs,
                "unable to send {:?} to N{}:{}: {:?}",
                msg.header.opcode,
                node,
                ep,
                e
            );
            Error::new(Code::RecvGone)
        })
    }

    fn exec(&self, cmd: Command, flags: Control) -> Result<Reg, Error> {
        let _guard = self.issue.lock();
        if !self.is_running() {
            return Err(Error::new(Code::InvState));
        }

        *self.regs.cmd.lock() = Some(cmd);
        self.set_ctrl(flags | Control::START);
        self.backend.wakeup();
        self.wait_ready()
    }

    fn result(&self) -> Option<Result<Reg, Error>> {
        let ctrl = self.regs.ctrl.load(Ordering::Acquire);
        let flags = Control::from_bits_truncate(ctrl);
        if flags.intersects(Control::START | Control::AWAIT_RESP) {
            None
        }
        else if flags.contains(Control::ERROR) {
            Some(Err(Error::from((ctrl >> CODE_SHIFT) as u32)))
        }
        else {
            Some(Ok(self.regs.arg.load(Ordering::Relaxed)))
        }
    }

    fn wait_ready(&self) -> Result<Reg, Error> {
        let mut rounds = 0u32;
        loop {
            if let Some(res) = self.result() {
                return res;
            }
            if self.stopped.load(Ordering::Acquire) {
                // the loop might have finished the command right before it stopped
                return self
                    .result()
                    .unwrap_or_else(|| Err(Error::new(Code::InvState)));
            }

            rounds += 1;
            match rounds {
                0..=100 => hint::spin_loop(),
                101..=1000 => os::yield_now(),
                _ => os::sleep(Duration::from_micros(10)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{MAX_MSG_SIZE, MEM_REQ_EP};

    fn node(fabric: &Arc<Fabric>, id: NodeId) -> Arc<Dtu> {
        let cfg = DtuConfig::new(id).eps(8).mem(64 * 1024);
        let backend = ChannelBackend::new(fabric, id).unwrap();
        Dtu::with_backend(cfg, Box::new(backend)).unwrap()
    }

    fn recv_msg(backend: &ChannelBackend) -> Message {
        loop {
            if let Some(pkt) = backend.receive(Some(Duration::from_millis(10))) {
                break Message::decode(&pkt.data).unwrap();
            }
        }
    }

    fn respond_raw(backend: &ChannelBackend, req: &Message, code: Code) {
        let mut hd = Header::new(Opcode::Resp, 1);
        hd.label = req.header.reply_label;
        let resp = Message::new(hd, msg::mem_payload(&[0, 0, u32::from(code) as u64], &[]));
        backend
            .send(req.header.src_node, req.header.rpl_ep, &resp.encode())
            .unwrap();
    }

    fn wait_msg(dtu: &Dtu, ep: EpId) -> usize {
        loop {
            if let Some(addr) = dtu.fetch_msg(ep) {
                break addr;
            }
            os::yield_now();
        }
    }

    #[test]
    fn send_errors() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);

        assert_eq!(a.send(9, &[0], 0, INVALID_EP), Err(Error::new(Code::InvEP)));
        assert_eq!(a.send(1, &[0], 0, INVALID_EP), Err(Error::new(Code::NoSEP)));

        a.configure_send(1, 0, 5, 1, UNLIM_CREDITS).unwrap();
        assert_eq!(
            a.send(1, &vec![0; MAX_MSG_SIZE], 0, INVALID_EP),
            Err(Error::new(Code::OutOfBounds))
        );
        // reply EP has to be a receive EP
        assert_eq!(a.send(1, &[0], 0, 2), Err(Error::new(Code::NoREP)));
        // node 5 does not exist
        assert_eq!(a.send(1, &[0], 0, INVALID_EP), Err(Error::new(Code::RecvGone)));

        assert_eq!(a.fetch_msg(1), None);
        a.shutdown();
    }

    #[test]
    fn send_fetch_ack() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        let b = node(&fabric, 1);

        b.configure_recv(2, 0x2000, 8, 6, RecvFlags::empty()).unwrap();
        a.configure_send(1, 0x42, 1, 2, UNLIM_CREDITS).unwrap();

        a.send(1, b"hello", 0, INVALID_EP).unwrap();
        let addr = wait_msg(&b, 2);
        let (hd, data) = b.read_msg(2, addr).unwrap();
        let hd = hd.unwrap();
        assert_eq!(hd.label, 0x42);
        assert_eq!(hd.src_node, 0);
        assert!(!hd.has_replycap());
        assert_eq!(data, b"hello");

        assert_eq!(b.ack_msg(2, addr), Ok(()));
        assert_eq!(b.ack_msg(2, addr), Err(Error::new(Code::InvMsgOff)));
        assert_eq!(b.read_msg(2, addr).err(), Some(Error::new(Code::InvMsgOff)));

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn recv_buffer_bounds() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        // overlaps the transfer buffer
        assert_eq!(
            a.configure_recv(0, 0, 8, 6, RecvFlags::empty()),
            Err(Error::new(Code::OutOfBounds))
        );
        assert_eq!(
            a.configure_recv(0, 64 * 1024 - 128, 8, 6, RecvFlags::empty()),
            Err(Error::new(Code::OutOfBounds))
        );
        assert_eq!(
            a.configure_recv(0, 64 * 1024 - 256, 8, 6, RecvFlags::empty()),
            Ok(())
        );
        a.shutdown();
    }

    #[test]
    fn commands_after_shutdown() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        a.configure_send(1, 0, 0, 2, UNLIM_CREDITS).unwrap();
        a.shutdown();
        a.shutdown();
        assert!(!a.is_running());
        assert_eq!(a.send(1, &[1], 0, INVALID_EP), Err(Error::new(Code::InvState)));
        // executed by the transport loop like every other command
        assert_eq!(a.drop_msgs_with(1, 0), Err(Error::new(Code::InvState)));
        // configuration stays accessible
        assert_eq!(a.credits(1), Ok(UNLIM_CREDITS));
    }

    #[test]
    fn local_memory() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        a.write_mem(0x100, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        a.read_mem(0x100, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(
            a.write_mem(64 * 1024 - 1, &[1, 2]),
            Err(Error::new(Code::OutOfBounds))
        );
        assert_eq!(
            a.read_mem(usize::MAX, &mut buf),
            Err(Error::new(Code::OutOfBounds))
        );
        a.shutdown();
    }

    #[test]
    fn headerless_single_slot() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        let b = node(&fabric, 1);

        let flags = RecvFlags::NO_HEADER | RecvFlags::NO_RINGBUF;
        b.configure_recv(3, 0x2000, 4, 0, flags).unwrap();
        a.configure_send(1, 0, 1, 3, UNLIM_CREDITS).unwrap();

        // cropped to the 16 byte slot
        a.send(1, &[7u8; 20], 0, INVALID_EP).unwrap();
        a.send(1, &[8u8; 4], 0, INVALID_EP).unwrap();
        while b.msg_count(3) != Ok(1) || b.ep_field(3, EpField::BufOccupied) != Ok(1) {
            os::yield_now();
        }

        let addr = wait_msg(&b, 3);
        assert_eq!(addr, 0x2000);
        let (hd, data) = b.read_msg(3, addr).unwrap();
        assert!(hd.is_none());
        assert!(data == vec![7u8; 16] || data == vec![8u8; 4]);

        // headerless messages cannot be replied to
        assert_eq!(b.reply(3, &[0], addr), Err(Error::new(Code::NotSup)));
        assert_eq!(b.ack_msg(3, addr), Ok(()));

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn unlimited_credits_stay_unlimited() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        let b = node(&fabric, 1);

        a.configure_send(1, 0, 1, 1, UNLIM_CREDITS).unwrap();
        b.configure_send(1, 0, 0, 2, UNLIM_CREDITS).unwrap();
        b.configure_send(2, 0, 0, 2, 10).unwrap();

        a.send_credits(1, 1, 64).unwrap();
        a.send_credits(1, 2, 64).unwrap();
        while b.credits(2) != Ok(10 + 64 + HEADER_SIZE as u64) {
            os::yield_now();
        }
        assert_eq!(b.credits(1), Ok(UNLIM_CREDITS));
        // the sender's credits are not touched
        assert_eq!(a.credits(1), Ok(UNLIM_CREDITS));

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn drop_msgs_by_label() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        let b = node(&fabric, 1);

        b.configure_recv(2, 0x2000, 8, 6, RecvFlags::empty()).unwrap();
        a.configure_send(1, 0x10, 1, 2, UNLIM_CREDITS).unwrap();
        a.configure_send(2, 0x20, 1, 2, UNLIM_CREDITS).unwrap();

        a.send(1, b"a", 0, INVALID_EP).unwrap();
        a.send(2, b"b", 0, INVALID_EP).unwrap();
        a.send(1, b"c", 0, INVALID_EP).unwrap();
        while b.msg_count(2) != Ok(3) {
            os::yield_now();
        }

        b.drop_msgs_with(2, 0x10).unwrap();
        assert_eq!(b.msg_count(2), Ok(1));
        assert_eq!(b.ep_field(2, EpField::BufOccupied), Ok(0b010));

        let addr = wait_msg(&b, 2);
        let (hd, data) = b.read_msg(2, addr).unwrap();
        assert_eq!(hd.unwrap().label, 0x20);
        assert_eq!(data, b"b");

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn default_reply_ep() {
        let fabric = Fabric::new();
        let a = node(&fabric, 0);
        let b = node(&fabric, 1);

        b.configure_recv(2, 0x2000, 8, 6, RecvFlags::empty()).unwrap();
        a.configure_recv(3, 0x2000, 8, 6, RecvFlags::empty()).unwrap();
        a.configure_send(1, 0x42, 1, 2, UNLIM_CREDITS).unwrap();
        a.set_ep_field(1, EpField::ReplyEp, 4).unwrap();
        assert_eq!(a.send(1, b"ping", 0x77, INVALID_EP), Err(Error::new(Code::NoREP)));

        a.set_ep_field(1, EpField::ReplyEp, 3).unwrap();
        a.send(1, b"ping", 0x77, INVALID_EP).unwrap();
        let addr = wait_msg(&b, 2);
        let hd = b.read_msg(2, addr).unwrap().0.unwrap();
        assert!(hd.has_replycap());
        assert_eq!(hd.rpl_ep, 3);
        assert_eq!(hd.reply_label, 0x77);

        b.reply(2, b"pong", addr).unwrap();
        let addr = wait_msg(&a, 3);
        let (hd, data) = a.read_msg(3, addr).unwrap();
        assert_eq!(hd.unwrap().label, 0x77);
        assert_eq!(data, b"pong");

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn malformed_mem_requests() {
        let fabric = Fabric::new();
        let b = node(&fabric, 1);
        let a = ChannelBackend::new(&fabric, 0).unwrap();

        let request = |opcode, payload: Vec<u8>, tag| {
            let mut hd = Header::new(opcode, 0);
            hd.rpl_ep = MEM_REQ_EP;
            hd.label = Perm::RW.pack(0x1000);
            hd.reply_label = tag;
            a.send(1, MEM_REQ_EP, &Message::new(hd, payload).encode())
                .unwrap();

            let resp = recv_msg(&a);
            assert_eq!(resp.header.opcode, Opcode::Resp);
            assert_eq!(resp.header.label, tag);
            Code::from(msg::mem_word(&resp.data, 2).unwrap() as u32)
        };

        // announces 8 bytes, but carries none
        let write = msg::mem_payload(&[0, 8], &[]);
        assert_eq!(request(Opcode::Write, write, 1), Code::InvArgs);
        let cmpxchg = msg::mem_payload(&[0, u64::MAX], &[&[0; 8]]);
        assert_eq!(request(Opcode::CmpXchg, cmpxchg, 2), Code::InvArgs);
        let cmpxchg = msg::mem_payload(&[0, 4], &[&[0; 4]]);
        assert_eq!(request(Opcode::CmpXchg, cmpxchg, 3), Code::InvArgs);
        // no destination address
        let read = msg::mem_payload(&[0, 8], &[]);
        assert_eq!(request(Opcode::Read, read, 4), Code::InvArgs);
        assert_eq!(request(Opcode::Write, vec![1, 2, 3], 5), Code::InvArgs);

        // well-formed requests are still served
        let write = msg::mem_payload(&[8, 2], &[&[5, 6]]);
        assert_eq!(request(Opcode::Write, write, 6), Code::Success);
        let mut buf = [0u8; 2];
        b.read_mem(0x1008, &mut buf).unwrap();
        assert_eq!(buf, [5, 6]);

        b.shutdown();
    }

    #[test]
    fn response_timeout() {
        let fabric = Fabric::new();
        let cfg = DtuConfig::new(0).eps(8).mem(64 * 1024).resp_timeout(50);
        let backend = ChannelBackend::new(&fabric, 0).unwrap();
        let a = Dtu::with_backend(cfg, Box::new(backend)).unwrap();
        // node 1 receives the requests, but does not answer by itself
        let b = ChannelBackend::new(&fabric, 1).unwrap();
        a.configure_mem(1, 1, MEM_REQ_EP, 0x1000, 0x100, Perm::RW)
            .unwrap();

        assert_eq!(a.write(1, &[1, 2], 0), Err(Error::new(Code::Timeout)));
        let first = recv_msg(&b);
        assert_eq!(first.header.opcode, Opcode::Write);

        os::scope(|s| {
            s.spawn(|| {
                let second = recv_msg(&b);
                assert_ne!(second.header.reply_label, first.header.reply_label);
                // the late response to the first request must not complete the second one
                respond_raw(&b, &first, Code::Success);
                respond_raw(&b, &second, Code::NoPerm);
            });
            assert_eq!(a.write(1, &[3], 8), Err(Error::new(Code::NoPerm)));
        });

        a.shutdown();
    }
}
