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

//! Contains the execution of locally issued commands

use crate::cfg::{HEADER_SIZE, MAX_MSG_SIZE, MEM_REQ_EP};
use crate::dtu::eps::RecvFlags;
use crate::dtu::msg::{self, Header, HeaderFlags, Message, Opcode, FLAGS_OFF};
use crate::dtu::{Control, Dtu, DtuState, EpId, Label, Reg, INVALID_EP, UNLIM_CREDITS};
use crate::errors::{Code, Error};
use crate::io::LogFlags;
use crate::kif::Perm;
use crate::log;
use crate::mem::GlobOff;

/// The largest amount of data a single memory request can transfer
pub const MAX_MEM_XFER: usize = MAX_MSG_SIZE - HEADER_SIZE - 3 * 8;

/// A command that is issued by software and executed by the transport loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Send {
        ep: EpId,
        msg: Vec<u8>,
        reply_lbl: Label,
        reply_ep: EpId,
    },
    Reply {
        ep: EpId,
        msg: Vec<u8>,
        msg_addr: usize,
    },
    Read {
        ep: EpId,
        dest: usize,
        len: usize,
        off: GlobOff,
    },
    Write {
        ep: EpId,
        data: Vec<u8>,
        off: GlobOff,
    },
    CmpXchg {
        ep: EpId,
        expected: Vec<u8>,
        new: Vec<u8>,
        off: GlobOff,
    },
    SendCrd {
        ep: EpId,
        crd_ep: EpId,
        size: usize,
    },
    FetchMsg {
        ep: EpId,
    },
    AckMsg {
        ep: EpId,
        msg_addr: usize,
    },
    DropMsgs {
        ep: EpId,
        label: Label,
    },
}

impl Command {
    /// Returns the endpoint the command is executed on
    pub fn ep(&self) -> EpId {
        match self {
            Command::Send { ep, .. }
            | Command::Reply { ep, .. }
            | Command::Read { ep, .. }
            | Command::Write { ep, .. }
            | Command::CmpXchg { ep, .. }
            | Command::SendCrd { ep, .. }
            | Command::FetchMsg { ep }
            | Command::AckMsg { ep, .. }
            | Command::DropMsgs { ep, .. } => *ep,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Send { .. } => "SEND",
            Command::Reply { .. } => "REPLY",
            Command::Read { .. } => "READ",
            Command::Write { .. } => "WRITE",
            Command::CmpXchg { .. } => "CMPXCHG",
            Command::SendCrd { .. } => "SENDCRD",
            Command::FetchMsg { .. } => "FETCH",
            Command::AckMsg { .. } => "ACK",
            Command::DropMsgs { .. } => "DROP",
        }
    }
}

/// The outcome of a successfully started command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The command is finished and produced the given value
    Done(Reg),
    /// The command waits for the response of a remote node
    AwaitResp,
}

/// Executes `cmd` on the given state
///
/// Validation errors leave the state untouched. If the backend fails to send the message, the
/// command fails with [`Code::RecvGone`] and no credits are consumed.
pub(crate) fn execute(
    dtu: &Dtu,
    state: &mut DtuState,
    cmd: Command,
    ctrl: Control,
) -> Result<Status, Error> {
    log!(LogFlags::DtuCmds, "EP{}: executing {}", cmd.ep(), cmd.name());

    match cmd {
        Command::Send {
            ep,
            msg,
            reply_lbl,
            reply_ep,
        } => send(dtu, state, ep, msg, reply_lbl, reply_ep),
        Command::Reply { ep, msg, msg_addr } => reply(dtu, state, ep, msg, msg_addr, ctrl),
        Command::Read { ep, dest, len, off } => read(dtu, state, ep, dest, len, off),
        Command::Write { ep, data, off } => write(dtu, state, ep, data, off),
        Command::CmpXchg {
            ep,
            expected,
            new,
            off,
        } => cmpxchg(dtu, state, ep, expected, new, off),
        Command::SendCrd { ep, crd_ep, size } => send_credits(dtu, state, ep, crd_ep, size),
        Command::FetchMsg { ep } => fetch(state, ep),
        Command::AckMsg { ep, msg_addr } => ack(state, ep, msg_addr),
        Command::DropMsgs { ep, label } => drop_msgs(state, ep, label),
    }
}

fn check_msg_size(ep: EpId, len: usize) -> Result<(), Error> {
    if len > MAX_MSG_SIZE - HEADER_SIZE {
        log!(
            LogFlags::DtuErrs,
            "EP{}: message too large (max {:#x}, have {:#x})",
            ep,
            MAX_MSG_SIZE - HEADER_SIZE,
            len
        );
        return Err(Error::new(Code::OutOfBounds));
    }
    Ok(())
}

fn send(
    dtu: &Dtu,
    state: &mut DtuState,
    ep: EpId,
    msg: Vec<u8>,
    reply_lbl: Label,
    reply_ep: EpId,
) -> Result<Status, Error> {
    check_msg_size(ep, msg.len())?;

    let sep = state.eps.send_ep(ep)?;
    let needed = (msg.len() + HEADER_SIZE) as u64;
    if sep.credits != UNLIM_CREDITS && needed > sep.credits {
        log!(
            LogFlags::DtuErrs,
            "EP{}: insufficient credits (have {:#x}, need {:#x})",
            ep,
            sep.credits,
            needed
        );
        return Err(Error::new(Code::NoCredits));
    }

    let reply_ep = if reply_ep == INVALID_EP {
        sep.reply_ep
    }
    else {
        reply_ep
    };

    let mut hd = Header::new(Opcode::Send, dtu.node_id());
    hd.snd_ep = ep;
    hd.label = sep.label;
    if reply_ep != INVALID_EP {
        state.eps.recv_ep(reply_ep)?;
        hd.flags = HeaderFlags::REPLY_CAP;
        hd.rpl_ep = reply_ep;
        hd.reply_label = reply_lbl;
    }
    let (dest_node, dest_ep) = (sep.dest_node, sep.dest_ep);

    dtu.transmit(dest_node, dest_ep, &Message::new(hd, msg))?;

    let sep = state.eps.send_ep_mut(ep)?;
    if sep.credits != UNLIM_CREDITS {
        sep.credits -= needed;
        log!(
            LogFlags::DtuCredits,
            "EP{}: consumed {:#x} credits ({:#x} left)",
            ep,
            needed,
            sep.credits
        );
    }
    Ok(Status::Done(0))
}

fn reply(
    dtu: &Dtu,
    state: &mut DtuState,
    ep: EpId,
    msg: Vec<u8>,
    msg_addr: usize,
    ctrl: Control,
) -> Result<Status, Error> {
    check_msg_size(ep, msg.len())?;

    let rep = state.eps.recv_ep(ep)?;
    if rep.flags.contains(RecvFlags::NO_HEADER) {
        log!(
            LogFlags::DtuErrs,
            "EP{}: cannot reply to messages without header",
            ep
        );
        return Err(Error::new(Code::NotSup));
    }

    let idx = rep.idx_of(msg_addr)?;
    // slots that never received a message do not contain a valid header
    let orig = state
        .mem
        .get(msg_addr..msg_addr + HEADER_SIZE)
        .and_then(|hd| Header::decode(hd).ok())
        .ok_or_else(|| Error::new(Code::InvMsgOff))?;
    if !orig.has_replycap() {
        log!(
            LogFlags::DtuErrs,
            "EP{}: message at {:#x} cannot be replied to",
            ep,
            msg_addr
        );
        return Err(Error::new(Code::NoReplyCap));
    }
    if !rep.ring.is_occupied(idx) {
        log!(
            LogFlags::DtuErrs,
            "EP{}: message at {:#x} is not occupied",
            ep,
            msg_addr
        );
        return Err(Error::new(Code::InvMsgOff));
    }

    let mut hd = Header::new(Opcode::Reply, dtu.node_id());
    hd.snd_ep = ep;
    hd.label = orig.reply_label;
    // the reply refunds the credits the original message consumed
    hd.credits = (orig.length + HEADER_SIZE) as u32;
    hd.crd_ep = orig.snd_ep;

    dtu.transmit(orig.src_node, orig.rpl_ep, &Message::new(hd, msg))?;

    if ctrl.contains(Control::DEL_REPLY_CAP) {
        state.mem[msg_addr + FLAGS_OFF] &= !HeaderFlags::REPLY_CAP.bits();
    }
    state.eps.recv_ep_mut(ep)?.ring.ack(idx)?;
    log!(LogFlags::DtuCmds, "EP{}: acked message at index {}", ep, idx);
    Ok(Status::Done(0))
}

fn check_mem(
    ep: EpId,
    size: GlobOff,
    perm: Perm,
    need: Perm,
    off: GlobOff,
    len: usize,
) -> Result<(), Error> {
    if !perm.contains(need) {
        log!(
            LogFlags::DtuErrs,
            "EP{}: operation not permitted (perms={:?}, need={:?})",
            ep,
            perm,
            need
        );
        return Err(Error::new(Code::NoPerm));
    }

    match off.checked_add(len as GlobOff) {
        Some(end) if end <= size && len <= MAX_MEM_XFER => Ok(()),
        _ => {
            log!(
                LogFlags::DtuErrs,
                "EP{}: invalid parameters (size={:#x}, offset={:#x}, len={:#x})",
                ep,
                size,
                off,
                len
            );
            Err(Error::new(Code::OutOfBounds))
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn mem_request(
    dtu: &Dtu,
    state: &DtuState,
    ep: EpId,
    opcode: Opcode,
    need: Perm,
    off: GlobOff,
    len: usize,
    payload: Vec<u8>,
) -> Result<Status, Error> {
    let mep = state.eps.mem_ep(ep)?;
    check_mem(ep, mep.size, mep.perm, need, off, len)?;

    let mut hd = Header::new(opcode, dtu.node_id());
    hd.snd_ep = ep;
    hd.rpl_ep = MEM_REQ_EP;
    hd.label = mep.label();
    hd.reply_label = dtu.next_resp_tag();

    dtu.transmit(mep.dest_node, mep.dest_ep, &Message::new(hd, payload))?;
    Ok(Status::AwaitResp)
}

fn read(
    dtu: &Dtu,
    state: &mut DtuState,
    ep: EpId,
    dest: usize,
    len: usize,
    off: GlobOff,
) -> Result<Status, Error> {
    if dest.checked_add(len).map_or(true, |end| end > state.mem.len()) {
        log!(
            LogFlags::DtuErrs,
            "EP{}: local destination {:#x}:{:#x} out of bounds",
            ep,
            dest,
            len
        );
        return Err(Error::new(Code::OutOfBounds));
    }

    let payload = msg::mem_payload(&[off, len as u64, dest as u64], &[]);
    mem_request(dtu, state, ep, Opcode::Read, Perm::R, off, len, payload)
}

fn write(
    dtu: &Dtu,
    state: &mut DtuState,
    ep: EpId,
    data: Vec<u8>,
    off: GlobOff,
) -> Result<Status, Error> {
    let len = data.len();
    let payload = msg::mem_payload(&[off, len as u64], &[&data]);
    mem_request(dtu, state, ep, Opcode::Write, Perm::W, off, len, payload)
}

fn cmpxchg(
    dtu: &Dtu,
    state: &mut DtuState,
    ep: EpId,
    expected: Vec<u8>,
    new: Vec<u8>,
    off: GlobOff,
) -> Result<Status, Error> {
    let len = expected.len();
    if new.len() != len || 2 * len > MAX_MEM_XFER {
        return Err(Error::new(Code::InvArgs));
    }

    let payload = msg::mem_payload(&[off, len as u64], &[&expected, &new]);
    mem_request(dtu, state, ep, Opcode::CmpXchg, Perm::RW, off, len, payload)
}

fn send_credits(
    dtu: &Dtu,
    state: &mut DtuState,
    ep: EpId,
    crd_ep: EpId,
    size: usize,
) -> Result<Status, Error> {
    let sep = state.eps.send_ep(ep)?;
    let credits = u32::try_from(size + HEADER_SIZE).map_err(|_| Error::new(Code::InvArgs))?;

    let mut hd = Header::new(Opcode::SendCrd, dtu.node_id());
    hd.snd_ep = ep;
    hd.label = sep.label;
    hd.credits = credits;
    hd.crd_ep = crd_ep;

    dtu.transmit(sep.dest_node, sep.dest_ep, &Message::new(hd, Vec::new()))?;
    Ok(Status::Done(0))
}

fn fetch(state: &mut DtuState, ep: EpId) -> Result<Status, Error> {
    let rep = state.eps.recv_ep_mut(ep)?;
    match rep.ring.fetch_unread() {
        Some(idx) => {
            log!(
                LogFlags::DtuCmds,
                "EP{}: fetched msg at index {} (count={})",
                ep,
                idx,
                rep.ring.msg_count()
            );
            Ok(Status::Done(rep.addr_of(idx) as Reg))
        },
        None => Err(Error::new(Code::NotFound)),
    }
}

fn ack(state: &mut DtuState, ep: EpId, msg_addr: usize) -> Result<Status, Error> {
    let rep = state.eps.recv_ep_mut(ep)?;
    let idx = rep.idx_of(msg_addr)?;
    rep.ring.ack(idx)?;
    log!(LogFlags::DtuCmds, "EP{}: acked message at index {}", ep, idx);
    Ok(Status::Done(0))
}

fn drop_msgs(state: &mut DtuState, ep: EpId, label: Label) -> Result<Status, Error> {
    let DtuState { eps, mem } = state;
    let rep = eps.recv_ep_mut(ep)?;
    // without headers, there are no labels to match
    if rep.flags.contains(RecvFlags::NO_HEADER) {
        return Ok(Status::Done(0));
    }

    let matching: Vec<usize> = rep
        .ring
        .unread_slots()
        .filter(|idx| {
            let addr = rep.addr_of(*idx);
            matches!(Header::decode(&mem[addr..]), Ok(hd) if hd.label == label)
        })
        .collect();
    for idx in matching {
        log!(
            LogFlags::DtuCmds,
            "EP{}: dropping msg at index {} (lbl={:#x})",
            ep,
            idx,
            label
        );
        rep.ring.ack(idx)?;
    }
    Ok(Status::Done(0))
}
