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

//! Contains the delivery of inbound messages

use crate::dtu::cmds::MAX_MEM_XFER;
use crate::dtu::eps::RecvFlags;
use crate::dtu::msg::{self, Header, Message, Opcode};
use crate::dtu::{Control, Dtu, DtuState, EpId, Reg, INVALID_EP, UNLIM_CREDITS};
use crate::errors::{Code, Error};
use crate::io::LogFlags;
use crate::kif::Perm;
use crate::log;
use crate::mem::GlobOff;

/// Delivers `msg`, which arrived for endpoint `ep`
///
/// Messages are stored in the receive buffer of `ep`; memory requests are served directly and
/// responses complete the command waiting for them. Credits carried by the message are refunded
/// in any case, even if the message itself has to be dropped.
pub(crate) fn deliver(dtu: &Dtu, state: &mut DtuState, ep: EpId, msg: Message) {
    let hd = msg.header;

    log!(
        LogFlags::DtuMsgs,
        "<- {:?} {:3}b lbl={:#016x} from N{} to ep={} (crd={:#x}@{})",
        hd.opcode,
        hd.length,
        hd.label,
        hd.src_node,
        ep,
        hd.credits,
        hd.crd_ep,
    );

    let res = match hd.opcode {
        Opcode::Send | Opcode::Reply => store_msg(state, ep, &msg),
        Opcode::Read => serve_read(dtu, state, &msg),
        Opcode::Write => serve_write(dtu, state, &msg),
        Opcode::CmpXchg => serve_cmpxchg(dtu, state, &msg),
        Opcode::Resp => handle_resp(dtu, state, &msg),
        // credits are refunded below
        Opcode::SendCrd => Ok(()),
    };
    if let Err(e) = res {
        log!(
            LogFlags::DtuErrs,
            "EP{}: dropped {:?} from N{}: {:?}",
            ep,
            hd.opcode,
            hd.src_node,
            e
        );
    }

    refund_credits(state, &hd);
}

fn refund_credits(state: &mut DtuState, hd: &Header) {
    if hd.credits == 0 || hd.crd_ep == INVALID_EP {
        return;
    }

    match state.eps.send_ep_mut(hd.crd_ep) {
        Ok(sep) if sep.credits != UNLIM_CREDITS => {
            let old = sep.credits;
            // never reach the sentinel for unlimited credits
            sep.credits = old
                .saturating_add(hd.credits as u64)
                .min(UNLIM_CREDITS - 1);
            log!(
                LogFlags::DtuCredits,
                "EP{}: refilled credits from {:#x} to {:#x}",
                hd.crd_ep,
                old,
                sep.credits
            );
        },
        Ok(_) => {},
        Err(e) => log!(
            LogFlags::DtuErrs,
            "EP{}: cannot refund {:#x} credits: {:?}",
            hd.crd_ep,
            hd.credits,
            e
        ),
    }
}

fn store_msg(state: &mut DtuState, ep: EpId, msg: &Message) -> Result<(), Error> {
    let DtuState { eps, mem } = state;
    let rep = eps.recv_ep_mut(ep)?;
    let slot_size = rep.ring.slot_size();

    let bytes = if rep.flags.contains(RecvFlags::NO_HEADER) {
        let len = msg.data.len().min(slot_size);
        if len < msg.data.len() {
            log!(
                LogFlags::DtuErrs,
                "EP{}: cropping message from {} to {} bytes",
                ep,
                msg.data.len(),
                len
            );
        }
        msg.data[..len].to_vec()
    }
    else {
        if msg.size() > slot_size {
            log!(
                LogFlags::DtuErrs,
                "EP{}: insufficient space (required: {}, available: {})",
                ep,
                msg.size(),
                slot_size
            );
            return Err(Error::new(Code::OutOfBounds));
        }
        msg.encode()
    };

    let idx = rep.ring.alloc_slot().ok_or_else(|| {
        log!(LogFlags::DtuErrs, "EP{}: no free slot", ep);
        Error::new(Code::OutOfMem)
    })?;
    if rep.flags.contains(RecvFlags::NO_HEADER) {
        rep.last_len = bytes.len();
    }

    let addr = rep.addr_of(idx);
    mem[addr..addr + bytes.len()].copy_from_slice(&bytes);

    log!(
        LogFlags::DtuMsgs,
        "EP{}: put msg at index {} (count={})",
        ep,
        idx,
        rep.ring.msg_count()
    );
    Ok(())
}

/// Returns the local address of the region `base + off` with `len` bytes, if valid
fn local_region(
    state: &DtuState,
    label: u64,
    need: Perm,
    off: GlobOff,
    len: usize,
) -> Result<usize, Code> {
    let (base, perm) = Perm::unpack(label);
    if !perm.contains(need) {
        return Err(Code::NoPerm);
    }
    if len > MAX_MEM_XFER {
        return Err(Code::InvArgs);
    }

    match base.checked_add(off).and_then(|a| a.checked_add(len as u64).map(|e| (a, e))) {
        Some((addr, end)) if end <= state.mem.len() as u64 => Ok(addr as usize),
        _ => Err(Code::OutOfBounds),
    }
}

fn status(code: Code) -> u64 {
    u32::from(code) as u64
}

fn invalid() -> Error {
    Error::new(Code::InvArgs)
}

fn word_as_len(word: u64) -> Result<usize, Error> {
    usize::try_from(word).map_err(|_| invalid())
}

/// Decodes the offset and length of a READ request plus the destination in the requester
fn read_args(data: &[u8]) -> Result<(GlobOff, usize, u64), Error> {
    if data.len() != 3 * 8 {
        return Err(invalid());
    }
    let off = msg::mem_word(data, 0)?;
    let len = word_as_len(msg::mem_word(data, 1)?)?;
    let dest = msg::mem_word(data, 2)?;
    Ok((off, len, dest))
}

/// Decodes the offset of a WRITE or CMPXCHG request and its `count` operands of equal length
fn write_args(data: &[u8], count: usize) -> Result<(GlobOff, Vec<&[u8]>), Error> {
    let off = msg::mem_word(data, 0)?;
    let len = word_as_len(msg::mem_word(data, 1)?)?;
    let total = len
        .checked_mul(count)
        .and_then(|n| n.checked_add(2 * 8))
        .ok_or_else(invalid)?;
    if data.len() != total {
        return Err(invalid());
    }

    let ops = (0..count)
        .map(|i| &data[2 * 8 + i * len..2 * 8 + (i + 1) * len])
        .collect();
    Ok((off, ops))
}

fn respond(dtu: &Dtu, req: &Header, words: &[u64], data: &[u8]) -> Result<(), Error> {
    let mut hd = Header::new(Opcode::Resp, dtu.node_id());
    // lets the requester match the response to its command
    hd.label = req.reply_label;
    let resp = Message::new(hd, msg::mem_payload(words, &[data]));
    dtu.transmit(req.src_node, req.rpl_ep, &resp)
}

fn serve_read(dtu: &Dtu, state: &mut DtuState, msg: &Message) -> Result<(), Error> {
    let (off, len, dest) = match read_args(&msg.data) {
        Ok(args) => args,
        Err(e) => {
            log!(LogFlags::DtuErrs, "(read) malformed request: {:?}", e);
            return respond(dtu, &msg.header, &[0, 0, status(e.code())], &[]);
        },
    };

    log!(
        LogFlags::DtuMsgs,
        "(read) {} bytes from {:#x}+{:#x} -> {:#x}",
        len,
        msg.header.label,
        off,
        dest
    );

    match local_region(state, msg.header.label, Perm::R, off, len) {
        Ok(addr) => {
            let data = &state.mem[addr..addr + len];
            respond(dtu, &msg.header, &[dest, len as u64, status(Code::Success)], data)
        },
        Err(code) => {
            log!(LogFlags::DtuErrs, "(read) failed: {:?}", code);
            respond(dtu, &msg.header, &[dest, 0, status(code)], &[])
        },
    }
}

fn serve_write(dtu: &Dtu, state: &mut DtuState, msg: &Message) -> Result<(), Error> {
    let code = match write_args(&msg.data, 1) {
        Ok((off, ops)) => {
            let data = ops[0];
            log!(
                LogFlags::DtuMsgs,
                "(write) {} bytes to {:#x}+{:#x}",
                data.len(),
                msg.header.label,
                off
            );

            match local_region(state, msg.header.label, Perm::W, off, data.len()) {
                Ok(addr) => {
                    state.mem[addr..addr + data.len()].copy_from_slice(data);
                    Code::Success
                },
                Err(code) => code,
            }
        },
        Err(e) => e.code(),
    };

    if code != Code::Success {
        log!(LogFlags::DtuErrs, "(write) failed: {:?}", code);
    }
    respond(dtu, &msg.header, &[0, 0, status(code)], &[])
}

fn serve_cmpxchg(dtu: &Dtu, state: &mut DtuState, msg: &Message) -> Result<(), Error> {
    let code = match write_args(&msg.data, 2) {
        Ok((off, ops)) => {
            let (expected, new) = (ops[0], ops[1]);
            let len = expected.len();
            let code = match local_region(state, msg.header.label, Perm::RW, off, len) {
                Ok(addr) if &state.mem[addr..addr + len] == expected => {
                    state.mem[addr..addr + len].copy_from_slice(new);
                    Code::Success
                },
                Ok(_) => Code::CmpXchgFailed,
                Err(code) => code,
            };

            log!(
                LogFlags::DtuMsgs,
                "(cmpxchg) {} bytes at {:#x}+{:#x}: {:?}",
                len,
                msg.header.label,
                off,
                code
            );
            code
        },
        Err(e) => {
            log!(LogFlags::DtuErrs, "(cmpxchg) malformed request: {:?}", e);
            e.code()
        },
    };

    respond(dtu, &msg.header, &[0, 0, status(code)], &[])
}

/// Applies the response `data` and returns the result of the waiting command
fn resp_result(state: &mut DtuState, data: &[u8]) -> Result<Reg, Error> {
    let dest = word_as_len(msg::mem_word(data, 0)?)?;
    let len = word_as_len(msg::mem_word(data, 1)?)?;
    let status = u32::try_from(msg::mem_word(data, 2)?).unwrap_or(u32::MAX);

    match Code::from(status) {
        Code::Success => {
            let src = data
                .get(3 * 8..)
                .filter(|src| src.len() == len)
                .ok_or_else(invalid)?;
            let dst = dest
                .checked_add(len)
                .and_then(|end| state.mem.get_mut(dest..end))
                .ok_or_else(|| Error::new(Code::OutOfBounds))?;
            dst.copy_from_slice(src);
            Ok(0)
        },
        code => Err(Error::new(code)),
    }
}

fn handle_resp(dtu: &Dtu, state: &mut DtuState, msg: &Message) -> Result<(), Error> {
    if !dtu.ctrl().contains(Control::AWAIT_RESP) || msg.header.label != dtu.resp_tag() {
        log!(
            LogFlags::DtuErrs,
            "ignoring response {} from N{}: no command waits for it",
            msg.header.label,
            msg.header.src_node
        );
        return Ok(());
    }

    let res = resp_result(state, &msg.data);
    log!(
        LogFlags::DtuMsgs,
        "(resp) {} bytes from N{}: {:?}",
        msg.data.len(),
        msg.header.src_node,
        res
    );
    dtu.complete(res);
    Ok(())
}
