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

//! Contains the transport loop that runs the DTU of a node

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dtu::backend::Packet;
use crate::dtu::cmds::{self, Status};
use crate::dtu::msg::Message;
use crate::dtu::{recv, Control, Dtu};
use crate::errors::{Code, Error};
use crate::io::{self, LogFlags};
use crate::log;

/// Inbound messages that wait for delivery, one queue per endpoint
struct Inbox {
    queues: Vec<VecDeque<Message>>,
}

impl Inbox {
    fn new(eps: usize) -> Self {
        Inbox {
            queues: (0..eps).map(|_| VecDeque::new()).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    fn push(&mut self, pkt: Packet) {
        let queue = match self.queues.get_mut(pkt.ep as usize) {
            Some(q) => q,
            None => {
                log!(LogFlags::DtuErrs, "dropping packet for invalid EP{}", pkt.ep);
                return;
            },
        };

        match Message::decode(&pkt.data) {
            Ok(msg) => queue.push_back(msg),
            Err(e) => log!(
                LogFlags::DtuErrs,
                "EP{}: dropping malformed packet ({} bytes): {:?}",
                pkt.ep,
                pkt.data.len(),
                e
            ),
        }
    }
}

fn handle_command(dtu: &Dtu) -> bool {
    let ctrl = dtu.ctrl();
    if !ctrl.contains(Control::START) {
        return false;
    }

    let cmd = dtu.regs.cmd.lock().take();
    let res = match cmd {
        Some(cmd) => {
            let mut state = dtu.state.lock();
            cmds::execute(dtu, &mut state, cmd, ctrl)
        },
        None => Err(Error::new(Code::InvState)),
    };

    match res {
        Ok(Status::Done(val)) => dtu.complete(Ok(val)),
        Ok(Status::AwaitResp) => dtu.set_ctrl(Control::AWAIT_RESP),
        Err(e) => {
            // an empty receive buffer is not an error
            if e.code() != Code::NotFound {
                log!(LogFlags::DtuErrs, "command failed: {:?}", e);
            }
            dtu.complete(Err(e))
        },
    }
    true
}

/// Fails the current memory command if its response does not arrive in time
///
/// `pending` holds the tag of the awaited response and the deadline for it.
fn check_resp_timeout(dtu: &Dtu, pending: &mut Option<(u64, Instant)>, timeout: Duration) {
    if !dtu.ctrl().contains(Control::AWAIT_RESP) {
        *pending = None;
        return;
    }

    let tag = dtu.resp_tag();
    match *pending {
        Some((t, deadline)) if t == tag => {
            if Instant::now() >= deadline {
                log!(
                    LogFlags::DtuErrs,
                    "no response for request {} within {:?}",
                    tag,
                    timeout
                );
                *pending = None;
                dtu.complete(Err(Error::new(Code::Timeout)));
            }
        },
        _ => *pending = Some((tag, Instant::now() + timeout)),
    }
}

/// Moves all packets that are available without blocking into the inbox
fn drain_backend(dtu: &Dtu, inbox: &mut Inbox) -> bool {
    let mut received = false;
    while let Some(pkt) = dtu.backend.receive(None) {
        inbox.push(pkt);
        received = true;
    }
    received
}

/// Delivers at most one message per endpoint
fn deliver_msgs(dtu: &Dtu, inbox: &mut Inbox) -> bool {
    if inbox.is_empty() {
        return false;
    }

    let mut state = dtu.state.lock();
    let mut delivered = false;
    for (ep, queue) in inbox.queues.iter_mut().enumerate() {
        if let Some(msg) = queue.pop_front() {
            recv::deliver(dtu, &mut state, ep as _, msg);
            delivered = true;
        }
    }
    delivered
}

pub(crate) fn run(dtu: Arc<Dtu>) {
    io::init(dtu.node_id(), "dtu");
    log!(LogFlags::DtuBackend, "transport loop started");

    let mut inbox = Inbox::new(dtu.ep_count());
    let idle = dtu.config().idle_duration();
    let resp_timeout = dtu.config().resp_duration();
    let mut pending = None;

    while dtu.run.load(Ordering::Acquire) {
        let mut busy = handle_command(&dtu);
        busy |= drain_backend(&dtu, &mut inbox);
        busy |= deliver_msgs(&dtu, &mut inbox);
        check_resp_timeout(&dtu, &mut pending, resp_timeout);

        if !busy {
            if let Some(pkt) = dtu.backend.receive(Some(idle)) {
                inbox.push(pkt);
            }
        }
    }

    // deny further receives
    dtu.backend.shutdown();

    // handle all outstanding messages and a command that might have been started meanwhile
    loop {
        let mut busy = handle_command(&dtu);
        busy |= drain_backend(&dtu, &mut inbox);
        busy |= deliver_msgs(&dtu, &mut inbox);
        if !busy {
            break;
        }
    }

    // nobody will answer anymore
    if dtu.ctrl().intersects(Control::START | Control::AWAIT_RESP) {
        dtu.complete(Err(Error::new(Code::InvState)));
    }
    log!(LogFlags::DtuBackend, "transport loop stopped");
}
