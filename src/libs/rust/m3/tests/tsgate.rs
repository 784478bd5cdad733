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

#[macro_use]
mod common;

use std::thread;

use m3::cfg::{HEADER_SIZE, MAX_MSG_SIZE};
use m3::com::{RecvGate, SGateArgs, SendGate};
use m3::dtu::EpField;
use m3::errors::Code;

#[test]
fn send_recv() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let sgate = assert_ok!(SendGate::new_with(
        &nodes[0],
        SGateArgs::new(&rgate).label(0x1234)
    ));

    assert_ok!(sgate.send(b"hello", None));
    let msg = assert_ok!(rgate.receive(None));
    assert_eq!(msg.label(), 0x1234);
    assert_eq!(msg.data(), b"hello");

    let hd = msg.header().unwrap();
    assert_eq!(hd.src_node, 0);
    assert_eq!(hd.snd_ep, sgate.ep());
    assert!(!hd.has_replycap());
}

#[test]
fn send_errors() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &rgate));

    // too large for any message
    let huge = vec![0u8; MAX_MSG_SIZE];
    assert_err!(sgate.send(&huge, None), Code::OutOfBounds);

    // the reply gate has to be a receive gate on our node
    let dtu = nodes[0].dtu();
    assert_err!(dtu.send(sgate.ep(), b"x", 0, sgate.ep()), Code::NoREP);

    // a receive endpoint cannot send
    assert_err!(
        nodes[1].dtu().send(rgate.ep(), b"x", 0, m3::dtu::INVALID_EP),
        Code::NoSEP
    );
}

#[test]
fn two_slots() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 7, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &rgate));

    for i in 1..=3u64 {
        assert_ok!(sgate.send_obj(&i, None));
    }

    common::wait_until(|| rgate.msg_count() == 2);
    common::settle();
    // the third message did not fit
    assert_eq!(rgate.msg_count(), 2);

    for i in 1..=2u64 {
        let msg = assert_ok!(rgate.fetch());
        assert_eq!(msg.get::<u64>(), Ok(i));
    }
    assert_err!(rgate.fetch(), Code::NotFound);
    assert!(!rgate.has_msgs());
}

#[test]
fn fifo_order() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 9, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &rgate));

    for i in 0..20u64 {
        assert_ok!(sgate.send_obj(&i, None));
        if i % 4 == 3 {
            for j in i - 3..=i {
                let msg = assert_ok!(rgate.receive(None));
                assert_eq!(msg.get::<u64>(), Ok(j));
            }
        }
    }
}

#[test]
fn call_reply() {
    let (_fabric, nodes) = common::nodes(2);
    let srv_rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let reply_gate = assert_ok!(RecvGate::new(&nodes[0], 6, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &srv_rgate));

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..3 {
                let msg = assert_ok!(srv_rgate.receive(None));
                let val = assert_ok!(msg.get::<u64>());
                assert_ok!(msg.reply(&(val * 2).to_le_bytes()));
            }
        });

        for i in 1..=3u64 {
            let reply = assert_ok!(sgate.call(&i.to_le_bytes(), &reply_gate));
            assert_eq!(reply.get::<u64>(), Ok(i * 2));
        }
    });
}

#[test]
fn reply_label() {
    let (_fabric, nodes) = common::nodes(2);
    let srv_rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let reply_gate = assert_ok!(RecvGate::new(&nodes[0], 8, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &srv_rgate));

    assert_ok!(sgate.send_with_rlabel(b"req", &reply_gate, 0xDEAD));
    let msg = assert_ok!(srv_rgate.receive(None));
    assert!(msg.header().unwrap().has_replycap());
    assert_ok!(msg.reply(b"resp"));

    let reply = assert_ok!(reply_gate.receive(None));
    assert_eq!(reply.label(), 0xDEAD);
    assert_eq!(reply.data(), b"resp");
    // replies cannot be replied to
    assert!(!reply.header().unwrap().has_replycap());
}

#[test]
fn reply_exactly_once() {
    let (_fabric, nodes) = common::nodes(2);
    let srv_rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let reply_gate = assert_ok!(RecvGate::new(&nodes[0], 8, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &srv_rgate));

    assert_ok!(sgate.send(b"req", Some(&reply_gate)));
    let addr = assert_ok!(srv_rgate.receive(None)).claim();

    assert_ok!(srv_rgate.reply(b"first", addr));
    assert_err!(srv_rgate.reply(b"second", addr), Code::NoReplyCap);

    let reply = assert_ok!(reply_gate.receive(None));
    assert_eq!(reply.data(), b"first");
    drop(reply);
    common::settle();
    assert_err!(reply_gate.fetch(), Code::NotFound);
}

#[test]
fn reply_without_reply_gate() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &rgate));

    assert_ok!(sgate.send(b"oneway", None));
    let msg = assert_ok!(rgate.receive(None));
    assert_err!(msg.reply(b"reply"), Code::NoReplyCap);
    // the failed reply left the message to be acked on drop
    assert_eq!(
        nodes[1].dtu().ep_field(rgate.ep(), EpField::BufOccupied),
        Ok(0)
    );
}

#[test]
fn drop_msgs() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 9, 6));
    let sg1 = assert_ok!(SendGate::new_with(&nodes[0], SGateArgs::new(&rgate).label(1)));
    let sg2 = assert_ok!(SendGate::new_with(&nodes[0], SGateArgs::new(&rgate).label(2)));

    assert_ok!(sg1.send(b"a", None));
    assert_ok!(sg2.send(b"b", None));
    assert_ok!(sg1.send(b"c", None));
    common::wait_until(|| rgate.msg_count() == 3);

    assert_ok!(rgate.drop_msgs_with(1));
    assert_eq!(rgate.msg_count(), 1);
    let msg = assert_ok!(rgate.fetch());
    assert_eq!(msg.label(), 2);
    assert_eq!(msg.data(), b"b");
}

#[test]
fn oversized_msg_is_dropped() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let sgate = assert_ok!(SendGate::new(&nodes[0], &rgate));

    // fits into a slot exactly
    assert_ok!(sgate.send(&[1u8; 64 - HEADER_SIZE], None));
    // one byte too large for the slot
    assert_ok!(sgate.send(&[2u8; 64 - HEADER_SIZE + 1], None));

    let msg = assert_ok!(rgate.receive(None));
    assert_eq!(msg.data().len(), 64 - HEADER_SIZE);
    drop(msg);
    common::settle();
    assert_err!(rgate.fetch(), Code::NotFound);
}

#[test]
fn gate_releases_ep() {
    let (_fabric, nodes) = common::nodes(2);
    let rgate = assert_ok!(RecvGate::new(&nodes[1], 8, 6));
    let ep = {
        let sgate = assert_ok!(SendGate::new(&nodes[0], &rgate));
        sgate.ep()
    };
    assert!(!nodes[0].dtu().is_valid(ep));

    let sgate = assert_ok!(SendGate::new(&nodes[0], &rgate));
    assert_eq!(sgate.ep(), ep);
}
