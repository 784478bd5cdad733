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

#![cfg(unix)]

#[macro_use]
mod common;

use std::fs;

use m3::com::{MemGate, Perm, RecvGate, SGateArgs, SendGate};
use m3::dtu::SocketBackend;
use m3::errors::Code;
use m3::mem::GlobOff;
use m3::Node;

#[test]
fn send_reply() {
    let dir = common::sock_dir("sendreply");
    {
        let cli = assert_ok!(Node::new(common::config(0).sockets(&dir)));
        let srv = assert_ok!(Node::new(common::config(1).sockets(&dir)));
        assert!(SocketBackend::node_path(&dir, 1).exists());

        let srv_rgate = assert_ok!(RecvGate::new(&srv, 8, 6));
        let reply_gate = assert_ok!(RecvGate::new(&cli, 7, 6));
        let sgate = assert_ok!(SendGate::new_with(
            &cli,
            SGateArgs::new_for(srv.id(), srv_rgate.ep())
                .label(0x42)
                .msg_credits(1, 6)
        ));

        assert_ok!(sgate.send(b"ping", Some(&reply_gate)));
        assert_err!(sgate.send(b"ping", Some(&reply_gate)), Code::NoCredits);

        let msg = assert_ok!(srv_rgate.receive(None));
        assert_eq!(msg.label(), 0x42);
        assert_eq!(msg.data(), b"ping");
        assert_ok!(msg.reply(b"pong"));

        let reply = assert_ok!(reply_gate.receive(None));
        assert_eq!(reply.data(), b"pong");
        assert_eq!(sgate.credits(), Ok(1 << 6));
    }

    // the sockets are removed on shutdown
    assert!(!SocketBackend::node_path(&dir, 0).exists());
    assert!(!SocketBackend::node_path(&dir, 1).exists());
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn memory() {
    let dir = common::sock_dir("memory");
    {
        let n0 = assert_ok!(Node::new(common::config(0).sockets(&dir)));
        let n1 = assert_ok!(Node::new(common::config(1).sockets(&dir)));

        let mem = assert_ok!(MemGate::new(&n1, 0x2000, Perm::RW));
        let mgate = assert_ok!(MemGate::new_foreign(
            &n0,
            n1.id(),
            mem.local_addr().unwrap() as GlobOff,
            0x2000,
            Perm::RW
        ));

        let data: Vec<u8> = (0..0x2000).map(|i| (i % 253) as u8).collect();
        assert_ok!(mgate.write(&data, 0));
        let mut buf = vec![0u8; 0x2000];
        assert_ok!(mem.read(&mut buf, 0));
        assert_eq!(buf, data);
        assert_eq!(mgate.cmpxchg(&data[0], &0xFFu8, 0), Ok(true));
    }
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn unreachable_node() {
    let dir = common::sock_dir("unreachable");
    {
        let n0 = assert_ok!(Node::new(common::config(0).sockets(&dir)));
        let sgate = assert_ok!(SendGate::new_with(
            &n0,
            SGateArgs::new_for(5, 1).credits(0x100)
        ));

        assert_err!(sgate.send(b"hello", None), Code::RecvGone);
        assert_eq!(sgate.credits(), Ok(0x100));
    }
    fs::remove_dir_all(&dir).ok();
}
