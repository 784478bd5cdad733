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

use m3::cfg::XFER_BUF_SIZE;
use m3::com::{MGateArgs, MemGate, Perm};
use m3::dtu::MAX_MEM_XFER;
use m3::errors::Code;
use m3::mem::GlobOff;
use m3::util::random::LCG;

#[test]
fn read_write_local() {
    let (_fabric, nodes) = common::nodes(1);
    let mgate = assert_ok!(MemGate::new(&nodes[0], 0x100, Perm::RW));

    let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
    assert_ok!(mgate.write(&data, 0x10));
    let mut buf = [0u8; 8];
    assert_ok!(mgate.read(&mut buf, 0x10));
    assert_eq!(buf, data);

    // the region lives in the local memory of the node
    let addr = mgate.local_addr().unwrap();
    let mut local = [0u8; 8];
    assert_ok!(nodes[0].dtu().read_mem(addr + 0x10, &mut local));
    assert_eq!(local, data);
}

#[test]
fn read_write_remote() {
    let (_fabric, nodes) = common::nodes(2);
    let mem = assert_ok!(MemGate::new(&nodes[1], 0x1000, Perm::RW));
    let base = mem.local_addr().unwrap() as GlobOff;
    let mgate = assert_ok!(MemGate::new_foreign(
        &nodes[0],
        nodes[1].id(),
        base,
        0x1000,
        Perm::RW
    ));

    assert_ok!(mgate.write_obj(&0xDEAD_BEEFu64, 0x100));
    assert_eq!(mgate.read_obj::<u64>(0x100), Ok(0xDEAD_BEEF));
    assert_eq!(mem.read_obj::<u64>(0x100), Ok(0xDEAD_BEEF));
    // fresh regions are zeroed
    assert_eq!(mgate.read_obj::<u64>(0x108), Ok(0));
}

#[test]
fn large_transfers() {
    let (_fabric, nodes) = common::nodes(2);
    let size = XFER_BUF_SIZE * 3 + 100;
    let mem = assert_ok!(MemGate::new(&nodes[1], size, Perm::RW));
    let mgate = assert_ok!(MemGate::new_foreign(
        &nodes[0],
        nodes[1].id(),
        mem.local_addr().unwrap() as GlobOff,
        size as GlobOff,
        Perm::RW
    ));

    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    assert_ok!(mgate.write(&data, 0));
    let mut buf = vec![0u8; size];
    assert_ok!(mgate.read(&mut buf, 0));
    assert_eq!(buf, data);
}

fn below(rng: &mut LCG, max: usize) -> usize {
    let val = (rng.get() as usize) << 15 | rng.get() as usize;
    val % max
}

#[test]
fn random_transfers() {
    let (_fabric, nodes) = common::nodes(2);
    let size = MAX_MEM_XFER * 3;
    let mem = assert_ok!(MemGate::new(&nodes[1], size, Perm::RW));
    let mgate = assert_ok!(MemGate::new_foreign(
        &nodes[0],
        nodes[1].id(),
        mem.local_addr().unwrap() as GlobOff,
        size as GlobOff,
        Perm::RW
    ));

    let mut rng = LCG::new(0x5EED);
    let mut expected: Vec<u8> = (0..size).map(|_| rng.get() as u8).collect();
    assert_ok!(mgate.write(&expected, 0));

    for _ in 0..40 {
        let off = below(&mut rng, size);
        let len = below(&mut rng, size - off + 1);
        let data: Vec<u8> = (0..len).map(|_| rng.get() as u8).collect();
        assert_ok!(mgate.write(&data, off as GlobOff));
        expected[off..off + len].copy_from_slice(&data);

        let off = below(&mut rng, size);
        let len = below(&mut rng, size - off + 1);
        let mut buf = vec![0u8; len];
        assert_ok!(mgate.read(&mut buf, off as GlobOff));
        assert_eq!(&buf[..], &expected[off..off + len]);
    }

    let mut all = vec![0u8; size];
    assert_ok!(mem.read(&mut all, 0));
    assert_eq!(all, expected);
}

#[test]
fn out_of_bounds() {
    let (_fabric, nodes) = common::nodes(1);
    let mgate = assert_ok!(MemGate::new_with(
        &nodes[0],
        MGateArgs::new(0x40, Perm::R).perm(Perm::RW)
    ));

    assert_ok!(mgate.write(&[0xAAu8; 8], 0x38));
    assert_err!(mgate.write(&[0xBBu8; 16], 0x38), Code::OutOfBounds);
    let mut buf = [0u8; 16];
    assert_err!(mgate.read(&mut buf, 0x38), Code::OutOfBounds);

    // the failed write did not touch the memory
    let mut buf = [0u8; 8];
    assert_ok!(mgate.read(&mut buf, 0x38));
    assert_eq!(buf, [0xAAu8; 8]);
}

#[test]
fn remote_bounds() {
    let (_fabric, nodes) = common::nodes(2);
    // the region exceeds the memory of the destination node
    let mem_end = common::MEM_SIZE as GlobOff;
    let mgate = assert_ok!(MemGate::new_foreign(
        &nodes[0],
        nodes[1].id(),
        mem_end - 8,
        0x40,
        Perm::RW
    ));

    assert_ok!(mgate.write(&[1u8; 8], 0));
    assert_err!(mgate.write(&[1u8; 16], 0), Code::OutOfBounds);
    let mut buf = [0u8; 16];
    assert_err!(mgate.read(&mut buf, 0), Code::OutOfBounds);
}

#[test]
fn derive() {
    let (_fabric, nodes) = common::nodes(1);
    let mgate = assert_ok!(MemGate::new(&nodes[0], 0x100, Perm::RW));
    assert_ok!(mgate.write_obj(&0x1234u64, 0x20));

    assert_err!(mgate.derive(0, 0x10, Perm::RWX), Code::NoPerm);
    assert_err!(mgate.derive(0xF8, 0x10, Perm::R), Code::InvArgs);
    assert_err!(mgate.derive(0x4, 0x10, Perm::R), Code::InvArgs);
    assert_err!(mgate.derive(GlobOff::MAX, 0x10, Perm::R), Code::InvArgs);

    let sub = assert_ok!(mgate.derive(0x20, 0x10, Perm::R));
    assert_eq!(sub.size(), 0x10);
    assert_eq!(sub.read_obj::<u64>(0), Ok(0x1234));
    assert_err!(sub.write_obj(&1u64, 0), Code::NoPerm);
    assert_err!(sub.read_obj::<u64>(0x10), Code::OutOfBounds);
}

#[test]
fn cmpxchg() {
    let (_fabric, nodes) = common::nodes(2);
    let mem = assert_ok!(MemGate::new(&nodes[1], 0x100, Perm::RW));
    let mgate = assert_ok!(MemGate::new_foreign(
        &nodes[0],
        nodes[1].id(),
        mem.local_addr().unwrap() as GlobOff,
        0x100,
        Perm::RW
    ));

    assert_ok!(mgate.write_obj(&5u64, 0x8));
    assert_eq!(mgate.cmpxchg(&5u64, &7u64, 0x8), Ok(true));
    assert_eq!(mgate.cmpxchg(&5u64, &9u64, 0x8), Ok(false));
    assert_eq!(mgate.read_obj::<u64>(0x8), Ok(7));

    let ro = assert_ok!(mgate.derive(0, 0x100, Perm::R));
    assert_err!(ro.cmpxchg(&7u64, &1u64, 0x8), Code::NoPerm);
}

#[test]
fn activate_for() {
    let (_fabric, nodes) = common::nodes(2);
    let mgate = assert_ok!(MemGate::new(&nodes[0], 0x80, Perm::RW));

    let ep = assert_ok!(mgate.activate_for(&nodes[1]));
    let bound = assert_ok!(MemGate::new_bind(&nodes[1], ep));
    assert_eq!(bound.dest_node(), nodes[0].id());
    assert_eq!(bound.size(), 0x80);
    assert_eq!(bound.perm(), Perm::RW);

    assert_ok!(bound.write_obj(&42u32, 0x40));
    assert_eq!(mgate.read_obj::<u32>(0x40), Ok(42));

    drop(bound);
    assert!(!nodes[1].dtu().is_valid(ep));
    assert_err!(MemGate::new_bind(&nodes[1], ep), Code::NoMEP);
}
