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

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use m3::dtu::{DtuConfig, Fabric};
use m3::Node;

/// Unwraps the given result and reports the error code otherwise
macro_rules! assert_ok {
    ($res:expr) => {
        match $res {
            Ok(r) => r,
            Err(e) => panic!("{} failed with {:?}", stringify!($res), e),
        }
    };
}

/// Asserts that the given result failed with the given error code
macro_rules! assert_err {
    ($res:expr, $code:expr) => {
        assert_eq!($res.map(|_| ()).map_err(|e| e.code()), Err($code))
    };
}

pub const MEM_SIZE: usize = 256 * 1024;

/// Creates `count` nodes that are attached to a fresh fabric
pub fn nodes(count: u8) -> (Arc<Fabric>, Vec<Node>) {
    let fabric = Fabric::new();
    let nodes = (0..count)
        .map(|id| assert_ok!(Node::with_fabric(config(id), &fabric)))
        .collect();
    (fabric, nodes)
}

pub fn config(id: u8) -> DtuConfig {
    DtuConfig::new(id).eps(16).mem(MEM_SIZE).idle_timeout(1000)
}

/// Waits until `cond` holds and panics after a few seconds
pub fn wait_until<F: Fn() -> bool>(cond: F) {
    let end = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < end, "condition not met in time");
        thread::sleep(Duration::from_micros(100));
    }
}

/// Gives the transport loops some time to process in-flight messages
pub fn settle() {
    thread::sleep(Duration::from_millis(50));
}

/// Returns a fresh directory for sockets
pub fn sock_dir(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("m3-{}-{}-{}", name, std::process::id(), nanos));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
