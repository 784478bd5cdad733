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

//! The client library on top of the DTU
//!
//! In contrast to the [`base`](../base/index.html) library, which contains the DTU itself, the
//! `m3` library provides the abstractions that applications use to communicate. It builds upon
//! the `base` library and re-exports its types.
//!
//! ```text
//! +----------------+     +----------------+
//! |  application   |     |  application   |
//! +----------------+     +----------------+
//! |     libm3      |     |     libm3      |
//! +----------------+     +----------------+
//! |  libbase (DTU) | <-> |  libbase (DTU) |
//! +----------------+     +----------------+
//!        node 0                 node 1
//! ```
//!
//! Each [`Node`] owns one DTU together with its local memory and keeps track of the endpoints and
//! memory areas that are in use. On top of that, the `m3` library offers:
//! - [`communication`](`crate::com`): send, receive, and memory gates
//! - [`kdtu`](`crate::kdtu`): the privileged configuration of endpoints of other nodes

pub use base::{cfg, dtu, errors, io, kif, log, mem, util};

pub mod com;
pub mod kdtu;
mod node;

pub use self::node::Node;
