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

//! The base library of the DTU-based message passing system
//!
//! It contains the DTU itself (endpoints, receive buffers, command execution, message delivery,
//! and the backends that connect the nodes) and the infrastructure it depends on (error codes,
//! configuration, logging, permissions, and local memory management).

pub use static_assertions::const_assert;

#[macro_use]
pub mod io;

pub mod cfg;
pub mod dtu;
pub mod errors;
pub mod kif;
pub mod mem;
pub mod util;

pub use serde;
