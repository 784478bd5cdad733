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

//! Contains communication abstractions
//!
//! Communication is performed via the data transfer unit (DTU) and comes in two primary flavors:
//! message passing and DMA-like memory access.
//!
//! Each DTU-based communication channel is represented by *endpoints* (EPs) in the DTU. A
//! message-passing channel consists of a send EP and a receive EP, whereas a memory channel
//! consists of a single memory EP. A *gate* is the software abstraction that comes in three
//! variants, corresponding to the endpoint types: [`SendGate`], [`RecvGate`], and [`MemGate`].
//! Each gate allocates an endpoint of its node via [`EpMng`] and configures it on creation. The
//! endpoint is invalidated and freed again when the gate is dropped.

mod epmng;
mod gate;
mod mgate;
mod rbufs;
mod rgate;
mod sgate;

pub use self::epmng::EpMng;
pub use self::gate::Gate;
pub use self::mgate::{MGateArgs, MemGate, Perm};
pub use self::rbufs::RecvBuf;
pub use self::rgate::{RGateArgs, ReceivingGate, RecvGate, RecvMsg};
pub use self::sgate::{SGateArgs, SendGate};
