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

//! Contains the compile-time configuration and the defaults of the runtime configuration

use static_assertions::const_assert;

use crate::dtu::EpId;

pub const PAGE_BITS: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// The maximum size of a message on the wire, including the header
pub const MAX_MSG_SIZE: usize = 16 * 1024;
/// The size of the message header on the wire and in receive-buffer slots
pub const HEADER_SIZE: usize = 32;

/// The maximum number of nodes that can communicate with each other
pub const MAX_NODES: usize = 64;

/// The default number of endpoints per node
pub const EP_COUNT: usize = 16;
/// The default size of the local memory per node
pub const LOCAL_MEM_SIZE: usize = 1024 * 1024;
/// The default time in microseconds the transport loop waits for work before it checks again
pub const IDLE_TIMEOUT_US: u64 = 10_000;
/// The default time in milliseconds a memory command waits for the response of the remote node
pub const RESP_TIMEOUT_MS: u64 = 5_000;

/// The area at the beginning of the local memory that receives the data of memory reads
pub const XFER_BUF_ADDR: usize = 0;
pub const XFER_BUF_SIZE: usize = PAGE_SIZE;

/// The endpoint that receives memory requests and responses on every node
pub const MEM_REQ_EP: EpId = 0;

pub const DEF_MSG_ORD: u32 = 6;
pub const DEF_RBUF_ORD: u32 = 8;

/// The maximum number of message slots per receive buffer (bits in the occupied/unread bitmaps)
pub const MAX_RB_SLOTS: usize = 64;

// memory requests carry at most 4 words besides the data
const_assert!(XFER_BUF_SIZE + HEADER_SIZE + 4 * 8 <= MAX_MSG_SIZE);
const_assert!(MAX_NODES <= 0xFF);
