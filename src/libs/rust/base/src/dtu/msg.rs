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

//! Contains the message header and its wire encoding

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use static_assertions::const_assert_eq;

use crate::cfg::HEADER_SIZE;
use crate::dtu::{EpId, Label, NodeId, INVALID_EP};
use crate::errors::{Code, Error};

/// The operations that are transferred between DTUs
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Read    = 1,
    Write   = 2,
    Send    = 3,
    Reply   = 4,
    Resp    = 5,
    SendCrd = 6,
    CmpXchg = 7,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct HeaderFlags : u8 {
        /// The receiver may reply to the message exactly once
        const REPLY_CAP     = 1 << 0;
    }
}

/// The message header
///
/// The header is created by the DTU and is therefore trustworthy, in contrast to the payload. On
/// the wire and in receive-buffer slots, it occupies [`HEADER_SIZE`] bytes in little endian:
///
/// ```text
///   0: opcode    1: flags    2: rpl_ep    3: snd_ep    4: crd_ep    5: src_node    6: length
///   8: credits (u32)        12: reserved (u32)
///  16: label (u64)
///  24: reply_label (u64)
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub opcode: Opcode,
    pub flags: HeaderFlags,
    pub rpl_ep: EpId,
    pub snd_ep: EpId,
    pub crd_ep: EpId,
    pub src_node: NodeId,
    pub length: usize,
    pub credits: u32,
    pub label: Label,
    pub reply_label: Label,
}

/// The offset of the flags within an encoded header
pub(crate) const FLAGS_OFF: usize = 1;

const_assert_eq!(HEADER_SIZE, 4 * 8);

impl Header {
    pub fn new(opcode: Opcode, src_node: NodeId) -> Self {
        Header {
            opcode,
            flags: HeaderFlags::empty(),
            rpl_ep: INVALID_EP,
            snd_ep: INVALID_EP,
            crd_ep: INVALID_EP,
            src_node,
            length: 0,
            credits: 0,
            label: 0,
            reply_label: 0,
        }
    }

    /// Returns true if the message can be replied to
    pub fn has_replycap(&self) -> bool {
        self.flags.contains(HeaderFlags::REPLY_CAP)
    }

    fn ep_byte(ep: EpId) -> u8 {
        debug_assert!(ep <= INVALID_EP);
        ep as u8
    }

    /// Appends the encoded header to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.length <= u16::MAX as usize);
        buf.push(self.opcode.into());
        buf.push(self.flags.bits());
        buf.push(Self::ep_byte(self.rpl_ep));
        buf.push(Self::ep_byte(self.snd_ep));
        buf.push(Self::ep_byte(self.crd_ep));
        buf.push(self.src_node);
        buf.extend_from_slice(&(self.length as u16).to_le_bytes());
        buf.extend_from_slice(&self.credits.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&self.label.to_le_bytes());
        buf.extend_from_slice(&self.reply_label.to_le_bytes());
    }

    /// Decodes the header from the first [`HEADER_SIZE`] bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::new(Code::InvArgs));
        }

        let opcode = Opcode::try_from(bytes[0]).map_err(|_| Error::new(Code::InvArgs))?;
        let ep = |b: u8| b as EpId;
        Ok(Header {
            opcode,
            flags: HeaderFlags::from_bits_truncate(bytes[FLAGS_OFF]),
            rpl_ep: ep(bytes[2]),
            snd_ep: ep(bytes[3]),
            crd_ep: ep(bytes[4]),
            src_node: bytes[5],
            length: u16::from_le_bytes([bytes[6], bytes[7]]) as usize,
            credits: read_u32(&bytes[8..12]),
            label: read_u64(&bytes[16..24]),
            reply_label: read_u64(&bytes[24..32]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

/// A message as it travels between DTUs: the header followed by `header.length` bytes of payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(mut header: Header, data: Vec<u8>) -> Self {
        header.length = data.len();
        Message { header, data }
    }

    /// Returns the number of bytes of the encoded message
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decodes a message; fails if the length in the header does not match the payload
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let header = Header::decode(bytes)?;
        let data = &bytes[HEADER_SIZE..];
        if data.len() != header.length {
            return Err(Error::new(Code::InvArgs));
        }
        Ok(Message {
            header,
            data: data.to_vec(),
        })
    }
}

/// Builds the payload of a memory request or response: a number of words, followed by data
pub(crate) fn mem_payload(words: &[u64], data: &[&[u8]]) -> Vec<u8> {
    let len = words.len() * 8 + data.iter().map(|d| d.len()).sum::<usize>();
    let mut buf = Vec::with_capacity(len);
    for w in words {
        buf.extend_from_slice(&w.to_le_bytes());
    }
    for d in data {
        buf.extend_from_slice(d);
    }
    buf
}

/// Returns the `idx`th word of a memory request or response
pub(crate) fn mem_word(payload: &[u8], idx: usize) -> Result<u64, Error> {
    payload
        .get(idx * 8..(idx + 1) * 8)
        .map(read_u64)
        .ok_or_else(|| Error::new(Code::InvArgs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let mut hd = Header::new(Opcode::Send, 3);
        hd.flags = HeaderFlags::REPLY_CAP;
        hd.rpl_ep = 2;
        hd.snd_ep = 5;
        hd.length = 0x102;
        hd.credits = 0x40;
        hd.label = 0x1122_3344_5566_7788;
        hd.reply_label = 0xDEAD_BEEF;

        let mut buf = Vec::new();
        hd.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(buf[0], 3);
        assert_eq!(buf[FLAGS_OFF], 1);
        assert_eq!(&buf[2..6], &[2, 5, INVALID_EP as u8, 3]);
        assert_eq!(&buf[6..8], &[0x02, 0x01]);
        assert_eq!(&buf[16..24], &0x1122_3344_5566_7788u64.to_le_bytes());

        assert_eq!(Header::decode(&buf), Ok(hd));
    }

    #[test]
    fn invalid_headers() {
        assert_eq!(
            Header::decode(&[3u8; 8]).map_err(|e| e.code()),
            Err(Code::InvArgs)
        );

        let mut buf = Vec::new();
        Header::new(Opcode::Resp, 0).encode(&mut buf);
        buf[0] = 0x42;
        assert_eq!(
            Header::decode(&buf).map_err(|e| e.code()),
            Err(Code::InvArgs)
        );
    }

    #[test]
    fn message_length_mismatch() {
        let msg = Message::new(Header::new(Opcode::Send, 1), vec![1, 2, 3]);
        let mut bytes = msg.encode();
        assert_eq!(Message::decode(&bytes), Ok(msg));

        bytes.push(4);
        assert_eq!(
            Message::decode(&bytes).map_err(|e| e.code()),
            Err(Code::InvArgs)
        );
    }

    #[test]
    fn mem_words() {
        let payload = mem_payload(&[0x10, 4], &[&[9, 8, 7, 6]]);
        assert_eq!(mem_word(&payload, 0), Ok(0x10));
        assert_eq!(mem_word(&payload, 1), Ok(4));
        assert_eq!(&payload[16..], &[9, 8, 7, 6]);
        assert!(mem_word(&payload, 3).is_err());
    }
}
