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

use std::fs;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cfg::MAX_MSG_SIZE;
use crate::dtu::backend::{Backend, Packet};
use crate::dtu::{EpId, NodeId};
use crate::errors::{Code, Error};
use crate::io::LogFlags;
use crate::log;

/// The endpoint id in a frame that only wakes up the receiver
const WAKE_EP: u16 = 0xFFFF;
/// The time a sender waits for space in the receiver's socket buffer
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// The backend that uses Unix datagram sockets
///
/// Every node binds a socket at `<dir>/node<N>`. A frame consists of the destination endpoint
/// (u16, little endian) followed by the encoded message.
#[derive(Debug)]
pub struct SocketBackend {
    dir: PathBuf,
    path: PathBuf,
    sock: UnixDatagram,
    tx: UnixDatagram,
}

impl SocketBackend {
    /// Binds the socket for node `node` in directory `dir`
    ///
    /// A stale socket file of a previous run is replaced.
    pub fn new(dir: &Path, node: NodeId) -> Result<Self, Error> {
        fs::create_dir_all(dir).map_err(|e| Self::conv_err("create dir", e))?;

        let path = Self::node_path(dir, node);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                return Err(Self::conv_err("remove stale socket", e))
            },
            _ => {},
        }

        let sock = UnixDatagram::bind(&path).map_err(|e| Self::conv_err("bind", e))?;
        let tx = UnixDatagram::unbound().map_err(|e| Self::conv_err("socket", e))?;
        tx.set_write_timeout(Some(SEND_TIMEOUT))
            .map_err(|e| Self::conv_err("set timeout", e))?;

        log!(LogFlags::DtuBackend, "bound socket {}", path.display());
        Ok(SocketBackend {
            dir: dir.to_path_buf(),
            path,
            sock,
            tx,
        })
    }

    /// Returns the path of the socket of node `node` in directory `dir`
    pub fn node_path(dir: &Path, node: NodeId) -> PathBuf {
        dir.join(format!("node{}", node))
    }

    fn conv_err(what: &str, e: std::io::Error) -> Error {
        log!(LogFlags::DtuErrs, "socket backend: {} failed: {}", what, e);
        match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::BrokenPipe => {
                Error::new(Code::RecvGone)
            },
            ErrorKind::AlreadyExists | ErrorKind::AddrInUse => Error::new(Code::Exists),
            _ => Error::new(Code::InvState),
        }
    }

    fn send_frame(&self, path: &Path, ep: u16, data: &[u8]) -> Result<(), Error> {
        let mut frame = Vec::with_capacity(2 + data.len());
        frame.extend_from_slice(&ep.to_le_bytes());
        frame.extend_from_slice(data);
        self.tx.send_to(&frame, path).map(|_| ()).map_err(|e| match e.kind() {
            // the receiver does not drain its socket
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::new(Code::RecvGone),
            _ => Self::conv_err("send", e),
        })
    }

    fn recv_frame(&self, timeout: Option<Duration>) -> Option<Packet> {
        let res = match timeout {
            None => self.sock.set_nonblocking(true),
            Some(to) => self
                .sock
                .set_nonblocking(false)
                .and_then(|_| self.sock.set_read_timeout(Some(to.max(Duration::from_micros(1))))),
        };
        if res.is_err() {
            return None;
        }

        let mut buf = vec![0u8; 2 + MAX_MSG_SIZE];
        let len = self.sock.recv(&mut buf).ok()?;
        if len < 2 {
            return None;
        }
        buf.truncate(len);
        let ep = u16::from_le_bytes([buf[0], buf[1]]);
        buf.drain(0..2);
        Some(Packet {
            ep: ep as EpId,
            data: buf,
        })
    }
}

impl Backend for SocketBackend {
    fn send(&self, node: NodeId, ep: EpId, data: &[u8]) -> Result<(), Error> {
        let path = Self::node_path(&self.dir, node);
        self.send_frame(&path, ep as u16, data)
    }

    fn receive(&self, timeout: Option<Duration>) -> Option<Packet> {
        loop {
            let pkt = self.recv_frame(timeout)?;
            if pkt.ep as u16 != WAKE_EP {
                break Some(pkt);
            }
            if timeout.is_some() {
                break None;
            }
        }
    }

    fn wakeup(&self) {
        // if the socket buffer is full, the loop has work anyway
        self.send_frame(&self.path, WAKE_EP, &[]).ok();
    }

    fn shutdown(&self) {
        fs::remove_file(&self.path).ok();
        self.sock.shutdown(Shutdown::Read).ok();
        log!(LogFlags::DtuBackend, "shut down socket {}", self.path.display());
    }
}

impl Drop for SocketBackend {
    fn drop(&mut self) {
        fs::remove_file(&self.path).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("m3-sock-{}-{}", name, std::process::id()))
    }

    #[test]
    fn exchange() {
        let dir = test_dir("exchange");
        let a = SocketBackend::new(&dir, 0).unwrap();
        let b = SocketBackend::new(&dir, 1).unwrap();

        a.send(1, 2, &[1, 2, 3]).unwrap();
        a.send(1, 4, &[4]).unwrap();
        let timeout = Some(Duration::from_secs(5));
        assert_eq!(b.receive(timeout), Some(Packet { ep: 2, data: vec![1, 2, 3] }));
        assert_eq!(b.receive(timeout), Some(Packet { ep: 4, data: vec![4] }));
        assert_eq!(b.receive(None), None);

        assert_eq!(a.send(7, 0, &[1]), Err(Error::new(Code::RecvGone)));

        b.wakeup();
        assert_eq!(b.receive(timeout), None);

        b.shutdown();
        assert_eq!(a.send(1, 0, &[1]), Err(Error::new(Code::RecvGone)));
        drop(a);
        fs::remove_dir_all(&dir).ok();
    }
}
