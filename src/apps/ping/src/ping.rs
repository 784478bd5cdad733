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

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use m3::cfg::HEADER_SIZE;
use m3::com::{RGateArgs, RecvGate, SGateArgs, SendGate};
use m3::dtu::{DtuConfig, EpId, NodeId};
use m3::errors::{Code, Error, VerboseError};
use m3::io::LogFlags;
use m3::log;
use m3::util::math;
use m3::Node;

/// The endpoint the server receives pings on
const SRV_EP: EpId = 1;
/// The number of message slots of the server as a power of two
const SRV_SLOTS_ORD: u32 = 3;
const MAX_PAYLOAD: usize = 1024;
const SEQ_SIZE: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    /// run server and client in this process
    Both,
    Server,
    Client,
}

#[derive(Clone, Debug)]
pub struct PingSettings {
    mode: Mode,
    node: NodeId,
    peer: NodeId,
    nbytes: usize,
    count: u32,
    interval: Duration,
    timeout: Duration,
    dir: PathBuf,
}

impl Default for PingSettings {
    fn default() -> Self {
        PingSettings {
            mode: Mode::Both,
            node: 0,
            peer: 1,
            nbytes: 56,
            count: 5,
            interval: Duration::from_secs(1),
            timeout: Duration::ZERO,
            dir: env::var_os("M3_SOCK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("m3-ping")),
        }
    }
}

fn usage() -> ! {
    let name = env::args().next().unwrap_or_else(|| "ping".to_string());
    println!("Usage: {} [options] [<peer>]", name);
    println!();
    println!("Sends pings from node <node> to node <peer> (default: 1) via DTU sockets.");
    println!("Without -l and <peer>, server and client run in this process.");
    println!();
    println!("    -l            : only serve pings, do not send any");
    println!("    -n <node>     : use <node> as own node id (default: 0, 1 with -l)");
    println!("    -d <dir>      : use sockets in <dir> (default: $M3_SOCK_DIR or /tmp/m3-ping)");
    println!("    -c <count>    : perform <count> pings (default: 5)");
    println!("    -s <n>        : use <n> bytes of payload (default: 56)");
    println!("    -i <interval> : sleep <interval> ms between pings (default: 1000)");
    println!("    -W <timeout>  : wait <timeout> ms for each reply (default: 0 = infinite)");
    process::exit(1);
}

fn parse_arg<T: std::str::FromStr>(arg: Option<&String>, name: &str) -> Result<T, VerboseError> {
    let arg = arg.ok_or_else(|| {
        VerboseError::new(Code::InvArgs, format!("Missing value for {}", name))
    })?;
    arg.parse::<T>().map_err(|_| {
        VerboseError::new(Code::InvArgs, format!("Could not parse {} '{}'", name, arg))
    })
}

fn parse_args(args: &[String]) -> Result<PingSettings, VerboseError> {
    let mut settings = PingSettings::default();
    let mut node = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-l" => {
                settings.mode = Mode::Server;
                i += 1;
                continue;
            },
            "-n" => node = Some(parse_arg(args.get(i + 1), "node")?),
            "-d" => settings.dir = PathBuf::from(parse_arg::<String>(args.get(i + 1), "dir")?),
            "-c" => settings.count = parse_arg(args.get(i + 1), "count")?,
            "-s" => settings.nbytes = parse_arg(args.get(i + 1), "payload size")?,
            "-i" => {
                settings.interval = Duration::from_millis(parse_arg(args.get(i + 1), "interval")?)
            },
            "-W" => {
                settings.timeout = Duration::from_millis(parse_arg(args.get(i + 1), "timeout")?)
            },
            _ => break,
        }
        // move forward 2 by default, since most arguments have a value
        i += 2;
    }

    if i < args.len() {
        if settings.mode == Mode::Server {
            return Err(VerboseError::new(
                Code::InvArgs,
                "A server does not take a peer".to_string(),
            ));
        }
        settings.peer = parse_arg(args.get(i), "peer")?;
        settings.mode = Mode::Client;
    }

    settings.node = match (node, settings.mode) {
        (Some(n), _) => n,
        (None, Mode::Server) => 1,
        (None, _) => 0,
    };
    if settings.mode == Mode::Both {
        settings.peer = settings.node.wrapping_add(1);
    }

    if settings.nbytes < SEQ_SIZE || settings.nbytes > MAX_PAYLOAD {
        return Err(VerboseError::new(
            Code::InvArgs,
            format!("Payload size has to be in {}..={} bytes", SEQ_SIZE, MAX_PAYLOAD),
        ));
    }

    Ok(settings)
}

fn msg_order(nbytes: usize) -> u32 {
    math::next_log2(nbytes + HEADER_SIZE)
}

fn create_node(settings: &PingSettings, id: NodeId) -> Result<Node, VerboseError> {
    Node::new(DtuConfig::new(id).sockets(&settings.dir))
}

fn verbose(e: Error, what: &str) -> VerboseError {
    VerboseError::new(e.code(), format!("{} failed", what))
}

/// Answers pings with their own payload until `count` pings have been served (if not `None`)
fn serve(
    settings: &PingSettings,
    count: Option<u32>,
    ready: Option<mpsc::Sender<()>>,
) -> Result<(), VerboseError> {
    let node = create_node(settings, settings.node)?;
    let ord = msg_order(MAX_PAYLOAD);
    let rgate = RecvGate::new_with(
        &node,
        RGateArgs::default()
            .order(ord + SRV_SLOTS_ORD)
            .msg_order(ord)
            .ep(SRV_EP),
    )
    .map_err(|e| verbose(e, "Creating receive gate"))?;

    log!(LogFlags::Info, "serving pings on {:?}", rgate);
    if let Some(r) = ready {
        r.send(()).ok();
    }

    let mut served = 0;
    while count.map_or(true, |c| served < c) {
        let msg = rgate
            .receive(None)
            .map_err(|e| verbose(e, "Receiving ping"))?;
        log!(
            LogFlags::Debug,
            "ping with {} bytes from {:#x}",
            msg.data().len(),
            msg.label()
        );
        let payload = msg.data().to_vec();
        msg.reply(&payload).map_err(|e| verbose(e, "Replying ping"))?;
        served += 1;
    }
    Ok(())
}

fn ping(settings: &PingSettings) -> Result<(), VerboseError> {
    let node = create_node(settings, settings.node)?;
    let ord = msg_order(settings.nbytes);
    let reply_gate =
        RecvGate::new(&node, ord, ord).map_err(|e| verbose(e, "Creating reply gate"))?;
    let sgate = SendGate::new_with(
        &node,
        SGateArgs::new_for(settings.peer, SRV_EP)
            .label(settings.node as u64)
            .msg_credits(1, ord),
    )
    .map_err(|e| verbose(e, "Creating send gate"))?;

    let mut buf = vec![0u8; settings.nbytes];
    let mut sent = 0;
    let mut received = 0;

    println!(
        "PING node {} from node {}: {} data bytes",
        settings.peer, settings.node, settings.nbytes
    );

    let start = Instant::now();
    for seq in 1..=settings.count {
        buf[..SEQ_SIZE].copy_from_slice(&(seq as u64).to_le_bytes());

        let send_time = Instant::now();
        sgate
            .send(&buf, Some(&reply_gate))
            .map_err(|e| verbose(e, "Sending ping"))?;
        sent += 1;

        let reply = if settings.timeout.is_zero() {
            reply_gate.receive(Some(&sgate))
        }
        else {
            reply_gate.receive_for(settings.timeout)
        }
        .map_err(|e| verbose(e, "Receiving pong"))?;
        let recv_time = Instant::now();

        let rseq = reply.get::<u64>().map_err(|e| verbose(e, "Decoding pong"))?;
        if rseq != seq as u64 {
            return Err(VerboseError::new(
                Code::InvState,
                format!("Expected pong {}, got {}", seq, rseq),
            ));
        }

        println!(
            "{} bytes from node {}: seq={}, time={} us",
            reply.data().len(),
            reply.header().map_or(settings.peer, |h| h.src_node),
            rseq,
            recv_time.duration_since(send_time).as_micros()
        );
        received += 1;
        drop(reply);

        if seq != settings.count {
            thread::sleep(settings.interval);
        }
    }

    println!(
        "{} pings transmitted, {} received in {} us",
        sent,
        received,
        start.elapsed().as_micros()
    );
    Ok(())
}

fn run(settings: PingSettings) -> Result<(), VerboseError> {
    match settings.mode {
        Mode::Server => serve(&settings, None, None),
        Mode::Client => ping(&settings),
        Mode::Both => {
            let mut srv_settings = settings.clone();
            srv_settings.node = settings.peer;

            let (tx, rx) = mpsc::channel();
            let count = settings.count;
            let server = thread::spawn(move || serve(&srv_settings, Some(count), Some(tx)));

            // the server drops the sender on failure
            if rx.recv().is_err() {
                return server.join().unwrap_or_else(|_| {
                    Err(VerboseError::new(
                        Code::InvState,
                        "Server panicked".to_string(),
                    ))
                });
            }

            ping(&settings)?;
            server.join().unwrap_or_else(|_| {
                Err(VerboseError::new(
                    Code::InvState,
                    "Server panicked".to_string(),
                ))
            })
        },
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let settings = parse_args(&args).unwrap_or_else(|e| {
        println!("Invalid arguments: {}", e);
        usage();
    });

    if let Err(e) = run(settings) {
        eprintln!("ping: {}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_defaults() {
        let s = parse_args(&args("ping")).unwrap();
        assert_eq!(s.mode, Mode::Both);
        assert_eq!((s.node, s.peer), (0, 1));
        assert_eq!(s.count, 5);
    }

    #[test]
    fn parse_modes() {
        let s = parse_args(&args("ping -l -d /tmp/x")).unwrap();
        assert_eq!(s.mode, Mode::Server);
        assert_eq!(s.node, 1);
        assert_eq!(s.dir, PathBuf::from("/tmp/x"));

        let s = parse_args(&args("ping -n 3 -c 2 -s 100 -i 5 7")).unwrap();
        assert_eq!(s.mode, Mode::Client);
        assert_eq!((s.node, s.peer), (3, 7));
        assert_eq!(s.nbytes, 100);
        assert_eq!(s.interval, Duration::from_millis(5));
    }

    #[test]
    fn parse_errors() {
        assert!(parse_args(&args("ping -s 4")).is_err());
        assert!(parse_args(&args("ping -s 2000")).is_err());
        assert!(parse_args(&args("ping -c")).is_err());
        assert!(parse_args(&args("ping -c x")).is_err());
        assert!(parse_args(&args("ping -l 2")).is_err());
    }

    #[test]
    fn ping_pong() {
        let dir = env::temp_dir().join(format!("m3-ping-test-{}", process::id()));
        let settings = parse_args(&args(&format!(
            "ping -n 10 -c 3 -i 0 -d {}",
            dir.display()
        )))
        .unwrap();
        assert_eq!(settings.peer, 11);
        assert!(run(settings).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }
}
