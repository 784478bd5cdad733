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

//! Contains the logger

use std::cell::RefCell;
use std::env;
use std::fmt;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use crate::io::LogFlags;

const SUFFIX: &str = "\x1B[0m";
const COLORS: [&str; 6] = ["31", "32", "33", "34", "35", "36"];

static FLAGS: OnceLock<LogFlags> = OnceLock::new();
static START: OnceLock<Instant> = OnceLock::new();

thread_local! {
    static LOG: RefCell<Log> = RefCell::new(Log::new());
}

/// The per-thread logger that prefixes every line with the node and the thread's name
pub struct Log {
    prefix: String,
}

impl Log {
    fn new() -> Self {
        let name = std::thread::current().name().unwrap_or("?").to_string();
        Log {
            prefix: Self::build_prefix(None, &name),
        }
    }

    fn build_prefix(node: Option<u8>, name: &str) -> String {
        let begin = match name.rfind('/') {
            Some(b) => b + 1,
            None => 0,
        };
        let len = (name.len() - begin).min(8);
        let name = name.get(begin..begin + len).unwrap_or(name);

        match node {
            Some(n) => format!(
                "\x1B[0;{}m[N{:X}:{:<8}",
                COLORS[(n as usize) % COLORS.len()],
                n,
                name
            ),
            None => format!("\x1B[0;37m[N-:{:<8}", name),
        }
    }

    fn write_line(&self, args: fmt::Arguments<'_>) {
        let micros = START.get_or_init(Instant::now).elapsed().as_micros() % 10_000_000_000;
        let msg = args.to_string();
        let line = format!(
            "{}@{:11}] {}{}\n",
            self.prefix,
            micros,
            msg.trim_end_matches('\n'),
            SUFFIX
        );
        // logging must never fail the operation that is logged
        std::io::stderr().lock().write_all(line.as_bytes()).ok();
    }
}

/// Returns the enabled log flags, initialized from the environment variable `LOG`
pub fn flags() -> LogFlags {
    *FLAGS.get_or_init(|| match env::var("LOG") {
        Ok(s) => s.parse().unwrap_or_else(|_| {
            eprintln!("Ignoring invalid log flags '{}'", s);
            LogFlags::default()
        }),
        Err(_) => LogFlags::default(),
    })
}

/// Returns true if all of the given flags are enabled
pub fn enabled(flag: LogFlags) -> bool {
    flags().contains(flag)
}

/// Writes the given line to the log of the current thread
pub fn write(args: fmt::Arguments<'_>) {
    LOG.with(|l| l.borrow().write_line(args));
}

/// Initializes the logger of the current thread to print the given node id and name
pub fn init(node: u8, name: &str) {
    START.get_or_init(Instant::now);
    LOG.with(|l| l.borrow_mut().prefix = Log::build_prefix(Some(node), name));
}
