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

//! Contains the logging infrastructure

pub mod log;
mod logflags;

pub use self::logflags::LogFlags;

/// Macro for logging (includes a trailing newline)
///
/// The arguments are printed if $flag is enabled (see [`LogFlags`]).
///
/// # Examples
///
/// ```
/// use base::io::LogFlags;
/// base::log!(LogFlags::DtuCmds, "my log entry: {}, {}", 1, "test");
/// ```
#[macro_export]
macro_rules! log {
    ($flag:expr, $fmt:expr)                   => (
        $crate::log!(@log_impl $flag, concat!($fmt, "\n"))
    );

    ($flag:expr, $fmt:expr, $($arg:tt)*)      => (
        $crate::log!(@log_impl $flag, concat!($fmt, "\n"), $($arg)*)
    );

    (@log_impl $flag:expr, $($args:tt)*)    => ({
        if $crate::io::log::enabled($flag) {
            $crate::io::log::write(format_args!($($args)*));
        }
    });
}

/// Initializes the logger of the current thread
pub fn init(node: u8, name: &str) {
    log::init(node, name);
}
