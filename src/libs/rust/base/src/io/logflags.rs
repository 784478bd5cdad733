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

use std::str;

use bitflags::bitflags;

bitflags! {
    /// All log flags of the DTU and its client library
    ///
    /// Logging is controlled at runtime via the environment variable `LOG`, which holds a list of
    /// flags separated by `|` (e.g., `LOG="Info|Error|DtuCmds"`). Any component can then use the
    /// `log` macro to log something. The available flags are kept here.
    ///
    /// There are three general flags: `Info`, `Debug`, and `Error`. These are used by various
    /// components and Info and Error is enabled by default. These flags are also used in
    /// applications, so that we don't need to add new flags for applications.
    ///
    /// Additionally, there are per-component flags such as `DtuMsgs` or `LibGates` that control the
    /// logging of certain aspects within a specific component. `DtuErrs` is enabled by default,
    /// because it reports messages the DTU drops, which is not visible to the sender otherwise.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct LogFlags : u64 {
        /// General: informational output (enabled by default)
        const Info          = 1 << 0;
        /// General: debugging output (disable by default)
        const Debug         = 1 << 1;
        /// General: error output (enabled by default)
        const Error         = 1 << 2;

        #[doc(hidden)]
        const __dtu_start = 3;

        /// DTU: executed commands
        const DtuCmds       = 1 << (Self::__dtu_start.bits() + 0);
        /// DTU: sent and delivered messages
        const DtuMsgs       = 1 << (Self::__dtu_start.bits() + 1);
        /// DTU: credit changes
        const DtuCredits    = 1 << (Self::__dtu_start.bits() + 2);
        /// DTU: command errors and dropped messages (enabled by default)
        const DtuErrs       = 1 << (Self::__dtu_start.bits() + 3);
        /// DTU: backend operations
        const DtuBackend    = 1 << (Self::__dtu_start.bits() + 4);
        /// DTU: endpoint configurations
        const DtuEPs        = 1 << (Self::__dtu_start.bits() + 5);

        #[doc(hidden)]
        const __lib_start = Self::__dtu_start.bits() + 6;

        /// libraries: gate operations
        const LibGates      = 1 << (Self::__lib_start.bits() + 0);
        /// libraries: local memory allocations
        const LibMem        = 1 << (Self::__lib_start.bits() + 1);
        /// libraries: endpoint allocations
        const LibEPs        = 1 << (Self::__lib_start.bits() + 2);
    }
}

impl Default for LogFlags {
    fn default() -> Self {
        LogFlags::Info | LogFlags::Error | LogFlags::DtuErrs
    }
}

impl str::FromStr for LogFlags {
    type Err = bitflags::parser::ParseError;

    fn from_str(flags: &str) -> Result<Self, Self::Err> {
        Ok(Self(flags.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let flags: LogFlags = "Info | DtuCmds".parse().unwrap();
        assert_eq!(flags, LogFlags::Info | LogFlags::DtuCmds);
        assert!("Info | Unknown".parse::<LogFlags>().is_err());
    }

    #[test]
    fn defaults() {
        let def = LogFlags::default();
        assert!(def.contains(LogFlags::DtuErrs));
        assert!(!def.contains(LogFlags::DtuMsgs));
    }
}
