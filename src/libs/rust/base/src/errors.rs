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

//! Contains the error handling types

use std::fmt;

use num_enum::{FromPrimitive, IntoPrimitive};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// The error codes
///
/// The codes are transported as `u32` in the DTU's command register and in the status word of
/// memory responses. Hence, the numeric values are part of the wire format and new codes have to
/// be appended. Unknown values are mapped to [`Code::Unspecified`].
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    IntoPrimitive,
    FromPrimitive,
    Serialize_repr,
    Deserialize_repr,
)]
#[repr(u32)]
pub enum Code {
    // success
    Success = 0,
    // DTU errors
    InvEP,
    NoMEP,
    NoSEP,
    NoREP,
    RecvGone,
    OutOfBounds,
    NoCredits,
    NoPerm,
    InvMsgOff,
    NoReplyCap,
    CmpXchgFailed,
    // SW Errors
    InvArgs,
    OutOfMem,
    NotSup,
    NotFound,
    NoFreeEP,
    Exists,
    InvConfig,
    InvState,
    Timeout,
    #[num_enum(default)]
    Unspecified,
}

impl Default for Code {
    fn default() -> Self {
        Self::Success
    }
}

/// The error struct that is passed around
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error {
    code: Code,
}

impl Error {
    /// Creates a new object for given error code
    pub fn new(code: Code) -> Self {
        Error { code }
    }

    /// Returns the error code
    pub fn code(&self) -> Code {
        self.code
    }
}

impl From<Error> for Code {
    fn from(err: Error) -> Self {
        err.code()
    }
}

impl From<Code> for Result<(), Error> {
    fn from(code: Code) -> Self {
        match code {
            Code::Success => Ok(()),
            e => Err(Error::new(e)),
        }
    }
}

impl<T> From<Result<T, Error>> for Code {
    fn from(res: Result<T, Error>) -> Self {
        match res {
            Ok(_) => Code::Success,
            Err(e) => e.code(),
        }
    }
}

impl From<u32> for Error {
    fn from(error: u32) -> Self {
        Self::new(Code::from(error))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code())
    }
}

impl std::error::Error for Error {
}

/// A verbose error type that contains an error message
#[derive(Clone, PartialEq, Eq)]
pub struct VerboseError {
    code: Code,
    msg: String,
}

impl VerboseError {
    /// Creates a new error with given error code and error message
    pub fn new(code: Code, msg: String) -> Self {
        Self { code, msg }
    }

    /// Returns the error code
    pub fn code(&self) -> Code {
        self.code
    }

    /// Returns the error message
    pub fn msg(&self) -> &String {
        &self.msg
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.msg, self.code)
    }
}

impl From<Error> for VerboseError {
    fn from(e: Error) -> Self {
        Self::new(e.code(), String::default())
    }
}

impl fmt::Debug for VerboseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug(f)
    }
}

impl fmt::Display for VerboseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug(f)
    }
}

impl std::error::Error for VerboseError {
}
