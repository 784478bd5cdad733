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

//! Contains the runtime configuration of a DTU

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cfg;
use crate::dtu::NodeId;
use crate::errors::{Code, VerboseError};

/// The backend that connects the DTUs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// In-process channels over a shared fabric (all nodes live in the same process)
    #[default]
    Channel,
    /// Unix datagram sockets in the given directory (nodes can live in different processes)
    Socket { dir: PathBuf },
}

/// The configuration of a DTU
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtuConfig {
    pub node_id: NodeId,
    pub ep_count: usize,
    pub mem_size: usize,
    pub backend: BackendKind,
    /// The time in microseconds the transport loop waits for work when idle
    pub idle_timeout: u64,
    /// The time in milliseconds a memory command waits for its response before it fails
    pub resp_timeout: u64,
}

impl Default for DtuConfig {
    fn default() -> Self {
        DtuConfig {
            node_id: 0,
            ep_count: cfg::EP_COUNT,
            mem_size: cfg::LOCAL_MEM_SIZE,
            backend: BackendKind::default(),
            idle_timeout: cfg::IDLE_TIMEOUT_US,
            resp_timeout: cfg::RESP_TIMEOUT_MS,
        }
    }
}

impl DtuConfig {
    /// Creates the default configuration for the given node
    pub fn new(node_id: NodeId) -> Self {
        DtuConfig {
            node_id,
            ..Self::default()
        }
    }

    pub fn eps(mut self, count: usize) -> Self {
        self.ep_count = count;
        self
    }

    pub fn mem(mut self, size: usize) -> Self {
        self.mem_size = size;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Uses the socket backend with sockets in `dir`
    pub fn sockets<P: Into<PathBuf>>(self, dir: P) -> Self {
        self.backend(BackendKind::Socket { dir: dir.into() })
    }

    pub fn idle_timeout(mut self, micros: u64) -> Self {
        self.idle_timeout = micros;
        self
    }

    pub fn resp_timeout(mut self, millis: u64) -> Self {
        self.resp_timeout = millis;
        self
    }

    /// Returns the idle timeout as duration
    pub fn idle_duration(&self) -> Duration {
        Duration::from_micros(self.idle_timeout)
    }

    /// Returns the response timeout as duration
    pub fn resp_duration(&self) -> Duration {
        Duration::from_millis(self.resp_timeout)
    }

    /// Creates the configuration from the environment
    ///
    /// Reads `M3_NODE`, `M3_EPS`, `M3_MEM`, `M3_SOCK_DIR`, `M3_IDLE_US`, and `M3_RESP_MS`. Unset
    /// variables keep their default. `M3_SOCK_DIR` selects the socket backend. The result is validated.
    pub fn from_env() -> Result<Self, VerboseError> {
        let mut cfg = Self::default();
        if let Some(node) = Self::env_num("M3_NODE")? {
            cfg.node_id = node;
        }
        if let Some(eps) = Self::env_num("M3_EPS")? {
            cfg.ep_count = eps;
        }
        if let Some(mem) = Self::env_num("M3_MEM")? {
            cfg.mem_size = mem;
        }
        if let Ok(dir) = env::var("M3_SOCK_DIR") {
            cfg.backend = BackendKind::Socket { dir: dir.into() };
        }
        if let Some(idle) = Self::env_num("M3_IDLE_US")? {
            cfg.idle_timeout = idle;
        }
        if let Some(resp) = Self::env_num("M3_RESP_MS")? {
            cfg.resp_timeout = resp;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn env_num<T: FromStr>(name: &str) -> Result<Option<T>, VerboseError> {
        match env::var(name) {
            Ok(s) => s.trim().parse().map(Some).map_err(|_| {
                VerboseError::new(Code::InvConfig, format!("{}: invalid number '{}'", name, s))
            }),
            Err(_) => Ok(None),
        }
    }

    /// Checks whether the configuration is usable
    pub fn validate(&self) -> Result<(), VerboseError> {
        if self.node_id as usize >= cfg::MAX_NODES {
            return Err(VerboseError::new(
                Code::InvConfig,
                format!(
                    "node id {} exceeds maximum of {}",
                    self.node_id,
                    cfg::MAX_NODES - 1
                ),
            ));
        }
        // 0xFF is reserved for the invalid endpoint
        if self.ep_count == 0 || self.ep_count > 0xFF {
            return Err(VerboseError::new(
                Code::InvConfig,
                format!("endpoint count {} not in 1..=255", self.ep_count),
            ));
        }
        if self.resp_timeout == 0 {
            return Err(VerboseError::new(
                Code::InvConfig,
                "response timeout must not be zero".to_string(),
            ));
        }
        if self.mem_size <= cfg::XFER_BUF_SIZE {
            return Err(VerboseError::new(
                Code::InvConfig,
                format!(
                    "memory size {:#x} too small (need more than {:#x})",
                    self.mem_size,
                    cfg::XFER_BUF_SIZE
                ),
            ));
        }
        Ok(())
    }
}
