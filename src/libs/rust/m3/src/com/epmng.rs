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

use crate::cfg;
use crate::dtu::EpId;
use crate::errors::{Code, Error};
use crate::io::LogFlags;
use crate::log;

/// The endpoint manager (`EpMng`)
///
/// The `EpMng` is responsible for endpoint allocation and deallocation on one node. The endpoint
/// [`cfg::MEM_REQ_EP`] is reserved from the start, because it receives memory requests.
pub struct EpMng {
    used: Vec<bool>,
}

impl EpMng {
    /// Creates a new endpoint manager for `count` endpoints
    pub fn new(count: usize) -> Self {
        let mut used = vec![false; count];
        if let Some(ep) = used.get_mut(cfg::MEM_REQ_EP as usize) {
            *ep = true;
        }
        EpMng { used }
    }

    /// Returns the number of free endpoints
    pub fn free_count(&self) -> usize {
        self.used.iter().filter(|u| !**u).count()
    }

    /// Returns true if `ep` is allocated
    pub fn is_used(&self, ep: EpId) -> bool {
        self.used.get(ep as usize).copied().unwrap_or(false)
    }

    /// Allocates a new endpoint.
    pub fn acquire(&mut self) -> Result<EpId, Error> {
        let ep = self
            .used
            .iter()
            .position(|u| !*u)
            .ok_or_else(|| Error::new(Code::NoFreeEP))?;
        self.used[ep] = true;
        log!(LogFlags::LibEPs, "allocated EP{}", ep);
        Ok(ep as EpId)
    }

    /// Allocates the specific endpoint `ep`.
    pub fn acquire_specific(&mut self, ep: EpId) -> Result<EpId, Error> {
        match self.used.get_mut(ep as usize) {
            None => Err(Error::new(Code::InvEP)),
            Some(u) if *u => Err(Error::new(Code::Exists)),
            Some(u) => {
                *u = true;
                log!(LogFlags::LibEPs, "allocated EP{}", ep);
                Ok(ep)
            },
        }
    }

    /// Frees the given endpoint
    pub fn release(&mut self, ep: EpId) {
        if ep == cfg::MEM_REQ_EP {
            return;
        }

        if let Some(u) = self.used.get_mut(ep as usize) {
            log!(LogFlags::LibEPs, "freed EP{}", ep);
            *u = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release() {
        let mut eps = EpMng::new(4);
        assert!(eps.is_used(cfg::MEM_REQ_EP));
        assert_eq!(eps.free_count(), 3);

        let a = eps.acquire().unwrap();
        let b = eps.acquire().unwrap();
        let c = eps.acquire().unwrap();
        assert_ne!(a, cfg::MEM_REQ_EP);
        assert_eq!(eps.acquire().map_err(|e| e.code()), Err(Code::NoFreeEP));

        eps.release(b);
        assert_eq!(eps.acquire(), Ok(b));
        eps.release(a);
        eps.release(c);
        assert_eq!(eps.free_count(), 2);
    }

    #[test]
    fn specific() {
        let mut eps = EpMng::new(4);
        assert_eq!(eps.acquire_specific(2), Ok(2));
        assert_eq!(eps.acquire_specific(2).map_err(|e| e.code()), Err(Code::Exists));
        assert_eq!(eps.acquire_specific(4).map_err(|e| e.code()), Err(Code::InvEP));
        assert_eq!(
            eps.acquire_specific(cfg::MEM_REQ_EP).map_err(|e| e.code()),
            Err(Code::Exists)
        );

        // the memory request endpoint stays reserved
        eps.release(cfg::MEM_REQ_EP);
        assert!(eps.is_used(cfg::MEM_REQ_EP));
    }
}
