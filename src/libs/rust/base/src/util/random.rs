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

use std::time::{SystemTime, UNIX_EPOCH};

/// Linear congruential generator.
///
/// Source: `<http://en.wikipedia.org/wiki/Linear_congruential_generator>`
#[derive(Debug)]
pub struct LCG {
    a: u32,
    c: u32,
    last: u32,
}

impl LCG {
    /// Creates a new LCG with given seed
    pub fn new(seed: u32) -> Self {
        Self {
            a: 1103515245,
            c: 12345,
            last: seed,
        }
    }

    /// Returns the next pseudo random number
    pub fn get(&mut self) -> u32 {
        self.last = self.a.wrapping_mul(self.last).wrapping_add(self.c);
        (self.last / 65536) % 32768
    }

    /// Returns the next pseudo random number in the range `0..max`
    pub fn get_below(&mut self, max: u32) -> u32 {
        assert!(max > 0);
        self.get() % max
    }
}

impl Default for LCG {
    fn default() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        Self::new(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let mut a = LCG::new(42);
        let mut b = LCG::new(42);
        for _ in 0..100 {
            let v = a.get();
            assert_eq!(v, b.get());
            assert!(v < 32768);
        }
    }

    #[test]
    fn bounded() {
        let mut r = LCG::new(7);
        for _ in 0..100 {
            assert!(r.get_below(5) < 5);
        }
    }
}
