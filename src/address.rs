//! Two coordinate spaces, kept distinct at the type level.
//!
//! Addresses that come from the kernel (registers, `ptrace` peeks) live in
//! *runtime* space. Addresses that come from debug info (DWARF low-pc/
//! high-pc, line tables) live in *debug-info* space. For a non-PIE binary
//! the two coincide; for a PIE, runtime space is debug-info space plus the
//! load bias. Feeding a raw register value straight into a line-table
//! lookup without translating is a common class of bug; giving the two
//! spaces different Rust types turns it into a compile error, since
//! `RuntimeAddr` and `DebugAddr` only interconvert through a `LoadAddress`.

use std::fmt;
use std::fs;
use std::io::{self, BufRead};
use std::ops::{Add, Sub};

use anyhow::{anyhow, Context, Result};
use nix::unistd::Pid;

macro_rules! addr_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:x}", self.0)
            }
        }

        impl Add<u64> for $name {
            type Output = $name;
            fn add(self, rhs: u64) -> $name {
                $name(self.0 + rhs)
            }
        }

        impl Sub<u64> for $name {
            type Output = $name;
            fn sub(self, rhs: u64) -> $name {
                $name(self.0 - rhs)
            }
        }
    };
}

addr_newtype!(RuntimeAddr);
addr_newtype!(DebugAddr);

/// The load bias of a position-independent executable, recorded once at the
/// first stop of the tracee and immutable for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadAddress(u64);

impl LoadAddress {
    /// For a non-PIE executable the load address is always zero.
    pub fn zero() -> Self {
        LoadAddress(0)
    }

    /// Compute the load address for a PIE/shared executable from
    /// `/proc/<pid>/maps`: the start of the first mapped segment, the hex
    /// number before the first `-` on the first line.
    ///
    /// Must be called after the tracee's first stop, once the kernel has
    /// actually established the mappings.
    pub fn initialize(pid: Pid, is_dynamic: bool) -> Result<LoadAddress> {
        if !is_dynamic {
            return Ok(LoadAddress::zero());
        }

        let path = format!("/proc/{}/maps", pid);
        let f = fs::File::open(&path).with_context(|| format!("could not open {}", path))?;
        let mut lines = io::BufReader::new(f).lines();
        let first = lines
            .next()
            .ok_or_else(|| anyhow!("{} is empty", path))?
            .with_context(|| format!("could not read {}", path))?;

        let start = first
            .split('-')
            .next()
            .ok_or_else(|| anyhow!("malformed maps line: {:?}", first))?;

        // Always parse address-wide, never truncated to a narrower int.
        let load = u64::from_str_radix(start, 16)
            .with_context(|| format!("could not parse load address from {:?}", start))?;

        Ok(LoadAddress(load))
    }

    pub fn to_debug(self, addr: RuntimeAddr) -> DebugAddr {
        DebugAddr(addr.0 - self.0)
    }

    pub fn to_runtime(self, addr: DebugAddr) -> RuntimeAddr {
        RuntimeAddr(addr.0 + self.0)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_load_is_identity() {
        let load = LoadAddress::zero();
        let rt = RuntimeAddr(0x4010a0);
        assert_eq!(load.to_debug(rt).raw(), 0x4010a0);
        assert_eq!(load.to_runtime(load.to_debug(rt)).raw(), rt.raw());
    }

    #[test]
    fn nonzero_load_round_trips() {
        // Property: to_runtime(to_debug(x)) == x and vice versa, for any
        // address x and any session (PIE or not).
        let load = LoadAddress(0x5555_5555_0000);
        for x in [0u64, 0x1000, 0x7fff_0000, 0xdead_beef] {
            let rt = RuntimeAddr(load.raw() + x);
            let dbg = load.to_debug(rt);
            assert_eq!(dbg.raw(), x);
            assert_eq!(load.to_runtime(dbg), rt);

            let dbg2 = DebugAddr(x);
            let rt2 = load.to_runtime(dbg2);
            assert_eq!(load.to_debug(rt2), dbg2);
        }
    }

    #[test]
    fn newtype_arithmetic_stays_within_one_space() {
        let a = RuntimeAddr(0x1000);
        let b = a + 0x10;
        assert_eq!(b.raw(), 0x1010);
        let c = b - 0x10;
        assert_eq!(c, a);
    }
}
