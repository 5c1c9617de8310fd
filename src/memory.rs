//! Word-granularity peek/poke into the tracee's address space.
//!
//! The tracee must be stopped when these are called; ptrace itself enforces
//! that (a running tracee yields `ESRCH`). Reads return whatever byte
//! sequence currently lives at `addr`, which may include an injected `0xCC`
//! trap byte if a breakpoint sits there — callers that need the "original"
//! byte must consult the breakpoint table themselves (see `breakpoint.rs`).

use anyhow::Result;
use nix::unistd::Pid;

use crate::address::RuntimeAddr;
use crate::ptrace;

pub fn read_word(pid: Pid, addr: RuntimeAddr) -> Result<u64> {
    ptrace::peek(pid, addr.raw())
}

pub fn write_word(pid: Pid, addr: RuntimeAddr, data: u64) -> Result<()> {
    ptrace::poke(pid, addr.raw(), data)
}
