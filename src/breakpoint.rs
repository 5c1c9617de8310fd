//! A single software breakpoint: an `int3` (`0xCC`) spliced into the
//! tracee's instruction stream, with the displaced byte kept as a shadow so
//! it can be restored.
//!
//! The state is a tagged variant rather than a bare `bool` + `u8` pair:
//! `Disabled` carries no shadow, `Armed` always carries one. That makes
//! "enable an already-armed breakpoint, which would shadow the trap opcode
//! itself" impossible to express, instead of merely undesirable.
//!
//! The peek/poke calls go through the `TraceeMemory` trait rather than
//! straight to `crate::ptrace`, so `enable`/`disable` themselves — not a
//! hand-copied stand-in — can be exercised in tests against a fake
//! in-memory tracee instead of a live ptrace handle.

use anyhow::Result;
use nix::unistd::Pid;

use crate::address::RuntimeAddr;
use crate::ptrace;

pub const TRAP_OPCODE: u8 = 0xcc;

/// The tracee-memory peek/poke surface a `Breakpoint` needs. Implemented for
/// `PtraceMemory` in production and for an in-memory fake in tests.
pub trait TraceeMemory {
    fn peek(&self, addr: u64) -> Result<u64>;
    fn poke(&self, addr: u64, data: u64) -> Result<()>;
}

/// The production `TraceeMemory`: a live tracee reached through `ptrace`.
#[derive(Debug, Clone, Copy)]
pub struct PtraceMemory(pub Pid);

impl TraceeMemory for PtraceMemory {
    fn peek(&self, addr: u64) -> Result<u64> {
        ptrace::peek(self.0, addr)
    }

    fn poke(&self, addr: u64, data: u64) -> Result<()> {
        ptrace::poke(self.0, addr, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakpointState {
    Disabled,
    Armed { saved: u8 },
}

pub struct Breakpoint<IO: TraceeMemory = PtraceMemory> {
    io: IO,
    address: RuntimeAddr,
    state: BreakpointState,
}

impl Breakpoint<PtraceMemory> {
    pub fn new(pid: Pid, address: RuntimeAddr) -> Self {
        Breakpoint::with_io(PtraceMemory(pid), address)
    }
}

impl<IO: TraceeMemory> Breakpoint<IO> {
    pub fn with_io(io: IO, address: RuntimeAddr) -> Self {
        Breakpoint {
            io,
            address,
            state: BreakpointState::Disabled,
        }
    }

    pub fn address(&self) -> RuntimeAddr {
        self.address
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, BreakpointState::Armed { .. })
    }

    /// Arm the breakpoint: read the word at `address`, save its low byte as
    /// the shadow, and write back the same word with the low byte replaced
    /// by `0xCC`. Idempotent: a no-op if already armed, so the current
    /// (trap) byte is never mistaken for the shadow.
    pub fn enable(&mut self) -> Result<()> {
        if self.is_enabled() {
            return Ok(());
        }

        let word = self.io.peek(self.address.raw())?;
        let saved = (word & 0xff) as u8;
        let patched = (word & !0xffu64) | TRAP_OPCODE as u64;
        self.io.poke(self.address.raw(), patched)?;

        self.state = BreakpointState::Armed { saved };
        Ok(())
    }

    /// Disarm the breakpoint: restore the saved shadow byte into the low 8
    /// bits of the word at `address`, preserving the surrounding 7 bytes.
    /// Idempotent: a no-op if already disabled.
    pub fn disable(&mut self) -> Result<()> {
        let saved = match self.state {
            BreakpointState::Disabled => return Ok(()),
            BreakpointState::Armed { saved } => saved,
        };

        let word = self.io.peek(self.address.raw())?;
        let restored = (word & !0xffu64) | saved as u64;
        self.io.poke(self.address.raw(), restored)?;

        self.state = BreakpointState::Disabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    // An in-memory stand-in for the tracee's address space, wired in
    // through `TraceeMemory` so the tests below drive the real
    // `Breakpoint::enable`/`disable` state machine, not a duplicate of it.
    struct FakeTracee {
        words: RefCell<HashMap<u64, u64>>,
    }

    impl FakeTracee {
        fn new(addr: u64, word: u64) -> Self {
            let mut words = HashMap::new();
            words.insert(addr, word);
            FakeTracee { words: RefCell::new(words) }
        }

        fn word_at(&self, addr: u64) -> u64 {
            *self.words.borrow().get(&addr).unwrap()
        }
    }

    impl TraceeMemory for FakeTracee {
        fn peek(&self, addr: u64) -> Result<u64> {
            Ok(*self.words.borrow().get(&addr).unwrap())
        }

        fn poke(&self, addr: u64, data: u64) -> Result<()> {
            self.words.borrow_mut().insert(addr, data);
            Ok(())
        }
    }

    #[test]
    fn round_trip_restores_exact_word_and_only_low_byte_changes() {
        let addr = 0x4010a0u64;
        let original = 0x1122_3344_5566_7788u64;
        let mut bp = Breakpoint::with_io(FakeTracee::new(addr, original), RuntimeAddr(addr));

        bp.enable().unwrap();
        assert!(bp.is_enabled());

        let patched = bp.io.word_at(addr);
        assert_eq!(patched & 0xff, TRAP_OPCODE as u64);
        assert_eq!(patched & !0xffu64, original & !0xffu64);

        bp.disable().unwrap();
        assert!(!bp.is_enabled());
        assert_eq!(bp.io.word_at(addr), original);
    }

    #[test]
    fn disable_on_already_disabled_breakpoint_is_a_no_op() {
        let addr = 0x4010a0u64;
        let original = 0x1122_3344_5566_7788u64;
        let mut bp = Breakpoint::with_io(FakeTracee::new(addr, original), RuntimeAddr(addr));

        assert!(!bp.is_enabled());
        bp.disable().unwrap();
        assert!(!bp.is_enabled());
        // A no-op disable must not have touched the tracee's memory at all.
        assert_eq!(bp.io.word_at(addr), original);
    }

    #[test]
    fn enable_on_already_enabled_breakpoint_does_not_reshadow_the_trap_byte() {
        let addr = 0x4010a0u64;
        let original = 0x1122_3344_5566_7788u64;
        let mut bp = Breakpoint::with_io(FakeTracee::new(addr, original), RuntimeAddr(addr));

        bp.enable().unwrap();
        // Re-enabling an already-armed breakpoint must be a no-op: if it
        // re-read the shadow now, it would capture 0xCC (the trap byte)
        // instead of the original 0x88.
        bp.enable().unwrap();
        bp.disable().unwrap();

        assert_eq!(bp.io.word_at(addr), original);
    }

    #[test]
    fn new_breakpoint_starts_disabled() {
        let bp = Breakpoint::new(Pid::from_raw(1), RuntimeAddr(0x1000));
        assert!(!bp.is_enabled());
    }
}
