//! Waits on the tracee, classifies why it stopped, and reports the result.
//!
//! `wait_for_signal` is the only suspension point in the whole debugger
//! (see the concurrency model): every other operation is synchronous. On
//! return the tracee is guaranteed stopped, with its PC pointing at the
//! instruction that was originally at a breakpoint address (post-rewind),
//! or at the next instruction after a plain single-step.

use anyhow::Result;
use log::debug;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::address::RuntimeAddr;
use crate::ptrace;
use crate::registers::{Register, RegisterFile};

// From <bits/siginfo-consts.h> / the kernel's siginfo layout.
const SI_KERNEL: i32 = 0x80;
const TRAP_BRKPT: i32 = 1;
const TRAP_TRACE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A breakpoint trap: PC has already been rewound by one byte to point
    /// at the instruction that was originally there.
    Breakpoint(RuntimeAddr),
    /// A single-step completed; no user-visible action needed.
    SingleStep,
    /// A trap with an unrecognized `si_code`.
    UnknownTrap(i32),
    /// The tracee faulted; reported, not fatal to the debugger.
    SegFault(i32),
    /// Some other signal was delivered.
    OtherSignal(i32),
    /// The tracee exited normally.
    Exited(i32),
    /// The tracee was killed by a signal.
    Signaled(i32),
}

/// Block until the tracee changes state, then classify why.
pub fn wait_for_signal(pid: Pid) -> Result<StopReason> {
    let status = ptrace::wait(pid)?;

    match status {
        WaitStatus::Exited(_, code) => {
            debug!("tracee exited with {}", code);
            Ok(StopReason::Exited(code))
        }
        WaitStatus::Signaled(_, signal, _) => {
            debug!("tracee killed by {:?}", signal);
            Ok(StopReason::Signaled(signal as i32))
        }
        WaitStatus::Stopped(_, signal) => {
            debug!("tracee stopped with {:?}", signal);
            classify_stop(pid, signal as i32)
        }
        other => {
            debug!("unexpected wait status: {:?}", other);
            Ok(StopReason::OtherSignal(0))
        }
    }
}

fn classify_stop(pid: Pid, signo: i32) -> Result<StopReason> {
    if signo == libc::SIGTRAP {
        let siginfo = ptrace::getsiginfo(pid)?;
        let code = siginfo.si_code;

        return Ok(if code == SI_KERNEL || code == TRAP_BRKPT {
            let regs = RegisterFile::new(pid);
            let pc = regs.read(Register::Rip)?;
            let corrected = RuntimeAddr(pc - 1);
            regs.write(Register::Rip, corrected.raw())?;
            StopReason::Breakpoint(corrected)
        } else if code == TRAP_TRACE {
            StopReason::SingleStep
        } else {
            StopReason::UnknownTrap(code)
        });
    }

    if signo == libc::SIGSEGV {
        let siginfo = ptrace::getsiginfo(pid)?;
        return Ok(StopReason::SegFault(siginfo.si_code));
    }

    Ok(StopReason::OtherSignal(signo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_address_is_one_less_than_trap_pc() {
        // classify_stop's PC-rewind arithmetic, exercised directly rather
        // than through a live SIGTRAP (which needs a real tracee).
        let trap_pc = 0x4010a1u64;
        let corrected = RuntimeAddr(trap_pc - 1);
        assert_eq!(corrected.raw(), 0x4010a0);
    }
}
