//! Instruction-step, step-in, step-over, step-out.
//!
//! Stepping out of an inlined function, or one compiled without a frame
//! pointer, is undefined here — the walk below assumes the standard
//! `rbp`-chain convention, same as the backtrace walker. Stepping over a
//! tail call behaves like stepping out of the caller, since the callee's
//! return address and the caller's are the same slot.

use anyhow::{anyhow, Result};

use crate::address::RuntimeAddr;
use crate::debugger::Debugger;
use crate::ptrace;
use crate::registers::Register;
use crate::source::print_source;

const SOURCE_CONTEXT: u64 = 2;

/// Issue one architectural single-step and wait for it to complete.
pub fn single_step_instruction(dbg: &mut Debugger) -> Result<()> {
    ptrace::singlestep(dbg.pid)?;
    dbg.handle_stop()
}

/// Single-step, first stepping over a breakpoint if PC sits on one.
pub fn single_step_with_breakpoint_check(dbg: &mut Debugger) -> Result<()> {
    let pc = dbg.pc()?;
    if dbg.breakpoints.contains(pc) {
        crate::breakpoints::step_over_breakpoint(dbg.pid, &mut dbg.breakpoints, pc)
    } else {
        single_step_instruction(dbg)
    }
}

fn current_line(dbg: &Debugger) -> Option<(String, u64)> {
    let pc = dbg.pc().ok()?;
    let debug_pc = dbg.load_address.to_debug(pc);
    let entry = dbg.debug_info.line_entry_at(debug_pc).ok()?;
    let file = entry.file.clone()?;
    Some((file, entry.line))
}

/// Step into the next source line, crossing into a callee if the current
/// line calls one.
pub fn step_in(dbg: &mut Debugger) -> Result<()> {
    let start = current_line(dbg);

    loop {
        single_step_with_breakpoint_check(dbg)?;
        if !dbg.running {
            return Ok(());
        }

        let now = current_line(dbg);
        if now != start {
            if let Some((file, line)) = now {
                print_source(&file, line, SOURCE_CONTEXT)?;
            }
            return Ok(());
        }
    }
}

fn current_return_address(dbg: &Debugger) -> Result<RuntimeAddr> {
    let frame_pointer = dbg.registers().read(Register::Rbp)?;
    let return_addr = dbg.read_memory(frame_pointer + 8)?;
    Ok(RuntimeAddr(return_addr))
}

/// Step out of the current frame: run until the return address is hit.
pub fn step_out(dbg: &mut Debugger) -> Result<()> {
    let return_address = current_return_address(dbg)?;

    let already_set = dbg.breakpoints.contains(return_address);
    if !already_set {
        dbg.breakpoints.set_transient(dbg.pid, return_address)?;
    }

    dbg.continue_execution()?;

    if !already_set {
        dbg.breakpoints.clear_transients()?;
    }

    Ok(())
}

/// Step over the current line: run until control returns to the same
/// frame, skipping any calls the line makes. Installs a transient
/// breakpoint at every other line-table address in the current function
/// plus the return address (to catch an early return), then continues;
/// whichever fires first wins and the rest are torn down in cleanup.
pub fn step_over(dbg: &mut Debugger) -> Result<()> {
    let pc = dbg.pc()?;
    let debug_pc = dbg.load_address.to_debug(pc);

    let function = dbg
        .debug_info
        .function_at(debug_pc)
        .map_err(|_| anyhow!("Function not found"))?
        .clone();

    let current_entry_addr = dbg
        .debug_info
        .line_entry_at(debug_pc)
        .map(|e| e.address)
        .ok();

    let unit_lines: Vec<_> = dbg
        .debug_info
        .units()
        .iter()
        .find(|u| u.contains(function.low_pc))
        .map(|u| u.line_table.clone())
        .unwrap_or_default();

    for entry in &unit_lines {
        if !function.contains(entry.address) {
            continue;
        }
        if Some(entry.address) == current_entry_addr {
            continue;
        }
        let runtime = dbg.load_address.to_runtime(entry.address);
        if !dbg.breakpoints.contains(runtime) {
            dbg.breakpoints.set_transient(dbg.pid, runtime)?;
        }
    }

    let return_address = current_return_address(dbg)?;
    if !dbg.breakpoints.contains(return_address) {
        dbg.breakpoints.set_transient(dbg.pid, return_address)?;
    }

    dbg.continue_execution()?;
    dbg.breakpoints.clear_transients()?;

    Ok(())
}
