//! The top-level debugger: owns the tracee's pid, its debug info, its load
//! address, and its breakpoint table, and exposes the operations the
//! command dispatcher drives.

use std::path::Path;

use anyhow::{anyhow, Result};
use log::info;
use nix::unistd::Pid;

use crate::address::{LoadAddress, RuntimeAddr};
use crate::breakpoints::{step_over_breakpoint, BreakpointTable};
use crate::dwarf::{DebugInfo, SymbolKind};
use crate::memory;
use crate::ptrace;
use crate::registers::{self, Register, RegisterFile};
use crate::source::print_source;
use crate::supervisor::{wait_for_signal, StopReason};

/// How many lines of context to print above/below a stopped-at line.
const SOURCE_CONTEXT: u64 = 2;

pub struct Debugger {
    pub pid: Pid,
    pub load_address: LoadAddress,
    pub debug_info: DebugInfo,
    pub breakpoints: BreakpointTable,
    pub running: bool,
}

impl Debugger {
    /// Construct a debugger for a tracee that has just been forked and
    /// exec'd with `PTRACE_TRACEME`. Waits for the tracee's first stop (so
    /// the kernel has established its memory mappings) before computing the
    /// load address, per the load-address translator's contract.
    pub fn new(program: &Path, pid: Pid) -> Result<Self> {
        ptrace::wait(pid)?;

        let debug_info = DebugInfo::load(program)?;
        let load_address = LoadAddress::initialize(pid, debug_info.is_dynamic)?;
        info!("load address: 0x{:x}", load_address.raw());

        Ok(Debugger {
            pid,
            load_address,
            debug_info,
            breakpoints: BreakpointTable::new(),
            running: true,
        })
    }

    pub fn registers(&self) -> RegisterFile {
        RegisterFile::new(self.pid)
    }

    pub fn pc(&self) -> Result<RuntimeAddr> {
        self.registers().read(Register::Rip).map(RuntimeAddr)
    }

    pub fn set_pc(&self, pc: RuntimeAddr) -> Result<()> {
        self.registers().write(Register::Rip, pc.raw())
    }

    /// Resume execution after stepping past any breakpoint sitting at the
    /// current PC, then wait for and report the next stop.
    pub fn continue_execution(&mut self) -> Result<()> {
        let pc = self.pc()?;
        step_over_breakpoint(self.pid, &mut self.breakpoints, pc)?;
        ptrace::cont(self.pid, None)?;
        self.handle_stop()
    }

    /// Wait for the tracee to stop and print whatever is user-visible about
    /// the stop (breakpoint hit and its source context, fault, signal, or
    /// exit). Leaves `self.running` accurate.
    pub fn handle_stop(&mut self) -> Result<()> {
        match wait_for_signal(self.pid)? {
            StopReason::Exited(code) => {
                self.running = false;
                println!("Program exited with code {}", code);
            }
            StopReason::Signaled(signo) => {
                self.running = false;
                println!("Program terminated by signal {}", signo);
            }
            StopReason::Breakpoint(addr) => {
                println!("Breakpoint at address {}", addr);
                self.print_source_at(addr);
            }
            StopReason::SingleStep => {}
            StopReason::UnknownTrap(code) => {
                eprintln!("unknown trap: {}", code);
            }
            StopReason::SegFault(code) => {
                println!("Segmentation Fault caused because of {}", code);
            }
            StopReason::OtherSignal(signo) => {
                println!("got signal {}", signo);
            }
        }
        Ok(())
    }

    /// Best-effort: print the source line(s) surrounding a runtime address,
    /// swallowing (but reporting) a missing line entry rather than failing
    /// the whole stop.
    pub fn print_source_at(&self, addr: RuntimeAddr) {
        let debug_pc = self.load_address.to_debug(addr);
        match self.debug_info.line_entry_at(debug_pc) {
            Ok(entry) => {
                if let Some(file) = &entry.file {
                    if let Err(e) = print_source(file, entry.line, SOURCE_CONTEXT) {
                        eprintln!("{:#}", e);
                    }
                }
            }
            Err(e) => eprintln!("{:#}", e),
        }
    }

    pub fn set_breakpoint_at_runtime_address(&mut self, addr: RuntimeAddr) -> Result<()> {
        self.breakpoints.set(self.pid, addr)?;
        println!("Breakpoint set at address {}", addr);
        Ok(())
    }

    pub fn set_breakpoint_at_function(&mut self, name: &str) -> Result<()> {
        let targets = self.debug_info.breakpoint_targets_for_function(name)?;
        for target in targets {
            let runtime = self.load_address.to_runtime(target);
            self.set_breakpoint_at_runtime_address(runtime)?;
        }
        Ok(())
    }

    pub fn set_breakpoint_at_source_line(&mut self, file_suffix: &str, line: u64) -> Result<()> {
        let target = self
            .debug_info
            .breakpoint_target_for_source_line(file_suffix, line)?;
        let runtime = self.load_address.to_runtime(target);
        self.set_breakpoint_at_runtime_address(runtime)
    }

    pub fn dump_registers(&self) -> Result<()> {
        let regs = self.registers();
        for descriptor in registers::REGISTERS {
            let value = regs.read(descriptor.register)?;
            println!("{:<10} 0x{:016x}", descriptor.name, value);
        }
        Ok(())
    }

    pub fn read_register(&self, name: &str) -> Result<u64> {
        let register = registers::name_to_register(name)
            .ok_or_else(|| anyhow!("no such register: {}", name))?;
        self.registers().read(register)
    }

    pub fn write_register(&self, name: &str, value: u64) -> Result<()> {
        let register = registers::name_to_register(name)
            .ok_or_else(|| anyhow!("no such register: {}", name))?;
        self.registers().write(register, value)
    }

    pub fn read_memory(&self, addr: u64) -> Result<u64> {
        memory::read_word(self.pid, RuntimeAddr(addr))
    }

    pub fn write_memory(&self, addr: u64, data: u64) -> Result<()> {
        memory::write_word(self.pid, RuntimeAddr(addr), data)
    }

    pub fn symbol(&self, name: &str) -> Vec<String> {
        self.debug_info
            .symbols_named(name)
            .into_iter()
            .map(|s| {
                let kind = match s.kind {
                    SymbolKind::NoType => "notype",
                    SymbolKind::Section => "section",
                    SymbolKind::Function => "func",
                    SymbolKind::File => "file",
                    SymbolKind::Object => "object",
                };
                format!("{}: {} 0x{:x}", s.name, kind, s.address)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::Symbol;

    fn fixture_debugger(symbols: Vec<Symbol>) -> Debugger {
        Debugger {
            pid: Pid::from_raw(1),
            load_address: LoadAddress::zero(),
            debug_info: DebugInfo::from_parts(Vec::new(), symbols, false),
            breakpoints: BreakpointTable::new(),
            running: true,
        }
    }

    #[test]
    fn symbol_lookup_reports_name_kind_and_address() {
        let dbg = fixture_debugger(vec![Symbol {
            name: "main".to_string(),
            kind: SymbolKind::Function,
            address: 0x4010a0,
        }]);

        let lines = dbg.symbol("main");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("main"));
        assert!(lines[0].contains("func"));
        assert!(lines[0].contains("0x4010a0"));
    }

    #[test]
    fn symbol_lookup_on_unknown_name_reports_nothing() {
        let dbg = fixture_debugger(Vec::new());
        assert!(dbg.symbol("nonexistent").is_empty());
    }
}
