//! Enumerates local variables of the current function and resolves each
//! one's location against live register/memory state.

use anyhow::Result;

use crate::debugger::Debugger;
use crate::dwarf::{evaluate_location, LocationContext, VariableLocation};
use crate::registers::RegisterFile;

struct LiveContext<'a> {
    regs: RegisterFile,
    pc: crate::address::DebugAddr,
    dbg: &'a Debugger,
}

impl<'a> LocationContext for LiveContext<'a> {
    fn register(&self, dwarf_number: u16) -> Result<u64> {
        self.regs.read_by_dwarf_number(dwarf_number as u32)
    }

    fn pc(&self) -> crate::address::DebugAddr {
        self.pc
    }

    fn read_memory(&self, addr: u64, size: u8) -> Result<u64> {
        let runtime = self.dbg.load_address.to_runtime(crate::address::DebugAddr(addr));
        let word = self.dbg.read_memory(runtime.raw())?;
        let mask = match size {
            1 => 0xff,
            2 => 0xffff,
            4 => 0xffff_ffff,
            _ => u64::MAX,
        };
        Ok(word & mask)
    }
}

pub struct ReportedVariable {
    pub name: String,
    pub location: VariableLocation,
}

/// Evaluate the location of every variable (and parameter) belonging to
/// the function enclosing the current PC.
pub fn enumerate_variables(dbg: &Debugger) -> Result<Vec<ReportedVariable>> {
    let pc = dbg.pc()?;
    let debug_pc = dbg.load_address.to_debug(pc);

    let function = dbg.debug_info.function_at(debug_pc)?;
    let encoding = dbg
        .debug_info
        .units()
        .iter()
        .find(|u| u.contains(function.low_pc))
        .map(|u| u.encoding)
        .unwrap_or(gimli::Encoding {
            address_size: 8,
            format: gimli::Format::Dwarf32,
            version: 4,
        });

    let ctx = LiveContext { regs: dbg.registers(), pc: debug_pc, dbg };

    let mut out = Vec::new();
    for var in &function.variables {
        let name = match &var.name {
            Some(n) => n.clone(),
            None => continue,
        };
        let expr = match &var.location_expr {
            Some(e) => e,
            None => continue,
        };

        match evaluate_location(expr, encoding, &ctx) {
            Ok(location) => out.push(ReportedVariable { name, location }),
            Err(_) => out.push(ReportedVariable { name, location: VariableLocation::Unsupported }),
        }
    }

    Ok(out)
}

/// Format one variable for display, reading the word at its address when
/// the location is address-based: prints the address and the word stored
/// there.
pub fn describe(dbg: &Debugger, var: &ReportedVariable) -> String {
    match var.location {
        VariableLocation::Address(addr) => match dbg.read_memory(addr) {
            Ok(word) => format!("{} = [0x{:x}] = {}", var.name, addr, word),
            Err(_) => format!("{} = [0x{:x}] = <unreadable>", var.name, addr),
        },
        VariableLocation::Register(reg) => {
            format!("{} = register #{}", var.name, reg)
        }
        VariableLocation::Unsupported => {
            format!("{}: Unhandled variable location", var.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::LoadAddress;
    use crate::breakpoints::BreakpointTable;
    use crate::dwarf::DebugInfo;
    use nix::unistd::Pid;

    fn fixture_debugger() -> Debugger {
        Debugger {
            pid: Pid::from_raw(1),
            load_address: LoadAddress::zero(),
            debug_info: DebugInfo::from_parts(Vec::new(), Vec::new(), false),
            breakpoints: BreakpointTable::new(),
            running: true,
        }
    }

    #[test]
    fn describe_formats_a_register_location() {
        let dbg = fixture_debugger();
        let var = ReportedVariable { name: "x".to_string(), location: VariableLocation::Register(3) };
        assert_eq!(describe(&dbg, &var), "x = register #3");
    }

    #[test]
    fn describe_formats_an_unsupported_location() {
        let dbg = fixture_debugger();
        let var = ReportedVariable { name: "y".to_string(), location: VariableLocation::Unsupported };
        assert_eq!(describe(&dbg, &var), "y: Unhandled variable location");
    }
}
