//! Typed view over the tracee's general-purpose register bank.
//!
//! The register table below mirrors the kernel's `user_regs_struct` layout
//! (same order the original `registers.h` table used), so a bulk
//! fetch/store can index positionally. There is no caching: every `read`
//! or `write` is a fresh `PTRACE_GETREGS`/`PTRACE_SETREGS` round trip, so
//! values are always current after any tracee stop.

use anyhow::{anyhow, Result};
use libc::user_regs_struct;
use nix::unistd::Pid;

use crate::ptrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    R15,
    R14,
    R13,
    R12,
    Rbp,
    Rbx,
    R11,
    R10,
    R9,
    R8,
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    OrigRax,
    Rip,
    Cs,
    Eflags,
    Rsp,
    Ss,
    FsBase,
    GsBase,
    Ds,
    Es,
    Fs,
    Gs,
}

pub struct RegisterDescriptor {
    pub register: Register,
    pub dwarf_number: Option<u32>,
    pub name: &'static str,
}

/// Static, ordered table of every addressable register. Order matches the
/// kernel `user_regs_struct` layout; `dwarf_number` is `None` where the
/// debug-info mapping has no corresponding DWARF register (e.g. `rip`).
pub static REGISTERS: &[RegisterDescriptor] = &[
    RegisterDescriptor { register: Register::R15, dwarf_number: Some(15), name: "r15" },
    RegisterDescriptor { register: Register::R14, dwarf_number: Some(14), name: "r14" },
    RegisterDescriptor { register: Register::R13, dwarf_number: Some(13), name: "r13" },
    RegisterDescriptor { register: Register::R12, dwarf_number: Some(12), name: "r12" },
    RegisterDescriptor { register: Register::Rbp, dwarf_number: Some(6), name: "rbp" },
    RegisterDescriptor { register: Register::Rbx, dwarf_number: Some(3), name: "rbx" },
    RegisterDescriptor { register: Register::R11, dwarf_number: Some(11), name: "r11" },
    RegisterDescriptor { register: Register::R10, dwarf_number: Some(10), name: "r10" },
    RegisterDescriptor { register: Register::R9, dwarf_number: Some(9), name: "r9" },
    RegisterDescriptor { register: Register::R8, dwarf_number: Some(8), name: "r8" },
    RegisterDescriptor { register: Register::Rax, dwarf_number: Some(0), name: "rax" },
    RegisterDescriptor { register: Register::Rcx, dwarf_number: Some(2), name: "rcx" },
    RegisterDescriptor { register: Register::Rdx, dwarf_number: Some(1), name: "rdx" },
    RegisterDescriptor { register: Register::Rsi, dwarf_number: Some(4), name: "rsi" },
    RegisterDescriptor { register: Register::Rdi, dwarf_number: Some(5), name: "rdi" },
    RegisterDescriptor { register: Register::OrigRax, dwarf_number: None, name: "orig_rax" },
    RegisterDescriptor { register: Register::Rip, dwarf_number: None, name: "rip" },
    RegisterDescriptor { register: Register::Cs, dwarf_number: Some(51), name: "cs" },
    RegisterDescriptor { register: Register::Eflags, dwarf_number: Some(49), name: "eflags" },
    RegisterDescriptor { register: Register::Rsp, dwarf_number: Some(7), name: "rsp" },
    RegisterDescriptor { register: Register::Ss, dwarf_number: Some(52), name: "ss" },
    RegisterDescriptor { register: Register::FsBase, dwarf_number: Some(58), name: "fs_base" },
    RegisterDescriptor { register: Register::GsBase, dwarf_number: Some(59), name: "gs_base" },
    RegisterDescriptor { register: Register::Ds, dwarf_number: Some(53), name: "ds" },
    RegisterDescriptor { register: Register::Es, dwarf_number: Some(50), name: "es" },
    RegisterDescriptor { register: Register::Fs, dwarf_number: Some(54), name: "fs" },
    RegisterDescriptor { register: Register::Gs, dwarf_number: Some(55), name: "gs" },
];

/// Positional accessor matching a `RegisterDescriptor`'s slot in
/// `user_regs_struct`. `libc::user_regs_struct` has the same field order as
/// the table above, so this is a straightforward field-by-field mapping
/// rather than raw pointer arithmetic (unlike the C++ original, which
/// indexes the struct as an array of `u64`s).
fn field(regs: &user_regs_struct, register: Register) -> u64 {
    match register {
        Register::R15 => regs.r15,
        Register::R14 => regs.r14,
        Register::R13 => regs.r13,
        Register::R12 => regs.r12,
        Register::Rbp => regs.rbp,
        Register::Rbx => regs.rbx,
        Register::R11 => regs.r11,
        Register::R10 => regs.r10,
        Register::R9 => regs.r9,
        Register::R8 => regs.r8,
        Register::Rax => regs.rax,
        Register::Rcx => regs.rcx,
        Register::Rdx => regs.rdx,
        Register::Rsi => regs.rsi,
        Register::Rdi => regs.rdi,
        Register::OrigRax => regs.orig_rax,
        Register::Rip => regs.rip,
        Register::Cs => regs.cs,
        Register::Eflags => regs.eflags,
        Register::Rsp => regs.rsp,
        Register::Ss => regs.ss,
        Register::FsBase => regs.fs_base,
        Register::GsBase => regs.gs_base,
        Register::Ds => regs.ds,
        Register::Es => regs.es,
        Register::Fs => regs.fs,
        Register::Gs => regs.gs,
    }
}

fn set_field(regs: &mut user_regs_struct, register: Register, value: u64) {
    match register {
        Register::R15 => regs.r15 = value,
        Register::R14 => regs.r14 = value,
        Register::R13 => regs.r13 = value,
        Register::R12 => regs.r12 = value,
        Register::Rbp => regs.rbp = value,
        Register::Rbx => regs.rbx = value,
        Register::R11 => regs.r11 = value,
        Register::R10 => regs.r10 = value,
        Register::R9 => regs.r9 = value,
        Register::R8 => regs.r8 = value,
        Register::Rax => regs.rax = value,
        Register::Rcx => regs.rcx = value,
        Register::Rdx => regs.rdx = value,
        Register::Rsi => regs.rsi = value,
        Register::Rdi => regs.rdi = value,
        Register::OrigRax => regs.orig_rax = value,
        Register::Rip => regs.rip = value,
        Register::Cs => regs.cs = value,
        Register::Eflags => regs.eflags = value,
        Register::Rsp => regs.rsp = value,
        Register::Ss => regs.ss = value,
        Register::FsBase => regs.fs_base = value,
        Register::GsBase => regs.gs_base = value,
        Register::Ds => regs.ds = value,
        Register::Es => regs.es = value,
        Register::Fs => regs.fs = value,
        Register::Gs => regs.gs = value,
    }
}

/// A live, uncached handle onto one tracee's register bank.
pub struct RegisterFile {
    pid: Pid,
}

impl RegisterFile {
    pub fn new(pid: Pid) -> Self {
        RegisterFile { pid }
    }

    pub fn read(&self, register: Register) -> Result<u64> {
        let regs = ptrace::getregs(self.pid)?;
        Ok(field(&regs, register))
    }

    pub fn write(&self, register: Register, value: u64) -> Result<()> {
        let mut regs = ptrace::getregs(self.pid)?;
        set_field(&mut regs, register, value);
        ptrace::setregs(self.pid, regs)
    }

    /// Look up a register by its DWARF register number. An unknown number
    /// is a reported `Err` rather than silently returning garbage.
    pub fn read_by_dwarf_number(&self, dwarf_number: u32) -> Result<u64> {
        let descriptor = REGISTERS
            .iter()
            .find(|d| d.dwarf_number == Some(dwarf_number))
            .ok_or_else(|| anyhow!("no register with DWARF number {}", dwarf_number))?;
        self.read(descriptor.register)
    }
}

pub fn name_to_register(name: &str) -> Option<Register> {
    REGISTERS
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.register)
}

pub fn register_to_name(register: Register) -> &'static str {
    REGISTERS
        .iter()
        .find(|d| d.register == register)
        .map(|d| d.name)
        .expect("every Register variant has a table entry")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_unique() {
        let mut names: Vec<&str> = REGISTERS.iter().map(|d| d.name).collect();
        names.sort_unstable();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len(), "duplicate register names");
    }

    #[test]
    fn table_dwarf_numbers_are_unique_where_present() {
        let mut numbers: Vec<u32> = REGISTERS.iter().filter_map(|d| d.dwarf_number).collect();
        numbers.sort_unstable();
        let mut deduped = numbers.clone();
        deduped.dedup();
        assert_eq!(numbers.len(), deduped.len(), "duplicate DWARF register numbers");
    }

    #[test]
    fn name_lookup_round_trips() {
        for d in REGISTERS {
            assert_eq!(name_to_register(d.name), Some(d.register));
            assert_eq!(register_to_name(d.register), d.name);
        }
        assert_eq!(name_to_register("not_a_register"), None);
    }

    #[test]
    fn field_accessors_round_trip_through_struct() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        for d in REGISTERS {
            set_field(&mut regs, d.register, 0x4242);
            assert_eq!(field(&regs, d.register), 0x4242);
            set_field(&mut regs, d.register, 0);
        }
    }
}
