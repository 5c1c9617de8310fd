//! Debug-info resolver: queries over compilation units, subprograms, line
//! tables, and the ELF symbol table, plus the location-expression evaluator.
//!
//! This module is the only place that touches `object`/`gimli` directly;
//! everywhere else treats `DebugInfo` as an opaque reader. Compilation
//! units, subprograms, and line tables are flattened eagerly at load time
//! rather than re-walked from `gimli` on every query.

use std::fs;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use gimli::{EndianRcSlice, RunTimeEndian};
use memmap2::Mmap;
use object::{Object, ObjectKind, ObjectSection};

use crate::address::DebugAddr;

pub type Reader = EndianRcSlice<RunTimeEndian>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Section,
    Function,
    File,
    Object,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub address: u64,
}

#[derive(Debug, Clone)]
pub struct LineEntry {
    pub address: DebugAddr,
    pub file: Option<String>,
    pub line: u64,
    pub is_stmt: bool,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Option<String>,
    /// Raw DWARF expression bytes for `DW_AT_location`, evaluated lazily
    /// against live register/memory state (see `evaluate_location`).
    pub location_expr: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Subprogram {
    pub name: Option<String>,
    pub low_pc: DebugAddr,
    pub high_pc: DebugAddr,
    pub variables: Vec<Variable>,
}

impl Subprogram {
    pub fn contains(&self, pc: DebugAddr) -> bool {
        self.low_pc <= pc && pc < self.high_pc
    }
}

#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub name: Option<String>,
    pub low_pc: DebugAddr,
    pub high_pc: DebugAddr,
    pub subprograms: Vec<Subprogram>,
    pub line_table: Vec<LineEntry>,
    pub encoding: gimli::Encoding,
}

impl CompilationUnit {
    pub fn contains(&self, pc: DebugAddr) -> bool {
        self.low_pc <= pc && pc < self.high_pc
    }
}

pub struct DebugInfo {
    units: Vec<CompilationUnit>,
    symbols: Vec<Symbol>,
    pub is_dynamic: bool,
}

fn load_section(object: &object::File, id: gimli::SectionId) -> Result<Reader> {
    let endian = if object.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let data = match object.section_by_name(id.name()) {
        Some(section) => section
            .uncompressed_data()
            .with_context(|| format!("could not decompress section {}", id.name()))?
            .into_owned(),
        None => Vec::new(),
    };

    Ok(EndianRcSlice::new(Rc::from(data.into_boxed_slice()), endian))
}

fn object_symbol_kind(kind: object::SymbolKind) -> SymbolKind {
    match kind {
        object::SymbolKind::Text => SymbolKind::Function,
        object::SymbolKind::Data => SymbolKind::Object,
        object::SymbolKind::Section => SymbolKind::Section,
        object::SymbolKind::File => SymbolKind::File,
        _ => SymbolKind::NoType,
    }
}

/// `DW_AT_high_pc` is either an absolute address or (far more commonly) an
/// offset from `DW_AT_low_pc`; the form tells you which.
fn resolve_high_pc(
    unit: &gimli::Unit<Reader>,
    attr: Option<gimli::Attribute<Reader>>,
    low: u64,
) -> Result<u64> {
    let attr = attr.ok_or_else(|| anyhow!("entry has low_pc but no high_pc"))?;
    match attr.value() {
        gimli::AttributeValue::Addr(addr) => Ok(addr),
        other => {
            let offset = other
                .udata_value()
                .ok_or_else(|| anyhow!("unsupported high_pc form in unit {:?}", unit.header.offset()))?;
            Ok(low + offset)
        }
    }
}

fn die_name(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    entry: &gimli::DebuggingInformationEntry<Reader>,
) -> Result<Option<String>> {
    match entry.attr_value(gimli::DW_AT_name)? {
        Some(value) => {
            let s = dwarf.attr_string(unit, value)?;
            Ok(Some(s.to_string_lossy()?.into_owned()))
        }
        None => Ok(None),
    }
}

fn collect_variables(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    node: gimli::EntriesTreeNode<Reader>,
    out: &mut Vec<Variable>,
) -> Result<()> {
    let mut children = node.children();
    while let Some(child) = children.next()? {
        let entry = child.entry();
        if entry.tag() == gimli::DW_TAG_variable || entry.tag() == gimli::DW_TAG_formal_parameter {
            let name = die_name(dwarf, unit, entry)?;
            let location_expr = match entry.attr_value(gimli::DW_AT_location)? {
                Some(gimli::AttributeValue::Exprloc(expr)) => Some(expr.0.to_slice()?.into_owned()),
                _ => None,
            };
            out.push(Variable { name, location_expr });
        }
        // Variables may be nested in lexical blocks; descend regardless of
        // the current entry's own tag.
        collect_variables(dwarf, unit, child, out)?;
    }
    Ok(())
}

fn collect_subprograms(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    node: gimli::EntriesTreeNode<Reader>,
    out: &mut Vec<Subprogram>,
) -> Result<()> {
    let mut children = node.children();
    while let Some(child) = children.next()? {
        let entry = child.entry();
        if entry.tag() == gimli::DW_TAG_subprogram {
            if let Some(low_attr) = entry.attr_value(gimli::DW_AT_low_pc)? {
                if let gimli::AttributeValue::Addr(low) = low_attr {
                    let high = resolve_high_pc(unit, entry.attr(gimli::DW_AT_high_pc)?, low)?;
                    let name = die_name(dwarf, unit, entry)?;
                    let mut variables = Vec::new();
                    collect_variables(dwarf, unit, child, &mut variables)?;
                    out.push(Subprogram {
                        name,
                        low_pc: DebugAddr(low),
                        high_pc: DebugAddr(high),
                        variables,
                    });
                    continue;
                }
            }
        }
        collect_subprograms(dwarf, unit, child, out)?;
    }
    Ok(())
}

fn collect_line_table(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
) -> Result<Vec<LineEntry>> {
    let mut entries = Vec::new();

    let program = match &unit.line_program {
        Some(program) => program.clone(),
        None => return Ok(entries),
    };

    let mut rows = program.rows();
    while let Some((header, row)) = rows.next_row()? {
        let address = row.address();

        let file = match row.file(header) {
            Some(file_entry) => {
                let name = dwarf.attr_string(unit, file_entry.path_name())?;
                Some(name.to_string_lossy()?.into_owned())
            }
            None => None,
        };

        entries.push(LineEntry {
            address: DebugAddr(address),
            file,
            line: row.line().map(|l| l.get()).unwrap_or(0),
            is_stmt: row.is_stmt(),
        });
    }

    entries.sort_by_key(|e| e.address.raw());
    Ok(entries)
}

impl DebugInfo {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("could not open {:?}", path))?;
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("could not map {:?}", path))?;
        let object = object::File::parse(&*mmap).context("could not parse object file")?;
        let is_dynamic = object.kind() == ObjectKind::Dynamic;

        let dwarf = gimli::Dwarf::load(|id| load_section(&object, id))?;

        let mut units = Vec::new();
        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            let encoding = unit.encoding();

            let mut tree = unit.entries_tree(None)?;
            let root = tree.root()?;
            let root_entry = root.entry();

            let name = die_name(&dwarf, &unit, root_entry)?;
            let (low_pc, high_pc) = match root_entry.attr_value(gimli::DW_AT_low_pc)? {
                Some(gimli::AttributeValue::Addr(low)) => {
                    let high = resolve_high_pc(&unit, root_entry.attr(gimli::DW_AT_high_pc)?, low)?;
                    (low, high)
                }
                _ => (0, u64::MAX),
            };

            let mut subprograms = Vec::new();
            collect_subprograms(&dwarf, &unit, root, &mut subprograms)?;

            let line_table = collect_line_table(&dwarf, &unit)?;

            units.push(CompilationUnit {
                name,
                low_pc: DebugAddr(low_pc),
                high_pc: DebugAddr(high_pc),
                subprograms,
                line_table,
                encoding,
            });
        }

        let mut symbols = Vec::new();
        for sym in object.symbols() {
            if let Ok(name) = sym.name() {
                symbols.push(Symbol {
                    name: name.to_string(),
                    kind: object_symbol_kind(sym.kind()),
                    address: sym.address(),
                });
            }
        }
        for sym in object.dynamic_symbols() {
            if let Ok(name) = sym.name() {
                symbols.push(Symbol {
                    name: name.to_string(),
                    kind: object_symbol_kind(sym.kind()),
                    address: sym.address(),
                });
            }
        }

        Ok(DebugInfo { units, symbols, is_dynamic })
    }

    pub fn units(&self) -> &[CompilationUnit] {
        &self.units
    }

    /// Scan compilation units, then their subprograms, for the first whose
    /// pc-range contains `pc`. First match wins.
    pub fn function_at(&self, pc: DebugAddr) -> Result<&Subprogram> {
        for unit in &self.units {
            if !unit.contains(pc) {
                continue;
            }
            for sub in &unit.subprograms {
                if sub.contains(pc) {
                    return Ok(sub);
                }
            }
        }
        Err(anyhow!("Function not found"))
    }

    /// Find the enclosing compilation unit, then the line-table entry with
    /// the greatest address `<= pc` (invariant: no entry in the same unit
    /// has an address strictly between the result and `pc`).
    pub fn line_entry_at(&self, pc: DebugAddr) -> Result<&LineEntry> {
        for unit in &self.units {
            if !unit.contains(pc) {
                continue;
            }
            return unit
                .line_table
                .iter()
                .rev()
                .find(|e| e.address <= pc)
                .ok_or_else(|| anyhow!("Line table not found"));
        }
        Err(anyhow!("Line table not found"))
    }

    /// Index (within its unit's line table) of the line entry used above,
    /// needed by prologue-skipping breakpoint placement.
    fn line_index_at(&self, unit: &CompilationUnit, pc: DebugAddr) -> Option<usize> {
        unit.line_table
            .iter()
            .rposition(|e| e.address <= pc)
    }

    pub fn symbols_named(&self, name: &str) -> Vec<&Symbol> {
        self.symbols.iter().filter(|s| s.name == name).collect()
    }

    /// Low-pc of every subprogram named `name`, each advanced one
    /// line-table row to skip the prologue. All matches are instrumented
    /// (overloaded/duplicate names yield multiple targets).
    pub fn breakpoint_targets_for_function(&self, name: &str) -> Result<Vec<DebugAddr>> {
        let mut targets = Vec::new();
        for unit in &self.units {
            for sub in &unit.subprograms {
                if sub.name.as_deref() != Some(name) {
                    continue;
                }
                let idx = self
                    .line_index_at(unit, sub.low_pc)
                    .ok_or_else(|| anyhow!("Line table not found"))?;
                let target_idx = (idx + 1).min(unit.line_table.len() - 1);
                targets.push(unit.line_table[target_idx].address);
            }
        }
        if targets.is_empty() {
            return Err(anyhow!("Function not found"));
        }
        Ok(targets)
    }

    /// First line-table entry, in the first compilation unit whose name
    /// ends with `file_suffix`, marked `is_statement` whose **line number**
    /// equals `line`.
    ///
    /// Compares against the line-table entry's source line number, not its
    /// address — matching an address against a line number would almost
    /// never hit.
    pub fn breakpoint_target_for_source_line(&self, file_suffix: &str, line: u64) -> Result<DebugAddr> {
        for unit in &self.units {
            let matches_file = unit
                .name
                .as_deref()
                .map(|n| n.ends_with(file_suffix))
                .unwrap_or(false);
            if !matches_file {
                continue;
            }
            if let Some(entry) = unit
                .line_table
                .iter()
                .find(|e| e.is_stmt && e.line == line)
            {
                return Ok(entry.address);
            }
        }
        Err(anyhow!("Line table not found"))
    }
}

#[cfg(test)]
impl DebugInfo {
    /// Test-only constructor: assembles a `DebugInfo` directly from parts,
    /// bypassing ELF/DWARF parsing, so tests in other modules can build a
    /// fixture without a real executable on disk.
    pub(crate) fn from_parts(units: Vec<CompilationUnit>, symbols: Vec<Symbol>, is_dynamic: bool) -> Self {
        DebugInfo { units, symbols, is_dynamic }
    }
}

/// Context a location expression is evaluated against: live register
/// values (by DWARF number), the current PC in debug-info space, and a
/// bounded memory read (already translated to runtime space by the
/// caller).
pub trait LocationContext {
    fn register(&self, dwarf_number: u16) -> Result<u64>;
    fn pc(&self) -> DebugAddr;
    fn read_memory(&self, addr: u64, size: u8) -> Result<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation {
    Address(u64),
    Register(u32),
    Unsupported,
}

/// Evaluate a DWARF location expression against live tracee state.
/// Location forms other than a single static address or a single bare
/// register (literal, implicit-pointer, composite pieces, anything needing
/// call-frame information) are reported as `Unsupported` rather than
/// guessed at.
pub fn evaluate_location(
    expr: &[u8],
    encoding: gimli::Encoding,
    ctx: &dyn LocationContext,
) -> Result<VariableLocation> {
    let bytecode: Reader = EndianRcSlice::new(Rc::from(expr.to_vec().into_boxed_slice()), RunTimeEndian::Little);
    let mut eval = gimli::Evaluation::new(bytecode, encoding);
    let mut result = eval.evaluate()?;

    loop {
        result = match result {
            gimli::EvaluationResult::Complete => break,
            gimli::EvaluationResult::RequiresRegister { register, .. } => {
                let value = ctx.register(register.0)?;
                eval.resume_with_register(gimli::Value::Generic(value))?
            }
            gimli::EvaluationResult::RequiresMemory { address, size, .. } => {
                let value = ctx.read_memory(address, size)?;
                eval.resume_with_memory(gimli::Value::Generic(value))?
            }
            _ => return Ok(VariableLocation::Unsupported),
        };
    }

    let pieces = eval.result();
    let piece = pieces
        .first()
        .ok_or_else(|| anyhow!("empty location expression result"))?;

    Ok(match &piece.location {
        gimli::Location::Address { address } => VariableLocation::Address(*address),
        gimli::Location::Register { register } => VariableLocation::Register(register.0 as u32),
        _ => VariableLocation::Unsupported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(low: u64, high: u64, subs: Vec<Subprogram>, lines: Vec<LineEntry>) -> CompilationUnit {
        CompilationUnit {
            name: Some("main.c".to_string()),
            low_pc: DebugAddr(low),
            high_pc: DebugAddr(high),
            subprograms: subs,
            line_table: lines,
            encoding: gimli::Encoding {
                address_size: 8,
                format: gimli::Format::Dwarf32,
                version: 4,
            },
        }
    }

    fn sub(name: &str, low: u64, high: u64) -> Subprogram {
        Subprogram {
            name: Some(name.to_string()),
            low_pc: DebugAddr(low),
            high_pc: DebugAddr(high),
            variables: Vec::new(),
        }
    }

    fn line(addr: u64, l: u64, stmt: bool) -> LineEntry {
        LineEntry { address: DebugAddr(addr), file: Some("main.c".to_string()), line: l, is_stmt: stmt }
    }

    fn fixture() -> DebugInfo {
        let lines = vec![
            line(0x1000, 1, true),
            line(0x1004, 2, true),
            line(0x1008, 2, false),
            line(0x100c, 3, true),
        ];
        let cu = unit(0x1000, 0x2000, vec![sub("main", 0x1000, 0x1010)], lines);
        DebugInfo { units: vec![cu], symbols: vec![
            Symbol { name: "main".to_string(), kind: SymbolKind::Function, address: 0x1000 },
        ], is_dynamic: false }
    }

    #[test]
    fn function_at_finds_enclosing_subprogram() {
        let info = fixture();
        let f = info.function_at(DebugAddr(0x1004)).unwrap();
        assert_eq!(f.name.as_deref(), Some("main"));
    }

    #[test]
    fn function_at_reports_not_found_outside_range() {
        let info = fixture();
        assert!(info.function_at(DebugAddr(0xffff)).is_err());
    }

    #[test]
    fn line_entry_at_finds_nearest_entry_at_or_before_pc() {
        let info = fixture();
        let e = info.line_entry_at(DebugAddr(0x1006)).unwrap();
        assert_eq!(e.address.raw(), 0x1004);
        assert_eq!(e.line, 2);
    }

    #[test]
    fn line_entry_monotonicity() {
        // No line entry in the unit has an address strictly between the
        // resolved entry's address and the query pc.
        let info = fixture();
        let pc = DebugAddr(0x1009);
        let found = info.line_entry_at(pc).unwrap();
        for unit in info.units() {
            for e in &unit.line_table {
                if e.address > found.address {
                    assert!(e.address >= pc || e.address > pc);
                }
            }
        }
    }

    #[test]
    fn breakpoint_target_for_source_line_matches_by_line_number_not_address() {
        let info = fixture();
        // Line 2's address is 0x1004, deliberately different from the
        // numeric value 2 itself; a buggy address==line comparison would
        // never match here.
        let target = info.breakpoint_target_for_source_line("main.c", 2).unwrap();
        assert_eq!(target.raw(), 0x1004);
    }

    #[test]
    fn symbols_named_returns_all_matches_unordered_dedup() {
        let info = fixture();
        let matches = info.symbols_named("main");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].address, 0x1000);
        assert!(info.symbols_named("nonexistent").is_empty());
    }

    struct UnreachableContext;

    impl LocationContext for UnreachableContext {
        fn register(&self, _dwarf_number: u16) -> Result<u64> {
            unreachable!("this expression never needs a register's value")
        }

        fn pc(&self) -> DebugAddr {
            DebugAddr(0)
        }

        fn read_memory(&self, _addr: u64, _size: u8) -> Result<u64> {
            unreachable!("this expression never needs a memory read")
        }
    }

    fn x86_64_encoding() -> gimli::Encoding {
        gimli::Encoding { address_size: 8, format: gimli::Format::Dwarf32, version: 4 }
    }

    #[test]
    fn evaluate_location_resolves_a_static_address() {
        const DW_OP_ADDR: u8 = 0x03;
        let mut expr = vec![DW_OP_ADDR];
        expr.extend_from_slice(&0x0040_4040u64.to_le_bytes());

        let result = evaluate_location(&expr, x86_64_encoding(), &UnreachableContext).unwrap();
        assert_eq!(result, VariableLocation::Address(0x0040_4040));
    }

    #[test]
    fn evaluate_location_resolves_a_bare_register() {
        const DW_OP_REG0: u8 = 0x50;
        let expr = vec![DW_OP_REG0];

        let result = evaluate_location(&expr, x86_64_encoding(), &UnreachableContext).unwrap();
        assert_eq!(result, VariableLocation::Register(0));
    }
}
