//! Parses one input line and invokes the right core operation.
//!
//! Dispatch is data, not a cascade of `if is_prefix(...)`: `COMMANDS` is a
//! table of `(name, handler)` pairs, and the first token of the input line
//! is matched against it by non-empty prefix. Ties are resolved by table
//! order (first match wins), which also gives a stable, documented
//! disambiguation rule for prefixes that are ambiguous between two
//! commands (e.g. a bare `s` could mean `stepinst` or `step`; table order
//! decides).

use anyhow::{anyhow, Result};

use crate::backtrace::backtrace;
use crate::debugger::Debugger;
use crate::stepping;
use crate::variable;

struct CommandSpec {
    name: &'static str,
    handler: fn(&mut Debugger, &[&str]) -> Result<()>,
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "continue", handler: cmd_continue },
    CommandSpec { name: "break", handler: cmd_break },
    CommandSpec { name: "register", handler: cmd_register },
    CommandSpec { name: "memory", handler: cmd_memory },
    CommandSpec { name: "stepinst", handler: cmd_stepinst },
    CommandSpec { name: "step", handler: cmd_step },
    CommandSpec { name: "next", handler: cmd_next },
    CommandSpec { name: "finish", handler: cmd_finish },
    CommandSpec { name: "symbol", handler: cmd_symbol },
    CommandSpec { name: "backtrace", handler: cmd_backtrace },
    CommandSpec { name: "variables", handler: cmd_variables },
    CommandSpec { name: "help", handler: cmd_help },
    CommandSpec { name: "quit", handler: cmd_quit },
];

/// Split on whitespace and dispatch the first token, by prefix, to a
/// `CommandSpec`. Returns `Ok(())` having printed a diagnostic on malformed
/// or unknown input, matching the propagation policy: the dispatcher is
/// the unwind boundary, and the caller always returns to the prompt.
pub fn run_line(dbg: &mut Debugger, line: &str) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((head, rest)) = tokens.split_first() else {
        return;
    };

    match find_command(head) {
        Some(spec) => {
            if let Err(e) = (spec.handler)(dbg, rest) {
                eprintln!("{:#}", e);
            }
        }
        None => {
            eprintln!("No command found!!");
        }
    }
}

fn find_command(token: &str) -> Option<&'static CommandSpec> {
    if token.is_empty() {
        return None;
    }
    COMMANDS.iter().find(|c| c.name.starts_with(token))
}

fn cmd_continue(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    dbg.continue_execution()
}

fn parse_hex(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| anyhow!("malformed hex literal {:?}: {}", s, e))
}

fn cmd_break(dbg: &mut Debugger, args: &[&str]) -> Result<()> {
    let target = args.first().ok_or_else(|| anyhow!("break requires a target"))?;

    if let Some(hex) = target.strip_prefix("0x") {
        let addr = u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow!("malformed address {:?}: {}", target, e))?;
        return dbg.set_breakpoint_at_runtime_address(crate::address::RuntimeAddr(addr));
    }

    if let Some((file, line)) = target.rsplit_once(':') {
        let line: u64 = line
            .parse()
            .map_err(|e| anyhow!("malformed line number {:?}: {}", line, e))?;
        return dbg.set_breakpoint_at_source_line(file, line);
    }

    dbg.set_breakpoint_at_function(target)
}

fn cmd_register(dbg: &mut Debugger, args: &[&str]) -> Result<()> {
    match args {
        ["dump"] => dbg.dump_registers(),
        ["read", name] => {
            println!("{}", dbg.read_register(name)?);
            Ok(())
        }
        ["write", name, value] => {
            let value = parse_hex(value)?;
            dbg.write_register(name, value)
        }
        _ => Err(anyhow!("usage: register dump | register read <name> | register write <name> 0x<hex>")),
    }
}

fn cmd_memory(dbg: &mut Debugger, args: &[&str]) -> Result<()> {
    match args {
        ["read", addr] => {
            let addr = parse_hex(addr)?;
            println!("READ: {}", dbg.read_memory(addr)?);
            Ok(())
        }
        ["write", addr, value] => {
            let addr = parse_hex(addr)?;
            let value = parse_hex(value)?;
            dbg.write_memory(addr, value)
        }
        _ => Err(anyhow!("usage: memory read 0x<hex> | memory write 0x<hex> 0x<hex>")),
    }
}

fn cmd_stepinst(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    stepping::single_step_with_breakpoint_check(dbg)
}

fn cmd_step(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    stepping::step_in(dbg)
}

fn cmd_next(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    stepping::step_over(dbg)
}

fn cmd_finish(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    stepping::step_out(dbg)
}

fn cmd_symbol(dbg: &mut Debugger, args: &[&str]) -> Result<()> {
    let name = args.first().ok_or_else(|| anyhow!("symbol requires a name"))?;
    for line in dbg.symbol(name) {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_backtrace(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    for frame in backtrace(dbg)? {
        println!("#{}: {} ({})", frame.index, frame.name, frame.func_low_pc);
    }
    Ok(())
}

fn cmd_variables(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    for var in variable::enumerate_variables(dbg)? {
        println!("{}", variable::describe(dbg, &var));
    }
    Ok(())
}

fn cmd_help(_dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    for spec in COMMANDS {
        println!("  {}", spec.name);
    }
    Ok(())
}

fn cmd_quit(dbg: &mut Debugger, _args: &[&str]) -> Result<()> {
    dbg.running = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_nonempty_prefix_of_a_canonical_name_dispatches() {
        assert_eq!(find_command("c").unwrap().name, "continue");
        assert_eq!(find_command("cont").unwrap().name, "continue");
        assert_eq!(find_command("continue").unwrap().name, "continue");
        assert_eq!(find_command("b").unwrap().name, "break");
        assert_eq!(find_command("bt").is_none(), true);
        assert_eq!(find_command("backtrace").unwrap().name, "backtrace");
    }

    #[test]
    fn empty_token_matches_nothing() {
        assert!(find_command("").is_none());
    }

    #[test]
    fn ambiguous_prefix_resolves_to_first_table_entry() {
        // "s" is a prefix of both "stepinst" and "step"; table order (as
        // listed in COMMANDS) breaks the tie in favor of "stepinst".
        assert_eq!(find_command("s").unwrap().name, "stepinst");
    }

    #[test]
    fn unknown_command_is_reported_not_panicked() {
        assert!(find_command("zzz").is_none());
    }

    #[test]
    fn parse_hex_accepts_prefixed_and_bare_forms() {
        assert_eq!(parse_hex("0xff").unwrap(), 0xff);
        assert_eq!(parse_hex("ff").unwrap(), 0xff);
        assert!(parse_hex("not-hex").is_err());
    }
}
