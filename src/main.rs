use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{App, Arg};
use nix::sys::personality::{self, Persona};
use nix::unistd::{execvp, fork, ForkResult};
use rustyline::error::ReadlineError;
use rustyline::Editor;

mod address;
mod backtrace;
mod breakpoint;
mod breakpoints;
mod debugger;
mod dispatcher;
mod dwarf;
mod memory;
mod ptrace;
mod registers;
mod source;
mod stepping;
mod supervisor;
mod variable;

use debugger::Debugger;

const HISTORY_FILE: &str = ".rdbg_history";

fn app<'a, 'b>() -> App<'a, 'b> {
    App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("program")
                .help("The executable to debug")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("program-args")
                .help("Arguments to pass to the debuggee")
                .raw(true),
        )
        .arg(
            Arg::with_name("no-aslr")
                .help("Do not disable address-space layout randomization on the tracee")
                .short("A")
                .long("no-aslr"),
        )
        .arg(
            Arg::with_name("verbose")
                .help("Increase log verbosity (repeatable)")
                .short("v")
                .long("verbose")
                .multiple(true),
        )
}

/// Runs only in the forked child, before `execvp`. Disables ASLR (unless
/// suppressed), requests to be traced, then execs the target with no
/// arguments of its own beyond what the user passed through.
fn run_target(program: &Path, args: &[String], disable_aslr: bool) -> Result<()> {
    if disable_aslr {
        let current = personality::get().context("could not read personality")?;
        personality::set(current | Persona::ADDR_NO_RANDOMIZE)
            .context("could not disable ASLR")?;
    }

    ptrace::traceme()?;

    let program_cstr =
        CString::new(program.as_os_str().to_string_lossy().into_owned()).context("program path contains a NUL byte")?;
    let mut argv = vec![program_cstr.clone()];
    for arg in args {
        argv.push(CString::new(arg.as_str()).context("argument contains a NUL byte")?);
    }

    execvp(&program_cstr, &argv).context("execvp failed")?;
    unreachable!("execvp only returns on error, which is handled above");
}

fn run() -> Result<()> {
    let matches = app().get_matches();

    let verbosity = matches.occurrences_of("verbose");
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let program = PathBuf::from(matches.value_of("program").expect("program is required"));
    let program_args: Vec<String> = matches
        .values_of("program-args")
        .map(|v| v.map(str::to_owned).collect())
        .unwrap_or_default();
    let disable_aslr = !matches.is_present("no-aslr");

    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Child => {
            // Any error here must terminate the child; there is no
            // debugger loop to report back to.
            if let Err(e) = run_target(&program, &program_args, disable_aslr) {
                eprintln!("Fatal: {:#}", e);
                process::exit(1);
            }
            unreachable!();
        }
        ForkResult::Parent { child } => {
            let mut dbg = Debugger::new(&program, child)?;

            let mut rl: Editor<()> = Editor::new().context("could not create line editor")?;
            let _ = rl.load_history(HISTORY_FILE);

            while dbg.running {
                match rl.readline("(rdbg) ") {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = rl.add_history_entry(line.as_str());
                            dispatcher::run_line(&mut dbg, &line);
                        }
                    }
                    Err(ReadlineError::Interrupted) => continue,
                    Err(ReadlineError::Eof) => break,
                    Err(e) => {
                        eprintln!("readline error: {}", e);
                        break;
                    }
                }
            }

            let _ = rl.save_history(HISTORY_FILE);
            Ok(())
        }
    }
}

fn main() {
    match run() {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            process::exit(1);
        }
    }
}
