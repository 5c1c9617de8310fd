//! Frame-pointer-chain backtrace walker.
//!
//! Assumes the standard `rbp`-preserving calling convention; a binary
//! compiled without frame pointers produces undefined results here (the
//! call-frame-information-based alternative is a known future direction,
//! noted but not implemented — see DESIGN.md).

use anyhow::Result;

use crate::address::RuntimeAddr;
use crate::debugger::Debugger;
use crate::registers::Register;

#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub func_low_pc: RuntimeAddr,
    pub name: String,
}

/// Walk the frame-pointer chain starting at the current PC, emitting one
/// frame per call site, terminating once a frame named `main` is emitted
/// (or the chain runs out, defensively, since a non-frame-pointer binary
/// would otherwise walk forever).
pub fn backtrace(dbg: &Debugger) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();

    let mut pc = dbg.pc()?;
    let mut frame_pointer = dbg.registers().read(Register::Rbp)?;

    loop {
        let debug_pc = dbg.load_address.to_debug(pc);
        let function = match dbg.debug_info.function_at(debug_pc) {
            Ok(f) => f,
            Err(_) => break,
        };

        let name = function.name.clone().unwrap_or_else(|| "??".to_string());
        let low_pc = dbg.load_address.to_runtime(function.low_pc);

        frames.push(Frame {
            index: frames.len(),
            func_low_pc: low_pc,
            name: name.clone(),
        });

        if name == "main" {
            break;
        }

        if frame_pointer == 0 {
            break;
        }

        let return_address = dbg.read_memory(frame_pointer + 8)?;
        let next_frame_pointer = dbg.read_memory(frame_pointer)?;

        pc = RuntimeAddr(return_address);
        frame_pointer = next_frame_pointer;

        if frames.len() > 1024 {
            // A corrupted or non-frame-pointer chain could otherwise loop
            // forever; 1024 frames is far beyond any real call stack.
            break;
        }
    }

    Ok(frames)
}
