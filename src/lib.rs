//! ravel: a module-linking bytecode virtual machine.
//!
//! A tree of independently compiled module files is loaded, linked into one
//! resolved [`ProgramContext`], statically validated for stack safety, and
//! then interpreted. The pipeline is loader -> linker -> validator ->
//! interpreter; [`run`] wires the whole thing together.

use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;

pub mod emit;
pub mod interp;
pub mod linker;
pub mod loader;
pub mod opcode;
pub mod program;
pub mod sample;
pub mod validator;
pub mod value;

pub use interp::{execute, VmError};
pub use linker::{link, LinkError};
pub use program::ProgramContext;
pub use validator::ValidateError;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// Outcome of a successful run: the program's exit code and how long
/// execution took, measured from entry to exit (linking excluded).
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub code: i32,
    pub elapsed: Duration,
}

/// Links the module tree at `root` and executes it.
pub fn run(root: &Path) -> Result<RunReport, RunError> {
    let mut ctx = linker::link(root)?;
    let started = Instant::now();
    let code = interp::execute(&mut ctx)?;
    Ok(RunReport {
        code,
        elapsed: started.elapsed(),
    })
}
