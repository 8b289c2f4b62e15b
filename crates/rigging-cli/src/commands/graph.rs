//! `rig graph`: Print the dependency graph in Graphviz DOT format.

use std::path::PathBuf;

use clap::Args;

use super::load_stack;

/// Arguments for the `graph` command.
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Path to the .rig stack file.
    pub file: PathBuf,
}

/// Executes the `graph` command.
///
/// # Errors
///
/// Returns an error if the stack is invalid.
pub fn execute(args: &GraphArgs) -> anyhow::Result<()> {
    let stack = load_stack(&args.file)?;
    print!("{}", stack.graph().to_dot());
    Ok(())
}
