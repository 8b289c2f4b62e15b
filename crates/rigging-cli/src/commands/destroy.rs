//! `rig destroy`: Delete every resource of a stack, dependents first.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use rigging_common::config::RiggingConfig;
use rigging_runtime::Engine;

use super::{ParamArgs, cancel_on_interrupt, load_stack};
use crate::output::{self, BOLD, DIM, RESET};

/// Arguments for the `destroy` command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Path to the .rig stack file.
    pub file: PathBuf,

    #[command(flatten)]
    pub params: ParamArgs,
}

/// Executes the `destroy` command.
///
/// # Errors
///
/// Returns an error if the stack cannot be run, or a `PartialFailure`
/// if any resource was not deleted.
pub async fn execute(args: DestroyArgs, config: RiggingConfig) -> anyhow::Result<()> {
    let start = Instant::now();
    let stack = load_stack(&args.file)?;
    let sources = args.params.sources()?;
    let engine = Engine::new(config);
    cancel_on_interrupt(&engine)?;

    let recorded = engine.state(stack.name())?.resources.len();
    eprintln!();
    eprintln!(
        "  {BOLD}rig destroy{RESET} {}  {DIM}{recorded} recorded resource(s){RESET}",
        stack.name()
    );

    let report = engine.destroy(&stack, &sources).await?;
    output::print_report(&report, start.elapsed());

    match report.partial_failure() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
