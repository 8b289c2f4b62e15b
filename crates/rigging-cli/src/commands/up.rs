//! `rig up`: Create or update every resource of a stack.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use rigging_common::config::RiggingConfig;
use rigging_runtime::Engine;

use super::{ParamArgs, cancel_on_interrupt, load_stack};
use crate::output::{self, BOLD, DIM, RESET, YELLOW};

/// Arguments for the `up` command.
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Path to the .rig stack file.
    pub file: PathBuf,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Print secret outputs in plaintext.
    #[arg(long)]
    pub show_secrets: bool,
}

/// Executes the `up` command.
///
/// # Errors
///
/// Returns an error if the stack cannot be run, or a `PartialFailure`
/// if any resource did not complete.
pub async fn execute(args: UpArgs, config: RiggingConfig) -> anyhow::Result<()> {
    let start = Instant::now();
    let stack = load_stack(&args.file)?;
    let sources = args.params.sources()?;
    let engine = Engine::new(config);
    cancel_on_interrupt(&engine)?;

    eprintln!();
    eprintln!(
        "  {BOLD}rig up{RESET} {}  {DIM}{} resource(s){RESET}",
        stack.name(),
        stack.resources().len()
    );

    let outcome = engine.apply(&stack, &sources).await?;
    output::print_report(&outcome.report, start.elapsed());
    output::print_outputs(&outcome.outputs.values, args.show_secrets);
    for withheld in &outcome.outputs.withheld {
        eprintln!("    {YELLOW}withheld{RESET} {withheld}");
    }
    eprintln!();
    eprintln!("  {DIM}State: {}{RESET}", engine.state_path(stack.name()).display());

    match outcome.report.partial_failure() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
