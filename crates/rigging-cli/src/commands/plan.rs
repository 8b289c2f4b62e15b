//! `rig plan`: Show the batches an apply or destroy would run.

use std::path::PathBuf;

use clap::Args;
use rigging_common::config::RiggingConfig;
use rigging_common::types::PlanKind;
use rigging_runtime::{Engine, ProviderSet};

use super::load_stack;
use crate::output::{BOLD, DIM, RESET, plan_marker};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the .rig stack file.
    pub file: PathBuf,

    /// Show the destroy plan instead of the apply plan.
    #[arg(long)]
    pub destroy: bool,

    /// Print the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// Nothing is evaluated or called; recorded state only decides whether a
/// resource would be created or updated.
///
/// # Errors
///
/// Returns an error if the stack is invalid or its state unreadable.
pub fn execute(args: PlanArgs, config: RiggingConfig) -> anyhow::Result<()> {
    let stack = load_stack(&args.file)?;
    let kind = if args.destroy {
        PlanKind::Destroy
    } else {
        PlanKind::Apply
    };
    let engine = Engine::with_providers(config, ProviderSet::new());
    let plan = engine.plan(&stack, kind)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let state = engine.state(stack.name())?;
    println!("{BOLD}{kind} plan for {}{RESET} {DIM}({}){RESET}", stack.name(), args.file.display());
    println!();
    for (index, batch) in plan.batches().iter().enumerate() {
        println!("  {DIM}batch {}{RESET}", index + 1);
        for step in batch {
            let (marker, _) = plan_marker(kind, state.resources.contains_key(&step.name));
            let after = if step.waits_on.is_empty() {
                String::new()
            } else {
                format!(" {DIM}after {}{RESET}", step.waits_on.join(", "))
            };
            println!("    {marker} {BOLD}{}{RESET} {DIM}{}{RESET}{after}", step.name, step.kind);
        }
    }

    println!();
    let mut counts = [0usize; 3];
    for step in plan.steps() {
        let (_, verb) = plan_marker(kind, state.resources.contains_key(&step.name));
        let slot = match verb {
            "create" => 0,
            "update" => 1,
            _ => 2,
        };
        counts[slot] += 1;
    }
    println!(
        "  {} to create, {} to update, {} to delete, in {} batch(es).",
        counts[0],
        counts[1],
        counts[2],
        plan.batches().len()
    );
    if !stack.outputs().is_empty() {
        let names: Vec<&str> = stack.outputs().iter().map(|o| o.name.as_str()).collect();
        println!("  Outputs: {}", names.join(", "));
    }
    Ok(())
}
