//! `rig outputs`: Print the outputs recorded by the last apply.

use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use rigging_common::config::RiggingConfig;
use rigging_common::constants::stack_name;
use rigging_runtime::{Engine, ProviderSet};

use crate::output::{self, DIM, RESET, display_value, value_json};

/// Arguments for the `outputs` command.
#[derive(Args, Debug)]
pub struct OutputsArgs {
    /// Stack file or stack name.
    pub stack: PathBuf,

    /// Print only this output's value.
    pub name: Option<String>,

    /// Print secret outputs in plaintext.
    #[arg(long)]
    pub show_secrets: bool,

    /// Print outputs as a JSON object.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `outputs` command.
///
/// # Errors
///
/// Returns an error if state cannot be read or the named output does not
/// exist.
pub fn execute(args: OutputsArgs, config: RiggingConfig) -> anyhow::Result<()> {
    let stack = stack_name(&args.stack);
    let engine = Engine::with_providers(config, ProviderSet::new());
    let values = engine.outputs(&stack)?;

    if let Some(name) = &args.name {
        let Some(value) = values.get(name) else {
            bail!("stack {stack} has no recorded output \"{name}\"");
        };
        if args.json {
            println!("{}", value_json(value, args.show_secrets));
        } else {
            println!("{}", display_value(value, args.show_secrets));
        }
        return Ok(());
    }

    if args.json {
        let object: serde_json::Map<String, serde_json::Value> = values
            .iter()
            .map(|(k, v)| (k.clone(), value_json(v, args.show_secrets)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&object)?);
    } else if values.is_empty() {
        eprintln!("  {DIM}No outputs recorded for {stack}.{RESET}");
    } else {
        output::print_outputs(&values, args.show_secrets);
    }
    Ok(())
}
