//! CLI command definitions and dispatch.

pub mod destroy;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod up;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rigging_common::config::RiggingConfig;
use rigging_common::constants::DEFAULT_CONFIG_FILE;
use rigging_compose::Stack;
use rigging_runtime::Engine;
use rigging_runtime::params::ParamSources;

use crate::output::{RESET, YELLOW};

/// rig: desired-state resource stacks.
#[derive(Parser, Debug)]
#[command(name = "rig", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./rigging.yaml when present).
    #[arg(long, global = true, env = "RIGGING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding per-stack state files.
    #[arg(long, global = true, env = "RIGGING_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Maximum number of resource operations running at once.
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,

    /// Log progress at info level (`RUST_LOG` takes precedence).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the batches an apply or destroy would run.
    Plan(plan::PlanArgs),
    /// Create or update every resource of a stack.
    Up(up::UpArgs),
    /// Delete every resource of a stack, dependents first.
    Destroy(destroy::DestroyArgs),
    /// Print the outputs recorded by the last apply.
    Outputs(outputs::OutputsArgs),
    /// Print the dependency graph in Graphviz DOT format.
    Graph(graph::GraphArgs),
}

/// Parameter sources shared by commands that evaluate a stack.
#[derive(Args, Debug, Default)]
pub struct ParamArgs {
    /// Parameter value, repeatable.
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// YAML file mapping parameter names to values.
    #[arg(long, value_name = "FILE")]
    pub params_file: Option<PathBuf>,
}

impl ParamArgs {
    /// Flags first, then `RIGGING_PARAM_*` variables, then the file.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed `--param` or unreadable file.
    pub fn sources(&self) -> anyhow::Result<ParamSources> {
        let mut sources = ParamSources::new().with_process_env();
        if let Some(path) = &self.params_file {
            sources = sources.with_file(path)?;
        }
        for pair in &self.params {
            sources = sources.with_override(pair)?;
        }
        Ok(sources)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Plan(args) => plan::execute(args, config),
        Command::Up(args) => up::execute(args, config).await,
        Command::Destroy(args) => destroy::execute(args, config).await,
        Command::Outputs(args) => outputs::execute(args, config),
        Command::Graph(args) => graph::execute(&args),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RiggingConfig> {
    let mut config = match &cli.config {
        Some(path) => RiggingConfig::load(path)?,
        None => RiggingConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    if let Some(dir) = &cli.state_dir {
        config.state_dir.clone_from(dir);
    }
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    config.validate()?;
    tracing::debug!(state_dir = %config.state_dir.display(), jobs = config.jobs, "configuration loaded");
    Ok(config)
}

/// Loads and checks a stack file.
///
/// # Errors
///
/// Returns an error naming the file if it cannot be read or is invalid.
pub fn load_stack(path: &Path) -> anyhow::Result<Stack> {
    Stack::from_file(path).with_context(|| format!("failed to load stack {}", path.display()))
}

/// Cancels the engine's run on Ctrl+C. Operations already started are
/// allowed to finish.
///
/// # Errors
///
/// Returns an error if the handler cannot be installed.
pub fn cancel_on_interrupt(engine: &Engine) -> anyhow::Result<()> {
    let flag = engine.cancel_flag();
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            eprintln!();
            eprintln!("  {YELLOW}Interrupted:{RESET} waiting for running operations, no new ones will start.");
        }
    })
    .context("failed to set Ctrl+C handler")
}
