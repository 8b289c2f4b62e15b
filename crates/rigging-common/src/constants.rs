//! System-wide constants and default paths.

use std::path::{Path, PathBuf};

/// Default directory (relative to the working directory) for run state.
pub const DEFAULT_STATE_DIR: &str = ".rigging";

/// Default engine configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "rigging.yaml";

/// File extension for Rigging stack files.
pub const STACK_EXTENSION: &str = ".rig";

/// Suffix of per-stack state files inside the state directory.
pub const STATE_FILE_SUFFIX: &str = ".state.json";

/// Prefix of environment variables that supply stack parameters.
pub const PARAM_ENV_PREFIX: &str = "RIGGING_PARAM_";

/// Environment variable carrying a shell command's recorded create output
/// into its delete command.
pub const CREATE_STDOUT_ENV: &str = "RIGGING_CREATE_STDOUT";

/// Default number of concurrently executing resource operations.
pub const DEFAULT_JOBS: usize = 4;

/// Default base URL of the managed Kubernetes cloud API.
pub const DEFAULT_CLOUD_API_BASE: &str = "https://api.digitalocean.com";

/// Default base URL of the model-key issuance API.
pub const DEFAULT_MODEL_API_BASE: &str = "https://api.digitalocean.com/v2/gen-ai";

/// Default node pool name for managed clusters.
pub const DEFAULT_NODE_POOL_NAME: &str = "default-pool";

/// Name reserved for parameter references in interpolations (`${config.x}`).
pub const CONFIG_NAMESPACE: &str = "config";

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "rigging";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "rig";

/// Returns the stack name for a stack file path (its file stem).
#[must_use]
pub fn stack_name(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "stack".to_string(), |s| s.to_string_lossy().into_owned())
}

/// Returns the state file path for a stack inside `state_dir`.
#[must_use]
pub fn state_file(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(format!("{stack}{STATE_FILE_SUFFIX}"))
}
