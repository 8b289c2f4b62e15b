//! Persistent per-stack state.
//!
//! One JSON document per stack records what the last runs created: each
//! resource's attributes (with secret flags), its configuration
//! fingerprint, and the last exported outputs. The file holds secret
//! values in plaintext, so it is written with owner-only permissions.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;
use rigging_common::types::{ResourceKind, RunId};
use rigging_common::value::Value;
use serde::{Deserialize, Serialize};

use crate::executor::Prior;
use crate::provider::Attributes;

/// A persisted value with its secret flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Plaintext value.
    pub value: Value,
    /// Whether the value must be redacted when displayed.
    #[serde(default)]
    pub secret: bool,
}

impl From<&Sensitive<Value>> for StoredValue {
    fn from(v: &Sensitive<Value>) -> Self {
        Self {
            value: v.expose().clone(),
            secret: v.is_secret(),
        }
    }
}

impl From<&StoredValue> for Sensitive<Value> {
    fn from(v: &StoredValue) -> Self {
        Self::new(v.value.clone(), v.secret)
    }
}

/// Persisted record of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Attributes returned by the last successful create or update.
    pub attributes: BTreeMap<String, StoredValue>,
    /// SHA-256 of the evaluated configuration.
    pub fingerprint: Option<String>,
    /// When the record was written.
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    /// Builds a record from run results.
    #[must_use]
    pub fn new(kind: ResourceKind, attributes: &Attributes, fingerprint: Option<String>) -> Self {
        Self {
            kind,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.clone(), StoredValue::from(v)))
                .collect(),
            fingerprint,
            updated_at: Utc::now(),
        }
    }

    /// Attributes as sensitive values.
    #[must_use]
    pub fn attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .map(|(k, v)| (k.clone(), Sensitive::from(v)))
            .collect()
    }
}

/// Persisted state of one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    /// Stack name.
    pub stack: String,
    /// Identifier of the last run that wrote this state.
    #[serde(default)]
    pub last_run: Option<RunId>,
    /// Resources by name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Last exported outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, StoredValue>,
}

impl StackState {
    /// Creates empty state for `stack`.
    #[must_use]
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..Self::default()
        }
    }

    /// Recorded resources in the form the executor consumes.
    #[must_use]
    pub fn priors(&self) -> BTreeMap<String, Prior> {
        self.resources
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    Prior {
                        attributes: Arc::new(state.attributes()),
                        fingerprint: state.fingerprint.clone(),
                    },
                )
            })
            .collect()
    }
}

/// Loads stack state, or empty state if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_state(path: &Path, stack: &str) -> Result<StackState> {
    tracing::debug!(path = %path.display(), "loading state");
    if !path.exists() {
        return Ok(StackState::new(stack));
    }
    let content = std::fs::read_to_string(path).map_err(|e| RiggingError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let state: StackState = serde_json::from_str(&content)?;
    Ok(state)
}

/// Persists stack state atomically: the document is written to a sibling
/// temporary file, flushed, and renamed over `path`.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save_state(path: &Path, state: &StackState) -> Result<()> {
    tracing::debug!(path = %path.display(), resources = state.resources.len(), "saving state");
    let io_err = |e: std::io::Error| RiggingError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
    }

    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut options = std::fs::OpenOptions::new();
        let _ = options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let _ = options.mode(0o600);
        }
        let mut file = options.open(&tmp).map_err(io_err)?;
        // a leftover temporary file keeps its old mode through open
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
