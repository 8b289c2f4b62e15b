//! Domain primitive types used across the Rigging workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RiggingError;

/// Unique identifier for one apply or destroy run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Creates a run ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a declared resource.
///
/// Each kind has its own typed configuration and its own provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A managed Kubernetes cluster.
    Cluster,
    /// A Kubernetes namespace.
    Namespace,
    /// A Kubernetes secret.
    Secret,
    /// A Helm chart release.
    HelmRelease,
    /// A typed custom object in the cluster-side store.
    CustomResource,
    /// A Kubernetes deployment.
    Deployment,
    /// A pair of imperative create/delete shell commands.
    ShellCommand,
    /// A model access key issued over the model-key HTTP API.
    ModelKey,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Cluster,
        Self::Namespace,
        Self::Secret,
        Self::HelmRelease,
        Self::CustomResource,
        Self::Deployment,
        Self::ShellCommand,
        Self::ModelKey,
    ];

    /// Returns the keyword used for this kind in stack files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::HelmRelease => "HelmRelease",
            Self::CustomResource => "CustomResource",
            Self::Deployment => "Deployment",
            Self::ShellCommand => "ShellCommand",
            Self::ModelKey => "ModelKey",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = RiggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RiggingError::Parse {
                message: format!(
                    "unknown resource kind \"{s}\" (expected one of: {})",
                    Self::ALL.map(Self::as_str).join(", ")
                ),
            })
    }
}

/// An operation performed on a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// First-time creation.
    Create,
    /// Convergence of a previously created resource.
    Update,
    /// Removal.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Direction of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanKind {
    /// Create or update every resource, dependencies first.
    Apply,
    /// Delete every resource, dependents first.
    Destroy,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}
