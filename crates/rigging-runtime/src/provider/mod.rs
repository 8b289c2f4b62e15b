//! Resource providers.
//!
//! A provider performs the external create, update, and delete calls for
//! one or more resource kinds. Providers receive fully evaluated
//! configuration and return the attributes dependents may reference.

pub mod cluster;
pub mod helm;
pub mod http;
pub mod kubectl;
pub mod model_key;
pub mod shell;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rigging_common::config::RiggingConfig;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;
use rigging_common::types::{Operation, ResourceKind};
use rigging_common::value::Value;
use rigging_compose::schema::ResourceConfig;

use crate::retry::RetryPolicy;

/// Attributes recorded for a resource after a successful operation.
pub type Attributes = BTreeMap<String, Sensitive<Value>>;

/// Resource configuration with every expression evaluated.
pub type EvaluatedConfig = ResourceConfig<Sensitive<Value>>;

/// Everything a provider needs for one operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationContext<'a> {
    /// Logical resource name.
    pub name: &'a str,
    /// Evaluated configuration.
    pub config: &'a EvaluatedConfig,
    /// Attributes recorded by the previous successful run, if any.
    pub prior: Option<&'a Attributes>,
}

impl OperationContext<'_> {
    /// Returns a prior attribute as text.
    #[must_use]
    pub fn prior_text(&self, key: &str) -> Option<String> {
        self.prior
            .and_then(|attrs| attrs.get(key))
            .and_then(|v| v.expose().as_str().map(str::to_string))
    }

    /// Builds an `InvalidResource` error for this resource.
    #[must_use]
    pub fn invalid(&self, message: impl Into<String>) -> RiggingError {
        RiggingError::InvalidResource {
            resource: self.name.to_string(),
            message: message.into(),
        }
    }

    /// Builds an `InvalidResource` error for a configuration of the wrong kind.
    #[must_use]
    pub fn wrong_kind(&self, provider: &str) -> RiggingError {
        self.invalid(format!(
            "{} configuration passed to the {provider} provider",
            self.config.kind()
        ))
    }
}

/// External adapter for resource operations.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns whether `operation` may be retried after a transient failure.
    fn retry_safe(&self, operation: Operation, config: &EvaluatedConfig) -> bool;

    /// Returns whether an update with an unchanged configuration can reuse
    /// the prior attributes without calling out.
    fn skip_unchanged(&self) -> bool {
        false
    }

    /// Creates the resource.
    async fn create(&self, ctx: &OperationContext<'_>) -> Result<Attributes>;

    /// Converges a previously created resource. Defaults to an upsert.
    async fn update(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        self.create(ctx).await
    }

    /// Deletes the resource. Deleting an absent resource succeeds.
    async fn delete(&self, ctx: &OperationContext<'_>) -> Result<()>;
}

/// Providers by resource kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<ResourceKind, Arc<dyn Provider>>,
}

impl ProviderSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, kind: ResourceKind, provider: Arc<dyn Provider>) -> Self {
        let _ = self.providers.insert(kind, provider);
        self
    }

    /// The providers backed by the real external systems.
    #[must_use]
    pub fn standard(config: &RiggingConfig) -> Self {
        let kube = kubectl::KubeAccess::from_config(config);
        let kubectl: Arc<dyn Provider> =
            Arc::new(kubectl::KubectlProvider::new(config.kubectl.clone(), kube.clone()));
        Self::new()
            .with(
                ResourceKind::Cluster,
                Arc::new(
                    cluster::ClusterProvider::new(
                        config.cluster_poll_interval(),
                        config.cluster_ready_timeout(),
                    )
                    .with_read_retry(RetryPolicy::from(&config.retry)),
                ),
            )
            .with(ResourceKind::Namespace, Arc::clone(&kubectl))
            .with(ResourceKind::Secret, Arc::clone(&kubectl))
            .with(ResourceKind::CustomResource, Arc::clone(&kubectl))
            .with(ResourceKind::Deployment, kubectl)
            .with(
                ResourceKind::HelmRelease,
                Arc::new(helm::HelmProvider::new(config.helm.clone(), kube)),
            )
            .with(ResourceKind::ShellCommand, Arc::new(shell::ShellProvider))
            .with(ResourceKind::ModelKey, Arc::new(model_key::ModelKeyProvider::new()))
    }

    /// Returns the provider for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::NotFound` if no provider is registered.
    pub fn get(&self, kind: ResourceKind) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| RiggingError::NotFound {
                kind: "provider",
                id: kind.to_string(),
            })
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.providers.keys().collect();
        kinds.sort();
        f.debug_struct("ProviderSet").field("kinds", &kinds).finish()
    }
}

/// A plain attribute value.
pub fn plain(value: impl Into<Value>) -> Sensitive<Value> {
    Sensitive::plain(value.into())
}

/// Reads a scalar field as text. Integers and booleans are rendered.
///
/// # Errors
///
/// Returns `RiggingError::InvalidResource` for null, list, or map values.
pub fn text(ctx: &OperationContext<'_>, key: &str, value: &Sensitive<Value>) -> Result<Sensitive<String>> {
    match value.expose() {
        Value::String(_) | Value::Integer(_) | Value::Bool(_) | Value::Float(_) => {
            Ok(value.as_ref().map(Value::render))
        }
        other => Err(ctx.invalid(format!(
            "key \"{key}\" expects a string, got {}",
            other.type_name()
        ))),
    }
}

/// [`text`] for an optional field.
///
/// # Errors
///
/// See [`text`].
pub fn opt_text(
    ctx: &OperationContext<'_>,
    key: &str,
    value: Option<&Sensitive<Value>>,
) -> Result<Option<Sensitive<String>>> {
    value.map(|v| text(ctx, key, v)).transpose()
}

/// Reads an integer field.
///
/// # Errors
///
/// Returns `RiggingError::InvalidResource` if the value is not an integer.
pub fn integer(ctx: &OperationContext<'_>, key: &str, value: &Sensitive<Value>) -> Result<i64> {
    value.expose().as_integer().ok_or_else(|| {
        ctx.invalid(format!(
            "key \"{key}\" expects an integer, got {}",
            value.expose().type_name()
        ))
    })
}

/// Reads an optional boolean field, falling back to `default`.
///
/// # Errors
///
/// Returns `RiggingError::InvalidResource` if the value is not a boolean.
pub fn flag(
    ctx: &OperationContext<'_>,
    key: &str,
    value: Option<&Sensitive<Value>>,
    default: bool,
) -> Result<bool> {
    value.map_or(Ok(default), |v| {
        v.expose().as_bool().ok_or_else(|| {
            ctx.invalid(format!(
                "key \"{key}\" expects a bool, got {}",
                v.expose().type_name()
            ))
        })
    })
}

/// Reads a map field.
///
/// # Errors
///
/// Returns `RiggingError::InvalidResource` if the value is not a map.
pub fn map(
    ctx: &OperationContext<'_>,
    key: &str,
    value: &Sensitive<Value>,
) -> Result<Sensitive<BTreeMap<String, Value>>> {
    match value.expose() {
        Value::Map(entries) => Ok(Sensitive::new(entries.clone(), value.is_secret())),
        Value::Null => Ok(Sensitive::new(BTreeMap::new(), value.is_secret())),
        other => Err(ctx.invalid(format!(
            "key \"{key}\" expects a map, got {}",
            other.type_name()
        ))),
    }
}

/// [`map`] for an optional field; unset is empty.
///
/// # Errors
///
/// See [`map`].
pub fn opt_map(
    ctx: &OperationContext<'_>,
    key: &str,
    value: Option<&Sensitive<Value>>,
) -> Result<Sensitive<BTreeMap<String, Value>>> {
    value.map_or_else(|| Ok(Sensitive::plain(BTreeMap::new())), |v| map(ctx, key, v))
}
