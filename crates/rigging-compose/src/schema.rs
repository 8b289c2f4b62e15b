//! Typed configuration per resource kind.
//!
//! Each kind's properties are checked against a fixed set of required and
//! optional keys when a stack is planned. The configuration structs are
//! generic over their field type: they hold [`Expr`]s after planning and
//! evaluated `Sensitive<Value>`s once references have been resolved.

use std::collections::BTreeMap;

use rigging_common::error::{Result, RiggingError};
use rigging_common::types::ResourceKind;

use crate::expr::Expr;
use crate::parser::ast::ResourceDecl;

/// Expected shape of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Text,
    Integer,
    Bool,
    Map,
    List,
}

impl Shape {
    const fn name(self) -> &'static str {
        match self {
            Self::Text => "a string",
            Self::Integer => "an integer",
            Self::Bool => "a bool",
            Self::Map => "a map",
            Self::List => "a list",
        }
    }

    /// Checks literal values only; anything holding a reference is
    /// checked again after evaluation.
    fn accepts(self, expr: &Expr) -> bool {
        match expr {
            Expr::Secret(inner) => self.accepts(inner),
            Expr::Template(template) => match template.as_literal() {
                None => true,
                Some(text) => match self {
                    Self::Text => true,
                    Self::Integer => text.trim().parse::<i64>().is_ok(),
                    Self::Bool => text.trim().parse::<bool>().is_ok(),
                    Self::Map | Self::List => false,
                },
            },
            Expr::Integer(_) => matches!(self, Self::Text | Self::Integer),
            Expr::Bool(_) => matches!(self, Self::Text | Self::Bool),
            Expr::Map(_) => self == Self::Map,
            Expr::List(_) => self == Self::List,
        }
    }
}

const fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Template(_) => "string",
        Expr::Integer(_) => "integer",
        Expr::Bool(_) => "bool",
        Expr::Map(_) => "map",
        Expr::List(_) => "list",
        Expr::Secret(_) => "secret",
    }
}

fn field_key(ident: &'static str) -> &'static str {
    ident.strip_prefix("r#").unwrap_or(ident)
}

/// Properties of one declaration, consumed key by key.
struct Properties<'a> {
    resource: &'a str,
    entries: BTreeMap<String, Expr>,
}

impl<'a> Properties<'a> {
    fn new(decl: &'a ResourceDecl) -> Self {
        Self {
            resource: &decl.name,
            entries: decl.properties.clone(),
        }
    }

    fn invalid(&self, message: String) -> RiggingError {
        RiggingError::InvalidResource {
            resource: self.resource.to_string(),
            message,
        }
    }

    fn checked(&self, key: &str, shape: Shape, expr: Expr) -> Result<Expr> {
        if shape.accepts(&expr) {
            Ok(expr)
        } else {
            Err(self.invalid(format!(
                "key \"{key}\" expects {}, got {}",
                shape.name(),
                describe(&expr)
            )))
        }
    }

    fn required(&mut self, key: &str, shape: Shape) -> Result<Expr> {
        match self.entries.remove(key) {
            Some(expr) => self.checked(key, shape, expr),
            None => Err(self.invalid(format!("missing required key \"{key}\""))),
        }
    }

    fn optional(&mut self, key: &str, shape: Shape) -> Result<Option<Expr>> {
        self.entries
            .remove(key)
            .map(|expr| self.checked(key, shape, expr))
            .transpose()
    }

    fn finish(self, kind: ResourceKind, expected: &[&str]) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let unknown: Vec<String> = self.entries.keys().map(|k| format!("\"{k}\"")).collect();
        Err(self.invalid(format!(
            "unknown key(s) {} for {kind} (expected: {})",
            unknown.join(", "),
            expected.join(", ")
        )))
    }
}

macro_rules! kind_config {
    (
        $(#[$meta:meta])*
        $name:ident {
            required {
                $( $(#[$rmeta:meta])* $req:ident : $rshape:ident ),* $(,)?
            }
            optional {
                $( $(#[$ometa:meta])* $opt:ident : $oshape:ident ),* $(,)?
            }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name<F = Expr> {
            $( $(#[$rmeta])* pub $req: F, )*
            $( $(#[$ometa])* pub $opt: Option<F>, )*
        }

        impl $name<Expr> {
            fn keys() -> Vec<&'static str> {
                vec![ $( field_key(stringify!($req)), )* $( field_key(stringify!($opt)), )* ]
            }

            fn from_properties(props: &mut Properties<'_>) -> Result<Self> {
                Ok(Self {
                    $( $req: props.required(field_key(stringify!($req)), Shape::$rshape)?, )*
                    $( $opt: props.optional(field_key(stringify!($opt)), Shape::$oshape)?, )*
                })
            }
        }

        impl<F> $name<F> {
            /// Converts every field with `f`, which receives the key and value.
            ///
            /// # Errors
            ///
            /// Returns the first error produced by `f`.
            pub fn try_map<G, E>(
                &self,
                f: &mut impl FnMut(&str, &F) -> std::result::Result<G, E>,
            ) -> std::result::Result<$name<G>, E> {
                Ok($name {
                    $( $req: f(field_key(stringify!($req)), &self.$req)?, )*
                    $( $opt: match &self.$opt {
                        Some(value) => Some(f(field_key(stringify!($opt)), value)?),
                        None => None,
                    }, )*
                })
            }

            /// Returns every set field as `(key, value)`, in declaration order.
            pub fn fields(&self) -> Vec<(&'static str, &F)> {
                let mut fields = vec![ $( (field_key(stringify!($req)), &self.$req), )* ];
                $(
                    if let Some(value) = &self.$opt {
                        fields.push((field_key(stringify!($opt)), value));
                    }
                )*
                fields
            }
        }
    };
}

kind_config! {
    /// A managed Kubernetes cluster.
    ClusterConfig {
        required {
            /// Cluster name in the cloud account.
            name: Text,
            /// Region slug, e.g. `fra1`.
            region: Text,
            /// Newest version starting with this prefix is used.
            version_prefix: Text,
            /// Droplet size slug of the node pool.
            node_size: Text,
            /// Number of nodes in the pool.
            node_count: Integer,
            /// API token.
            token: Text,
        }
        optional {
            /// Node pool name.
            node_pool_name: Text,
            /// Labels applied to every node.
            node_labels: Map,
            /// Cloud tags.
            tags: List,
            /// API base URL.
            api_base: Text,
        }
    }
}

kind_config! {
    /// A Kubernetes namespace.
    NamespaceConfig {
        required {
            /// Namespace name.
            name: Text,
        }
        optional {
            /// Metadata labels.
            labels: Map,
        }
    }
}

kind_config! {
    /// A Kubernetes secret holding string data.
    SecretConfig {
        required {
            /// Secret name.
            name: Text,
            /// Namespace of the secret.
            namespace: Text,
            /// Key/value string data.
            data: Map,
        }
        optional {
            /// Secret type (`Opaque` if unset).
            r#type: Text,
        }
    }
}

kind_config! {
    /// A Helm chart release.
    HelmReleaseConfig {
        required {
            /// Chart reference (`repo/chart`, OCI URL, or name with `repository`).
            chart: Text,
            /// Target namespace.
            namespace: Text,
        }
        optional {
            /// Release name (the resource name if unset).
            name: Text,
            /// Chart version.
            version: Text,
            /// Chart repository URL.
            repository: Text,
            /// Value overrides.
            values: Map,
            /// Create the namespace if missing.
            create_namespace: Bool,
            /// Wait for release resources to become ready.
            wait: Bool,
            /// Helm operation timeout, e.g. `10m`.
            timeout: Text,
        }
    }
}

kind_config! {
    /// A typed custom object in the cluster-side store.
    CustomResourceConfig {
        required {
            /// `apiVersion` of the object.
            api_version: Text,
            /// Object kind, e.g. `Agent`.
            kind: Text,
            /// Object name.
            name: Text,
            /// Object `spec`.
            spec: Map,
        }
        optional {
            /// Namespace (cluster-scoped if unset).
            namespace: Text,
            /// Metadata labels.
            labels: Map,
        }
    }
}

kind_config! {
    /// A Kubernetes deployment.
    DeploymentConfig {
        required {
            /// Deployment name.
            name: Text,
            /// Namespace of the deployment.
            namespace: Text,
            /// Deployment `spec`.
            spec: Map,
        }
        optional {
            /// Metadata labels.
            labels: Map,
            /// Metadata annotations.
            annotations: Map,
            /// Do not wait for the rollout to finish.
            skip_await: Bool,
            /// Rollout wait timeout, e.g. `5m`.
            timeout: Text,
        }
    }
}

kind_config! {
    /// A pair of imperative create/delete shell commands.
    ShellCommandConfig {
        required {
            /// Command run on create.
            create: Text,
        }
        optional {
            /// Command run on delete.
            delete: Text,
            /// Extra environment variables for both commands.
            environment: Map,
            /// `json` (default) or `text`.
            format: Text,
            /// Whether the commands may be retried on failure.
            retryable: Bool,
            /// Working directory.
            dir: Text,
        }
    }
}

kind_config! {
    /// A model access key issued over the model-key HTTP API.
    ModelKeyConfig {
        required {
            /// Key name, also used for lookup.
            name: Text,
            /// API token.
            token: Text,
        }
        optional {
            /// API base URL.
            api_base: Text,
        }
    }
}

/// Output formats accepted by shell commands.
pub const SHELL_FORMATS: [&str; 2] = ["json", "text"];

/// Configuration of one resource, by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceConfig<F = Expr> {
    /// See [`ClusterConfig`].
    Cluster(ClusterConfig<F>),
    /// See [`NamespaceConfig`].
    Namespace(NamespaceConfig<F>),
    /// See [`SecretConfig`].
    Secret(SecretConfig<F>),
    /// See [`HelmReleaseConfig`].
    HelmRelease(HelmReleaseConfig<F>),
    /// See [`CustomResourceConfig`].
    CustomResource(CustomResourceConfig<F>),
    /// See [`DeploymentConfig`].
    Deployment(DeploymentConfig<F>),
    /// See [`ShellCommandConfig`].
    ShellCommand(ShellCommandConfig<F>),
    /// See [`ModelKeyConfig`].
    ModelKey(ModelKeyConfig<F>),
}

impl ResourceConfig<Expr> {
    /// Builds the typed configuration of a declaration.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::InvalidResource` for missing, unknown, or
    /// wrongly shaped keys.
    pub fn from_decl(decl: &ResourceDecl) -> Result<Self> {
        let mut props = Properties::new(decl);
        let (config, keys) = match decl.kind {
            ResourceKind::Cluster => (
                Self::Cluster(ClusterConfig::from_properties(&mut props)?),
                ClusterConfig::keys(),
            ),
            ResourceKind::Namespace => (
                Self::Namespace(NamespaceConfig::from_properties(&mut props)?),
                NamespaceConfig::keys(),
            ),
            ResourceKind::Secret => (
                Self::Secret(SecretConfig::from_properties(&mut props)?),
                SecretConfig::keys(),
            ),
            ResourceKind::HelmRelease => (
                Self::HelmRelease(HelmReleaseConfig::from_properties(&mut props)?),
                HelmReleaseConfig::keys(),
            ),
            ResourceKind::CustomResource => (
                Self::CustomResource(CustomResourceConfig::from_properties(&mut props)?),
                CustomResourceConfig::keys(),
            ),
            ResourceKind::Deployment => (
                Self::Deployment(DeploymentConfig::from_properties(&mut props)?),
                DeploymentConfig::keys(),
            ),
            ResourceKind::ShellCommand => (
                Self::ShellCommand(ShellCommandConfig::from_properties(&mut props)?),
                ShellCommandConfig::keys(),
            ),
            ResourceKind::ModelKey => (
                Self::ModelKey(ModelKeyConfig::from_properties(&mut props)?),
                ModelKeyConfig::keys(),
            ),
        };
        props.finish(decl.kind, &keys)?;
        config.check_literals(&decl.name)?;
        Ok(config)
    }

    fn check_literals(&self, resource: &str) -> Result<()> {
        if let Self::ShellCommand(shell) = self {
            let format = shell.format.as_ref().and_then(|f| match f {
                Expr::Template(t) => t.as_literal(),
                _ => None,
            });
            if let Some(format) = format {
                if !SHELL_FORMATS.contains(&format.as_str()) {
                    return Err(RiggingError::InvalidResource {
                        resource: resource.to_string(),
                        message: format!(
                            "format must be one of {}, got \"{format}\"",
                            SHELL_FORMATS.join(", ")
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl<F> ResourceConfig<F> {
    /// Returns the kind of resource this configures.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::Namespace(_) => ResourceKind::Namespace,
            Self::Secret(_) => ResourceKind::Secret,
            Self::HelmRelease(_) => ResourceKind::HelmRelease,
            Self::CustomResource(_) => ResourceKind::CustomResource,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::ShellCommand(_) => ResourceKind::ShellCommand,
            Self::ModelKey(_) => ResourceKind::ModelKey,
        }
    }

    /// Converts every field with `f`, keeping the kind.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<G, E>(
        &self,
        mut f: impl FnMut(&str, &F) -> std::result::Result<G, E>,
    ) -> std::result::Result<ResourceConfig<G>, E> {
        let f = &mut f;
        Ok(match self {
            Self::Cluster(c) => ResourceConfig::Cluster(c.try_map(f)?),
            Self::Namespace(c) => ResourceConfig::Namespace(c.try_map(f)?),
            Self::Secret(c) => ResourceConfig::Secret(c.try_map(f)?),
            Self::HelmRelease(c) => ResourceConfig::HelmRelease(c.try_map(f)?),
            Self::CustomResource(c) => ResourceConfig::CustomResource(c.try_map(f)?),
            Self::Deployment(c) => ResourceConfig::Deployment(c.try_map(f)?),
            Self::ShellCommand(c) => ResourceConfig::ShellCommand(c.try_map(f)?),
            Self::ModelKey(c) => ResourceConfig::ModelKey(c.try_map(f)?),
        })
    }

    /// Returns every set field as `(key, value)`.
    #[must_use]
    pub fn fields(&self) -> Vec<(&'static str, &F)> {
        match self {
            Self::Cluster(c) => c.fields(),
            Self::Namespace(c) => c.fields(),
            Self::Secret(c) => c.fields(),
            Self::HelmRelease(c) => c.fields(),
            Self::CustomResource(c) => c.fields(),
            Self::Deployment(c) => c.fields(),
            Self::ShellCommand(c) => c.fields(),
            Self::ModelKey(c) => c.fields(),
        }
    }
}
