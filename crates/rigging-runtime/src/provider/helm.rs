//! Helm chart releases.

use async_trait::async_trait;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::{REDACTED, Sensitive};
use rigging_common::types::Operation;
use rigging_common::value::Value;
use rigging_compose::schema::{HelmReleaseConfig, ResourceConfig};

use super::kubectl::KubeAccess;
use super::{Attributes, EvaluatedConfig, OperationContext, Provider, flag, opt_map, opt_text, plain, text};
use crate::exec::CommandSpec;

/// A release invocation derived from evaluated configuration.
#[derive(Debug, Clone)]
pub struct ReleaseSpec {
    /// Release name.
    pub release: Sensitive<String>,
    /// Target namespace.
    pub namespace: Sensitive<String>,
    /// Chart reference.
    pub chart: Sensitive<String>,
    /// Arguments after the global flags.
    pub args: Vec<String>,
    /// Values document piped on stdin.
    pub values: Sensitive<String>,
}

/// Builds the `helm upgrade --install` invocation for a release.
///
/// # Errors
///
/// Returns `RiggingError::InvalidResource` for fields of the wrong type.
pub fn upgrade_spec(ctx: &OperationContext<'_>) -> Result<ReleaseSpec> {
    let config = unpack(ctx)?;
    let release = opt_text(ctx, "name", config.name.as_ref())?
        .unwrap_or_else(|| Sensitive::plain(ctx.name.to_string()));
    let namespace = text(ctx, "namespace", &config.namespace)?;
    let chart = text(ctx, "chart", &config.chart)?;

    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.expose().clone(),
        chart.expose().clone(),
        "--namespace".to_string(),
        namespace.expose().clone(),
    ];
    if let Some(version) = opt_text(ctx, "version", config.version.as_ref())? {
        args.extend(["--version".to_string(), version.into_exposed()]);
    }
    if let Some(repo) = opt_text(ctx, "repository", config.repository.as_ref())? {
        args.extend(["--repo".to_string(), repo.into_exposed()]);
    }
    if flag(ctx, "create_namespace", config.create_namespace.as_ref(), false)? {
        args.push("--create-namespace".to_string());
    }
    if flag(ctx, "wait", config.wait.as_ref(), false)? {
        args.push("--wait".to_string());
    }
    if let Some(timeout) = opt_text(ctx, "timeout", config.timeout.as_ref())? {
        args.extend(["--timeout".to_string(), timeout.into_exposed()]);
    }
    args.extend(["--values", "-", "--output", "json"].map(str::to_string));

    let values = opt_map(ctx, "values", config.values.as_ref())?
        .map(|entries| Value::Map(entries).to_json().to_string());

    Ok(ReleaseSpec {
        release,
        namespace,
        chart,
        args,
        values,
    })
}

fn unpack<'a>(ctx: &OperationContext<'a>) -> Result<&'a HelmReleaseConfig<Sensitive<Value>>> {
    match ctx.config {
        ResourceConfig::HelmRelease(c) => Ok(c),
        _ => Err(ctx.wrong_kind("helm")),
    }
}

/// Provider for [`HelmReleaseConfig`] resources.
#[derive(Debug, Clone)]
pub struct HelmProvider {
    program: String,
    access: KubeAccess,
}

impl HelmProvider {
    /// Creates a provider running `program` with `access`.
    #[must_use]
    pub fn new(program: impl Into<String>, access: KubeAccess) -> Self {
        Self {
            program: program.into(),
            access,
        }
    }
}

#[async_trait]
impl Provider for HelmProvider {
    fn name(&self) -> &'static str {
        "helm"
    }

    fn retry_safe(&self, _operation: Operation, _config: &EvaluatedConfig) -> bool {
        true
    }

    async fn create(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        let spec = upgrade_spec(ctx)?;
        let secret = ctx.config.fields().iter().any(|(_, v)| v.is_secret());
        tracing::info!(
            resource = %ctx.name,
            release = %spec.release,
            namespace = %spec.namespace,
            "installing release"
        );
        let output = CommandSpec::new(&self.program)
            .args(self.access.helm_args())
            .args(spec.args.clone())
            .stdin(spec.values.expose().clone())
            .run()
            .await?
            .check(&self.program)?;

        let status: serde_json::Value =
            serde_json::from_str(&output.stdout).map_err(|e| RiggingError::ParseOutput {
                resource: ctx.name.to_string(),
                message: e.to_string(),
                raw: if secret {
                    format!("{REDACTED} ({} bytes)", output.stdout.len())
                } else {
                    output.stdout.clone()
                },
            })?;

        let reported = |key: &str, configured: &Sensitive<String>| {
            configured.as_ref().map(|fallback| {
                Value::from(status[key].as_str().unwrap_or(fallback.as_str()))
            })
        };
        let chart = spec.chart.as_ref().map(|_| {
            let metadata = &status["chart"]["metadata"];
            Value::from(match (metadata["name"].as_str(), metadata["version"].as_str()) {
                (Some(name), Some(version)) => format!("{name}-{version}"),
                (Some(name), None) => name.to_string(),
                _ => String::new(),
            })
        });
        Ok(Attributes::from([
            ("name".to_string(), reported("name", &spec.release)),
            ("namespace".to_string(), reported("namespace", &spec.namespace)),
            (
                "status".to_string(),
                plain(status["info"]["status"].as_str().unwrap_or("unknown")),
            ),
            (
                "revision".to_string(),
                plain(status["version"].as_i64().unwrap_or_default()),
            ),
            ("chart".to_string(), chart),
        ]))
    }

    async fn delete(&self, ctx: &OperationContext<'_>) -> Result<()> {
        let spec = upgrade_spec(ctx)?;
        let release = ctx
            .prior
            .and_then(|attrs| attrs.get("name"))
            .map_or_else(|| spec.release.clone(), |name| name.as_ref().map(Value::render));
        tracing::info!(resource = %ctx.name, release = %release, "uninstalling release");
        let _ = CommandSpec::new(&self.program)
            .args(self.access.helm_args())
            .args([
                "uninstall".to_string(),
                release.into_exposed(),
                "--namespace".to_string(),
                spec.namespace.into_exposed(),
                "--ignore-not-found".to_string(),
            ])
            .run()
            .await?
            .check(&self.program)?;
        Ok(())
    }
}
