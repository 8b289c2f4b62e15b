//! Cluster objects managed through `kubectl`: namespaces, secrets, custom
//! resources and deployments.
//!
//! Manifests are passed on standard input so secret data never appears
//! on a command line.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use rigging_common::config::RiggingConfig;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::{REDACTED, Sensitive};
use rigging_common::types::Operation;
use rigging_common::value::Value;
use rigging_compose::schema::ResourceConfig;
use serde_json::json;

use super::{
    Attributes, EvaluatedConfig, OperationContext, Provider, flag, map, opt_map, opt_text, plain,
    text,
};
use crate::exec::CommandSpec;

const DEFAULT_ROLLOUT_TIMEOUT: &str = "5m";

/// How to reach the target cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeAccess {
    /// Kubeconfig file (ambient configuration if unset).
    pub kubeconfig: Option<PathBuf>,
    /// Context within the kubeconfig.
    pub context: Option<String>,
}

impl KubeAccess {
    /// Reads the access settings from the engine configuration.
    #[must_use]
    pub fn from_config(config: &RiggingConfig) -> Self {
        Self {
            kubeconfig: config.kubeconfig.clone(),
            context: config.kube_context.clone(),
        }
    }

    /// Global flags for `kubectl`.
    #[must_use]
    pub fn kubectl_args(&self) -> Vec<String> {
        self.args("--context")
    }

    /// Global flags for `helm`.
    #[must_use]
    pub fn helm_args(&self) -> Vec<String> {
        self.args("--kube-context")
    }

    fn args(&self, context_flag: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }
        if let Some(context) = &self.context {
            args.push(context_flag.to_string());
            args.push(context.clone());
        }
        args
    }
}

/// A rendered cluster object.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Object body, secret if any input was.
    pub body: Sensitive<serde_json::Value>,
    /// Object name.
    pub name: Sensitive<String>,
    /// Object namespace, if namespaced.
    pub namespace: Option<Sensitive<String>>,
    /// Scalar identity fields copied into attributes (`kind`, `api_version`).
    pub identity: Vec<(&'static str, Sensitive<String>)>,
    /// Keys of secret data, secret if the data was.
    pub keys: Option<Sensitive<Vec<String>>>,
}

/// Builds the manifest for a kubectl-backed resource.
///
/// # Errors
///
/// Returns `RiggingError::InvalidResource` for fields of the wrong type or
/// a configuration this provider does not handle.
pub fn manifest(ctx: &OperationContext<'_>) -> Result<Manifest> {
    let secret = ctx.config.fields().iter().any(|(_, v)| v.is_secret());
    let mut identity = Vec::new();
    let mut keys = None;
    let (body, name, namespace) = match ctx.config {
        ResourceConfig::Namespace(c) => {
            let name = text(ctx, "name", &c.name)?;
            let labels = opt_map(ctx, "labels", c.labels.as_ref())?.into_exposed();
            let body = json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": metadata(name.expose(), None, &labels, &BTreeMap::new()),
            });
            (body, name, None)
        }
        ResourceConfig::Secret(c) => {
            let name = text(ctx, "name", &c.name)?;
            let namespace = text(ctx, "namespace", &c.namespace)?;
            let data = map(ctx, "data", &c.data)?;
            keys = Some(data.as_ref().map(|entries| entries.keys().cloned().collect()));
            let data: serde_json::Map<String, serde_json::Value> = data
                .into_exposed()
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v.render())))
                .collect();
            let kind = opt_text(ctx, "type", c.r#type.as_ref())?
                .map_or_else(|| "Opaque".to_string(), Sensitive::into_exposed);
            let body = json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": metadata(name.expose(), Some(namespace.expose().as_str()), &BTreeMap::new(), &BTreeMap::new()),
                "type": kind,
                "stringData": data,
            });
            (body, name, Some(namespace))
        }
        ResourceConfig::CustomResource(c) => {
            let name = text(ctx, "name", &c.name)?;
            let namespace = opt_text(ctx, "namespace", c.namespace.as_ref())?;
            let labels = opt_map(ctx, "labels", c.labels.as_ref())?.into_exposed();
            let spec = map(ctx, "spec", &c.spec)?.into_exposed();
            let api_version = text(ctx, "api_version", &c.api_version)?;
            let kind = text(ctx, "kind", &c.kind)?;
            let body = json!({
                "apiVersion": api_version.expose(),
                "kind": kind.expose(),
                "metadata": metadata(
                    name.expose(),
                    namespace.as_ref().map(|ns| ns.expose().as_str()),
                    &labels,
                    &BTreeMap::new(),
                ),
                "spec": Value::Map(spec).to_json(),
            });
            identity.push(("kind", kind));
            identity.push(("api_version", api_version));
            (body, name, namespace)
        }
        ResourceConfig::Deployment(c) => {
            let name = text(ctx, "name", &c.name)?;
            let namespace = text(ctx, "namespace", &c.namespace)?;
            let labels = opt_map(ctx, "labels", c.labels.as_ref())?.into_exposed();
            let annotations = opt_map(ctx, "annotations", c.annotations.as_ref())?.into_exposed();
            let spec = map(ctx, "spec", &c.spec)?.into_exposed();
            let body = json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": metadata(name.expose(), Some(namespace.expose().as_str()), &labels, &annotations),
                "spec": Value::Map(spec).to_json(),
            });
            (body, name, Some(namespace))
        }
        _ => return Err(ctx.wrong_kind("kubectl")),
    };
    Ok(Manifest {
        body: Sensitive::new(body, secret),
        name,
        namespace,
        identity,
        keys,
    })
}

fn metadata(
    name: &str,
    namespace: Option<&str>,
    labels: &BTreeMap<String, Value>,
    annotations: &BTreeMap<String, Value>,
) -> serde_json::Value {
    let mut meta = serde_json::Map::new();
    let _ = meta.insert("name".into(), json!(name));
    if let Some(ns) = namespace {
        let _ = meta.insert("namespace".into(), json!(ns));
    }
    let as_strings = |entries: &BTreeMap<String, Value>| -> serde_json::Value {
        entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.render())))
            .collect::<serde_json::Map<_, _>>()
            .into()
    };
    if !labels.is_empty() {
        let _ = meta.insert("labels".into(), as_strings(labels));
    }
    if !annotations.is_empty() {
        let _ = meta.insert("annotations".into(), as_strings(annotations));
    }
    serde_json::Value::Object(meta)
}

/// Provider for every kubectl-backed kind.
#[derive(Debug, Clone)]
pub struct KubectlProvider {
    program: String,
    access: KubeAccess,
}

impl KubectlProvider {
    /// Creates a provider running `program` with `access`.
    #[must_use]
    pub fn new(program: impl Into<String>, access: KubeAccess) -> Self {
        Self {
            program: program.into(),
            access,
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.program)
            .args(self.access.kubectl_args())
            .args(args)
    }

    async fn apply(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        let manifest = manifest(ctx)?;
        tracing::info!(
            resource = %ctx.name,
            kind = %ctx.config.kind(),
            object = %manifest.name,
            namespace = %manifest.namespace.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
            "applying manifest"
        );
        let output = self
            .command(["apply", "-f", "-", "-o", "json"])
            .stdin(manifest.body.expose().to_string())
            .run()
            .await?
            .check(&self.program)?;

        let applied: serde_json::Value =
            serde_json::from_str(&output.stdout).map_err(|e| RiggingError::ParseOutput {
                resource: ctx.name.to_string(),
                message: e.to_string(),
                raw: if manifest.body.is_secret() {
                    format!("{REDACTED} ({} bytes)", output.stdout.len())
                } else {
                    output.stdout.clone()
                },
            })?;
        let uid = applied["metadata"]["uid"].as_str().unwrap_or_default();

        if let ResourceConfig::Deployment(c) = ctx.config {
            if !flag(ctx, "skip_await", c.skip_await.as_ref(), false)? {
                let timeout = opt_text(ctx, "timeout", c.timeout.as_ref())?
                    .map_or_else(|| DEFAULT_ROLLOUT_TIMEOUT.to_string(), Sensitive::into_exposed);
                self.wait_for_rollout(&manifest, &timeout).await?;
            }
        }

        Ok(attributes(&manifest, uid))
    }

    async fn wait_for_rollout(&self, manifest: &Manifest, timeout: &str) -> Result<()> {
        tracing::info!(deployment = %manifest.name, timeout, "waiting for rollout");
        let mut args = vec![
            "rollout".to_string(),
            "status".to_string(),
            format!("deployment/{}", manifest.name.expose()),
            format!("--timeout={timeout}"),
        ];
        if let Some(ns) = &manifest.namespace {
            args.push("-n".into());
            args.push(ns.expose().clone());
        }
        let _ = self.command(args).run().await?.check(&self.program)?;
        Ok(())
    }
}

fn attributes(manifest: &Manifest, uid: &str) -> Attributes {
    let text = |value: &Sensitive<String>| value.clone().map(Value::String);
    let mut attrs = Attributes::from([
        ("name".to_string(), text(&manifest.name)),
        ("uid".to_string(), plain(uid)),
    ]);
    if let Some(ns) = &manifest.namespace {
        let _ = attrs.insert("namespace".into(), text(ns));
    }
    for (key, value) in &manifest.identity {
        let _ = attrs.insert((*key).to_string(), text(value));
    }
    if let Some(keys) = &manifest.keys {
        let keys = keys
            .clone()
            .map(|keys| Value::List(keys.into_iter().map(Value::String).collect()));
        let _ = attrs.insert("keys".into(), keys);
    }
    attrs
}

#[async_trait]
impl Provider for KubectlProvider {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    fn retry_safe(&self, _operation: Operation, _config: &EvaluatedConfig) -> bool {
        true
    }

    async fn create(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        self.apply(ctx).await
    }

    async fn delete(&self, ctx: &OperationContext<'_>) -> Result<()> {
        let manifest = manifest(ctx)?;
        tracing::info!(resource = %ctx.name, object = %manifest.name, "deleting object");
        let _ = self
            .command(["delete", "-f", "-", "--ignore-not-found"])
            .stdin(manifest.body.expose().to_string())
            .run()
            .await?
            .check(&self.program)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use rigging_compose::schema::{
        CustomResourceConfig, DeploymentConfig, NamespaceConfig, SecretConfig,
    };

    use super::*;

    fn ctx<'a>(name: &'a str, config: &'a EvaluatedConfig) -> OperationContext<'a> {
        OperationContext {
            name,
            config,
            prior: None,
        }
    }

    fn secret_config() -> EvaluatedConfig {
        ResourceConfig::Secret(SecretConfig {
            name: plain("kagent-openai"),
            namespace: plain("kagent"),
            data: Sensitive::secret(Value::Map(BTreeMap::from([(
                "OPENAI_API_KEY".to_string(),
                Value::from("sk-live"),
            )]))),
            r#type: None,
        })
    }

    /// Writes an executable stand-in for `kubectl` that records its
    /// arguments and stdin, then prints `stdout`.
    fn fake_kubectl(dir: &Path, stdout: &str) -> String {
        let script = dir.join("kubectl");
        let body = format!(
            "#!/bin/sh\necho \"$@\" >> '{args}'\ncat >> '{stdin}'\nprintf '%s' '{stdout}'\n",
            args = dir.join("args.log").display(),
            stdin = dir.join("stdin.log").display(),
        );
        std::fs::write(&script, body).expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        script.display().to_string()
    }

    #[test]
    fn secret_manifest_uses_string_data_and_stays_secret() {
        let config = secret_config();
        let manifest = manifest(&ctx("s", &config)).expect("manifest");
        assert!(manifest.body.is_secret());
        let body = manifest.body.expose();
        assert_eq!(body["kind"], "Secret");
        assert_eq!(body["type"], "Opaque");
        assert_eq!(body["metadata"]["namespace"], "kagent");
        assert_eq!(body["stringData"]["OPENAI_API_KEY"], "sk-live");
    }

    #[test]
    fn custom_resource_manifest_carries_spec() {
        let config = ResourceConfig::CustomResource(CustomResourceConfig {
            api_version: plain("kagent.dev/v1alpha2"),
            kind: plain("RemoteMCPServer"),
            name: plain("pulumi-remote-mcp"),
            spec: plain(Value::Map(BTreeMap::from([(
                "url".to_string(),
                Value::from("https://mcp.ai.pulumi.com/mcp"),
            )]))),
            namespace: Some(plain("kagent")),
            labels: None,
        });
        let manifest = manifest(&ctx("mcp", &config)).expect("manifest");
        let body = manifest.body.expose();
        assert_eq!(body["apiVersion"], "kagent.dev/v1alpha2");
        assert_eq!(body["spec"]["url"], "https://mcp.ai.pulumi.com/mcp");
        assert!(body["metadata"].get("labels").is_none());
        assert!(!manifest.body.is_secret());
    }

    #[test]
    fn namespace_labels_render_as_strings() {
        let config = ResourceConfig::Namespace(NamespaceConfig {
            name: plain("monitoring"),
            labels: Some(plain(Value::Map(BTreeMap::from([(
                "tier".to_string(),
                Value::Integer(2),
            )])))),
        });
        let manifest = manifest(&ctx("ns", &config)).expect("manifest");
        assert_eq!(manifest.body.expose()["metadata"]["labels"]["tier"], "2");
        assert_eq!(manifest.namespace, None);
    }

    #[test]
    fn access_flags_differ_between_tools() {
        let access = KubeAccess {
            kubeconfig: Some(PathBuf::from("/tmp/kc")),
            context: Some("do-fra1".into()),
        };
        assert_eq!(
            access.kubectl_args(),
            vec!["--kubeconfig", "/tmp/kc", "--context", "do-fra1"]
        );
        assert_eq!(access.helm_args()[2], "--kube-context");
        assert!(KubeAccess::default().kubectl_args().is_empty());
    }

    #[tokio::test]
    async fn apply_pipes_manifest_and_reads_uid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = fake_kubectl(dir.path(), r#"{"metadata":{"uid":"u-42"}}"#);
        let provider = KubectlProvider::new(program, KubeAccess::default());

        let config = secret_config();
        let attrs = provider.create(&ctx("s", &config)).await.expect("applied");
        assert_eq!(attrs["uid"].expose(), &Value::from("u-42"));
        assert_eq!(attrs["namespace"].expose(), &Value::from("kagent"));
        assert_eq!(
            attrs["keys"].expose(),
            &Value::List(vec![Value::from("OPENAI_API_KEY")])
        );

        let args = std::fs::read_to_string(dir.path().join("args.log")).expect("args");
        assert_eq!(args.trim(), "apply -f - -o json");
        assert!(!args.contains("sk-live"));
        let stdin = std::fs::read_to_string(dir.path().join("stdin.log")).expect("stdin");
        assert!(stdin.contains("sk-live"));
    }

    #[tokio::test]
    async fn attributes_keep_the_secrecy_of_their_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = fake_kubectl(dir.path(), r#"{"metadata":{"uid":"u-7"}}"#);
        let provider = KubectlProvider::new(program, KubeAccess::default());

        let config = ResourceConfig::Namespace(NamespaceConfig {
            name: Sensitive::secret(Value::from("hidden-ns")),
            labels: None,
        });
        let attrs = provider.create(&ctx("ns", &config)).await.expect("applied");
        assert!(attrs["name"].is_secret());
        assert_eq!(attrs["name"].to_string(), REDACTED);
        assert_eq!(attrs["name"].expose(), &Value::from("hidden-ns"));
        assert!(!attrs["uid"].is_secret());

        let config = secret_config();
        let attrs = provider.create(&ctx("s", &config)).await.expect("applied");
        assert!(!attrs["name"].is_secret());
        assert!(!attrs["namespace"].is_secret());
        assert!(attrs["keys"].is_secret());
    }

    #[tokio::test]
    async fn unparseable_output_of_secret_is_redacted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = fake_kubectl(dir.path(), "not json sk-live");
        let provider = KubectlProvider::new(program, KubeAccess::default());
        let config = secret_config();
        let err = provider.create(&ctx("s", &config)).await.unwrap_err();
        match err {
            RiggingError::ParseOutput { raw, .. } => {
                assert!(!raw.contains("sk-live"), "got: {raw}");
                assert!(raw.starts_with(REDACTED));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn deployment_waits_for_rollout_unless_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = fake_kubectl(dir.path(), r#"{"metadata":{"uid":"d-1"}}"#);
        let provider = KubectlProvider::new(program, KubeAccess::default());
        let config = ResourceConfig::Deployment(DeploymentConfig {
            name: plain("podinfo"),
            namespace: plain("apps"),
            spec: plain(Value::Map(BTreeMap::new())),
            labels: None,
            annotations: None,
            skip_await: None,
            timeout: Some(plain("2m")),
        });
        let _ = provider.create(&ctx("d", &config)).await.expect("applied");
        let args = std::fs::read_to_string(dir.path().join("args.log")).expect("args");
        let lines: Vec<&str> = args.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "rollout status deployment/podinfo --timeout=2m -n apps");
    }

    #[tokio::test]
    async fn delete_ignores_missing_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = fake_kubectl(dir.path(), "");
        let provider = KubectlProvider::new(program, KubeAccess::default());
        let config = secret_config();
        provider.delete(&ctx("s", &config)).await.expect("deleted");
        let args = std::fs::read_to_string(dir.path().join("args.log")).expect("args");
        assert_eq!(args.trim(), "delete -f - --ignore-not-found");
    }
}
