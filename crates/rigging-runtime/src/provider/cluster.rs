//! Managed Kubernetes clusters over the cloud provider's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rigging_common::constants::{DEFAULT_CLOUD_API_BASE, DEFAULT_NODE_POOL_NAME};
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;
use rigging_common::types::Operation;
use rigging_common::value::Value;
use rigging_compose::schema::{ClusterConfig, ResourceConfig};
use serde_json::json;

use super::http::{ApiClient, is_not_found};
use crate::retry::{RetryPolicy, retry_with_backoff};
use super::{
    Attributes, EvaluatedConfig, OperationContext, Provider, integer, opt_map, opt_text, plain,
    text,
};

/// Provider for [`ClusterConfig`] resources.
#[derive(Debug, Clone)]
pub struct ClusterProvider {
    client: Client,
    poll_interval: Duration,
    ready_timeout: Duration,
    read_retry: RetryPolicy,
}

/// Cluster settings extracted from evaluated configuration.
#[derive(Debug)]
struct ClusterSpec {
    name: Sensitive<String>,
    region: Sensitive<String>,
    version_prefix: String,
    node_size: String,
    node_count: i64,
    node_pool_name: String,
    node_labels: serde_json::Value,
    tags: serde_json::Value,
}

impl ClusterProvider {
    /// Creates a provider that polls every `poll_interval` for at most
    /// `ready_timeout` while a cluster provisions.
    #[must_use]
    pub fn new(poll_interval: Duration, ready_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            poll_interval,
            ready_timeout,
            read_retry: RetryPolicy::default(),
        }
    }

    /// Retries the reads made during create (lookup, polling, kubeconfig)
    /// with `policy`.
    #[must_use]
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    async fn read(&self, api: &ApiClient, path: &str) -> Result<serde_json::Value> {
        retry_with_backoff(&self.read_retry, path, || api.get_json(path)).await
    }

    async fn read_text(&self, api: &ApiClient, path: &str) -> Result<String> {
        retry_with_backoff(&self.read_retry, path, || {
            api.send(reqwest::Method::GET, path, None)
        })
        .await
    }

    fn unpack<'a>(ctx: &OperationContext<'a>) -> Result<&'a ClusterConfig<Sensitive<Value>>> {
        match ctx.config {
            ResourceConfig::Cluster(c) => Ok(c),
            _ => Err(ctx.wrong_kind("cluster")),
        }
    }

    fn api(&self, ctx: &OperationContext<'_>, config: &ClusterConfig<Sensitive<Value>>) -> Result<ApiClient> {
        let token = text(ctx, "token", &config.token)?;
        let base = opt_text(ctx, "api_base", config.api_base.as_ref())?
            .map_or_else(|| DEFAULT_CLOUD_API_BASE.to_string(), Sensitive::into_exposed);
        Ok(ApiClient::new(self.client.clone(), &base, token))
    }

    fn spec(ctx: &OperationContext<'_>, config: &ClusterConfig<Sensitive<Value>>) -> Result<ClusterSpec> {
        let labels = opt_map(ctx, "node_labels", config.node_labels.as_ref())?;
        let tags = match config.tags.as_ref().map(Sensitive::expose) {
            Some(value @ Value::List(_)) => value.to_json(),
            Some(other) => {
                return Err(ctx.invalid(format!(
                    "key \"tags\" expects a list, got {}",
                    other.type_name()
                )));
            }
            None => json!([]),
        };
        Ok(ClusterSpec {
            name: text(ctx, "name", &config.name)?,
            region: text(ctx, "region", &config.region)?,
            version_prefix: text(ctx, "version_prefix", &config.version_prefix)?.into_exposed(),
            node_size: text(ctx, "node_size", &config.node_size)?.into_exposed(),
            node_count: integer(ctx, "node_count", &config.node_count)?,
            node_pool_name: opt_text(ctx, "node_pool_name", config.node_pool_name.as_ref())?
                .map_or_else(|| DEFAULT_NODE_POOL_NAME.to_string(), Sensitive::into_exposed),
            node_labels: Value::Map(labels.into_exposed()).to_json(),
            tags,
        })
    }

    async fn provision(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        let config = Self::unpack(ctx)?;
        let api = self.api(ctx, config)?;
        let spec = Self::spec(ctx, config)?;

        if let Some(id) = find_by_name(self, &api, spec.name.expose()).await? {
            tracing::warn!(
                resource = %ctx.name,
                cluster = %spec.name,
                cluster_id = %id,
                "cluster with this name already exists, adopting it"
            );
            let cluster = self.wait_until_running(ctx, &api, &id).await?;
            return self.describe(ctx, config, &api, &cluster).await;
        }

        let version = resolve_version(&api, &spec.version_prefix).await?;
        tracing::info!(
            resource = %ctx.name,
            cluster = %spec.name,
            region = %spec.region,
            version = %version,
            "creating cluster"
        );
        let body = json!({
            "name": spec.name.expose(),
            "region": spec.region.expose(),
            "version": version,
            "node_pools": [{
                "name": spec.node_pool_name,
                "size": spec.node_size,
                "count": spec.node_count,
                "labels": spec.node_labels,
            }],
            "tags": spec.tags,
        });
        let created = api.post_json("/v2/kubernetes/clusters", &body).await?;
        let id = cluster_id(ctx, &created["kubernetes_cluster"])?;
        tracing::info!(resource = %ctx.name, cluster_id = %id, "cluster requested");

        let cluster = self.wait_until_running(ctx, &api, &id).await?;
        self.describe(ctx, config, &api, &cluster).await
    }

    async fn wait_until_running(
        &self,
        ctx: &OperationContext<'_>,
        api: &ApiClient,
        id: &str,
    ) -> Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        loop {
            let body = self.read(api, &format!("/v2/kubernetes/clusters/{id}")).await?;
            let cluster = body["kubernetes_cluster"].clone();
            match cluster["status"]["state"].as_str().unwrap_or_default() {
                "running" => return Ok(cluster),
                "errored" | "degraded" | "deleted" => {
                    return Err(RiggingError::OperationFailed {
                        resource: ctx.name.to_string(),
                        operation: Operation::Create,
                        message: format!(
                            "cluster {id} entered state \"{}\"",
                            cluster["status"]["state"].as_str().unwrap_or_default()
                        ),
                    });
                }
                state => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(RiggingError::OperationFailed {
                            resource: ctx.name.to_string(),
                            operation: Operation::Create,
                            message: format!(
                                "cluster {id} not running after {}s (state \"{state}\")",
                                self.ready_timeout.as_secs()
                            ),
                        });
                    }
                    tracing::debug!(resource = %ctx.name, cluster_id = %id, state, "waiting for cluster");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Attributes of a running cluster. Fields echoed from configuration
    /// keep its secrecy; the kubeconfig is always secret.
    async fn describe(
        &self,
        ctx: &OperationContext<'_>,
        config: &ClusterConfig<Sensitive<Value>>,
        api: &ApiClient,
        cluster: &serde_json::Value,
    ) -> Result<Attributes> {
        let id = cluster_id(ctx, cluster)?;
        let kubeconfig = self
            .read_text(api, &format!("/v2/kubernetes/clusters/{id}/kubeconfig"))
            .await?;
        let field = |key: &str, source: &Sensitive<Value>| {
            Sensitive::new(
                Value::from(cluster[key].as_str().unwrap_or_default()),
                source.is_secret(),
            )
        };
        Ok(Attributes::from([
            ("id".to_string(), plain(id.clone())),
            ("name".to_string(), field("name", &config.name)),
            ("region".to_string(), field("region", &config.region)),
            ("version".to_string(), field("version", &config.version_prefix)),
            ("endpoint".to_string(), plain(cluster["endpoint"].as_str().unwrap_or_default())),
            ("urn".to_string(), plain(format!("do:kubernetes:{id}"))),
            ("kubeconfig".to_string(), Sensitive::secret(Value::String(kubeconfig))),
        ]))
    }
}

#[async_trait]
impl Provider for ClusterProvider {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn retry_safe(&self, operation: Operation, _config: &EvaluatedConfig) -> bool {
        operation == Operation::Delete
    }

    async fn create(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        self.provision(ctx).await
    }

    async fn update(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        let Some(id) = ctx.prior_text("id") else {
            return self.provision(ctx).await;
        };
        let config = Self::unpack(ctx)?;
        let api = self.api(ctx, config)?;
        match api.get_json(&format!("/v2/kubernetes/clusters/{id}")).await {
            Ok(body) => self.describe(ctx, config, &api, &body["kubernetes_cluster"]).await,
            Err(e) if is_not_found(&e) => {
                tracing::warn!(resource = %ctx.name, cluster_id = %id, "recorded cluster is gone, recreating");
                self.provision(ctx).await
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, ctx: &OperationContext<'_>) -> Result<()> {
        let config = Self::unpack(ctx)?;
        let api = self.api(ctx, config)?;
        let id = match ctx.prior_text("id") {
            Some(id) => Some(id),
            None => {
                let name = text(ctx, "name", &config.name)?.into_exposed();
                find_by_name(self, &api, &name).await?
            }
        };
        let Some(id) = id else {
            tracing::info!(resource = %ctx.name, "cluster not found, nothing to delete");
            return Ok(());
        };
        tracing::info!(resource = %ctx.name, cluster_id = %id, "deleting cluster");
        api.delete(&format!("/v2/kubernetes/clusters/{id}")).await
    }
}

/// Picks the newest version whose slug or Kubernetes version starts with
/// `prefix`. The API lists versions newest first.
async fn resolve_version(api: &ApiClient, prefix: &str) -> Result<String> {
    let options = api.get_json("/v2/kubernetes/options").await?;
    options["options"]["versions"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|v| {
            v["kubernetes_version"]
                .as_str()
                .is_some_and(|k| k.starts_with(prefix))
                || v["slug"].as_str().is_some_and(|s| s.starts_with(prefix))
        })
        .and_then(|v| v["slug"].as_str())
        .map(str::to_string)
        .ok_or_else(|| RiggingError::NotFound {
            kind: "kubernetes version",
            id: format!("{prefix}*"),
        })
}

async fn find_by_name(
    provider: &ClusterProvider,
    api: &ApiClient,
    name: &str,
) -> Result<Option<String>> {
    let body = provider.read(api, "/v2/kubernetes/clusters").await?;
    Ok(body["kubernetes_clusters"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|c| c["name"].as_str() == Some(name))
        .and_then(|c| c["id"].as_str())
        .map(str::to_string))
}

fn cluster_id(ctx: &OperationContext<'_>, cluster: &serde_json::Value) -> Result<String> {
    cluster["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RiggingError::ParseOutput {
            resource: ctx.name.to_string(),
            message: "response has no kubernetes_cluster.id".into(),
            raw: cluster.to_string(),
        })
}
