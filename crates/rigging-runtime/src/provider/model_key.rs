//! Model access keys issued over the model-key HTTP API.
//!
//! The key's `uuid` is recorded at create and used directly on delete.
//! Lookup by name is only a fallback for teardown without recorded state.

use async_trait::async_trait;
use reqwest::{Client, Method};
use rigging_common::constants::DEFAULT_MODEL_API_BASE;
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::{REDACTED, Sensitive};
use rigging_common::types::Operation;
use rigging_common::value::Value;
use rigging_compose::schema::{ModelKeyConfig, ResourceConfig};
use serde_json::json;

use super::http::ApiClient;
use super::{Attributes, EvaluatedConfig, OperationContext, Provider, opt_text, plain, text};

const KEYS_PATH: &str = "/models/api_keys";

/// Provider for [`ModelKeyConfig`] resources.
#[derive(Debug, Clone, Default)]
pub struct ModelKeyProvider {
    client: Client,
}

impl ModelKeyProvider {
    /// Creates a provider with its own HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn unpack<'a>(ctx: &OperationContext<'a>) -> Result<&'a ModelKeyConfig<Sensitive<Value>>> {
        match ctx.config {
            ResourceConfig::ModelKey(c) => Ok(c),
            _ => Err(ctx.wrong_kind("model key")),
        }
    }

    fn api(&self, ctx: &OperationContext<'_>) -> Result<(ApiClient, Sensitive<String>)> {
        let config = Self::unpack(ctx)?;
        let token = text(ctx, "token", &config.token)?;
        let base = opt_text(ctx, "api_base", config.api_base.as_ref())?
            .map_or_else(|| DEFAULT_MODEL_API_BASE.to_string(), Sensitive::into_exposed);
        let name = text(ctx, "name", &config.name)?;
        Ok((ApiClient::new(self.client.clone(), &base, token), name))
    }

    async fn issue(
        &self,
        ctx: &OperationContext<'_>,
        api: &ApiClient,
        name: &Sensitive<String>,
    ) -> Result<Attributes> {
        tracing::info!(resource = %ctx.name, key = %name, "creating model access key");
        let raw = api
            .send(Method::POST, KEYS_PATH, Some(&json!({ "name": name.expose() })))
            .await?;
        parse_issued_key(ctx.name, &Sensitive::secret(raw), name)
    }
}

/// Lists keys as `(uuid, name)` pairs.
async fn list_keys(api: &ApiClient) -> Result<Vec<(String, String)>> {
    let body = api.get_json(KEYS_PATH).await?;
    Ok(body["api_key_infos"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|info| {
            Some((
                info["uuid"].as_str()?.to_string(),
                info["name"].as_str().unwrap_or_default().to_string(),
            ))
        })
        .collect())
}

/// Extracts key attributes from a create response.
///
/// # Errors
///
/// Returns `RiggingError::ParseOutput` if the body is not JSON or lacks
/// `api_key_info.uuid` or `api_key_info.secret_key`. The raw body is
/// never included when it is secret.
///
/// The `name` attribute carries the secrecy of `requested`; `uuid` and
/// `created_at` are assigned by the API and plain.
pub fn parse_issued_key(
    resource: &str,
    raw: &Sensitive<String>,
    requested: &Sensitive<String>,
) -> Result<Attributes> {
    let parse_error = |message: String| RiggingError::ParseOutput {
        resource: resource.to_string(),
        message,
        raw: if raw.is_secret() {
            format!("{REDACTED} ({} bytes)", raw.expose().len())
        } else {
            raw.expose().clone()
        },
    };
    let body: serde_json::Value =
        serde_json::from_str(raw.expose()).map_err(|e| parse_error(e.to_string()))?;
    let info = &body["api_key_info"];
    let field = |key: &str| {
        info[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| parse_error(format!("response has no api_key_info.{key}")))
    };
    Ok(Attributes::from([
        ("uuid".to_string(), plain(field("uuid")?)),
        (
            "name".to_string(),
            requested
                .as_ref()
                .map(|requested| Value::String(field("name").unwrap_or_else(|_| requested.clone()))),
        ),
        (
            "created_at".to_string(),
            plain(field("created_at").unwrap_or_default()),
        ),
        (
            "secret_key".to_string(),
            Sensitive::secret(Value::String(field("secret_key")?)),
        ),
    ]))
}

#[async_trait]
impl Provider for ModelKeyProvider {
    fn name(&self) -> &'static str {
        "model-key"
    }

    fn retry_safe(&self, operation: Operation, _config: &EvaluatedConfig) -> bool {
        operation == Operation::Delete
    }

    async fn create(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        let (api, name) = self.api(ctx)?;
        self.issue(ctx, &api, &name).await
    }

    async fn update(&self, ctx: &OperationContext<'_>) -> Result<Attributes> {
        let (api, name) = self.api(ctx)?;
        let Some(uuid) = ctx.prior_text("uuid") else {
            return self.issue(ctx, &api, &name).await;
        };
        let listed = list_keys(&api).await?;
        match listed.iter().find(|(id, _)| *id == uuid) {
            Some((_, listed_name)) if listed_name == name.expose() => {
                tracing::debug!(resource = %ctx.name, key = %name, "model access key unchanged");
                Ok(ctx.prior.cloned().unwrap_or_default())
            }
            Some(_) => {
                let attrs = self.issue(ctx, &api, &name).await?;
                tracing::info!(resource = %ctx.name, uuid = %uuid, "revoking renamed model access key");
                api.delete(&format!("{KEYS_PATH}/{uuid}")).await?;
                Ok(attrs)
            }
            None => {
                tracing::warn!(resource = %ctx.name, uuid = %uuid, "recorded model access key is gone, reissuing");
                self.issue(ctx, &api, &name).await
            }
        }
    }

    async fn delete(&self, ctx: &OperationContext<'_>) -> Result<()> {
        let (api, name) = self.api(ctx)?;
        let uuid = match ctx.prior_text("uuid") {
            Some(uuid) => Some(uuid),
            None => list_keys(&api)
                .await?
                .into_iter()
                .find(|(_, n)| n == name.expose())
                .map(|(uuid, _)| uuid),
        };
        let Some(uuid) = uuid else {
            tracing::info!(resource = %ctx.name, key = %name, "model access key not found, nothing to delete");
            return Ok(());
        };
        tracing::info!(resource = %ctx.name, uuid = %uuid, "revoking model access key");
        api.delete(&format!("{KEYS_PATH}/{uuid}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> EvaluatedConfig {
        ResourceConfig::ModelKey(ModelKeyConfig {
            name: plain("cfgmgmtcamp-workshop-2026"),
            token: Sensitive::secret(Value::from("dop_v1_test")),
            api_base: Some(plain(base)),
        })
    }

    fn requested() -> Sensitive<String> {
        Sensitive::plain("cfgmgmtcamp-workshop-2026".to_string())
    }

    const ISSUED: &str = r#"{"api_key_info":{"uuid":"k-1","name":"cfgmgmtcamp-workshop-2026","created_at":"2026-02-02T09:00:00Z","secret_key":"sk-do-abc"}}"#;

    #[tokio::test]
    async fn create_extracts_secret_key_as_secret() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/models/api_keys")
            .match_header("authorization", "Bearer dop_v1_test")
            .match_body(mockito::Matcher::Json(json!({"name": "cfgmgmtcamp-workshop-2026"})))
            .with_body(ISSUED)
            .create_async()
            .await;
        let config = config(&server.url());
        let ctx = OperationContext {
            name: "key",
            config: &config,
            prior: None,
        };
        let attrs = ModelKeyProvider::new().create(&ctx).await.expect("issued");
        create.assert_async().await;
        assert!(attrs["secret_key"].is_secret());
        assert_eq!(attrs["secret_key"].expose(), &Value::from("sk-do-abc"));
        assert_eq!(attrs["uuid"].expose(), &Value::from("k-1"));
        assert!(!attrs["uuid"].is_secret());
        assert!(!attrs["name"].is_secret());
    }

    #[test]
    fn name_keeps_the_secrecy_of_the_requested_name() {
        let requested = Sensitive::secret("tenant-a-key".to_string());
        let raw = Sensitive::secret(
            r#"{"api_key_info":{"uuid":"k-2","name":"tenant-a-key","secret_key":"sk"}}"#.to_string(),
        );
        let attrs = parse_issued_key("key", &raw, &requested).expect("attrs");
        assert!(attrs["name"].is_secret());
        assert_eq!(attrs["name"].to_string(), REDACTED);
        assert_eq!(attrs["name"].expose(), &Value::from("tenant-a-key"));
        assert!(!attrs["uuid"].is_secret());
    }

    #[test]
    fn unparseable_response_never_leaks_the_body() {
        let raw = Sensitive::secret(r#"{"api_key_info":{"secret_key":"sk-do-abc"}"#.to_string());
        let err = parse_issued_key("key", &raw, &requested()).unwrap_err();
        let msg = err.to_string();
        assert!(!msg.contains("sk-do-abc"), "got: {msg}");
        assert!(matches!(err, RiggingError::ParseOutput { .. }));

        let missing_uuid = Sensitive::secret(r#"{"api_key_info":{"secret_key":"sk"}}"#.to_string());
        let err = parse_issued_key("key", &missing_uuid, &requested()).unwrap_err();
        assert!(err.to_string().contains("api_key_info.uuid"), "got: {err}");
    }

    #[test]
    fn plain_raw_output_is_included() {
        let raw = Sensitive::plain("<html>bad gateway</html>".to_string());
        let err = parse_issued_key("key", &raw, &requested()).unwrap_err();
        assert!(err.to_string().contains("bad gateway"), "got: {err}");
    }

    #[tokio::test]
    async fn delete_uses_recorded_uuid() {
        let mut server = mockito::Server::new_async().await;
        let list = server
            .mock("GET", "/models/api_keys")
            .expect(0)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/models/api_keys/k-1")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let config = config(&server.url());
        let prior = Attributes::from([("uuid".to_string(), plain("k-1"))]);
        let ctx = OperationContext {
            name: "key",
            config: &config,
            prior: Some(&prior),
        };
        ModelKeyProvider::new().delete(&ctx).await.expect("deleted");
        delete.assert_async().await;
        list.assert_async().await;
    }

    #[tokio::test]
    async fn delete_of_absent_key_succeeds_twice() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/models/api_keys")
            .with_body(r#"{"api_key_infos":[{"uuid":"k-9","name":"someone-else"}]}"#)
            .expect(2)
            .create_async()
            .await;
        let config = config(&server.url());
        let ctx = OperationContext {
            name: "key",
            config: &config,
            prior: None,
        };
        let provider = ModelKeyProvider::new();
        provider.delete(&ctx).await.expect("first delete");
        provider.delete(&ctx).await.expect("second delete");
    }

    #[tokio::test]
    async fn delete_of_already_revoked_uuid_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let _delete = server
            .mock("DELETE", "/models/api_keys/k-1")
            .with_status(404)
            .create_async()
            .await;
        let config = config(&server.url());
        let prior = Attributes::from([("uuid".to_string(), plain("k-1"))]);
        let ctx = OperationContext {
            name: "key",
            config: &config,
            prior: Some(&prior),
        };
        ModelKeyProvider::new().delete(&ctx).await.expect("idempotent");
    }

    #[tokio::test]
    async fn update_reuses_listed_key() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/models/api_keys")
            .with_body(r#"{"api_key_infos":[{"uuid":"k-1","name":"cfgmgmtcamp-workshop-2026"}]}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/models/api_keys")
            .expect(0)
            .create_async()
            .await;
        let config = config(&server.url());
        let prior = parse_issued_key("key", &Sensitive::secret(ISSUED.to_string()), &requested()).expect("attrs");
        let ctx = OperationContext {
            name: "key",
            config: &config,
            prior: Some(&prior),
        };
        let attrs = ModelKeyProvider::new().update(&ctx).await.expect("updated");
        assert_eq!(attrs["secret_key"].expose(), &Value::from("sk-do-abc"));
        create.assert_async().await;
    }
}
