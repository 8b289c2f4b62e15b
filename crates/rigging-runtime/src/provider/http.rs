//! Bearer-token JSON client shared by the cloud and model-key providers.

use reqwest::{Client, Method};
use rigging_common::error::{Result, RiggingError};
use rigging_common::secret::Sensitive;

const MAX_ERROR_BODY: usize = 512;

/// Client for one HTTP API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
    token: Sensitive<String>,
}

impl ApiClient {
    /// Creates a client for `base_url` authenticating with `token`.
    pub fn new(client: Client, base_url: &str, token: Sensitive<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: token.into_secret(),
        }
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request and returns the response body text.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Http` with the status for non-2xx responses
    /// and without a status for transport failures.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(method = %method, url = %url, "api request");

        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(self.token.expose())
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| RiggingError::Http {
            status: None,
            message: format!("{url}: {e}"),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| RiggingError::Http {
            status: Some(status.as_u16()),
            message: format!("{url}: reading body: {e}"),
        })?;

        if status.is_success() {
            Ok(text)
        } else {
            let mut detail: String = text.chars().take(MAX_ERROR_BODY).collect();
            if detail.trim().is_empty() {
                detail = status.canonical_reason().unwrap_or("request failed").to_string();
            }
            Err(RiggingError::Http {
                status: Some(status.as_u16()),
                message: format!("{url}: {}", detail.trim()),
            })
        }
    }

    /// `GET` decoded as JSON.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send); also fails if the body is not JSON.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let text = self.send(Method::GET, path, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// `POST` a JSON body and decode the JSON response.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send); also fails if the body is not JSON.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let text = self.send(Method::POST, path, Some(body)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// `DELETE`; a 404 counts as success.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn delete(&self, path: &str) -> Result<()> {
        match self.send(Method::DELETE, path, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                tracing::debug!(path, "already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Returns whether `err` is an HTTP 404.
#[must_use]
pub const fn is_not_found(err: &RiggingError) -> bool {
    matches!(err, RiggingError::Http { status: Some(404), .. })
}
