//! Shared JSON-over-HTTPS plumbing for the BitGo API clients

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tessera_core::{Result, TransportError};
use tracing::debug;

/// Authenticated client bound to one API base URL
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST `body` as JSON and decode a JSON response
    ///
    /// Non-success statuses are reported with their body; nothing is retried.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("POST {}", url);

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body);
        Self::send(request).await
    }

    /// GET `path` with query parameters and decode a JSON response
    pub async fn get_json<R>(&self, path: &str, query: &[(&str, &str)]) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("GET {}", url);

        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(query);
        Self::send(request).await
    }

    async fn send<R: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<R> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let decoded = response
            .json::<R>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(decoded)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}
