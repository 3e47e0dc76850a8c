//! HTTP transport shared by the JSON-speaking adapters.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SourceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A JSON-over-HTTP endpoint. Abstracted so tests can substitute canned
/// responses for a live route server.
#[async_trait]
pub trait JsonApi: Send + Sync {
    /// Fetch `path` relative to the API root and decode the JSON body.
    async fn get_json(&self, path: &str) -> Result<Value, SourceError>;
}

/// Production client backed by reqwest.
pub struct RestClient {
    base: String,
    http: reqwest::Client,
}

impl RestClient {
    /// Build a client for `host`. A bare `host:port` is treated as HTTP;
    /// `insecure` additionally disables TLS certificate verification for
    /// lab deployments with self-signed route server shims.
    pub fn new(host: &str, insecure: bool) -> Result<Self, SourceError> {
        let base = if host.contains("://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|err| SourceError::Unreachable(err.to_string()))?;
        Ok(Self { base, http })
    }
}

#[async_trait]
impl JsonApi for RestClient {
    async fn get_json(&self, path: &str) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| SourceError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Protocol(format!(
                "unexpected status {status} from {url}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| SourceError::Protocol(err.to_string()))
    }
}
