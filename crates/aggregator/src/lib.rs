//! HTTP adapters for the bank-data aggregators the linking engine talks to.
//!
//! - [`OpenBankingGateway`]: a PSD2-style REST API with explicit consents.
//! - [`PlaidGateway`]: Plaid Link with hosted authorization.

use std::time::Duration;

use engine::GatewayError;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use open_banking::OpenBankingGateway;
pub use plaid::PlaidGateway;

mod open_banking;
mod plaid;

/// Keys probed, in order, for a human-readable code in error bodies.
const ERROR_KEYS: [&str; 4] = ["error_code", "error", "message", "error_message"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid aggregator base url \"{0}\"")]
    InvalidBaseUrl(String),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Thin JSON client shared by the adapters.
#[derive(Clone, Debug)]
pub(crate) struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let mut base_url =
            Url::parse(base_url).map_err(|_| ConfigError::InvalidBaseUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl(base_url.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Join path segments onto the base url, percent-encoding each one.
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn get(&self, segments: &[&str]) -> RequestBuilder {
        self.client.get(self.url(segments))
    }

    pub(crate) fn post(&self, segments: &[&str]) -> RequestBuilder {
        self.client.post(self.url(segments))
    }

    pub(crate) fn delete(&self, segments: &[&str]) -> RequestBuilder {
        self.client.delete(self.url(segments))
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let resp = request.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|err| GatewayError::Decode(err.to_string()));
        }
        Err(status_error(status, resp).await)
    }

    pub(crate) async fn send_unit(&self, request: RequestBuilder) -> Result<(), GatewayError> {
        let resp = request.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        Err(status_error(status, resp).await)
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::Transport("request timed out".to_string());
    }
    GatewayError::Transport(err.without_url().to_string())
}

async fn status_error(status: StatusCode, resp: reqwest::Response) -> GatewayError {
    let message = match resp.json::<Value>().await {
        Ok(body) => {
            tracing::debug!(%status, %body, "aggregator error body");
            ERROR_KEYS
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str))
                .unwrap_or("server error")
                .to_string()
        }
        Err(_) => "server error".to_string(),
    };
    GatewayError::Status {
        status: status.as_u16(),
        message,
    }
}
