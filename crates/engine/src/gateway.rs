//! The outbound side of linking: the bank-data aggregator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::GatewayError;

/// Result of starting an authorization with the aggregator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationStart {
    /// Where the user must be redirected to authenticate with the bank.
    pub authorization_url: String,
    /// Consent id, when the aggregator issues one synchronously.
    pub consent_id: Option<String>,
}

/// A consent as listed by the aggregator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentSummary {
    pub consent_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Operations the linking flow needs from an aggregator.
///
/// Implementations must not fail `revoke_consent` for a consent that is
/// already revoked.
#[async_trait]
pub trait AggregatorGateway: Send + Sync {
    /// Begin an authorization for `bank` in `country`. The aggregator will
    /// redirect back to `callback_url` echoing `state`.
    async fn start_authorization(
        &self,
        bank: &str,
        country: &str,
        callback_url: &str,
        state: &str,
    ) -> Result<AuthorizationStart, GatewayError>;

    /// Exchange a one-time code for a session document.
    async fn create_session(&self, code: &str) -> Result<Value, GatewayError>;

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), GatewayError>;

    async fn list_consents(&self) -> Result<Vec<ConsentSummary>, GatewayError>;
}
