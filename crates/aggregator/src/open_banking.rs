//! PSD2 Open Banking aggregator (Enable Banking style API).
//!
//! The aggregator issues an authorization id when the flow starts, which is
//! the consent id used later for revocation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine::{AggregatorGateway, AuthorizationStart, ConsentSummary, GatewayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ApiClient, ConfigError};

#[derive(Clone, Debug)]
pub struct OpenBankingGateway {
    api: ApiClient,
    app_token: String,
    consent_valid_days: i64,
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    access: Access,
    aspsp: Aspsp<'a>,
    state: &'a str,
    redirect_url: &'a str,
    psu_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Access {
    valid_until: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct Aspsp<'a> {
    name: &'a str,
    country: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    url: String,
    #[serde(default, alias = "consent_id")]
    authorization_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConsentList {
    #[serde(default)]
    consents: Vec<ConsentEntry>,
}

#[derive(Debug, Deserialize)]
struct ConsentEntry {
    #[serde(alias = "consent_id", alias = "uid")]
    id: String,
    #[serde(default, alias = "expires_at")]
    valid_until: Option<DateTime<Utc>>,
}

impl OpenBankingGateway {
    pub fn new(
        base_url: &str,
        app_token: impl Into<String>,
        consent_valid_days: i64,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout)?,
            app_token: app_token.into(),
            consent_valid_days,
        })
    }
}

#[async_trait]
impl AggregatorGateway for OpenBankingGateway {
    async fn start_authorization(
        &self,
        bank: &str,
        country: &str,
        callback_url: &str,
        state: &str,
    ) -> Result<AuthorizationStart, GatewayError> {
        let body = AuthRequest {
            access: Access {
                valid_until: Utc::now() + chrono::Duration::days(self.consent_valid_days),
            },
            aspsp: Aspsp {
                name: bank,
                country,
            },
            state,
            redirect_url: callback_url,
            psu_type: "personal",
        };

        let resp: AuthResponse = self
            .api
            .send_json(
                self.api
                    .post(&["auth"])
                    .bearer_auth(&self.app_token)
                    .json(&body),
            )
            .await?;

        Ok(AuthorizationStart {
            authorization_url: resp.url,
            consent_id: resp.authorization_id.filter(|id| !id.is_empty()),
        })
    }

    async fn create_session(&self, code: &str) -> Result<Value, GatewayError> {
        self.api
            .send_json(
                self.api
                    .post(&["sessions"])
                    .bearer_auth(&self.app_token)
                    .json(&SessionRequest { code }),
            )
            .await
    }

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), GatewayError> {
        let result = self
            .api
            .send_unit(
                self.api
                    .delete(&["consents", consent_id])
                    .bearer_auth(&self.app_token),
            )
            .await;

        match result {
            Err(GatewayError::Status { status: 404 | 410, .. }) => {
                tracing::debug!(consent_id, "consent already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn list_consents(&self) -> Result<Vec<ConsentSummary>, GatewayError> {
        let list: ConsentList = self
            .api
            .send_json(self.api.get(&["consents"]).bearer_auth(&self.app_token))
            .await?;

        Ok(list
            .consents
            .into_iter()
            .map(|entry| ConsentSummary {
                consent_id: entry.id,
                expires_at: entry.valid_until,
            })
            .collect())
    }
}
