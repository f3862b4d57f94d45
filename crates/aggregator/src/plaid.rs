//! Plaid, through Hosted Link.
//!
//! Plaid has no separate consent object: the Item's access token is both the
//! session and the handle used to remove the Item, so it is reported as the
//! consent id as well.
//!
//! Hosted Link does not put the public token on the completion redirect. Each
//! start registers a random handoff key, sent back to us as `code`, mapped to
//! its link token. The callback then resolves the public token through
//! `link/token/get`. The map is in-process, like the authorization state
//! store, and entries live as long as a link token (4 hours).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engine::{AggregatorGateway, AuthorizationStart, ConsentSummary, GatewayError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{ApiClient, ConfigError};

/// Error codes Plaid returns for an Item that no longer exists.
const GONE_ITEM_CODES: [&str; 2] = ["ITEM_NOT_FOUND", "INVALID_ACCESS_TOKEN"];

const LINK_TOKEN_LIFETIME_HOURS: i64 = 4;

#[derive(Clone, Debug)]
pub struct PlaidGateway {
    api: ApiClient,
    client_id: String,
    secret: String,
    client_name: String,
    products: Vec<String>,
    pending: Arc<DashMap<String, PendingLink>>,
}

#[derive(Clone, Debug)]
struct PendingLink {
    link_token: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct LinkTokenRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    client_name: &'a str,
    language: &'static str,
    country_codes: [&'a str; 1],
    user: LinkUser<'a>,
    products: &'a [String],
    hosted_link: HostedLink,
}

#[derive(Debug, Serialize)]
struct LinkUser<'a> {
    client_user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct HostedLink {
    completion_redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct LinkTokenResponse {
    link_token: String,
    hosted_link_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkTokenDetails {
    #[serde(default)]
    link_sessions: Vec<LinkSession>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkSession {
    #[serde(default)]
    results: Option<LinkResults>,
    #[serde(default)]
    on_success: Option<LinkSuccess>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkResults {
    #[serde(default)]
    item_add_results: Vec<ItemAddResult>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemAddResult {
    public_token: Option<String>,
    institution: Option<Institution>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkSuccess {
    public_token: Option<String>,
    metadata: Option<SuccessMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct SuccessMetadata {
    institution: Option<Institution>,
}

#[derive(Debug, Default, Deserialize)]
struct Institution {
    name: Option<String>,
}

/// Public token and institution of a completed Link flow.
#[derive(Debug, PartialEq)]
struct CompletedLink {
    public_token: String,
    institution_name: Option<String>,
}

impl LinkTokenDetails {
    /// Latest item added, falling back to the `onSuccess` payload.
    fn completed(self) -> Option<CompletedLink> {
        for session in self.link_sessions.into_iter().rev() {
            let added = session
                .results
                .and_then(|results| results.item_add_results.into_iter().next_back());
            if let Some(ItemAddResult {
                public_token: Some(public_token),
                institution,
            }) = added
            {
                return Some(CompletedLink {
                    public_token,
                    institution_name: institution.and_then(|i| i.name),
                });
            }
            if let Some(LinkSuccess {
                public_token: Some(public_token),
                metadata,
            }) = session.on_success
            {
                return Some(CompletedLink {
                    public_token,
                    institution_name: metadata.and_then(|m| m.institution).and_then(|i| i.name),
                });
            }
        }
        None
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<Value>,
}

impl PlaidGateway {
    pub fn new(
        base_url: &str,
        client_id: impl Into<String>,
        secret: impl Into<String>,
        client_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout)?,
            client_id: client_id.into(),
            secret: secret.into(),
            client_name: client_name.into(),
            products: vec!["transactions".to_string()],
            pending: Arc::new(DashMap::new()),
        })
    }

    /// Link flows started by this gateway and not completed yet.
    pub fn pending_links(&self) -> usize {
        self.pending.len()
    }

    fn forget_stale_links(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(LINK_TOKEN_LIFETIME_HOURS);
        self.pending.retain(|_, link| link.created_at > cutoff);
    }

    async fn completed_link(&self, link_token: &str) -> Result<CompletedLink, GatewayError> {
        let details: LinkTokenDetails = self
            .api
            .send_json(
                self.api
                    .post(&["link", "token", "get"])
                    .json(&self.with_credentials(json!({"link_token": link_token}))),
            )
            .await?;
        details
            .completed()
            .ok_or_else(|| GatewayError::Decode("link session has no public token".to_string()))
    }

    fn credentials(&self) -> Value {
        json!({"client_id": self.client_id, "secret": self.secret})
    }

    fn with_credentials(&self, extra: Value) -> Value {
        let mut body = self.credentials();
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }
        body
    }
}

#[async_trait]
impl AggregatorGateway for PlaidGateway {
    async fn start_authorization(
        &self,
        bank: &str,
        country: &str,
        callback_url: &str,
        state: &str,
    ) -> Result<AuthorizationStart, GatewayError> {
        // Plaid Link lets the user pick the institution.
        tracing::debug!(bank, "institution is chosen inside Plaid Link");

        let mut completion = Url::parse(callback_url)
            .map_err(|_| GatewayError::Decode(format!("invalid callback url {callback_url}")))?;
        let handoff = uuid::Uuid::new_v4().simple().to_string();
        completion
            .query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code", &handoff);

        let body = LinkTokenRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            client_name: &self.client_name,
            language: "en",
            country_codes: [country],
            user: LinkUser {
                client_user_id: state,
            },
            products: &self.products,
            hosted_link: HostedLink {
                completion_redirect_uri: completion.into(),
            },
        };

        let resp: LinkTokenResponse = self
            .api
            .send_json(self.api.post(&["link", "token", "create"]).json(&body))
            .await?;
        let authorization_url = resp
            .hosted_link_url
            .ok_or_else(|| GatewayError::Decode("missing hosted_link_url".to_string()))?;

        self.forget_stale_links();
        self.pending.insert(
            handoff,
            PendingLink {
                link_token: resp.link_token,
                created_at: Utc::now(),
            },
        );

        Ok(AuthorizationStart {
            authorization_url,
            consent_id: None,
        })
    }

    /// `code` is the handoff key put on the completion redirect. It is
    /// single use.
    async fn create_session(&self, code: &str) -> Result<Value, GatewayError> {
        let Some((_, pending)) = self.pending.remove(code) else {
            return Err(GatewayError::Decode("unknown link session".to_string()));
        };
        let completed = self.completed_link(&pending.link_token).await?;

        let exchange: ExchangeResponse = self
            .api
            .send_json(
                self.api
                    .post(&["item", "public_token", "exchange"])
                    .json(&self.with_credentials(json!({"public_token": completed.public_token}))),
            )
            .await?;

        let mut session = json!({
            "session_id": exchange.access_token,
            "consent_id": exchange.access_token,
            "item_id": exchange.item_id,
        });
        if let Some(name) = completed.institution_name {
            session["institution_name"] = Value::String(name);
        }

        let accounts: Result<AccountsResponse, _> = self
            .api
            .send_json(
                self.api
                    .post(&["accounts", "get"])
                    .json(&self.with_credentials(json!({"access_token": exchange.access_token}))),
            )
            .await;
        match accounts {
            Ok(resp) => session["accounts"] = Value::Array(resp.accounts),
            Err(err) => tracing::warn!(item_id = %exchange.item_id, "could not fetch accounts: {err}"),
        }

        Ok(session)
    }

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), GatewayError> {
        let result = self
            .api
            .send_unit(
                self.api
                    .post(&["item", "remove"])
                    .json(&self.with_credentials(json!({"access_token": consent_id}))),
            )
            .await;

        match result {
            Err(GatewayError::Status { message, .. })
                if GONE_ITEM_CODES.contains(&message.as_str()) =>
            {
                tracing::debug!("plaid item already removed");
                Ok(())
            }
            other => other,
        }
    }

    async fn list_consents(&self) -> Result<Vec<ConsentSummary>, GatewayError> {
        // Items are only reachable through their access tokens.
        Ok(Vec::new())
    }
}
