//! In-memory correlation of outbound authorization requests and callbacks.
//!
//! A state token binds a linking attempt to the user who started it. The
//! aggregator echoes the token back on the callback, where it is consumed
//! exactly once. A second table keeps the consent id the aggregator may hand
//! out when the authorization starts.
//!
//! The store lives in process memory: it is not shared between server
//! instances, and a restart drops every in-flight authorization.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lifetime of a state token.
pub const DEFAULT_STATE_TTL: Duration = Duration::minutes(10);

#[derive(Clone, Debug)]
struct PendingState {
    user_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct PendingConsent {
    consent_id: String,
    expires_at: DateTime<Utc>,
}

/// Process-wide table of pending authorizations.
///
/// Create one at startup and share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct AuthorizationStateStore {
    states: DashMap<String, PendingState>,
    consents: DashMap<String, PendingConsent>,
}

impl AuthorizationStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token` to `user_id` until `ttl` elapses. A colliding token is
    /// overwritten.
    pub fn put(&self, token: &str, user_id: &str, ttl: Duration) {
        let expires_at = Utc::now() + ttl;
        self.states.insert(
            token.to_string(),
            PendingState {
                user_id: user_id.to_string(),
                expires_at,
            },
        );
    }

    /// Atomically remove the entry for `token` and return its user.
    ///
    /// Absent and expired tokens both yield `None`. Under concurrent calls
    /// with the same token at most one caller gets `Some`.
    pub fn try_consume(&self, token: &str) -> Option<String> {
        let (_, state) = self.states.remove(token)?;
        if state.expires_at < Utc::now() {
            return None;
        }
        Some(state.user_id)
    }

    /// Remember the consent id issued for `token`. The entry expires together
    /// with the state it belongs to.
    pub fn put_consent_id(&self, token: &str, consent_id: &str) {
        let expires_at = self
            .states
            .get(token)
            .map(|state| state.expires_at)
            .unwrap_or_else(|| Utc::now() + DEFAULT_STATE_TTL);
        self.consents.insert(
            token.to_string(),
            PendingConsent {
                consent_id: consent_id.to_string(),
                expires_at,
            },
        );
    }

    /// Remove and return the consent id for `token`, if any.
    pub fn try_take_consent_id(&self, token: &str) -> Option<String> {
        let (_, consent) = self.consents.remove(token)?;
        if consent.expires_at < Utc::now() {
            return None;
        }
        Some(consent.consent_id)
    }

    /// Drop every entry that expired before `now`. Returns how many states
    /// were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| state.expires_at >= now);
        self.consents.retain(|_, consent| consent.expires_at >= now);
        before.saturating_sub(self.states.len())
    }

    pub fn pending(&self) -> usize {
        self.states.len()
    }
}

/// Generate an unguessable state token for `user_id`.
///
/// SHA-256 over the user id, the current timestamp and a random UUID,
/// encoded as unpadded base64url.
pub fn generate_state_token(user_id: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(nanos.to_be_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
