//! Bank-account linking: begin, callback, disconnect.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    AggregatorGateway, AuthorizationStateStore, BankConnection, ConnectionRepository, LinkError,
    ResultEngine, StoredBankAccount,
    session::{AccountsProbe, Probe, SessionDocument},
    state_store::{DEFAULT_STATE_TTL, generate_state_token},
};

/// Approximation of the aggregator's consent lifetime.
pub const DEFAULT_CONNECTION_LIFETIME: Duration = Duration::days(89);

/// Query parameters the aggregator sends back to the callback.
#[derive(Clone, Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where the consent id of a new connection came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsentSource {
    /// Issued when the authorization started.
    Authorization,
    /// Embedded in the session document.
    Session,
    /// Picked from the aggregator's consent list. May be wrong.
    Guessed,
    Unknown,
}

/// A successful callback.
#[derive(Clone, Debug)]
pub struct LinkedConnection {
    pub connection: BankConnection,
    pub accounts: Vec<StoredBankAccount>,
    pub consent_source: ConsentSource,
    pub skipped_accounts: usize,
    pub deactivated_connections: u64,
    /// Accounts of the deactivated connections, deleted with them.
    pub removed_accounts: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountDisconnected {
    /// The remote consent was revoked.
    pub consent_revoked: bool,
    /// The owning connection had no accounts left and was deactivated.
    pub connection_deactivated: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisconnectAllOutcome {
    pub revoked_consent_ids: Vec<String>,
    pub failed_consent_ids: Vec<String>,
    pub deactivated_connections: usize,
    /// Connections that could not be deactivated because of a database error.
    pub errored_connections: Vec<Uuid>,
    pub deleted_accounts: u64,
}

impl DisconnectAllOutcome {
    pub fn revoked_count(&self) -> usize {
        self.revoked_consent_ids.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_consent_ids.len()
    }
}

/// Snapshot of the user's current link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connection: Option<BankConnection>,
    pub expired: bool,
    pub account_count: u64,
}

pub struct Linker {
    states: Arc<AuthorizationStateStore>,
    gateway: Arc<dyn AggregatorGateway>,
    repository: ConnectionRepository,
    callback_url: String,
    state_ttl: Duration,
    connection_lifetime: Duration,
    guess_consent: bool,
}

impl std::fmt::Debug for Linker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linker")
            .field("callback_url", &self.callback_url)
            .field("pending_states", &self.states.pending())
            .finish_non_exhaustive()
    }
}

impl Linker {
    /// Return a builder for `Linker`. Help to build the struct.
    pub fn builder() -> LinkerBuilder {
        LinkerBuilder::default()
    }

    pub fn repository(&self) -> &ConnectionRepository {
        &self.repository
    }

    /// Start linking `user_id` to `bank` and return the URL the user must be
    /// sent to.
    ///
    /// Nothing durable is written, so a failing aggregator leaves no state
    /// behind except a pending token that expires on its own.
    pub async fn start_linking(
        &self,
        user_id: &str,
        bank: &str,
        country: &str,
    ) -> ResultEngine<String> {
        let state = generate_state_token(user_id);
        self.states.put(&state, user_id, self.state_ttl);

        let started = self
            .gateway
            .start_authorization(bank, country, &self.callback_url, &state)
            .await
            .map_err(|err| {
                tracing::error!(user_id, bank, "authorization start failed: {err:?}");
                LinkError::Transport(err)
            })?;

        if let Some(consent_id) = started.consent_id.as_deref() {
            self.states.put_consent_id(&state, consent_id);
        }
        tracing::info!(
            user_id,
            bank,
            country,
            consent_known = started.consent_id.is_some(),
            "authorization started"
        );
        Ok(started.authorization_url)
    }

    /// Complete a linking attempt from the aggregator's callback.
    ///
    /// The state token is consumed before talking to the aggregator, so a
    /// replayed callback fails with [`LinkError::InvalidState`] even if the
    /// first one failed later on.
    pub async fn handle_callback(&self, params: CallbackParams) -> ResultEngine<LinkedConnection> {
        let swept = self.states.sweep(Utc::now());
        if swept > 0 {
            tracing::debug!(swept, "dropped expired authorization states");
        }

        if let Some(error) = present(params.error) {
            let message = present(params.error_description).unwrap_or(error);
            tracing::warn!("bank rejected authorization: {message}");
            return Err(LinkError::BankRejected(message));
        }

        let (Some(code), Some(state)) = (present(params.code), present(params.state)) else {
            return Err(LinkError::MissingParameters);
        };

        let user_id = self.states.try_consume(&state).ok_or_else(|| {
            tracing::warn!("callback with invalid or expired state");
            LinkError::InvalidState
        })?;
        let correlated_consent = self.states.try_take_consent_id(&state);

        let document = self.gateway.create_session(&code).await.map_err(|err| {
            tracing::error!(user_id = %user_id, "session exchange failed: {err:?}");
            LinkError::SessionExchangeFailed(err)
        })?;

        let session = SessionDocument::new(&document);
        let session_id = match session.session_id() {
            Probe::Found { key, value } => {
                tracing::debug!(key, "session id found");
                value
            }
            Probe::NotFound => {
                tracing::error!(user_id = %user_id, "no session id in aggregator response");
                return Err(LinkError::SessionIdMissing);
            }
        };

        let (consent_id, consent_source) = match (correlated_consent, session.consent_id()) {
            (Some(id), _) => (Some(id), ConsentSource::Authorization),
            (None, Probe::Found { value, .. }) => (Some(value), ConsentSource::Session),
            (None, Probe::NotFound) if self.guess_consent => match self.guess_consent_id().await {
                Some(id) => (Some(id), ConsentSource::Guessed),
                None => (None, ConsentSource::Unknown),
            },
            (None, Probe::NotFound) => (None, ConsentSource::Unknown),
        };

        let connection = BankConnection::new(
            &user_id,
            session_id,
            consent_id,
            session.bank_name(),
            Utc::now() + self.connection_lifetime,
        );
        let (deactivated_connections, removed_accounts) =
            self.repository.replace_active_connection(&connection).await?;

        let (accounts, skipped_accounts) = self.materialize_accounts(&connection, &document).await;

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection.id,
            accounts = accounts.len(),
            skipped_accounts,
            deactivated_connections,
            removed_accounts,
            ?consent_source,
            "bank connection linked"
        );

        Ok(LinkedConnection {
            connection,
            accounts,
            consent_source,
            skipped_accounts,
            deactivated_connections,
            removed_accounts,
        })
    }

    /// Best-effort consent lookup: the consent expiring furthest in the
    /// future. With concurrent links this can attribute the wrong consent.
    async fn guess_consent_id(&self) -> Option<String> {
        let consents = match self.gateway.list_consents().await {
            Ok(consents) => consents,
            Err(err) => {
                tracing::warn!("could not list consents: {err}");
                return None;
            }
        };

        let now = Utc::now();
        let guess = consents
            .into_iter()
            .filter(|c| c.expires_at.is_none_or(|at| at > now))
            .max_by_key(|c| c.expires_at.unwrap_or(DateTime::<Utc>::MIN_UTC))
            .map(|c| c.consent_id);
        if let Some(consent_id) = guess.as_deref() {
            tracing::warn!(consent_id, "consent id is a guess from the aggregator's consent list");
        }
        guess
    }

    /// Store one account per parseable entry. Failures are logged and
    /// skipped; the connection stays either way.
    async fn materialize_accounts(
        &self,
        connection: &BankConnection,
        document: &Value,
    ) -> (Vec<StoredBankAccount>, usize) {
        let (parsed, mut skipped) = match SessionDocument::new(document).accounts() {
            AccountsProbe::NotFound => {
                tracing::warn!(connection_id = %connection.id, "session has no accounts");
                return (Vec::new(), 0);
            }
            AccountsProbe::Malformed => {
                tracing::warn!(connection_id = %connection.id, "session accounts are not a list");
                return (Vec::new(), 0);
            }
            AccountsProbe::Parsed { accounts, rejected } => {
                for entry in &rejected {
                    tracing::warn!(
                        connection_id = %connection.id,
                        index = entry.index,
                        "skipping account entry: {}",
                        entry.reason
                    );
                }
                (accounts, rejected.len())
            }
        };

        let mut stored = Vec::with_capacity(parsed.len());
        for parsed in parsed {
            let account = StoredBankAccount::from_parsed(&connection.user_id, connection.id, parsed);
            match self.repository.insert_account(&account).await {
                Ok(()) => stored.push(account),
                Err(err) => {
                    tracing::warn!(account_id = %account.account_id, "failed to store account: {err}");
                    skipped += 1;
                }
            }
        }
        (stored, skipped)
    }

    /// Remove one stored account. Removing the last account of a connection
    /// revokes its consent (best effort) and deactivates it.
    ///
    /// The account is deleted before the remaining ones are counted, and the
    /// connection is only retired by the call that flips `is_active`. Two
    /// concurrent disconnects of the last two accounts therefore revoke the
    /// consent exactly once.
    pub async fn disconnect_account(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> ResultEngine<AccountDisconnected> {
        let account = self
            .repository
            .account_for_user(account_id, user_id)
            .await?
            .ok_or_else(|| LinkError::NotFound("bank account".to_string()))?;

        let connection = self
            .repository
            .connection(account.bank_connection_id)
            .await?
            .ok_or_else(|| {
                tracing::error!(account_id = %account.id, "account points at a missing connection");
                LinkError::NotFound("bank connection".to_string())
            })?;

        if !self.repository.delete_account(account.id).await? {
            return Err(LinkError::NotFound("bank account".to_string()));
        }

        let remaining = self.repository.count_accounts(connection.id).await?;
        if remaining > 0 {
            tracing::info!(user_id, account_id = %account.id, remaining, "bank account disconnected");
            return Ok(AccountDisconnected {
                consent_revoked: false,
                connection_deactivated: false,
            });
        }

        if !self.repository.deactivate_if_active(connection.id).await? {
            tracing::debug!(connection_id = %connection.id, "connection already retired");
            return Ok(AccountDisconnected {
                consent_revoked: false,
                connection_deactivated: true,
            });
        }

        let consent_revoked = match connection.consent_id.as_deref() {
            Some(consent_id) => self.revoke(consent_id).await,
            None => false,
        };
        tracing::info!(
            user_id,
            connection_id = %connection.id,
            consent_revoked,
            "last bank account disconnected, connection deactivated"
        );

        Ok(AccountDisconnected {
            consent_revoked,
            connection_deactivated: true,
        })
    }

    /// Revoke and deactivate every active connection of `user_id`, then drop
    /// all of their stored accounts.
    ///
    /// Connections are handled one by one and independently: a failed
    /// revocation is reported, never rolled back or escalated. A database
    /// failure on one connection is recorded in
    /// [`DisconnectAllOutcome::errored_connections`] and the others proceed.
    pub async fn disconnect_all(&self, user_id: &str) -> ResultEngine<DisconnectAllOutcome> {
        let mut outcome = DisconnectAllOutcome::default();

        for connection in self.repository.active_connections(user_id).await? {
            if let Some(consent_id) = connection.consent_id.as_deref() {
                if self.revoke(consent_id).await {
                    outcome.revoked_consent_ids.push(consent_id.to_string());
                } else {
                    outcome.failed_consent_ids.push(consent_id.to_string());
                }
            }
            match self.repository.retire_connection(connection.id).await {
                Ok(removed) => {
                    outcome.deactivated_connections += 1;
                    outcome.deleted_accounts += removed;
                }
                Err(err) => {
                    tracing::error!(connection_id = %connection.id, "failed to retire connection: {err}");
                    outcome.errored_connections.push(connection.id);
                }
            }
        }

        outcome.deleted_accounts += self.repository.delete_accounts_for_user(user_id).await?;
        tracing::info!(
            user_id,
            revoked = outcome.revoked_count(),
            failed = outcome.failed_count(),
            deactivated = outcome.deactivated_connections,
            errored = outcome.errored_connections.len(),
            deleted_accounts = outcome.deleted_accounts,
            "bank connections disconnected"
        );
        Ok(outcome)
    }

    pub async fn list_accounts(&self, user_id: &str) -> ResultEngine<Vec<StoredBankAccount>> {
        self.repository.accounts_for_user(user_id).await
    }

    pub async fn connection_status(&self, user_id: &str) -> ResultEngine<ConnectionStatus> {
        let Some(connection) = self.repository.active_connections(user_id).await?.into_iter().next()
        else {
            return Ok(ConnectionStatus {
                connection: None,
                expired: false,
                account_count: 0,
            });
        };

        let account_count = self.repository.count_accounts(connection.id).await?;
        Ok(ConnectionStatus {
            expired: connection.is_expired(Utc::now()),
            connection: Some(connection),
            account_count,
        })
    }

    async fn revoke(&self, consent_id: &str) -> bool {
        match self.gateway.revoke_consent(consent_id).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(consent_id, "consent revocation failed: {err}");
                false
            }
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// The builder for `Linker`
#[derive(Default)]
pub struct LinkerBuilder {
    database: Option<DatabaseConnection>,
    gateway: Option<Arc<dyn AggregatorGateway>>,
    states: Option<Arc<AuthorizationStateStore>>,
    callback_url: Option<String>,
    state_ttl: Option<Duration>,
    connection_lifetime: Option<Duration>,
    guess_consent: Option<bool>,
}

impl LinkerBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> LinkerBuilder {
        self.database = Some(db);
        self
    }

    /// Pass the required aggregator
    pub fn gateway(mut self, gateway: Arc<dyn AggregatorGateway>) -> LinkerBuilder {
        self.gateway = Some(gateway);
        self
    }

    /// Share an existing state store. A fresh one is created otherwise.
    pub fn states(mut self, states: Arc<AuthorizationStateStore>) -> LinkerBuilder {
        self.states = Some(states);
        self
    }

    /// Pass the required URL the aggregator redirects back to
    pub fn callback_url(mut self, url: impl Into<String>) -> LinkerBuilder {
        self.callback_url = Some(url.into());
        self
    }

    pub fn state_ttl(mut self, ttl: Duration) -> LinkerBuilder {
        self.state_ttl = Some(ttl);
        self
    }

    pub fn connection_lifetime(mut self, lifetime: Duration) -> LinkerBuilder {
        self.connection_lifetime = Some(lifetime);
        self
    }

    /// Whether a callback without a known consent id may guess one from the
    /// aggregator's consent list.
    pub fn guess_consent(mut self, enabled: bool) -> LinkerBuilder {
        self.guess_consent = Some(enabled);
        self
    }

    /// Construct `Linker`
    pub fn build(self) -> ResultEngine<Linker> {
        let database = self
            .database
            .ok_or_else(|| LinkError::Misconfigured("database is required".to_string()))?;
        let gateway = self
            .gateway
            .ok_or_else(|| LinkError::Misconfigured("gateway is required".to_string()))?;
        let callback_url = self
            .callback_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| LinkError::Misconfigured("callback url is required".to_string()))?;

        Ok(Linker {
            states: self.states.unwrap_or_default(),
            gateway,
            repository: ConnectionRepository::new(database),
            callback_url,
            state_ttl: self.state_ttl.unwrap_or(DEFAULT_STATE_TTL),
            connection_lifetime: self
                .connection_lifetime
                .unwrap_or(DEFAULT_CONNECTION_LIFETIME),
            guess_consent: self.guess_consent.unwrap_or(true),
        })
    }
}
