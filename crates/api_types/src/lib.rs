use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod banking {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct LinkRequest {
        /// Bank (ASPSP) name as the aggregator knows it.
        pub bank: String,
        /// ISO 3166-1 alpha-2 country code.
        pub country: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct LinkStarted {
        /// Where the user must be sent to authorize access.
        pub authorization_url: String,
    }

    /// Query string of the aggregator's redirect back to us.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct CallbackQuery {
        pub code: Option<String>,
        pub state: Option<String>,
        pub error: Option<String>,
        pub error_description: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BankAccount {
        /// Local id, used to disconnect the account.
        pub id: Uuid,
        pub bank_connection_id: Uuid,
        /// Aggregator-side account id.
        pub account_id: String,
        pub currency: String,
        pub name: Option<String>,
        pub account_type: Option<String>,
        pub iban: Option<String>,
        /// Balance in minor units of `currency`.
        pub balance_minor: Option<i64>,
        pub last_balance_update: Option<DateTime<Utc>>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BankAccountList {
        pub accounts: Vec<BankAccount>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AccountDisconnected {
        pub success: bool,
        pub consent_revoked: bool,
        pub connection_deactivated: bool,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AllDisconnected {
        /// `false` when some connection could not be deactivated.
        pub success: bool,
        pub revoked_count: usize,
        pub failed_count: usize,
        pub revoked_consent_ids: Vec<String>,
        pub failed_consent_ids: Vec<String>,
        pub deactivated_connections: usize,
        pub errored_connections: usize,
        pub deleted_accounts: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ConnectionStatus {
        pub connected: bool,
        pub bank_name: Option<String>,
        pub connected_at: Option<DateTime<Utc>>,
        pub expires_at: Option<DateTime<Utc>>,
        pub expired: bool,
        pub account_count: u64,
    }
}
