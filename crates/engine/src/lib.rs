//! Bank-account linking through a financial-data aggregator.
//!
//! [`Linker`] drives the flow: it binds an outbound authorization to the
//! requesting user with a state token held in an [`AuthorizationStateStore`],
//! exchanges the callback code for a session through an
//! [`AggregatorGateway`], and records the resulting [`BankConnection`] and its
//! [`StoredBankAccount`]s. Disconnecting revokes consents on a best-effort
//! basis and deactivates the local records.

pub use bank_accounts::StoredBankAccount;
pub use bank_connections::BankConnection;
pub use error::{GatewayError, LinkError};
pub use gateway::{AggregatorGateway, AuthorizationStart, ConsentSummary};
pub use linker::{
    AccountDisconnected, CallbackParams, ConnectionStatus, ConsentSource,
    DEFAULT_CONNECTION_LIFETIME, DisconnectAllOutcome, LinkedConnection, Linker, LinkerBuilder,
};
pub use repository::ConnectionRepository;
pub use state_store::{AuthorizationStateStore, DEFAULT_STATE_TTL, generate_state_token};

pub mod amount;
pub mod bank_accounts;
pub mod bank_connections;
mod error;
mod gateway;
mod linker;
mod repository;
pub mod session;
mod state_store;

type ResultEngine<T> = Result<T, LinkError>;
