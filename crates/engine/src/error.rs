//! The module contains the errors the linking engine can throw.
//!
//! The errors are:
//!
//! - [`InvalidState`] thrown when a callback presents a missing, expired or
//!   already consumed state token.
//! - [`BankRejected`] thrown when the bank (through the aggregator) refused
//!   the authorization.
//! - [`SessionExchangeFailed`] thrown when the one-time code could not be
//!   exchanged for a session.
//! - [`SessionIdMissing`] thrown when the session document carries no usable
//!   session identifier.
//! - [`NotFound`] thrown when an account or connection lookup misses.
//!
//! Partial revocation failures are not errors: they are reported in the
//! disconnect outcomes.
//!
//!  [`InvalidState`]: LinkError::InvalidState
//!  [`BankRejected`]: LinkError::BankRejected
//!  [`SessionExchangeFailed`]: LinkError::SessionExchangeFailed
//!  [`SessionIdMissing`]: LinkError::SessionIdMissing
//!  [`NotFound`]: LinkError::NotFound
use sea_orm::DbErr;
use thiserror::Error;

/// Failures talking to the bank-data aggregator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("aggregator unreachable: {0}")]
    Transport(String),
    #[error("aggregator responded with status {status}")]
    Status { status: u16, message: String },
    #[error("unexpected aggregator response: {0}")]
    Decode(String),
}

/// Linking engine errors.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("invalid or expired state")]
    InvalidState,
    #[error("missing authorization parameters")]
    MissingParameters,
    #[error("bank rejected the authorization: {0}")]
    BankRejected(String),
    #[error("session exchange failed: {0}")]
    SessionExchangeFailed(GatewayError),
    #[error("session id missing from aggregator response")]
    SessionIdMissing,
    #[error("\"{0}\" not found!")]
    NotFound(String),
    #[error(transparent)]
    Transport(GatewayError),
    #[error("misconfigured linker: {0}")]
    Misconfigured(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for LinkError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidState, Self::InvalidState) => true,
            (Self::MissingParameters, Self::MissingParameters) => true,
            (Self::BankRejected(a), Self::BankRejected(b)) => a == b,
            (Self::SessionExchangeFailed(a), Self::SessionExchangeFailed(b)) => a == b,
            (Self::SessionIdMissing, Self::SessionIdMissing) => true,
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::Transport(a), Self::Transport(b)) => a == b,
            (Self::Misconfigured(a), Self::Misconfigured(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
