use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::LinkError;

use serde::Serialize;
pub use server::{FrontendRedirect, ServerState, router, run_with_listener, spawn_with_listener};

mod banking;
mod server;

pub mod types {
    pub mod banking {
        pub use api_types::banking::{
            AccountDisconnected, AllDisconnected, BankAccount, BankAccountList, CallbackQuery,
            ConnectionStatus, LinkRequest, LinkStarted,
        };
    }
}

pub enum ServerError {
    Link(LinkError),
    Generic(String),
}

#[derive(Serialize)]
struct Error {
    error: String,
}

fn status_for_link_error(err: &LinkError) -> StatusCode {
    match err {
        LinkError::NotFound(_) => StatusCode::NOT_FOUND,
        LinkError::Transport(_) => StatusCode::BAD_GATEWAY,
        LinkError::Database(_) | LinkError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LinkError::InvalidState
        | LinkError::MissingParameters
        | LinkError::BankRejected(_)
        | LinkError::SessionExchangeFailed(_)
        | LinkError::SessionIdMissing => StatusCode::BAD_REQUEST,
    }
}

pub(crate) fn message_for_link_error(err: LinkError) -> String {
    match err {
        LinkError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        LinkError::Misconfigured(reason) => {
            tracing::error!("misconfigured linker: {reason}");
            "internal server error".to_string()
        }
        LinkError::Transport(gateway_err) => {
            tracing::error!("aggregator failure: {gateway_err:?}");
            "bank aggregator unavailable".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ServerError::Link(err) => (status_for_link_error(&err), message_for_link_error(err)),
            ServerError::Generic(err) => (StatusCode::BAD_REQUEST, err),
        };

        (status, Json(Error { error })).into_response()
    }
}

impl From<LinkError> for ServerError {
    fn from(value: LinkError) -> Self {
        Self::Link(value)
    }
}
