use axum::{
    Router,
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Error as AxumError, Header},
    typed_header::TypedHeaderRejection,
};
use url::Url;

use std::sync::Arc;

use crate::banking;
use engine::Linker;

static USER_ID_HEADER: axum::http::HeaderName = axum::http::HeaderName::from_static("x-user-id");

#[derive(Clone)]
pub struct ServerState {
    pub linker: Arc<Linker>,
    pub frontend: FrontendRedirect,
}

/// Frontend page the bank callback lands the user on.
#[derive(Clone, Debug)]
pub struct FrontendRedirect {
    target: Url,
}

impl FrontendRedirect {
    pub fn new(frontend_url: &str, callback_path: &str) -> Result<Self, url::ParseError> {
        let path = if callback_path.starts_with('/') || callback_path.is_empty() {
            callback_path.to_string()
        } else {
            format!("/{callback_path}")
        };
        let target = Url::parse(&format!("{}{path}", frontend_url.trim_end_matches('/')))?;
        Ok(Self { target })
    }

    pub fn success(&self) -> String {
        self.with_query("success", "true")
    }

    pub fn error(&self, message: &str) -> String {
        self.with_query("error", message)
    }

    fn with_query(&self, key: &str, value: &str) -> String {
        let mut url = self.target.clone();
        url.query_pairs_mut().append_pair(key, value);
        url.into()
    }
}

/// Identity of the caller, as asserted by the upstream authentication layer.
#[derive(Clone, Debug)]
pub(crate) struct UserId(pub String);

/// `TypedHeader` for the upstream-verified user id.
///
/// Every request outside the bank callback must carry a non-empty
/// "x-user-id" entry in the header.
#[derive(Debug)]
struct UserIdHeader(String);

impl Header for UserIdHeader {
    fn name() -> &'static axum::http::HeaderName {
        &USER_ID_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, AxumError>
    where
        Self: Sized,
        I: Iterator<Item = &'i axum::http::HeaderValue>,
    {
        let value = values.next().ok_or_else(AxumError::invalid)?;
        let Ok(value) = value.to_str() else {
            return Err(AxumError::invalid());
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(AxumError::invalid());
        }

        Ok(UserIdHeader(value.to_string()))
    }

    fn encode<E: Extend<axum::http::HeaderValue>>(&self, values: &mut E) {
        match axum::http::HeaderValue::from_str(&self.0) {
            Ok(value) => values.extend(std::iter::once(value)),
            Err(_) => tracing::error!("failed to encode x-user-id header"),
        }
    }
}

async fn identity(
    user_header: Result<TypedHeader<UserIdHeader>, TypedHeaderRejection>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Ok(TypedHeader(UserIdHeader(user_id))) = user_header else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    request.extensions_mut().insert(UserId(user_id));
    Ok(next.run(request).await)
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/banking/link", post(banking::link))
        .route(
            "/banking/accounts",
            get(banking::list_accounts).delete(banking::disconnect_all),
        )
        .route("/banking/accounts/{id}", delete(banking::disconnect_account))
        .route("/banking/status", get(banking::status))
        .route_layer(middleware::from_fn(identity))
        // The aggregator redirects the browser here: the state token
        // carries the user binding instead of the header.
        .route("/banking/callback", get(banking::callback))
        .with_state(state)
}

pub async fn run_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state)).await
}

pub fn spawn_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<std::net::SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(state, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
