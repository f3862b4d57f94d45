use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use engine::{
    AggregatorGateway, AuthorizationStart, ConsentSummary, GatewayError, Linker,
};
use http_body_util::BodyExt;
use migration::MigratorTrait;
use sea_orm::Database;
use serde_json::{Value, json};
use server::{FrontendRedirect, ServerState};
use tower::ServiceExt;
use url::Url;

const USER: &str = "user-1";

/// Gateway that hands out one account per session and records revocations.
#[derive(Default)]
struct ScriptedGateway {
    failing_revocations: HashSet<String>,
    revoked: Mutex<Vec<String>>,
}

#[async_trait]
impl AggregatorGateway for ScriptedGateway {
    async fn start_authorization(
        &self,
        _bank: &str,
        _country: &str,
        _callback_url: &str,
        state: &str,
    ) -> Result<AuthorizationStart, GatewayError> {
        Ok(AuthorizationStart {
            authorization_url: format!("https://bank.test/authorize?state={state}"),
            consent_id: Some(format!("consent-{state}")),
        })
    }

    async fn create_session(&self, code: &str) -> Result<Value, GatewayError> {
        if code == "bad-code" {
            return Err(GatewayError::Status {
                status: 400,
                message: "INVALID_CODE".to_string(),
            });
        }
        Ok(json!({
            "session_id": format!("session-{code}"),
            "aspsp": {"name": "Test Bank"},
            "accounts": [
                {"uid": format!("acc-{code}"), "currency": "EUR", "name": "Main",
                 "balance": {"amount": "12.34"}}
            ],
        }))
    }

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), GatewayError> {
        if self.failing_revocations.contains(consent_id) {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        self.revoked.lock().unwrap().push(consent_id.to_string());
        Ok(())
    }

    async fn list_consents(&self) -> Result<Vec<ConsentSummary>, GatewayError> {
        Ok(Vec::new())
    }
}

async fn app(gateway: Arc<ScriptedGateway>) -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();

    let linker = Linker::builder()
        .database(db)
        .gateway(gateway)
        .callback_url("http://localhost:3000/banking/callback")
        .build()
        .unwrap();

    server::router(ServerState {
        linker: Arc::new(linker),
        frontend: FrontendRedirect::new("http://frontend.test", "/banking").unwrap(),
    })
}

fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", USER)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// Start linking and return the state token embedded in the bank URL.
async fn start_link(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(
            request("POST", "/banking/link")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"bank":"Test Bank","country":"FI"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let url = Url::parse(body["authorization_url"].as_str().unwrap()).unwrap();
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap()
}

async fn complete_link(app: &Router, code: &str, state: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(format!("/banking/callback?code={code}&state={state}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn requests_without_user_are_unauthorized() {
    let app = app(Arc::default()).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/banking/accounts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn link_requires_bank_and_country() {
    let app = app(Arc::default()).await;

    let response = app
        .oneshot(
            request("POST", "/banking/link")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"bank":"  ","country":"FI"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({"error": "bank and country are required"})
    );
}

#[tokio::test]
async fn full_link_flow_lists_accounts_and_status() {
    let app = app(Arc::default()).await;

    let state = start_link(&app).await;
    let response = complete_link(&app, "c1", &state).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "http://frontend.test/banking?success=true");

    let response = app
        .clone()
        .oneshot(request("GET", "/banking/accounts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let accounts = body["accounts"].as_array().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["account_id"], "acc-c1");
    assert_eq!(accounts[0]["balance_minor"], 1234);

    let response = app
        .oneshot(request("GET", "/banking/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = json_body(response).await;
    assert_eq!(status["connected"], true);
    assert_eq!(status["bank_name"], "Test Bank");
    assert_eq!(status["expired"], false);
    assert_eq!(status["account_count"], 1);
}

#[tokio::test]
async fn replayed_callback_redirects_with_error() {
    let app = app(Arc::default()).await;

    let state = start_link(&app).await;
    let first = complete_link(&app, "c1", &state).await;
    assert_eq!(location(&first), "http://frontend.test/banking?success=true");

    let replay = complete_link(&app, "c1", &state).await;
    assert_eq!(replay.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&replay),
        "http://frontend.test/banking?error=invalid+or+expired+state"
    );
}

#[tokio::test]
async fn bank_error_redirects_with_description() {
    let app = app(Arc::default()).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/banking/callback?error=access_denied&error_description=User%20cancelled")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = Url::parse(&location(&response)).unwrap();
    let error = location
        .query_pairs()
        .find(|(key, _)| key == "error")
        .map(|(_, value)| value.into_owned())
        .unwrap();
    assert!(error.contains("User cancelled"));
}

#[tokio::test]
async fn failed_session_exchange_hides_aggregator_body() {
    let app = app(Arc::default()).await;

    let state = start_link(&app).await;
    let response = complete_link(&app, "bad-code", &state).await;

    let location = location(&response);
    assert!(location.contains("error="));
    assert!(!location.contains("INVALID_CODE"));
}

#[tokio::test]
async fn disconnecting_last_account_revokes_consent() {
    let gateway = Arc::new(ScriptedGateway::default());
    let app = app(gateway.clone()).await;

    let state = start_link(&app).await;
    complete_link(&app, "c1", &state).await;

    let response = app
        .clone()
        .oneshot(request("GET", "/banking/accounts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    let id = body["accounts"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            request("DELETE", &format!("/banking/accounts/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"success": true, "consent_revoked": true, "connection_deactivated": true})
    );
    assert_eq!(*gateway.revoked.lock().unwrap(), vec![format!("consent-{state}")]);

    let again = app
        .oneshot(
            request("DELETE", &format!("/banking/accounts/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disconnect_all_reports_counts() {
    let app = app(Arc::default()).await;

    let state = start_link(&app).await;
    complete_link(&app, "c1", &state).await;

    let response = app
        .clone()
        .oneshot(request("DELETE", "/banking/accounts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["revoked_count"], 1);
    assert_eq!(body["failed_count"], 0);
    assert_eq!(body["deactivated_connections"], 1);
    assert_eq!(body["errored_connections"], 0);
    assert_eq!(body["deleted_accounts"], 1);

    let response = app
        .oneshot(request("GET", "/banking/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await["connected"], false);
}
