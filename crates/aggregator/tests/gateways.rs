use std::time::Duration;

use aggregator::{OpenBankingGateway, PlaidGateway};
use engine::{AggregatorGateway, GatewayError};
use reqwest::Url;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn open_banking(server: &MockServer) -> OpenBankingGateway {
    OpenBankingGateway::new(&server.uri(), "app-token", 90, TIMEOUT).unwrap()
}

fn plaid(server: &MockServer) -> PlaidGateway {
    PlaidGateway::new(&server.uri(), "client", "secret", "Banklink", TIMEOUT).unwrap()
}

#[tokio::test]
async fn open_banking_start_returns_url_and_consent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .and(header("authorization", "Bearer app-token"))
        .and(body_partial_json(json!({
            "aspsp": {"name": "Nordea", "country": "FI"},
            "state": "st-1",
            "redirect_url": "https://app.example.com/banking/callback",
            "psu_type": "personal",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://bank.example.com/authorize?x=1",
            "authorization_id": "auth-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let start = open_banking(&server)
        .start_authorization(
            "Nordea",
            "FI",
            "https://app.example.com/banking/callback",
            "st-1",
        )
        .await
        .unwrap();

    assert_eq!(start.authorization_url, "https://bank.example.com/authorize?x=1");
    assert_eq!(start.consent_id.as_deref(), Some("auth-1"));
}

#[tokio::test]
async fn open_banking_session_is_returned_verbatim() {
    let server = MockServer::start().await;
    let session = json!({"session_id": "s-1", "accounts": [{"uid": "a-1"}]});
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_partial_json(json!({"code": "c-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(session.clone()))
        .mount(&server)
        .await;

    let got = open_banking(&server).create_session("c-1").await.unwrap();
    assert_eq!(got, session);
}

#[tokio::test]
async fn open_banking_error_body_is_reduced_to_a_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": "EXPIRED_AUTHORIZATION_CODE",
            "detail": "psu 12345 at bank xyz",
        })))
        .mount(&server)
        .await;

    let err = open_banking(&server).create_session("old").await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Status {
            status: 422,
            message: "EXPIRED_AUTHORIZATION_CODE".to_string(),
        }
    );
}

#[tokio::test]
async fn open_banking_revoke_treats_missing_consent_as_done() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/consents/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/consents/live"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/consents/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = open_banking(&server);
    assert_eq!(gateway.revoke_consent("gone").await, Ok(()));
    assert_eq!(gateway.revoke_consent("live").await, Ok(()));
    assert!(matches!(
        gateway.revoke_consent("broken").await,
        Err(GatewayError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn open_banking_lists_consents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/consents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "consents": [
                {"id": "c-1", "valid_until": "2026-12-01T00:00:00Z"},
                {"consent_id": "c-2"},
            ]
        })))
        .mount(&server)
        .await;

    let consents = open_banking(&server).list_consents().await.unwrap();
    assert_eq!(consents.len(), 2);
    assert_eq!(consents[0].consent_id, "c-1");
    assert!(consents[0].expires_at.is_some());
    assert_eq!(consents[1].consent_id, "c-2");
    assert_eq!(consents[1].expires_at, None);
}

#[tokio::test]
async fn unreachable_aggregator_is_a_transport_error() {
    let gateway =
        OpenBankingGateway::new("http://127.0.0.1:9/", "app-token", 90, TIMEOUT).unwrap();
    assert!(matches!(
        gateway.list_consents().await,
        Err(GatewayError::Transport(_))
    ));
}

/// Start a Hosted Link flow and return the `code` the completion redirect
/// will carry back.
async fn start_plaid_link(server: &MockServer, gateway: &PlaidGateway) -> String {
    Mock::given(method("POST"))
        .and(path("/link/token/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link_token": "link-sandbox-1",
            "hosted_link_url": "https://secure.plaid.com/hl/abc",
        })))
        .mount(server)
        .await;

    gateway
        .start_authorization(
            "ignored",
            "US",
            "https://app.example.com/banking/callback",
            "st-9",
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests.last().unwrap().body_json().unwrap();
    let completion = Url::parse(
        body["hosted_link"]["completion_redirect_uri"]
            .as_str()
            .unwrap(),
    )
    .unwrap();
    completion
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .unwrap()
}

async fn mount_completed_link(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/link/token/get"))
        .and(body_partial_json(json!({"link_token": "link-sandbox-1", "secret": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link_token": "link-sandbox-1",
            "link_sessions": [{
                "link_session_id": "ls-1",
                "results": {"item_add_results": [{
                    "public_token": "public-1",
                    "institution": {"name": "First Platypus Bank", "institution_id": "ins_109508"}
                }]}
            }]
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/item/public_token/exchange"))
        .and(body_partial_json(json!({"public_token": "public-1", "secret": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "item_id": "item-1",
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn plaid_completion_redirect_carries_state_and_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/link/token/create"))
        .and(body_partial_json(json!({
            "client_id": "client",
            "country_codes": ["US"],
            "user": {"client_user_id": "st-9"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link_token": "link-sandbox-1",
            "hosted_link_url": "https://secure.plaid.com/hl/abc",
        })))
        .expect(1)
        .mount(&server)
        .await;
    let gateway = plaid(&server);

    let start = gateway
        .start_authorization(
            "ignored",
            "US",
            "https://app.example.com/banking/callback",
            "st-9",
        )
        .await
        .unwrap();

    assert_eq!(start.authorization_url, "https://secure.plaid.com/hl/abc");
    assert_eq!(start.consent_id, None);
    assert_eq!(gateway.pending_links(), 1);

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    let completion = Url::parse(
        body["hosted_link"]["completion_redirect_uri"]
            .as_str()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(completion.path(), "/banking/callback");
    let query: Vec<(String, String)> = completion.query_pairs().into_owned().collect();
    assert_eq!(query[0], ("state".to_string(), "st-9".to_string()));
    assert_eq!(query[1].0, "code");
    assert!(!query[1].1.is_empty());
}

#[tokio::test]
async fn plaid_session_resolves_public_token_from_link_token() {
    let server = MockServer::start().await;
    let gateway = plaid(&server);
    let code = start_plaid_link(&server, &gateway).await;
    mount_completed_link(&server).await;
    Mock::given(method("POST"))
        .and(path("/accounts/get"))
        .and(body_partial_json(json!({"access_token": "access-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accounts": [{"account_id": "acc-1", "name": "Checking"}],
        })))
        .mount(&server)
        .await;

    let session = gateway.create_session(&code).await.unwrap();

    assert_eq!(session["session_id"], "access-1");
    assert_eq!(session["consent_id"], "access-1");
    assert_eq!(session["institution_name"], "First Platypus Bank");
    assert_eq!(session["accounts"][0]["account_id"], "acc-1");
    assert_eq!(gateway.pending_links(), 0);

    // The handoff key is single use.
    assert!(matches!(
        gateway.create_session(&code).await,
        Err(GatewayError::Decode(_))
    ));
}

#[tokio::test]
async fn plaid_session_rejects_unknown_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let result = plaid(&server).create_session("public-1").await;

    assert!(matches!(result, Err(GatewayError::Decode(_))));
}

#[tokio::test]
async fn plaid_session_fails_when_link_was_not_completed() {
    let server = MockServer::start().await;
    let gateway = plaid(&server);
    let code = start_plaid_link(&server, &gateway).await;
    Mock::given(method("POST"))
        .and(path("/link/token/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link_token": "link-sandbox-1",
            "link_sessions": [],
        })))
        .mount(&server)
        .await;

    let result = gateway.create_session(&code).await;

    assert!(matches!(result, Err(GatewayError::Decode(_))));
}

#[tokio::test]
async fn plaid_session_survives_account_fetch_failure() {
    let server = MockServer::start().await;
    let gateway = plaid(&server);
    let code = start_plaid_link(&server, &gateway).await;
    mount_completed_link(&server).await;
    Mock::given(method("POST"))
        .and(path("/accounts/get"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": "PRODUCT_NOT_READY",
        })))
        .mount(&server)
        .await;

    let session = gateway.create_session(&code).await.unwrap();

    assert_eq!(session["session_id"], "access-1");
    assert!(session.get("accounts").is_none());
}

#[tokio::test]
async fn plaid_revoke_ignores_removed_items() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/item/remove"))
        .and(body_partial_json(json!({"access_token": "gone"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_type": "ITEM_ERROR",
            "error_code": "ITEM_NOT_FOUND",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/item/remove"))
        .and(body_partial_json(json!({"access_token": "locked"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_type": "ITEM_ERROR",
            "error_code": "ITEM_LOCKED",
        })))
        .mount(&server)
        .await;

    let gateway = plaid(&server);
    assert_eq!(gateway.revoke_consent("gone").await, Ok(()));
    assert_eq!(
        gateway.revoke_consent("locked").await,
        Err(GatewayError::Status {
            status: 400,
            message: "ITEM_LOCKED".to_string(),
        })
    );
}
