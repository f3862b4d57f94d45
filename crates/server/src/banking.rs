//! Bank linking endpoints.

use api_types::banking::{
    AccountDisconnected, AllDisconnected, BankAccount, BankAccountList, CallbackQuery,
    ConnectionStatus, LinkRequest, LinkStarted,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::Redirect,
};
use engine::{CallbackParams, StoredBankAccount};
use uuid::Uuid;

use crate::{
    ServerError, message_for_link_error,
    server::{ServerState, UserId},
};

pub async fn link(
    Extension(UserId(user_id)): Extension<UserId>,
    State(state): State<ServerState>,
    Json(payload): Json<LinkRequest>,
) -> Result<Json<LinkStarted>, ServerError> {
    let bank = payload.bank.trim();
    let country = payload.country.trim();
    if bank.is_empty() || country.is_empty() {
        return Err(ServerError::Generic(
            "bank and country are required".to_string(),
        ));
    }

    let authorization_url = state
        .linker
        .start_linking(&user_id, bank, country)
        .await?;

    Ok(Json(LinkStarted { authorization_url }))
}

/// Landing point of the aggregator's redirect. Always answers with a
/// redirect to the frontend, never with an error status.
pub async fn callback(
    State(state): State<ServerState>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let params = CallbackParams {
        code: query.code,
        state: query.state,
        error: query.error,
        error_description: query.error_description,
    };

    match state.linker.handle_callback(params).await {
        Ok(linked) => {
            tracing::info!(
                connection_id = %linked.connection.id,
                accounts = linked.accounts.len(),
                "bank linked"
            );
            Redirect::to(&state.frontend.success())
        }
        Err(err) => {
            tracing::warn!("bank callback failed: {err}");
            Redirect::to(&state.frontend.error(&message_for_link_error(err)))
        }
    }
}

pub async fn list_accounts(
    Extension(UserId(user_id)): Extension<UserId>,
    State(state): State<ServerState>,
) -> Result<Json<BankAccountList>, ServerError> {
    let accounts = state.linker.list_accounts(&user_id).await?;

    Ok(Json(BankAccountList {
        accounts: accounts.into_iter().map(account_view).collect(),
    }))
}

pub async fn disconnect_account(
    Extension(UserId(user_id)): Extension<UserId>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountDisconnected>, ServerError> {
    let outcome = state.linker.disconnect_account(&user_id, id).await?;

    Ok(Json(AccountDisconnected {
        success: true,
        consent_revoked: outcome.consent_revoked,
        connection_deactivated: outcome.connection_deactivated,
    }))
}

pub async fn disconnect_all(
    Extension(UserId(user_id)): Extension<UserId>,
    State(state): State<ServerState>,
) -> Result<Json<AllDisconnected>, ServerError> {
    let outcome = state.linker.disconnect_all(&user_id).await?;

    Ok(Json(AllDisconnected {
        success: outcome.errored_connections.is_empty(),
        revoked_count: outcome.revoked_count(),
        failed_count: outcome.failed_count(),
        revoked_consent_ids: outcome.revoked_consent_ids,
        failed_consent_ids: outcome.failed_consent_ids,
        deactivated_connections: outcome.deactivated_connections,
        errored_connections: outcome.errored_connections.len(),
        deleted_accounts: outcome.deleted_accounts,
    }))
}

pub async fn status(
    Extension(UserId(user_id)): Extension<UserId>,
    State(state): State<ServerState>,
) -> Result<Json<ConnectionStatus>, ServerError> {
    let status = state.linker.connection_status(&user_id).await?;

    let view = match status.connection {
        Some(connection) => ConnectionStatus {
            connected: true,
            bank_name: connection.bank_name,
            connected_at: Some(connection.created_at),
            expires_at: Some(connection.token_expires_at),
            expired: status.expired,
            account_count: status.account_count,
        },
        None => ConnectionStatus {
            connected: false,
            bank_name: None,
            connected_at: None,
            expires_at: None,
            expired: false,
            account_count: 0,
        },
    };
    Ok(Json(view))
}

fn account_view(account: StoredBankAccount) -> BankAccount {
    BankAccount {
        id: account.id,
        bank_connection_id: account.bank_connection_id,
        account_id: account.account_id,
        currency: account.currency,
        name: account.account_name,
        account_type: account.account_type,
        iban: account.iban,
        balance_minor: account.current_balance_minor,
        last_balance_update: account.last_balance_update,
        created_at: account.created_at,
    }
}
