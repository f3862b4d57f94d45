use std::{sync::Arc, time::Duration};

use aggregator::{OpenBankingGateway, PlaidGateway};
use engine::{AggregatorGateway, Linker};
use migration::{Migrator, MigratorTrait};
use server::{FrontendRedirect, ServerState};
use settings::{AggregatorKind, Database};

mod settings;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "banklink={level},server={level},engine={level},aggregator={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.database).await.inspect_err(|err| {
        tracing::error!("failed to initialize database: {err}");
    })?;
    let gateway = build_gateway(&settings.aggregator)?;
    tracing::info!(kind = ?settings.aggregator.kind, "aggregator configured");

    let linker = Linker::builder()
        .database(db)
        .gateway(gateway)
        .callback_url(settings.server.callback_url())
        .state_ttl(chrono::Duration::seconds(settings.linking.state_ttl_secs))
        .connection_lifetime(chrono::Duration::days(
            settings.linking.connection_lifetime_days,
        ))
        .guess_consent(settings.linking.guess_consent_on_callback)
        .build()?;
    let frontend = FrontendRedirect::new(
        &settings.server.frontend_url,
        &settings.server.frontend_callback_path,
    )?;

    let state = ServerState {
        linker: Arc::new(linker),
        frontend,
    };
    let bind = settings
        .server
        .bind
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind, settings.server.port))
        .await
        .inspect_err(|err| tracing::error!("failed to bind server listener: {err}"))?;

    server::run_with_listener(state, listener).await?;
    Ok(())
}

fn build_gateway(config: &settings::Aggregator) -> Result<Arc<dyn AggregatorGateway>, BoxError> {
    let timeout = Duration::from_secs(config.timeout_secs);

    let gateway: Arc<dyn AggregatorGateway> = match config.kind {
        AggregatorKind::OpenBanking => {
            let token = config
                .app_token
                .as_deref()
                .ok_or("aggregator.app_token is required for open_banking")?;
            Arc::new(OpenBankingGateway::new(
                &config.base_url,
                token,
                config.consent_valid_days,
                timeout,
            )?)
        }
        AggregatorKind::Plaid => {
            let (Some(client_id), Some(secret)) = (&config.client_id, &config.secret) else {
                return Err("aggregator.client_id and aggregator.secret are required for plaid".into());
            };
            Arc::new(PlaidGateway::new(
                &config.base_url,
                client_id.as_str(),
                secret.as_str(),
                config.client_name.as_str(),
                timeout,
            )?)
        }
    };
    Ok(gateway)
}

async fn parse_database(config: &Database) -> Result<sea_orm::DatabaseConnection, BoxError> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
