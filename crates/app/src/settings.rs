use clap::Parser;
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "settings";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    pub server: Server,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub linking: Linking,
    pub aggregator: Aggregator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub bind: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base url of this server.
    pub public_url: String,
    pub frontend_url: String,
    #[serde(default = "default_callback_path")]
    pub frontend_callback_path: String,
}

impl Server {
    pub fn callback_url(&self) -> String {
        format!("{}/banking/callback", self.public_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    #[default]
    Memory,
    Sqlite(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Linking {
    pub state_ttl_secs: i64,
    pub connection_lifetime_days: i64,
    /// Guess the consent id from the aggregator's consent list when the
    /// flow did not reveal it.
    pub guess_consent_on_callback: bool,
}

impl Default for Linking {
    fn default() -> Self {
        Self {
            state_ttl_secs: engine::DEFAULT_STATE_TTL.num_seconds(),
            connection_lifetime_days: engine::DEFAULT_CONNECTION_LIFETIME.num_days(),
            guess_consent_on_callback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorKind {
    OpenBanking,
    Plaid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Aggregator {
    pub kind: AggregatorKind,
    pub base_url: String,
    pub app_token: Option<String>,
    pub client_id: Option<String>,
    pub secret: Option<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_consent_valid_days")]
    pub consent_valid_days: i64,
}

fn default_port() -> u16 {
    3000
}

fn default_callback_path() -> String {
    "/banking".to_string()
}

fn default_client_name() -> String {
    "Banklink".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_consent_valid_days() -> i64 {
    90
}

#[derive(Debug, Parser)]
#[command(name = "banklink", disable_version_flag = true)]
struct Args {
    /// Optional settings file path (TOML, extension optional).
    #[arg(long, env = "BANKLINK_CONFIG")]
    config: Option<String>,
    /// Override log level.
    #[arg(long)]
    level: Option<String>,
    /// Override listening port.
    #[arg(long)]
    port: Option<u16>,
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let args = Args::parse();
        let config_path = args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

        let mut settings: Settings = Self::load(config_path)?;

        if let Some(level) = args.level {
            settings.app.level = level;
        }
        if let Some(port) = args.port {
            settings.server.port = port;
        }

        Ok(settings)
    }

    fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("BANKLINK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Settings {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn minimal_settings_fill_defaults() {
        let settings = parse(
            r#"
            [server]
            public_url = "https://api.example.com/"
            frontend_url = "https://app.example.com"

            [aggregator]
            kind = "open_banking"
            base_url = "https://aggregator.example.com"
            app_token = "token"
            "#,
        );

        assert_eq!(settings.app.level, "info");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.frontend_callback_path, "/banking");
        assert_eq!(
            settings.server.callback_url(),
            "https://api.example.com/banking/callback"
        );
        assert!(matches!(settings.database, Database::Memory));
        assert_eq!(settings.linking.state_ttl_secs, 600);
        assert_eq!(settings.linking.connection_lifetime_days, 89);
        assert!(settings.linking.guess_consent_on_callback);
        assert_eq!(settings.aggregator.kind, AggregatorKind::OpenBanking);
        assert_eq!(settings.aggregator.timeout_secs, 30);
        assert_eq!(settings.aggregator.consent_valid_days, 90);
    }

    #[test]
    fn sqlite_database_and_plaid() {
        let settings = parse(
            r#"
            database = { sqlite = "banklink.db" }

            [server]
            public_url = "https://api.example.com"
            frontend_url = "https://app.example.com"

            [linking]
            guess_consent_on_callback = false

            [aggregator]
            kind = "plaid"
            base_url = "https://sandbox.plaid.com"
            client_id = "id"
            secret = "secret"
            "#,
        );

        assert!(matches!(settings.database, Database::Sqlite(ref path) if path == "banklink.db"));
        assert!(!settings.linking.guess_consent_on_callback);
        assert_eq!(settings.linking.state_ttl_secs, 600);
        assert_eq!(settings.aggregator.kind, AggregatorKind::Plaid);
    }
}
