use std::fmt;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

/// Application configuration, read from environment variables.
///
/// | Variable | Default | Notes |
/// |----------|---------|-------|
/// | DATABASE_URL | - | overrides all DB_* connection variables |
/// | DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_NAME | - | required without DATABASE_URL |
/// | DB_MAX_CONNECTIONS | 50 | |
/// | KAFKA_BROKERS | localhost:9092 | |
/// | KAFKA_TOPIC | orders | |
/// | KAFKA_GROUP | order-service-group | |
/// | KAFKA_DLQ_TOPIC | `<topic>_dead_letter` | |
/// | HTTP_ADDR | 0.0.0.0:8080 | |
/// | CACHE_TTL_SECONDS | 600 | 0 disables expiry |
/// | INGEST_MESSAGE_TIMEOUT_MS | 10000 | per-message persist deadline |
/// | INGEST_COMMIT_DEAD_LETTERED | false | commit offsets of dead-lettered messages |
/// | SHUTDOWN_TIMEOUT_SECS | 15 | |
///
/// Unparseable optional values fall back to their default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub http_addr: String,
    pub cache_ttl: Duration,
    pub message_timeout: Duration,
    pub commit_dead_lettered: bool,
    pub shutdown_timeout: Duration,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub dead_letter_topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing database configuration: {0} is not set (or set DATABASE_URL)")]
    MissingDatabase(&'static str),

    #[error("invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid DATABASE_URL: {0}")]
    DatabaseUrl(#[source] sqlx::Error),
}

const DEFAULT_CACHE_TTL_SECS: u64 = 600;

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any name -> value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let database = DatabaseConfig::from_lookup(&var)?;

        let topic = var("KAFKA_TOPIC").unwrap_or_else(|| "orders".into());
        let kafka = KafkaConfig {
            brokers: var("KAFKA_BROKERS").unwrap_or_else(|| "localhost:9092".into()),
            group_id: var("KAFKA_GROUP").unwrap_or_else(|| "order-service-group".into()),
            dead_letter_topic: var("KAFKA_DLQ_TOPIC")
                .unwrap_or_else(|| format!("{}_dead_letter", topic)),
            topic,
        };

        Ok(Self {
            database,
            kafka,
            http_addr: var("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            cache_ttl: Duration::from_secs(
                var("CACHE_TTL_SECONDS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),
            message_timeout: Duration::from_millis(
                var("INGEST_MESSAGE_TIMEOUT_MS")
                    .and_then(|v| v.parse().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(10_000),
            ),
            commit_dead_lettered: var("INGEST_COMMIT_DEAD_LETTERED")
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            shutdown_timeout: Duration::from_secs(
                var("SHUTDOWN_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15),
            ),
        })
    }
}

impl DatabaseConfig {
    fn from_lookup(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = var("DATABASE_URL");
        let required = |name: &'static str| -> Result<String, ConfigError> {
            match (&url, var(name)) {
                (_, Some(value)) => Ok(value),
                (Some(_), None) => Ok(String::new()),
                (None, None) => Err(ConfigError::MissingDatabase(name)),
            }
        };

        let host = required("DB_HOST")?;
        let port = match (&url, var("DB_PORT")) {
            (_, Some(raw)) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "DB_PORT",
                value: raw.clone(),
            })?,
            (Some(_), None) => 5432,
            (None, None) => return Err(ConfigError::MissingDatabase("DB_PORT")),
        };

        Ok(Self {
            host,
            port,
            user: required("DB_USER")?,
            password: required("DB_PASSWORD")?,
            name: required("DB_NAME")?,
            max_connections: var("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(50),
            url,
        })
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        match &self.url {
            Some(url) => url.parse().map_err(ConfigError::DatabaseUrl),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.name)),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
