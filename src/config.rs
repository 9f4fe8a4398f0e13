use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub hub: HubConfig,
    pub auth: AuthConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Documents live in memory when unset.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub queue_key: String,
    /// Never below one second: a zero `BRPOP` timeout blocks forever.
    pub dequeue_timeout_secs: u64,
    pub status_ttl_secs: u64,
    pub record_ttl_secs: u64,
}

impl QueueConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs.max(1))
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_key: "job_queue".to_string(),
            dequeue_timeout_secs: 2,
            status_ttl_secs: 24 * 60 * 60,
            record_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Outbound buffer per client connection.
    pub client_buffer: usize,
    /// Pending hub requests before `send_to_user` starts dropping.
    pub backlog: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer: 256,
            backlog: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub openai_api_key: String,
    pub model: String,
    pub api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let queue_defaults = QueueConfig::default();
        let hub_defaults = HubConfig::default();

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .context("PORT must be a valid port number")?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                cors_allowed_origins: env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                enabled: env::var("USE_REDIS_QUEUE")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .context("USE_REDIS_QUEUE must be true or false")?,
            },
            queue: QueueConfig {
                queue_key: env::var("JOB_QUEUE_KEY").unwrap_or(queue_defaults.queue_key),
                dequeue_timeout_secs: env_or("JOB_DEQUEUE_TIMEOUT_SECS", queue_defaults.dequeue_timeout_secs)?
                    .max(1),
                status_ttl_secs: env_or("JOB_STATUS_TTL_SECS", queue_defaults.status_ttl_secs)?,
                record_ttl_secs: env_or("JOB_RECORD_TTL_SECS", queue_defaults.record_ttl_secs)?,
            },
            hub: HubConfig {
                client_buffer: env_or("WS_CLIENT_BUFFER", hub_defaults.client_buffer)?.max(1),
                backlog: env_or("WS_HUB_BACKLOG", hub_defaults.backlog)?.max(1),
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            },
            embedding: EmbeddingConfig {
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
                api_url: env::var("EMBEDDING_API_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1/embeddings".to_string()),
            },
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        Err(_) => Ok(default),
    }
}
