use std::{env, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub amqp: Option<AmqpConfig>,
    pub outbox: OutboxConfig,
    pub uploads: UploadsConfig,
    pub ocr: OcrConfig,
    pub email: EmailConfig,
    pub admin_seed: Option<AdminSeed>,
    pub cors_allow_origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a request waits for a pooled connection.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    pub exchange: String,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    /// Sent rows older than this are deleted by the relay.
    pub retention_days: u32,
}

#[derive(Debug, Clone)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// `None` disables text extraction.
    pub command: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

/// Loads the configuration from the process environment. Call
/// [`crate::infra::bootstrap::init_env`] first so `.env` is honoured.
pub fn load() -> Result<AppConfig> {
    let amqp = optional("AMQP_URL").map(|url| AmqpConfig {
        url,
        exchange: optional("AMQP_EXCHANGE").unwrap_or("medbook.events".to_string()),
    });

    let admin_seed = match (optional("ADMIN_EMAIL"), optional("ADMIN_PASSWORD")) {
        (Some(email), Some(password)) => Some(AdminSeed { email, password }),
        _ => None,
    };

    let ocr_command = match env::var("OCR_COMMAND") {
        Ok(cmd) if cmd.trim().is_empty() => None,
        Ok(cmd) => Some(cmd),
        Err(_) => Some("tesseract".to_string()),
    };

    Ok(AppConfig {
        server: ServerConfig {
            host: optional("HOST").unwrap_or("0.0.0.0".to_string()),
            port: parsed("PORT", 3000)?,
        },
        database: DatabaseConfig {
            url: required("DATABASE_URL")?,
            max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            connect_timeout_secs: parsed("DATABASE_CONNECT_TIMEOUT_SECS", 30)?,
        },
        auth: AuthConfig {
            jwt_secret: required("JWT_SECRET")?,
            token_ttl_hours: parsed("TOKEN_TTL_HOURS", 24)?,
        },
        amqp,
        outbox: OutboxConfig {
            poll_interval_ms: parsed("OUTBOX_POLL_INTERVAL_MS", 1000)?,
            batch_size: parsed("OUTBOX_BATCH_SIZE", 50)?,
            retention_days: parsed("OUTBOX_RETENTION_DAYS", 7)?,
        },
        uploads: UploadsConfig {
            dir: optional("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            max_bytes: parsed("UPLOAD_MAX_BYTES", 5 * 1024 * 1024)?,
        },
        ocr: OcrConfig {
            command: ocr_command,
            timeout_secs: parsed("OCR_TIMEOUT_SECS", 30)?,
        },
        email: EmailConfig {
            api_url: optional("EMAIL_API_URL"),
            api_key: optional("EMAIL_API_KEY"),
            from: optional("EMAIL_FROM").unwrap_or("no-reply@medbook.local".to_string()),
        },
        admin_seed,
        cors_allow_origin: optional("CORS_ALLOW_ORIGIN"),
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{} must be set", key))
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
