use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use tracing::info;

/// Process-wide settings, resolved once at start.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    /// Root of the artifact store (`DATA_DIR`).
    pub data_dir: PathBuf,
    /// URL prefix the build tree is mounted under, without slashes.
    pub static_prefix: String,
    pub upload_timeout: Duration,
    pub bootstrap_admin_token: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let static_prefix: String = try_load("STATIC_PREFIX", "builds")?;
        let static_prefix = static_prefix.trim_matches('/').to_string();
        let first = static_prefix.split('/').next().unwrap_or_default();
        if matches!(first, "" | "api" | "health") {
            anyhow::bail!("STATIC_PREFIX {static_prefix:?} collides with the API routes");
        }
        Ok(Self {
            port: try_load("PORT", "8081")?,
            database_url: optional("DATABASE_URL"),
            data_dir: PathBuf::from(try_load::<String>("DATA_DIR", "./data")?),
            static_prefix,
            upload_timeout: Duration::from_secs(try_load("UPLOAD_TIMEOUT_SECS", "600")?),
            bootstrap_admin_token: optional("BOOTSTRAP_ADMIN_TOKEN"),
        })
    }

    /// Settings rooted at `data_dir`, for embedding the service in tests or tools.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            port: 0,
            database_url: None,
            data_dir: data_dir.into(),
            static_prefix: "builds".into(),
            upload_timeout: Duration::from_secs(600),
            bootstrap_admin_token: None,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("invalid {key} value: {raw}"))
}
