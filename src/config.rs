use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::counsel::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreKind::Postgres),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => bail!("STORE must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub request_ttl: Duration,
    pub sweep_interval: Duration,
    pub snapshot_size: i64,
    pub catalog_ttl: Duration,
    pub payment_webhook_secret: String,
}

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal in deployed environments.
        let _ = dotenvy::dotenv();

        let store: StoreKind = optional("STORE")?.unwrap_or(StoreKind::Postgres);
        let database_url = env::var("DATABASE_URL").ok();
        if store == StoreKind::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE=postgres");
        }

        let payment_webhook_secret =
            env::var("PAYMENT_WEBHOOK_SECRET").context("PAYMENT_WEBHOOK_SECRET must be set")?;
        if payment_webhook_secret.trim().is_empty() {
            bail!("PAYMENT_WEBHOOK_SECRET must not be empty");
        }

        let config = Config {
            store,
            database_url,
            db_max_connections: optional("DB_MAX_CONNECTIONS")?.unwrap_or(20),
            bind_addr: optional("BIND_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000))),
            request_ttl: Duration::from_secs(optional("REQUEST_TTL_SECS")?.unwrap_or(900)),
            sweep_interval: Duration::from_secs(optional("SWEEP_INTERVAL_SECS")?.unwrap_or(30)),
            snapshot_size: optional("SNAPSHOT_SIZE")?.unwrap_or(50),
            catalog_ttl: Duration::from_secs(optional("CATALOG_TTL_SECS")?.unwrap_or(300)),
            payment_webhook_secret,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if self.request_ttl.is_zero() {
            bail!("REQUEST_TTL_SECS must be at least 1");
        }
        if self.sweep_interval.is_zero() {
            bail!("SWEEP_INTERVAL_SECS must be at least 1");
        }
        if self.snapshot_size < 1 {
            bail!("SNAPSHOT_SIZE must be at least 1");
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            request_ttl: chrono::Duration::from_std(self.request_ttl)
                .context("REQUEST_TTL_SECS is out of range")?,
            catalog_ttl: self.catalog_ttl,
            snapshot_size: self.snapshot_size,
        })
    }
}

fn optional<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        _ => Ok(None),
    }
}
