use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::db::DbConfig;
use crate::strategy::LEDGER_FIT;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// In-memory ledger and topology, no database.
    pub dev_mode: bool,
    pub allocator: AllocatorConfig,
    pub database: DbConfig,
}

/// Worker pool and dispatcher settings.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub strategy_timeout: Option<Duration>,
    /// Built-in strategy factories to register at startup.
    pub strategies: Vec<String>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_depth: 1024,
            strategy_timeout: None,
            strategies: vec![LEDGER_FIT.to_string()],
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("HOSTALLOC_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid HOSTALLOC_LISTEN_ADDR")?;

        let log_level =
            std::env::var("HOSTALLOC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("HOSTALLOC_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let defaults = AllocatorConfig::default();

        let workers = match std::env::var("HOSTALLOC_WORKERS") {
            Ok(v) => v.parse().context("invalid HOSTALLOC_WORKERS")?,
            Err(_) => defaults.workers,
        };

        let queue_depth = match std::env::var("HOSTALLOC_QUEUE_DEPTH") {
            Ok(v) => v.parse().context("invalid HOSTALLOC_QUEUE_DEPTH")?,
            Err(_) => defaults.queue_depth,
        };

        let strategy_timeout = match std::env::var("HOSTALLOC_STRATEGY_TIMEOUT_SECS") {
            Ok(v) => parse_timeout_secs(&v)?,
            Err(_) => defaults.strategy_timeout,
        };

        let strategies = match std::env::var("HOSTALLOC_STRATEGIES") {
            Ok(v) => parse_strategy_list(&v),
            Err(_) => defaults.strategies,
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            allocator: AllocatorConfig {
                workers,
                queue_depth,
                strategy_timeout,
                strategies,
            },
            database: DbConfig::from_env(),
        })
    }
}

/// Zero or blank means no timeout.
fn parse_timeout_secs(value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let secs: u64 = value
        .parse()
        .context("invalid HOSTALLOC_STRATEGY_TIMEOUT_SECS")?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Splits a comma-separated list, dropping blanks. Duplicates are kept so
/// that registration can reject them.
pub fn parse_strategy_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
