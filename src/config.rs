use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::cache::refresher::RefresherConfig;
use crate::services::splendid::api::RetryPolicy;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_BASE_URL: &str =
    "https://narkins.splendidaccounts.com/api/narkins-textile-industries/2125";

/// Default cache duration: 5 minutes
const DEFAULT_CACHE_DURATION_SECS: u64 = 300;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 2;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub app_id: String,
    /// Ceiling for a single attempt
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_path: PathBuf,
    pub cache_duration: Duration,
    pub refresh_interval: Duration,
    pub prefetch_on_start: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    /// Enable debug logging for upstream requests (set via CLI)
    pub debug_requests: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT") {
            Ok(v) => v.parse().with_context(|| format!("PORT is not a valid port: {}", v))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            server: ServerConfig { port },
            upstream: UpstreamConfig {
                base_url: env::var("UPSTREAM_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
                api_key: env::var("UPSTREAM_API_KEY").context("UPSTREAM_API_KEY is required")?,
                api_secret: env::var("UPSTREAM_API_SECRET")
                    .context("UPSTREAM_API_SECRET is required")?,
                app_id: env::var("UPSTREAM_APP_ID").context("UPSTREAM_APP_ID is required")?,
                request_timeout: Duration::from_secs(parse_or_default(
                    "UPSTREAM_TIMEOUT_SECS",
                    env::var("UPSTREAM_TIMEOUT_SECS").ok(),
                    DEFAULT_TIMEOUT_SECS,
                )),
                max_attempts: parse_or_default(
                    "UPSTREAM_MAX_ATTEMPTS",
                    env::var("UPSTREAM_MAX_ATTEMPTS").ok(),
                    DEFAULT_MAX_ATTEMPTS,
                ),
                retry_backoff: Duration::from_secs(parse_or_default(
                    "UPSTREAM_RETRY_BACKOFF_SECS",
                    env::var("UPSTREAM_RETRY_BACKOFF_SECS").ok(),
                    DEFAULT_RETRY_BACKOFF_SECS,
                )),
            },
            cache: CacheConfig {
                cache_path: env::var("CACHE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./sales_cache.json")),
                cache_duration: Duration::from_secs(parse_or_default(
                    "CACHE_DURATION_SECS",
                    env::var("CACHE_DURATION_SECS").ok(),
                    DEFAULT_CACHE_DURATION_SECS,
                )),
                refresh_interval: Duration::from_secs(parse_or_default(
                    "REFRESH_INTERVAL_SECS",
                    env::var("REFRESH_INTERVAL_SECS").ok(),
                    DEFAULT_REFRESH_INTERVAL_SECS,
                )),
                prefetch_on_start: parse_flag(env::var("PREFETCH_ON_START").ok(), true),
            },
            debug_requests: false, // Set by CLI args in main.rs
        })
    }

    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.upstream.max_attempts.max(1),
            backoff: self.upstream.retry_backoff,
        }
    }

    pub fn to_refresher_config(&self) -> RefresherConfig {
        RefresherConfig {
            tick_interval: self.cache.refresh_interval,
        }
    }
}

fn parse_or_default<T: std::str::FromStr + Copy + std::fmt::Display>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> T {
    match raw {
        None => default,
        Some(v) => match v.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var = name, value = %v, default = %default, "Invalid value, using default");
                default
            }
        },
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => default,
        Some(v) => !matches!(v.as_str(), "false" | "0" | "no" | "off"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_default() {
        assert_eq!(parse_or_default("X", None, 300u64), 300);
        assert_eq!(parse_or_default("X", Some("60".into()), 300u64), 60);
        assert_eq!(parse_or_default("X", Some(" 45 ".into()), 300u64), 45);
        assert_eq!(parse_or_default("X", Some("five".into()), 300u64), 300);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(None, true));
        assert!(!parse_flag(Some("false".into()), true));
        assert!(!parse_flag(Some("0".into()), true));
        assert!(parse_flag(Some("yes".into()), false));
    }
}
