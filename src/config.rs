use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::Url;
use serde::Deserialize;

/// Worker count used when `polling_concurrency` is zero or missing.
pub const DEFAULT_POLLING_CONCURRENCY: usize = 4;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It defines:
// - The REST endpoint and the pairs to poll
// - Where the WebSocket relay listens
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Polling side: REST endpoint, pairs, retry budget
    pub proxy: ProxyConfig,

    /// Relay side: listen address and subscriber queues
    pub server: ServerConfig,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    /// Rejects configurations the fetcher cannot run with.
    ///
    /// Checked before anything is started so a bad file fails fast
    /// instead of producing an idle proxy.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.proxy.currency_pairs.is_empty() {
            bail!("proxy.currency_pairs must not be empty");
        }

        let mut seen = HashSet::new();
        for pair in &self.proxy.currency_pairs {
            if pair.trim().is_empty() {
                bail!("proxy.currency_pairs contains an empty pair");
            }
            // Pairs are appended to the base URL as one path segment.
            if pair == "." || pair.contains("..") || pair.contains(['/', '?', '#', '%', '\\'])
                || pair.chars().any(char::is_whitespace)
            {
                bail!("proxy.currency_pairs contains invalid pair '{}'", pair);
            }
            if !seen.insert(pair.as_str()) {
                bail!("proxy.currency_pairs contains duplicate pair '{}'", pair);
            }
        }

        Url::parse(&self.proxy.base_url)
            .with_context(|| format!("invalid proxy.base_url '{}'", self.proxy.base_url))?;

        if self.server.client_queue == 0 {
            bail!("server.client_queue must be at least 1");
        }

        Ok(())
    }

    /// Whether per-broadcast debug logging is enabled.
    pub fn debug_log(&self) -> bool {
        self.debug
            .as_ref()
            .map_or(false, |d| d.log.unwrap_or(false))
    }
}

// ------------------------------------------------------------
// Proxy configuration
// ------------------------------------------------------------
//
// Read-only after construction. Shared by the dispatcher, the
// worker pool and the request client.
//
// Notes:
// - `currency_pairs` order is the dispatch order of every cycle.
// - `retry` counts extra attempts, not total attempts.
// - Buffer sizes are hints only.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// REST API base, e.g. "https://api.zaif.jp/api/1/"
    pub base_url: String,

    /// Pairs to poll, in dispatch order (e.g. "btc_jpy")
    pub currency_pairs: Vec<String>,

    /// Number of parallel workers (0 means the default of 4)
    #[serde(default)]
    pub polling_concurrency: usize,

    /// Extra attempts after a transient failure
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Wait between attempts in milliseconds
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Initial capacity of the response body buffer
    #[serde(default = "default_buf_size")]
    pub read_buf_size: usize,

    /// WebSocket write buffer size per subscriber
    #[serde(default = "default_buf_size")]
    pub write_buf_size: usize,
}

impl ProxyConfig {
    /// Minimal configuration for the given pairs, everything else defaulted.
    pub fn new(base_url: impl Into<String>, currency_pairs: Vec<String>) -> Self {
        Self {
            base_url: base_url.into(),
            currency_pairs,
            polling_concurrency: 0,
            retry: default_retry(),
            retry_wait_ms: default_retry_wait_ms(),
            timeout_ms: default_timeout_ms(),
            read_buf_size: default_buf_size(),
            write_buf_size: default_buf_size(),
        }
    }

    /// Effective worker count. Never zero.
    pub fn polling_concurrency(&self) -> usize {
        if self.polling_concurrency == 0 {
            DEFAULT_POLLING_CONCURRENCY
        } else {
            self.polling_concurrency
        }
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ------------------------------------------------------------
// Server configuration
// ------------------------------------------------------------
//
// Defines the WebSocket relay subscribers connect to.
//
// Subscribers open ws://<listen>/<pair> and receive every
// depth body fetched for that pair.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:8080"
    pub listen: String,

    /// Outgoing messages buffered per subscriber before dropping
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,

    /// Demo mode flag (no server, broadcasts are only logged)
    pub demo: Option<bool>,
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Logs every broadcast with a short payload preview
    pub log: Option<bool>,
}

fn default_retry() -> u32 {
    3
}

fn default_retry_wait_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_buf_size() -> usize {
    64 * 1024
}

fn default_client_queue() -> usize {
    256
}
