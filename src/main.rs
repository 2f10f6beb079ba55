// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use rustls::crypto::{CryptoProvider, ring};

use depth_proxy::{Config, Fetcher, HttpRequester, LogRelay, ProxyMetrics, Relay, WsRelay};

use log::info;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Runtime of the depth proxy.
//
// Responsibilities:
// - Initialize logging and the cryptography backend (rustls)
// - Load and validate configuration
// - Wire request client, relay and fetcher together
// - Run until Ctrl-C, then shut down cooperatively
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --------------------------------------------------------
    // IMPORTANT:
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation. This must be executed exactly once and
    // as early as possible in the process lifecycle.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // The first CLI argument overrides the default path.
    // --------------------------------------------------------
    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = load_config(&path)?;
    config.validate()?;

    let metrics = Arc::new(ProxyMetrics::default());

    // --------------------------------------------------------
    // Relay
    //
    // Demo mode replaces the WebSocket server with a relay
    // that only logs what would have been broadcast.
    // --------------------------------------------------------
    let relay: Arc<dyn Relay> = if config.server.demo.unwrap_or(false) {
        Arc::new(LogRelay)
    } else {
        Arc::new(WsRelay::new(
            &config.server,
            &config.proxy.currency_pairs,
            config.proxy.write_buf_size,
            config.debug_log(),
            metrics.clone(),
        ))
    };

    let requester = Arc::new(HttpRequester::new(&config.proxy)?);
    let fetcher = Fetcher::new(config.proxy.clone(), requester, relay, metrics.clone());

    fetcher.start().await?;

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    let reporter = tokio::spawn({
        let metrics = metrics.clone();
        async move {
            loop {
                sleep(Duration::from_secs(10)).await;
                let m = metrics.snapshot();
                info!(
                    "[METRICS] workers={} subs={} cycles={} fetch={} ok={} forbidden={} err={} sent={} dropped={}",
                    m.workers_active,
                    m.subscribers,
                    m.cycles,
                    m.fetches,
                    m.fetch_ok,
                    m.forbidden,
                    m.fetch_errors,
                    m.broadcasts,
                    m.dropped_messages,
                );
            }
        }
    });

    // --------------------------------------------------------
    // Run until interrupted, then drain the worker pool
    // --------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    fetcher.stop().await?;
    fetcher.wait_stopped().await;
    reporter.abort();

    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)?;
    let cfg = serde_json::from_str(&data)?;
    Ok(cfg)
}
