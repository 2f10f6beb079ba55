//! Fetcher module
//!
//! Turns the exchange's pull-based depth endpoint into a push feed:
//! - `dispatcher`: walks the pair list and feeds the worker pool
//! - `worker`:     fetches, classifies and broadcasts one pair at a time
//!
//! `Fetcher` owns the lifecycle of both plus the relay.
//!
//! Design notes:
//! - Stop is cooperative: it prevents new dispatch, in-flight fetches finish
//! - Per-pair errors never leave the worker

pub mod dispatcher;
pub mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use log::{error, info};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::SnapshotCache,
    config::ProxyConfig,
    error::LifecycleError,
    metrics::ProxyMetrics,
    relay::Relay,
    requester::DepthSource,
};
use worker::{ActiveWorker, WorkerContext};

pub use worker::FetchOutcome;

/// Where a `Fetcher` is in its one-way lifecycle.
///
/// NotStarted -> Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::NotStarted => "not-started",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// ============================================================
/// Fetcher
/// ============================================================
///
/// Polls depth for every configured pair with a fixed pool of
/// workers and relays each body to the pair's subscribers.
///
/// Not restartable: once stopped, build a new one.
pub struct Fetcher {
    config: Arc<ProxyConfig>,
    concurrency: usize,
    source: Arc<dyn DepthSource>,
    relay: Arc<dyn Relay>,
    cache: Arc<SnapshotCache>,
    metrics: Arc<ProxyMetrics>,
    shutdown: CancellationToken,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Fetcher {
    pub fn new(
        config: ProxyConfig,
        source: Arc<dyn DepthSource>,
        relay: Arc<dyn Relay>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        let concurrency = config.polling_concurrency();
        let (state, _) = watch::channel(LifecycleState::NotStarted);

        Self {
            config: Arc::new(config),
            concurrency,
            source,
            relay,
            cache: Arc::new(SnapshotCache::new()),
            metrics,
            shutdown: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    /// Effective number of workers.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        self.cache.clone()
    }

    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        self.metrics.clone()
    }

    /// Starts the relay, the dispatcher and the worker pool.
    ///
    /// Returns once everything is spawned. A second call fails with
    /// `LifecycleError::AlreadyStarted`.
    pub async fn start(&self) -> Result<()> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::NotStarted {
                *state = LifecycleState::Running;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(LifecycleError::AlreadyStarted(state).into());
        }

        if let Err(e) = self.relay.start().await {
            self.state.send_replace(LifecycleState::NotStarted);
            return Err(e);
        }

        let (requests_tx, requests_rx) = mpsc::channel::<String>(1);
        let requests_rx = Arc::new(Mutex::new(requests_rx));

        let ctx = Arc::new(WorkerContext {
            source: self.source.clone(),
            relay: self.relay.clone(),
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
        });

        let mut handles = Vec::with_capacity(self.concurrency + 1);
        for id in 0..self.concurrency {
            self.metrics.workers_active.fetch_add(1, Ordering::Relaxed);
            handles.push(tokio::spawn(worker::run(
                id,
                ctx.clone(),
                requests_rx.clone(),
                ActiveWorker(self.metrics.clone()),
            )));
        }

        let pairs: Arc<[String]> = self.config.currency_pairs.iter().cloned().collect();
        handles.push(tokio::spawn(dispatcher::run(
            pairs,
            requests_tx,
            self.shutdown.clone(),
            self.metrics.clone(),
        )));

        // Supervisor: the fetcher is stopped once every task has ended.
        let state = self.state.clone();
        tokio::spawn(async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("fetcher task ended abnormally: {}", e);
                }
            }
            state.send_replace(LifecycleState::Stopped);
            info!("fetcher stopped");
        });

        info!(
            "fetcher started: {} pairs, {} workers",
            self.config.currency_pairs.len(),
            self.concurrency
        );
        Ok(())
    }

    /// Stops the relay and signals the dispatcher.
    ///
    /// Does not wait for in-flight fetches, use `wait_stopped` for that.
    pub async fn stop(&self) -> Result<()> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::Stopping;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(LifecycleError::NotRunning(state).into());
        }

        info!("fetcher stopping");
        self.relay.stop().await;
        self.shutdown.cancel();
        Ok(())
    }

    /// Resolves once the dispatcher and every worker have exited.
    ///
    /// Returns immediately if the fetcher was never started.
    pub async fn wait_stopped(&self) {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|s| matches!(s, LifecycleState::NotStarted | LifecycleState::Stopped))
            .await;
    }
}
