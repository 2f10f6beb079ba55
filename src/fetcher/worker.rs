use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, mpsc};

use crate::{
    cache::SnapshotCache,
    metrics::ProxyMetrics,
    relay::Relay,
    requester::{DepthResponse, DepthSource},
    schema::DepthDocument,
};

/// How a single fetch ended, as far as the worker cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Ok,

    /// HTTP 403, usually the exchange throttling us
    Forbidden,

    /// Any other status or transport failure
    Failed,
}

impl FetchOutcome {
    pub fn classify(response: &DepthResponse) -> Self {
        match (&response.error, response.status) {
            (None, _) => FetchOutcome::Ok,
            (Some(_), Some(403)) => FetchOutcome::Forbidden,
            (Some(_), _) => FetchOutcome::Failed,
        }
    }
}

/// Everything a worker needs, shared by the whole pool.
pub(crate) struct WorkerContext {
    pub source: Arc<dyn DepthSource>,
    pub relay: Arc<dyn Relay>,
    pub cache: Arc<SnapshotCache>,
    pub metrics: Arc<ProxyMetrics>,
}

impl WorkerContext {
    /// Fetches one pair and hands the body to the relay.
    ///
    /// The body is broadcast whatever the outcome; failures only show
    /// up in the logs and the metrics. Successful bodies that parse as
    /// depth also refresh the snapshot cache.
    pub(crate) async fn poll_pair(&self, pair: &str) -> FetchOutcome {
        let response = self.source.fetch_depth(pair).await;
        self.metrics.fetches.fetch_add(1, Ordering::Relaxed);

        let outcome = FetchOutcome::classify(&response);
        match outcome {
            FetchOutcome::Ok => {
                self.metrics.fetch_ok.fetch_add(1, Ordering::Relaxed);
                self.refresh_cache(pair, &response.body);
            }
            FetchOutcome::Forbidden => {
                self.metrics.forbidden.fetch_add(1, Ordering::Relaxed);
                warn!("occurred 403 forbidden, currency pair = {}", pair);
            }
            FetchOutcome::Failed => {
                self.metrics.fetch_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    "can not get depth, currency pair = {} (status = {:?}, error = {:?})",
                    pair, response.status, response.error
                );
            }
        }

        self.relay.broadcast(pair, &response.body).await;
        self.metrics.broadcasts.fetch_add(1, Ordering::Relaxed);

        outcome
    }

    fn refresh_cache(&self, pair: &str, body: &[u8]) {
        let Some(doc) = DepthDocument::parse(body) else {
            debug!("depth body for {} is not a depth document, cache untouched", pair);
            return;
        };

        self.cache.update(pair, doc.bids, doc.asks, doc.last_price);
    }
}

/// Decrements the active worker gauge when a worker ends, panics included.
pub(crate) struct ActiveWorker(pub Arc<ProxyMetrics>);

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.0.workers_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Polling loop of one worker.
///
/// TERMINATION:
/// - Returns once the dispatch channel is closed and empty
pub(crate) async fn run(
    id: usize,
    ctx: Arc<WorkerContext>,
    requests: Arc<Mutex<mpsc::Receiver<String>>>,
    _active: ActiveWorker,
) {
    info!("worker {}: start polling loop", id);

    loop {
        let next = requests.lock().await.recv().await;
        let Some(pair) = next else {
            break;
        };

        ctx.poll_pair(&pair).await;
    }

    info!("worker {}: finish polling loop", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::cell::RefCell;
    use std::sync::Mutex as StdMutex;

    thread_local! {
        static CAPTURED: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
    }

    /// Keeps log records per thread, so parallel tests only see their own.
    struct CaptureLogger;

    impl Log for CaptureLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            CAPTURED.with(|c| c.borrow_mut().push((record.level(), record.args().to_string())));
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    fn capture_logs() {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
        CAPTURED.with(|c| c.borrow_mut().clear());
    }

    fn captured(level: Level) -> Vec<String> {
        CAPTURED.with(|c| {
            c.borrow()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, msg)| msg.clone())
                .collect()
        })
    }

    struct FixedSource(DepthResponse);

    #[async_trait::async_trait]
    impl DepthSource for FixedSource {
        async fn fetch_depth(&self, _pair: &str) -> DepthResponse {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<(String, Vec<u8>)>>);

    #[async_trait::async_trait]
    impl Relay for Recorder {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) {}

        async fn broadcast(&self, pair: &str, payload: &[u8]) {
            self.0.lock().unwrap().push((pair.to_string(), payload.to_vec()));
        }
    }

    fn context(response: DepthResponse) -> (WorkerContext, Arc<Recorder>) {
        let relay = Arc::new(Recorder::default());
        let ctx = WorkerContext {
            source: Arc::new(FixedSource(response)),
            relay: relay.clone(),
            cache: Arc::new(SnapshotCache::new()),
            metrics: Arc::default(),
        };
        (ctx, relay)
    }

    #[test]
    fn classification() {
        let ok = DepthResponse::ok(200, vec![]);
        let forbidden =
            DepthResponse::failed(Some(403), vec![], FetchError::Status { status: 403 });
        let server = DepthResponse::failed(Some(500), vec![], FetchError::Status { status: 500 });
        let transport = DepthResponse::failed(None, vec![], FetchError::Timeout);

        assert_eq!(FetchOutcome::classify(&ok), FetchOutcome::Ok);
        assert_eq!(FetchOutcome::classify(&forbidden), FetchOutcome::Forbidden);
        assert_eq!(FetchOutcome::classify(&server), FetchOutcome::Failed);
        assert_eq!(FetchOutcome::classify(&transport), FetchOutcome::Failed);
    }

    #[tokio::test]
    async fn forbidden_is_still_broadcast_once() {
        let (ctx, relay) = context(DepthResponse::failed(
            Some(403),
            b"forbidden".to_vec(),
            FetchError::Status { status: 403 },
        ));

        assert_eq!(ctx.poll_pair("btc_jpy").await, FetchOutcome::Forbidden);

        let sent = relay.0.lock().unwrap().clone();
        assert_eq!(sent, vec![("btc_jpy".to_string(), b"forbidden".to_vec())]);

        let m = ctx.metrics.snapshot();
        assert_eq!(m.forbidden, 1);
        assert_eq!(m.fetch_errors, 0);
        assert_eq!(m.broadcasts, 1);
        assert!(ctx.cache.is_empty());
    }

    #[tokio::test]
    async fn other_failures_are_counted_separately_and_broadcast() {
        let (ctx, relay) = context(DepthResponse::failed(None, vec![], FetchError::Timeout));

        assert_eq!(ctx.poll_pair("eth_jpy").await, FetchOutcome::Failed);

        assert_eq!(relay.0.lock().unwrap().len(), 1);
        let m = ctx.metrics.snapshot();
        assert_eq!(m.forbidden, 0);
        assert_eq!(m.fetch_errors, 1);
    }

    #[tokio::test]
    async fn success_refreshes_cache_and_broadcasts_raw_body() {
        let body = br#"{"asks":[[101.0,1.0]],"bids":[[99.0,2.0]],"last_price":100.0}"#.to_vec();
        let (ctx, relay) = context(DepthResponse::ok(200, body.clone()));

        assert_eq!(ctx.poll_pair("btc_jpy").await, FetchOutcome::Ok);

        assert_eq!(relay.0.lock().unwrap()[0].1, body);
        let snap = ctx.cache.get("btc_jpy").unwrap();
        assert_eq!(snap.asks, vec![[101.0, 1.0]]);
        assert_eq!(snap.bids, vec![[99.0, 2.0]]);
        assert_eq!(snap.last_price, 100.0);
    }

    #[tokio::test]
    async fn forbidden_logs_one_warning_and_no_error() {
        capture_logs();
        let (ctx, _relay) = context(DepthResponse::failed(
            Some(403),
            Vec::new(),
            FetchError::Status { status: 403 },
        ));

        ctx.poll_pair("btc_jpy").await;

        let warnings = captured(Level::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("403 forbidden"));
        assert!(warnings[0].contains("btc_jpy"));
        assert!(captured(Level::Error).is_empty());
    }

    #[tokio::test]
    async fn other_failures_log_one_error_and_no_warning() {
        capture_logs();
        let (ctx, _relay) = context(DepthResponse::failed(
            Some(500),
            Vec::new(),
            FetchError::Status { status: 500 },
        ));

        ctx.poll_pair("eth_jpy").await;

        let errors = captured(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("can not get depth"));
        assert!(!errors[0].contains("403 forbidden"));
        assert!(captured(Level::Warn).is_empty());
    }

    #[tokio::test]
    async fn success_logs_no_warning_or_error() {
        capture_logs();
        let (ctx, _relay) = context(DepthResponse::ok(200, b"{}".to_vec()));

        ctx.poll_pair("btc_jpy").await;

        assert!(captured(Level::Warn).is_empty());
        assert!(captured(Level::Error).is_empty());
    }

    #[test]
    fn refresh_never_pairs_bids_with_a_stale_last_price() {
        let (ctx, _relay) = context(DepthResponse::ok(200, Vec::new()));
        let ctx = Arc::new(ctx);

        let writer = {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                for v in 1..20_000u32 {
                    let body = format!(
                        r#"{{"asks":[[{v},1]],"bids":[[{v},1]],"last_price":{v}}}"#
                    );
                    ctx.refresh_cache("btc_jpy", body.as_bytes());
                }
            })
        };

        for _ in 0..50_000 {
            if let Some(snap) = ctx.cache.get("btc_jpy") {
                assert_eq!(snap.bids[0][0], snap.last_price);
                assert_eq!(snap.asks[0][0], snap.last_price);
            }
        }
        writer.join().unwrap();

        let last = ctx.cache.get("btc_jpy").unwrap();
        assert_eq!(last.last_price, 19_999.0);
    }

    #[tokio::test]
    async fn unparsable_success_body_leaves_cache_alone() {
        let (ctx, relay) = context(DepthResponse::ok(200, b"{...depth...}".to_vec()));

        assert_eq!(ctx.poll_pair("btc_jpy").await, FetchOutcome::Ok);
        assert_eq!(relay.0.lock().unwrap()[0].1, b"{...depth...}");
        assert!(ctx.cache.get("btc_jpy").is_none());
    }

    #[tokio::test]
    async fn worker_exits_when_channel_closes() {
        let (ctx, relay) = context(DepthResponse::ok(200, b"{}".to_vec()));
        let ctx = Arc::new(ctx);
        let (tx, rx) = mpsc::channel(1);
        let rx = Arc::new(Mutex::new(rx));

        ctx.metrics.workers_active.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(run(0, ctx.clone(), rx, ActiveWorker(ctx.metrics.clone())));

        tx.send("btc_jpy".to_string()).await.unwrap();
        tx.send("eth_jpy".to_string()).await.unwrap();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(relay.0.lock().unwrap().len(), 2);
        assert_eq!(ctx.metrics.snapshot().workers_active, 0);
    }
}
