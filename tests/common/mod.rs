#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use depth_proxy::{DepthResponse, DepthSource, FetchError, Relay};
use tokio::sync::Notify;
use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Depth source answering from a fixed per-pair table.
pub struct StubSource {
    responses: HashMap<String, DepthResponse>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            responses: HashMap::new(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(mut self, pair: &str, body: &str) -> Self {
        self.responses
            .insert(pair.to_string(), DepthResponse::ok(200, body.as_bytes().to_vec()));
        self
    }

    pub fn forbidden(mut self, pair: &str, body: &str) -> Self {
        self.responses.insert(
            pair.to_string(),
            DepthResponse::failed(
                Some(403),
                body.as_bytes().to_vec(),
                FetchError::Status { status: 403 },
            ),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DepthSource for StubSource {
    async fn fetch_depth(&self, pair: &str) -> DepthResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.responses.get(pair).cloned().unwrap_or_else(|| {
            DepthResponse::failed(None, Vec::new(), FetchError::Transport("no stub".into()))
        })
    }
}

/// Depth source that answers the first request for each pair at once
/// and holds every later request until `release` is called.
///
/// Lets a test observe exactly one dispatch cycle.
pub struct GatedSource {
    bodies: HashMap<String, String>,
    seen: Mutex<HashSet<String>>,
    released: CancellationToken,
    calls: AtomicUsize,
}

impl GatedSource {
    pub fn new(bodies: &[(&str, &str)]) -> Self {
        Self {
            bodies: bodies
                .iter()
                .map(|(pair, body)| (pair.to_string(), body.to_string()))
                .collect(),
            seen: Mutex::new(HashSet::new()),
            released: CancellationToken::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn release(&self) {
        self.released.cancel();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DepthSource for GatedSource {
    async fn fetch_depth(&self, pair: &str) -> DepthResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let first = self.seen.lock().unwrap().insert(pair.to_string());
        if !first {
            self.released.cancelled().await;
        }
        let body = self.bodies.get(pair).cloned().unwrap_or_default();
        DepthResponse::ok(200, body.into_bytes())
    }
}

/// Relay that records every broadcast in arrival order.
#[derive(Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    notify: Notify,
}

impl RecordingRelay {
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn count_for(&self, pair: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|(p, _)| p == pair).count()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Waits until `cond` holds on the recorded broadcasts.
    pub async fn wait_until(&self, cond: impl Fn(&RecordingRelay) -> bool) {
        timeout(Duration::from_secs(10), async {
            loop {
                let notified = self.notify.notified();
                if cond(self) {
                    return;
                }
                // Re-check periodically in case the notification raced the check.
                let _ = timeout(Duration::from_millis(50), notified).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn start(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn broadcast(&self, pair: &str, payload: &[u8]) {
        self.sent
            .lock()
            .unwrap()
            .push((pair.to_string(), payload.to_vec()));
        self.notify.notify_waiters();
    }
}
