use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{
    Message,
    handshake::server::{ErrorResponse, Request, Response},
    http::StatusCode,
    protocol::WebSocketConfig,
};

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Result, bail};
use log::{debug, info, warn};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::Relay;
use crate::{config::ServerConfig, metrics::ProxyMetrics, util};

/// ============================================================
/// WsRelay
/// ============================================================
///
/// WebSocket server fanning depth bodies out to subscribers.
///
/// Responsibilities:
/// - Accept connections on the configured address
/// - Bind each connection to one pair through its request path
/// - Give each subscriber its own bounded queue and writer task
/// - Drop messages for subscribers that cannot keep up
///
/// Design constraints:
/// - `broadcast` must never wait on a subscriber
/// - A dead subscriber only affects itself
#[derive(Clone)]
pub struct WsRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    listen: String,
    client_queue: usize,
    write_buf_size: usize,
    debug: bool,

    /// Pairs a subscriber may ask for
    pairs: HashSet<String>,

    /// Live subscribers, keyed by pair
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,

    next_id: AtomicU64,
    local_addr: OnceLock<SocketAddr>,
    shutdown: CancellationToken,
    metrics: Arc<ProxyMetrics>,
}

struct Subscriber {
    id: u64,
    queue: mpsc::Sender<Message>,
}

impl WsRelay {
    pub fn new(
        config: &ServerConfig,
        pairs: &[String],
        write_buf_size: usize,
        debug: bool,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                listen: config.listen.clone(),
                client_queue: config.client_queue.max(1),
                write_buf_size,
                debug,
                pairs: pairs.iter().cloned().collect(),
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                local_addr: OnceLock::new(),
                shutdown: CancellationToken::new(),
                metrics,
            }),
        }
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Number of live subscribers for `pair`.
    pub async fn subscriber_count(&self, pair: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .await
            .get(pair)
            .map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl Relay for WsRelay {
    async fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            bail!("relay has been stopped");
        }
        if self.inner.local_addr.get().is_some() {
            bail!("relay already started");
        }

        let listener = TcpListener::bind(&self.inner.listen).await?;
        let addr = listener.local_addr()?;
        if self.inner.local_addr.set(addr).is_err() {
            bail!("relay already started");
        }

        info!("relay listening on ws://{}", addr);
        tokio::spawn(accept_loop(self.inner.clone(), listener));
        Ok(())
    }

    async fn stop(&self) {
        info!("relay stopping");
        self.inner.shutdown.cancel();

        // Dropping the queues ends every writer task with a close frame.
        let mut subscribers = self.inner.subscribers.lock().await;
        let count: usize = subscribers.values().map(Vec::len).sum();
        subscribers.clear();
        self.inner
            .metrics
            .subscribers
            .fetch_sub(count, Ordering::Relaxed);
    }

    async fn broadcast(&self, pair: &str, payload: &[u8]) {
        let message = match std::str::from_utf8(payload) {
            Ok(text) => Message::text(text.to_owned()),
            Err(_) => Message::binary(payload.to_vec()),
        };

        if self.inner.debug {
            debug!("[BROADCAST] {} {}", pair, util::payload_preview(payload, 80));
        }

        let mut subscribers = self.inner.subscribers.lock().await;
        let Some(list) = subscribers.get_mut(pair) else {
            return;
        };

        let metrics = &self.inner.metrics;
        list.retain(|sub| match sub.queue.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics.dropped_messages.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics.subscribers.fetch_sub(1, Ordering::Relaxed);
                false
            }
        });
    }
}

impl RelayInner {
    fn ws_config(&self) -> WebSocketConfig {
        WebSocketConfig::default().write_buffer_size(self.write_buf_size)
    }

    async fn register(&self, pair: &str, queue: mpsc::Sender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.subscribers.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .await
            .entry(pair.to_string())
            .or_default()
            .push(Subscriber { id, queue });
        id
    }

    async fn unregister(&self, pair: &str, id: u64) {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(list) = subscribers.get_mut(pair) {
            let before = list.len();
            list.retain(|sub| sub.id != id);
            if list.len() < before {
                self.metrics.subscribers.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

/// Accepts connections until the relay is stopped.
async fn accept_loop(inner: Arc<RelayInner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_subscriber(inner.clone(), stream, peer));
                }
                Err(e) => warn!("relay accept failed: {}", e),
            }
        }
    }

    info!("relay accept loop finished");
}

/// Runs one subscriber connection from handshake to close.
///
/// TERMINATION:
/// - Subscriber closes or errors
/// - Its queue is dropped (relay stopped, or pruned by `broadcast`)
async fn serve_subscriber(inner: Arc<RelayInner>, stream: TcpStream, peer: SocketAddr) {
    let mut requested: Option<String> = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match util::subscription_key(req.uri().path()) {
            Some(pair) if inner.pairs.contains(pair) => {
                requested = Some(pair.to_string());
                Ok(resp)
            }
            _ => {
                let mut err = ErrorResponse::new(Some("unknown currency pair".to_string()));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(inner.ws_config()),
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!("handshake with {} rejected: {}", peer, e);
            return;
        }
    };

    let Some(pair) = requested else {
        return;
    };

    let (queue, mut outgoing) = mpsc::channel::<Message>(inner.client_queue);
    let id = inner.register(&pair, queue).await;
    info!("subscriber {} ({}) joined {}", id, peer, pair);

    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }

            msg = outgoing.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = write.send(msg).await {
                        debug!("subscriber {} write failed: {}", id, e);
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },

            incoming = read.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Subscribers have nothing to say; pings are answered by tungstenite.
                Some(Ok(_)) => {}
            },
        }
    }

    inner.unregister(&pair, id).await;
    info!("subscriber {} ({}) left {}", id, peer, pair);
}
