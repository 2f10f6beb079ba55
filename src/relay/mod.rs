//! Broadcast relay
//!
//! This module groups the fan-out side of the proxy:
//! - The `Relay` contract the worker pool pushes into
//! - `WsRelay`, the WebSocket server subscribers connect to
//! - `LogRelay`, a demo relay that only logs
//!
//! The fetcher only ever calls `start`, `stop` and `broadcast`.
//! Subscription management stays behind this boundary.

pub mod log_relay;
pub mod ws_server;

pub use log_relay::LogRelay;
pub use ws_server::WsRelay;

/// Fan-out of depth payloads to subscribers of a pair.
///
/// CONTRACT:
/// - `broadcast` is best-effort and must not wait on slow subscribers
/// - `start` and `stop` are called once each by the fetcher
/// - Must be Send + Sync, one instance is shared by all workers
///
#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self);

    /// Delivers `payload` verbatim to every current subscriber of `pair`.
    async fn broadcast(&self, pair: &str, payload: &[u8]);
}
