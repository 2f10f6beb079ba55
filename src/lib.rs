// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - error:     Typed fetch and lifecycle errors
// - schema:    Depth document and snapshot types
// - util:      Shared helpers (paths, time, log previews)
// - cache:     Last-seen depth per pair
// - metrics:   Runtime counters
// - requester: Retrying REST depth client
// - relay:     Broadcast relay contract and WebSocket server
// - fetcher:   Dispatcher, worker pool and lifecycle
//
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod relay;
pub mod requester;
pub mod schema;
pub mod util;

pub use cache::SnapshotCache;
pub use config::{Config, ProxyConfig, ServerConfig};
pub use error::{FetchError, LifecycleError};
pub use fetcher::{FetchOutcome, Fetcher, LifecycleState};
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use relay::{LogRelay, Relay, WsRelay};
pub use requester::{DepthResponse, DepthSource, HttpRequester};
