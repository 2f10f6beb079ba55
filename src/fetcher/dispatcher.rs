use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{metrics::ProxyMetrics, util};

/// Walks the pair list forever, handing each pair to the worker pool.
///
/// Behavior:
/// - The stop token is checked before every offer; once it is seen the
///   whole loop ends, not just the current cycle
/// - The send waits for a free worker, so slow fetches throttle dispatch
/// - Cycles run back to back, there is no interval
///
/// The sender is dropped on return, which closes the channel and lets
/// the workers drain and exit.
pub(crate) async fn run(
    pairs: Arc<[String]>,
    requests: mpsc::Sender<String>,
    shutdown: CancellationToken,
    metrics: Arc<ProxyMetrics>,
) {
    info!("start polling request loop");

    if pairs.is_empty() {
        warn!("no currency pairs configured, dispatcher idle until stop");
        shutdown.cancelled().await;
        info!("finish polling request loop");
        return;
    }

    'dispatch: loop {
        debug!("start get depth of currency pairs ({})", util::now_ns());
        metrics.cycles.fetch_add(1, Ordering::Relaxed);

        for pair in pairs.iter() {
            if shutdown.is_cancelled() {
                break 'dispatch;
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break 'dispatch,

                sent = requests.send(pair.clone()) => {
                    if sent.is_err() {
                        warn!("dispatch channel closed by workers");
                        break 'dispatch;
                    }
                }
            }
        }
    }

    drop(requests);
    info!("finish polling request loop");
}
