use log::info;

use super::Relay;
use crate::util;

/// Relay used in demo mode.
///
/// No listener is opened, every broadcast is logged instead.
#[derive(Debug, Default)]
pub struct LogRelay;

#[async_trait::async_trait]
impl Relay for LogRelay {
    async fn start(&self) -> anyhow::Result<()> {
        info!("relay running in DEMO mode, broadcasts are only logged");
        Ok(())
    }

    async fn stop(&self) {}

    async fn broadcast(&self, pair: &str, payload: &[u8]) {
        info!("DEMO {} -> {}", pair, util::payload_preview(payload, 120));
    }
}
