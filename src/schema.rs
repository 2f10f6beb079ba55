use serde::Deserialize;

/// One price level: `[price, volume]`.
pub type Level = [f64; 2];

// ------------------------------------------------------------
// Depth document
// ------------------------------------------------------------
//
// Shape of a depth response body as returned by the exchange:
//
//     {"asks": [[price, volume], ...], "bids": [[price, volume], ...]}
//
// IMPORTANT:
// - Only used to refresh the snapshot cache.
// - Broadcast payloads are the raw body, never this struct.
// - Unknown fields are ignored.
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DepthDocument {
    /// Ask side, best ask first
    pub asks: Vec<Level>,

    /// Bid side, best bid first
    pub bids: Vec<Level>,

    /// Last traded price, when the endpoint includes it
    #[serde(default)]
    pub last_price: Option<f64>,
}

impl DepthDocument {
    /// Best-effort parse. Error bodies and partial reads yield `None`.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

// ------------------------------------------------------------
// Depth snapshot
// ------------------------------------------------------------
//
// Last-seen view of one pair as held by the snapshot cache.
//
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthSnapshot {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub last_price: f64,
}
