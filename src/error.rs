//! Typed errors for the request client and the fetcher lifecycle.
//!
//! Everything else in the crate reports through `anyhow`.

use thiserror::Error;

use crate::fetcher::LifecycleState;

/// Final outcome of a depth request that did not succeed.
///
/// Returned after the request client's retry budget is spent; the
/// worker only logs it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The exchange answered with a non-2xx status
    #[error("unexpected status {status}")]
    Status { status: u16 },

    /// Connection or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// The depth URL could not be built for the pair
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(err.to_string())
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// Rate limited or banned by the exchange.
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout => true,
            FetchError::Status { status } => *status >= 500,
            FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Misuse of the `Fetcher` start/stop API.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("fetcher cannot be started from state {0}")]
    AlreadyStarted(LifecycleState),

    #[error("fetcher cannot be stopped from state {0}")]
    NotRunning(LifecycleState),
}
