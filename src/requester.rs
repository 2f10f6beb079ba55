use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Url};
use tokio::time::{Duration, sleep};

use crate::{config::ProxyConfig, error::FetchError, util};

/// Result of one logical depth request, after retries.
///
/// The body is whatever was read, also on failure. It may be empty or
/// an error document and is never validated here.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthResponse {
    /// HTTP status, `None` when no response was received at all
    pub status: Option<u16>,

    /// Raw response body
    pub body: Vec<u8>,

    /// Set for non-2xx statuses and transport failures
    pub error: Option<FetchError>,
}

impl DepthResponse {
    pub fn ok(status: u16, body: Vec<u8>) -> Self {
        Self {
            status: Some(status),
            body,
            error: None,
        }
    }

    pub fn failed(status: Option<u16>, body: Vec<u8>, error: FetchError) -> Self {
        Self {
            status,
            body,
            error: Some(error),
        }
    }

    fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(FetchError::is_retryable)
    }
}

/// Source of depth bodies for the worker pool.
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared by every worker
///
#[async_trait]
pub trait DepthSource: Send + Sync {
    /// Fetches the depth of one pair. Never panics, never returns early
    /// with a bare error: the status and body are always reported.
    async fn fetch_depth(&self, pair: &str) -> DepthResponse;
}

/// HTTP depth client with a fixed retry budget.
///
/// Behavior:
/// - GET `<base_url>/depth/<pair>`, no query string
/// - Timeouts, transport errors and 5xx are retried `retry` times,
///   waiting `retry_wait` in between
/// - Other statuses (403 included) are returned on first sight
pub struct HttpRequester {
    client: Client,
    base: Url,
    retry: u32,
    retry_wait: Duration,
    read_buf_size: usize,
}

impl HttpRequester {
    pub fn new(config: &ProxyConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        // `Url::join` drops the last segment unless the base ends with '/'
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            client,
            base: Url::parse(&base)?,
            retry: config.retry,
            retry_wait: config.retry_wait(),
            read_buf_size: config.read_buf_size,
        })
    }

    pub fn depth_url(&self, pair: &str) -> Result<Url, FetchError> {
        self.base
            .join(&util::depth_path(pair))
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))
    }

    async fn attempt(&self, url: &Url) -> DepthResponse {
        let mut response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return DepthResponse::failed(None, Vec::new(), FetchError::from_reqwest(&e)),
        };

        let status = response.status();
        let mut body = Vec::with_capacity(self.read_buf_size);

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    return DepthResponse::failed(
                        Some(status.as_u16()),
                        body,
                        FetchError::from_reqwest(&e),
                    );
                }
            }
        }

        if status.is_success() {
            DepthResponse::ok(status.as_u16(), body)
        } else {
            DepthResponse::failed(
                Some(status.as_u16()),
                body,
                FetchError::Status {
                    status: status.as_u16(),
                },
            )
        }
    }
}

#[async_trait]
impl DepthSource for HttpRequester {
    async fn fetch_depth(&self, pair: &str) -> DepthResponse {
        let url = match self.depth_url(pair) {
            Ok(url) => url,
            Err(e) => return DepthResponse::failed(None, Vec::new(), e),
        };

        let mut attempt = 0;
        loop {
            let response = self.attempt(&url).await;
            if !response.is_retryable() || attempt >= self.retry {
                return response;
            }

            attempt += 1;
            debug!(
                "retrying {} ({}/{}) after {:?}",
                url, attempt, self.retry, response.error
            );
            sleep(self.retry_wait).await;
        }
    }
}
