use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use crate::feed::parser::{parse_feed, FeedEntry};

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while fetching a feed.
///
/// None of these abort the polling loop: the pipeline logs the error and
/// treats the feed as empty for the current cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Returns true for infrastructure failures worth backing off for.
    /// Malformed feeds and client errors are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_)
            | FetchError::Timeout
            | FetchError::RateLimited(_)
            | FetchError::IncompleteResponse { .. } => true,
            FetchError::HttpStatus(status) => *status >= 500,
            FetchError::Parse(_) | FetchError::ResponseTooLarge => false,
        }
    }
}

/// Fetches and parses feeds over HTTP.
#[derive(Debug, Clone)]
pub struct FeedReader {
    client: reqwest::Client,
    retry_delay: Duration,
}

impl FeedReader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Sets the first retry delay; later retries double it.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.retry_delay * 2u32.pow(retry)
    }

    /// Fetches `url` and returns its entries in feed order (usually newest first).
    ///
    /// # Behavior
    ///
    /// - Each request has a 30-second timeout
    /// - 429 and 5xx responses are retried up to 3 times with exponential backoff
    /// - Truncated bodies (fewer bytes than Content-Length) are retried the same way
    /// - Response bodies are limited to 10MB
    /// - 4xx responses and parse failures are returned immediately
    pub async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FetchError> {
        let mut retry_count = 0;

        let bytes = loop {
            let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }

                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if response.status().is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(response.status().as_u16()));
                }

                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    status = %response.status(),
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => break bytes,
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }

                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        let entries = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        tracing::debug!(feed = %url, entries = entries.len(), "Feed fetched");
        Ok(entries)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
