//! Feed fetcher with timeout, retry and output validation.
//!
//! Every read is bounded by a wall-clock timeout. Output must parse as a
//! [`FetchedItem`]; anything else counts as a failed attempt even when the
//! reader itself succeeded. Attempts are separated by a progressive backoff
//! of `backoff_step × attempt`.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::feed::reader::{FeedReader, ReadRequest};
use crate::feed::types::{FetchError, FetchedItem};

/// All attempts were used up without a valid item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fetch failed after {attempts} attempt(s): {cause}")]
pub struct FetchFailure {
    /// Attempts made.
    pub attempts: u32,
    /// Cause of the last attempt's failure.
    pub cause: FetchError,
}

/// Fetch policy.
#[derive(Debug, Clone)]
pub struct Fetcher {
    max_attempts: u32,
    timeout: Duration,
    backoff_step: Duration,
}

impl Fetcher {
    /// Create a fetcher.
    pub fn new(max_attempts: u32, timeout: Duration, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout,
            backoff_step,
        }
    }

    /// Create a fetcher from the sync configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_secs(config.fetch_timeout_secs),
            Duration::from_secs(config.fetch_backoff_secs),
        )
    }

    /// Per-read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay before the attempt following `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// One read, bounded by the timeout.
    pub async fn read_once<R: FeedReader>(
        &self,
        reader: &R,
        request: &ReadRequest<'_>,
    ) -> Result<String, FetchError> {
        match tokio::time::timeout(self.timeout, reader.read(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    /// Fetch the newest (or, reversed, oldest) item of a feed.
    pub async fn fetch<R: FeedReader>(
        &self,
        reader: &R,
        source_url: &str,
        feed_name: &str,
        reversed: bool,
    ) -> Result<FetchedItem, FetchFailure> {
        let request = ReadRequest::item(source_url, reversed);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .read_once(reader, &request)
                .await
                .and_then(|raw| FetchedItem::parse(&raw));

            let cause = match result {
                Ok(item) => {
                    debug!("Fetched '{}' on attempt {}", feed_name, attempt);
                    return Ok(item);
                }
                Err(cause) => cause,
            };

            if attempt >= self.max_attempts {
                return Err(FetchFailure {
                    attempts: attempt,
                    cause,
                });
            }

            let delay = self.backoff(attempt);
            warn!(
                "Fetch attempt {}/{} for '{}' failed: {}; retrying in {:?}",
                attempt, self.max_attempts, feed_name, cause, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
