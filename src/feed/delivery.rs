//! Webhook delivery.
//!
//! A [`NotificationPayload`] is serialized into an embed-style JSON document
//! and posted to each destination in turn. Status handling:
//!
//! - 200 / 204: accepted
//! - 429: wait for the advertised `retry_after` (body, then header, then the
//!   configured default) and retry; a wait above the configured ceiling gives
//!   up on the destination
//! - 404: the destination is gone, give up on it immediately
//! - anything else, or a network error: flat delay and retry
//!
//! All retries share one attempt budget per destination.

use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::feed::types::{ImageKind, NotificationPayload};
use crate::{FeedhookError, Result};

/// Request timeout for one POST.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Retry and pacing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPolicy {
    /// POSTs per destination and item, at least 1.
    pub max_attempts: u32,
    /// Delay after a transient failure.
    pub retry_delay: Duration,
    /// Wait after a 429 that does not say how long to wait.
    pub default_rate_limit: Duration,
    /// Longest 429 wait honored.
    pub max_rate_limit: Duration,
    /// Pause between two destinations of the same item.
    pub pacing: Duration,
}

impl DeliveryPolicy {
    /// Build the policy from the sync configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.delivery_retry_delay_ms),
            default_rate_limit: secs_f64(config.default_rate_limit_secs)
                .unwrap_or(Duration::from_secs(5)),
            max_rate_limit: secs_f64(config.max_rate_limit_secs)
                .unwrap_or(Duration::from_secs(60)),
            pacing: Duration::from_millis(config.destination_pacing_ms),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Successful delivery to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// POSTs made, including the accepted one.
    pub attempts: u32,
    /// Time spent waiting between attempts.
    pub waited: Duration,
}

/// Failed delivery to one destination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The destination answered 404.
    #[error("destination not found")]
    NotFound,
    /// Every attempt failed.
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// POSTs made.
        attempts: u32,
        /// Reason of the last failure.
        last: String,
    },
    /// The destination asked for a longer wait than the configured ceiling.
    #[error("rate limited for {wait:?}, longer than allowed")]
    RateLimitTooLong {
        /// Requested wait.
        wait: Duration,
        /// POSTs made.
        attempts: u32,
    },
    /// The request could not be built (malformed destination URL).
    #[error("invalid request: {0}")]
    Request(String),
}

/// Result of delivering one item to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationReport {
    /// Destination URL.
    pub destination: String,
    /// Outcome.
    pub result: std::result::Result<Delivered, DeliveryError>,
}

/// Classified answer to one POST.
#[derive(Debug, Clone, PartialEq)]
enum AttemptOutcome {
    Accepted,
    RateLimited(Duration),
    RateLimitTooLong(Duration),
    Gone,
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

fn secs_f64(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Wait advertised in a 429 body (`{"retry_after": 2.5}`), in seconds.
fn parse_retry_after_body(body: &str) -> Option<Duration> {
    serde_json::from_str::<RateLimitBody>(body)
        .ok()?
        .retry_after
        .and_then(secs_f64)
}

/// Wait advertised in a `Retry-After` header, in seconds.
fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<f64>().ok().and_then(secs_f64)
}

fn classify(
    status: StatusCode,
    header_wait: Option<Duration>,
    body: &str,
    policy: &DeliveryPolicy,
) -> AttemptOutcome {
    match status {
        StatusCode::OK | StatusCode::NO_CONTENT => AttemptOutcome::Accepted,
        StatusCode::TOO_MANY_REQUESTS => {
            let wait = parse_retry_after_body(body)
                .or(header_wait)
                .unwrap_or(policy.default_rate_limit);
            if wait > policy.max_rate_limit {
                AttemptOutcome::RateLimitTooLong(wait)
            } else {
                AttemptOutcome::RateLimited(wait)
            }
        }
        StatusCode::NOT_FOUND => AttemptOutcome::Gone,
        status => AttemptOutcome::Failed(format!("HTTP {status}")),
    }
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Debug, Serialize)]
struct ImageRef<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct Author<'a> {
    name: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    description: &'a str,
    color: u32,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<ImageRef<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<ImageRef<'a>>,
    author: Author<'a>,
}

/// The JSON document posted to a destination.
#[derive(Debug, Serialize)]
pub struct WebhookDocument<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
    embeds: Vec<Embed<'a>>,
}

impl<'a> WebhookDocument<'a> {
    /// Build the document for a payload.
    pub fn new(payload: &'a NotificationPayload) -> Self {
        let image = (!payload.image_url.is_empty()).then(|| ImageRef {
            url: payload.image_url.as_str(),
        });
        let (image, thumbnail) = match payload.image_kind {
            ImageKind::Image => (image, None),
            ImageKind::Thumbnail => (None, image),
        };

        Self {
            username: &payload.username,
            avatar_url: payload.avatar_url.as_deref(),
            embeds: vec![Embed {
                title: &payload.title,
                url: &payload.url,
                description: &payload.description,
                color: payload.color,
                timestamp: payload.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                image,
                thumbnail,
                author: Author {
                    name: &payload.author_name,
                    url: &payload.author_url,
                    icon_url: payload.author_icon_url.as_deref(),
                },
            }],
        }
    }
}

/// Posts notifications to webhook destinations.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    policy: DeliveryPolicy,
}

impl WebhookClient {
    /// Create a client.
    pub fn new(policy: DeliveryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| FeedhookError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, policy })
    }

    /// The policy in use.
    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    async fn post_once(&self, destination: &str, document: &WebhookDocument<'_>) -> AttemptOutcome {
        let response = match self.client.post(destination).json(document).send().await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::Failed(format!("request failed: {e}")),
        };

        let status = response.status();
        let header_wait = parse_retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        classify(status, header_wait, &body, &self.policy)
    }

    /// Deliver a payload to one destination.
    pub async fn deliver(
        &self,
        payload: &NotificationPayload,
        destination: &str,
    ) -> std::result::Result<Delivered, DeliveryError> {
        reqwest::Url::parse(destination)
            .map_err(|e| DeliveryError::Request(format!("'{destination}': {e}")))?;

        let document = WebhookDocument::new(payload);
        let mut attempt = 0;
        let mut waited = Duration::ZERO;

        loop {
            attempt += 1;
            let (delay, reason) = match self.post_once(destination, &document).await {
                AttemptOutcome::Accepted => return Ok(Delivered { attempts: attempt, waited }),
                AttemptOutcome::Gone => return Err(DeliveryError::NotFound),
                AttemptOutcome::RateLimitTooLong(wait) => {
                    return Err(DeliveryError::RateLimitTooLong {
                        wait,
                        attempts: attempt,
                    })
                }
                AttemptOutcome::RateLimited(wait) => (wait, format!("rate limited ({wait:?})")),
                AttemptOutcome::Failed(reason) => (self.policy.retry_delay, reason),
            };

            if attempt >= self.policy.max_attempts {
                return Err(DeliveryError::RetriesExhausted {
                    attempts: attempt,
                    last: reason,
                });
            }

            warn!(
                "Delivery attempt {}/{} failed: {}; retrying in {:?}",
                attempt, self.policy.max_attempts, reason, delay
            );
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }

    /// Deliver a payload to every destination, in order.
    ///
    /// Destinations are independent: a failure is reported and the next one
    /// is still attempted after the pacing delay.
    pub async fn deliver_all(
        &self,
        payload: &NotificationPayload,
        destinations: &[String],
    ) -> Vec<DestinationReport> {
        let mut reports = Vec::with_capacity(destinations.len());

        for (index, destination) in destinations.iter().enumerate() {
            if index > 0 && !self.policy.pacing.is_zero() {
                tokio::time::sleep(self.policy.pacing).await;
            }

            let result = self.deliver(payload, destination).await;
            match &result {
                Ok(delivered) => {
                    info!("Delivered '{}' ({} attempt(s))", payload.title, delivered.attempts);
                    debug!("Destination: {}", destination);
                }
                Err(e) => warn!("Delivery of '{}' failed: {}", payload.title, e),
            }
            reports.push(DestinationReport {
                destination: destination.clone(),
                result,
            });
        }

        reports
    }
}
