//! feedhook - feed-to-webhook relay
//!
//! Polls a set of independently configured feeds, detects new items per feed
//! and posts each new item as an embed-style notification to webhook
//! destinations.

pub mod config;
pub mod error;
pub mod feed;
pub mod logging;

pub use config::Config;
pub use error::{FeedhookError, Result};
pub use feed::{
    CacheStore, CycleReport, FeedDefinition, FeedOutcome, FeedReader, FeedUpdater, FetchedItem,
    NotificationPayload, Reader, WebhookClient,
};
