//! Feed synchronization and delivery.
//!
//! Feeds are read through a [`FeedReader`], checked against the per-feed
//! [`CacheStore`], normalized, filtered and posted to webhook destinations by
//! the [`FeedUpdater`] poll loop.

pub mod cache;
pub mod definitions;
pub mod delivery;
pub mod fetcher;
pub mod normalizer;
pub mod reader;
pub mod rules;
pub mod status;
pub mod types;
pub mod updater;

pub use cache::CacheStore;
pub use definitions::{
    parse_definition, DefinitionLoader, DefinitionSet, InvalidDefinition, TEMPLATE_FILE_NAME,
};
pub use delivery::{
    Delivered, DeliveryError, DeliveryPolicy, DestinationReport, WebhookClient, WebhookDocument,
};
pub use fetcher::{FetchFailure, Fetcher};
pub use normalizer::{truncate_description, NormalizedItem, Normalizer};
pub use reader::{CommandReader, FeedReader, HttpReader, ReadMode, ReadRequest, Reader};
pub use rules::{ContentFilter, ContentRule, FeedRules, FilterVerdict, RuleTable};
pub use status::{ActivityCounters, ProcessState, StatusRecord, StatusTracker};
pub use types::{
    CycleStatistics, FeedDefinition, FetchError, FetchedItem, ImageKind, NotificationPayload,
    MAX_TITLE_LENGTH, TRUNCATION_MARKER,
};
pub use updater::{shutdown_signal, CycleReport, FeedOutcome, FeedUpdater};
