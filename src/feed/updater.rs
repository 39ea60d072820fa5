//! Poll loop.
//!
//! One cycle loads the feed definitions, runs every feed through
//! fetch → change detection → cache write → normalize → filter → deliver,
//! and records the outcome. Feeds are isolated from each other: whatever
//! happens to one feed is turned into a [`FeedOutcome`] and the cycle moves on.
//! Between cycles the loop sleeps, refreshing the status artifact at the
//! heartbeat interval, until the next cycle or a shutdown signal.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SyncConfig};
use crate::feed::cache::CacheStore;
use crate::feed::definitions::DefinitionLoader;
use crate::feed::delivery::{DeliveryPolicy, WebhookClient};
use crate::feed::fetcher::{FetchFailure, Fetcher};
use crate::feed::normalizer::{NormalizedItem, Normalizer};
use crate::feed::reader::FeedReader;
use crate::feed::rules::{FilterVerdict, RuleTable};
use crate::feed::status::{ActivityCounters, ProcessState, StatusTracker};
use crate::feed::types::{CycleStatistics, FeedDefinition, NotificationPayload};
use crate::Result;

/// What happened to one feed in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The fetched item was already delivered.
    Unchanged,
    /// A new item was sent to the destinations.
    Delivered {
        /// Destinations that accepted it.
        delivered: usize,
        /// Destinations that did not.
        failed: usize,
    },
    /// A new item was dropped by a content filter.
    Filtered(&'static str),
    /// Every fetch attempt failed.
    FetchFailed(FetchFailure),
    /// Neither the feed nor the global configuration names a destination.
    NoDestinations,
    /// The cache could not be read or written.
    CacheFailed(String),
    /// The definition file was rejected.
    InvalidDefinition(String),
}

/// Statistics and activity of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Per-feed counts.
    pub stats: CycleStatistics,
    /// Item-level counters.
    pub activity: ActivityCounters,
}

impl CycleReport {
    /// Account for one feed outcome.
    pub fn record(&mut self, outcome: &FeedOutcome) {
        self.stats.total += 1;
        match outcome {
            FeedOutcome::Unchanged => {}
            FeedOutcome::Delivered { delivered, failed } => {
                if *delivered > 0 {
                    self.stats.updated += 1;
                } else {
                    self.stats.failed += 1;
                }
                self.activity.items_delivered += *delivered as u64;
                self.activity.delivery_failures += *failed as u64;
            }
            FeedOutcome::Filtered(_) => {
                self.stats.filtered += 1;
                self.activity.items_filtered += 1;
            }
            FeedOutcome::FetchFailed(_) => {
                self.stats.failed += 1;
                self.activity.fetch_failures += 1;
            }
            FeedOutcome::NoDestinations
            | FeedOutcome::CacheFailed(_)
            | FeedOutcome::InvalidDefinition(_) => self.stats.failed += 1,
        }
    }
}

/// Drives the poll loop.
pub struct FeedUpdater<R> {
    sync: SyncConfig,
    reader: R,
    fetcher: Fetcher,
    cache: CacheStore,
    rules: RuleTable,
    normalizer: Normalizer,
    webhook: WebhookClient,
    definitions: DefinitionLoader,
}

impl<R: FeedReader> FeedUpdater<R> {
    /// Create an updater from configuration.
    pub fn new(config: &Config, reader: R) -> Result<Self> {
        let sync = config.sync.clone();
        Ok(Self {
            fetcher: Fetcher::from_config(&sync),
            cache: CacheStore::new(&sync.cache_dir),
            rules: RuleTable::new(config.rules.clone()),
            normalizer: Normalizer::new(sync.char_limit, sync.placeholder_image.clone()),
            webhook: WebhookClient::new(DeliveryPolicy::from_config(&sync))?,
            definitions: DefinitionLoader::new(&sync.feeds_dir),
            reader,
            sync,
        })
    }

    /// The feed definition loader.
    pub fn definitions(&self) -> &DefinitionLoader {
        &self.definitions
    }

    /// The change detection cache.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn build_payload(&self, feed: &FeedDefinition, item: NormalizedItem) -> NotificationPayload {
        let avatar = item.avatar_override.or_else(|| feed.avatar_url.clone());
        NotificationPayload {
            username: self.sync.username.clone().unwrap_or_else(|| feed.name.clone()),
            avatar_url: avatar.clone(),
            title: item.title,
            url: item.link,
            description: item.description,
            color: feed.color,
            timestamp: item.published_at,
            image_kind: item.image_kind,
            image_url: item.image_url,
            author_name: feed.name.clone(),
            author_url: feed.source_url.clone(),
            author_icon_url: avatar,
        }
    }

    /// Run one feed through the pipeline.
    pub async fn process_feed(&self, feed: &FeedDefinition) -> FeedOutcome {
        let destinations = feed.resolve_destinations(&self.sync.default_destinations);
        if destinations.is_empty() {
            warn!("Feed '{}' has no destinations; skipping", feed.name);
            return FeedOutcome::NoDestinations;
        }

        let rules = self.rules.for_feed(feed);
        debug!("Fetching '{}' from {}", feed.name, feed.source_url);

        let item = match self
            .fetcher
            .fetch(&self.reader, &feed.source_url, &feed.name, rules.reversed)
            .await
        {
            Ok(item) => item,
            Err(failure) => {
                error!("Failed to fetch feed '{}': {}", feed.name, failure);
                return FeedOutcome::FetchFailed(failure);
            }
        };

        match self.cache.is_new(&feed.name, &item) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Feed '{}' unchanged", feed.name);
                return FeedOutcome::Unchanged;
            }
            Err(e) => {
                error!("Failed to read cache for '{}': {}", feed.name, e);
                return FeedOutcome::CacheFailed(e.to_string());
            }
        }

        info!("New item in '{}': {}", feed.name, item.title);

        // Recorded before delivery: a crash mid-delivery loses the item
        // instead of repeating it on every cycle.
        if let Err(e) = self.cache.record_delivered(&feed.name, &item) {
            error!("Failed to write cache for '{}': {}", feed.name, e);
            return FeedOutcome::CacheFailed(e.to_string());
        }

        let mut normalized = self.normalizer.normalize_text(&item, &rules);
        if let FilterVerdict::Drop(reason) = rules.filter(&normalized.title) {
            info!("Skipping '{}' in '{}': {}", normalized.title, feed.name, reason);
            return FeedOutcome::Filtered(reason);
        }

        let lookup = self.normalizer.resolve_image(
            &self.reader,
            &feed.source_url,
            &rules,
            &mut normalized,
        );
        if tokio::time::timeout(self.fetcher.timeout(), lookup)
            .await
            .is_err()
        {
            debug!("Image lookup for '{}' timed out", feed.name);
        }

        let payload = self.build_payload(feed, normalized);
        let reports = self.webhook.deliver_all(&payload, &destinations).await;
        let delivered = reports.iter().filter(|r| r.result.is_ok()).count();

        FeedOutcome::Delivered {
            delivered,
            failed: reports.len() - delivered,
        }
    }

    /// Run one cycle over all configured feeds.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let set = match self.definitions.load() {
            Ok(set) => set,
            Err(e) => {
                error!(
                    "Failed to read feeds from {}: {}",
                    self.definitions.dir().display(),
                    e
                );
                return report;
            }
        };

        for invalid in &set.invalid {
            error!("Skipping {}: {}", invalid.path.display(), invalid.error);
            report.record(&FeedOutcome::InvalidDefinition(invalid.error.to_string()));
        }

        let outcomes: Vec<FeedOutcome> = stream::iter(set.feeds.iter())
            .map(|feed| self.process_feed(feed))
            .buffer_unordered(self.sync.max_concurrent_feeds.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }
        report
    }

    /// Run cycles until `shutdown` completes, then write the final status.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let poll_interval = self.sync.poll_interval();
        let heartbeat = self.sync.heartbeat_interval().max(Duration::from_secs(1));
        let mut status = StatusTracker::new(&self.sync.status_file);

        info!(
            "Feed updater started (poll interval: {} seconds)",
            poll_interval.as_secs()
        );
        write_status(&status, ProcessState::Running);

        tokio::pin!(shutdown);

        'cycles: loop {
            let report = tokio::select! {
                report = self.run_cycle() => report,
                _ = &mut shutdown => break 'cycles,
            };

            status.record_cycle(report.stats, &report.activity);
            info!(
                "Cycle complete: {} feed(s), {} updated, {} filtered, {} failed",
                report.stats.total, report.stats.updated, report.stats.filtered, report.stats.failed
            );
            write_status(&status, ProcessState::Running);

            let next_cycle = Instant::now() + poll_interval;
            loop {
                let now = Instant::now();
                if now >= next_cycle {
                    break;
                }
                let nap = heartbeat.min(next_cycle - now);
                tokio::select! {
                    _ = tokio::time::sleep(nap) => {}
                    _ = &mut shutdown => break 'cycles,
                }
                write_status(&status, ProcessState::Running);
            }
        }

        info!("Shutting down");
        status.write(ProcessState::Stopped)
    }
}

fn write_status(status: &StatusTracker, state: ProcessState) {
    if let Err(e) = status.write(state) {
        warn!("Failed to write status to {}: {}", status.path().display(), e);
    }
}

/// Completes on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
