//! Configuration module for feedhook.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{FeedhookError, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "FEEDHOOK_CONFIG";

/// Environment variable overriding the default destination list (comma-joined).
pub const DEFAULT_DESTINATIONS_ENV: &str = "FEEDHOOK_DEFAULT_DESTINATIONS";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Poll loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Directory holding one feed definition file per feed.
    #[serde(default = "default_feeds_dir")]
    pub feeds_dir: String,
    /// Directory holding the per-feed cache files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Path of the status/heartbeat artifact.
    #[serde(default = "default_status_file")]
    pub status_file: String,
    /// Destinations used by feeds that configure none.
    #[serde(default)]
    pub default_destinations: Vec<String>,
    /// Seconds between the start of two poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Description length limit in characters.
    #[serde(default = "default_char_limit")]
    pub char_limit: usize,
    /// Attempt limit shared by fetches and deliveries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wall-clock bound for a single fetch attempt.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Fetch backoff step; attempt `n` waits `n * step`.
    #[serde(default = "default_fetch_backoff")]
    pub fetch_backoff_secs: u64,
    /// Flat delay before retrying a transient delivery failure.
    #[serde(default = "default_delivery_retry_delay")]
    pub delivery_retry_delay_ms: u64,
    /// Wait applied on HTTP 429 when the body carries no usable `retry_after`.
    #[serde(default = "default_rate_limit_secs")]
    pub default_rate_limit_secs: f64,
    /// Longest 429 wait honored; a destination asking for more is given up.
    #[serde(default = "default_max_rate_limit_secs")]
    pub max_rate_limit_secs: f64,
    /// Pause between two destinations of the same item.
    #[serde(default = "default_destination_pacing")]
    pub destination_pacing_ms: u64,
    /// Status refresh cadence while sleeping between cycles.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Number of distinct feeds processed at the same time (1 = sequential).
    #[serde(default = "default_max_concurrent_feeds")]
    pub max_concurrent_feeds: usize,
    /// Image sent when an item has no usable image.
    #[serde(default = "default_placeholder_image")]
    pub placeholder_image: String,
    /// Webhook username; the feed name is used when unset.
    #[serde(default)]
    pub username: Option<String>,
}

fn default_feeds_dir() -> String {
    "feeds".to_string()
}

fn default_cache_dir() -> String {
    "data/cache".to_string()
}

fn default_status_file() -> String {
    "data/status.json".to_string()
}

fn default_poll_interval() -> u64 {
    300 // 5 minutes
}

fn default_char_limit() -> usize {
    1100
}

fn default_max_retries() -> u32 {
    3
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_fetch_backoff() -> u64 {
    3
}

fn default_delivery_retry_delay() -> u64 {
    2000
}

fn default_rate_limit_secs() -> f64 {
    5.0
}

fn default_max_rate_limit_secs() -> f64 {
    60.0
}

fn default_destination_pacing() -> u64 {
    1000
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_concurrent_feeds() -> usize {
    1
}

fn default_placeholder_image() -> String {
    "https://upload.wikimedia.org/wikipedia/commons/c/ca/1x1.png".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feeds_dir: default_feeds_dir(),
            cache_dir: default_cache_dir(),
            status_file: default_status_file(),
            default_destinations: Vec::new(),
            poll_interval_secs: default_poll_interval(),
            char_limit: default_char_limit(),
            max_retries: default_max_retries(),
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_backoff_secs: default_fetch_backoff(),
            delivery_retry_delay_ms: default_delivery_retry_delay(),
            default_rate_limit_secs: default_rate_limit_secs(),
            max_rate_limit_secs: default_max_rate_limit_secs(),
            destination_pacing_ms: default_destination_pacing(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_concurrent_feeds: default_max_concurrent_feeds(),
            placeholder_image: default_placeholder_image(),
            username: None,
        }
    }
}

impl SyncConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Heartbeat cadence as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

/// Which implementation of the external feed-reading capability to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderBackend {
    /// In-process HTTP fetch and parse.
    Http,
    /// External command-line feed tool.
    Command,
}

/// Feed reader configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Reader backend.
    #[serde(default = "default_reader_backend")]
    pub backend: ReaderBackend,
    /// Program run by the command backend.
    #[serde(default = "default_reader_command")]
    pub command: String,
    /// Arguments for a single-item read; `{url}` is substituted.
    #[serde(default = "default_reader_args")]
    pub args: Vec<String>,
    /// Extra arguments appended for reversed feeds.
    #[serde(default = "default_reader_reversed_args")]
    pub reversed_args: Vec<String>,
    /// Arguments for the image lookup read; `{url}` is substituted.
    #[serde(default = "default_reader_media_args")]
    pub media_args: Vec<String>,
    /// User agent sent by the HTTP backend.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum feed size in bytes accepted by the HTTP backend.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
}

fn default_reader_backend() -> ReaderBackend {
    ReaderBackend::Http
}

fn default_reader_command() -> String {
    "rsstail".to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_reader_args() -> Vec<String> {
    strings(&["-1", "-u", "{url}", "-n", "1", "-l", "-p", "-d"])
}

fn default_reader_reversed_args() -> Vec<String> {
    strings(&["-r"])
}

fn default_reader_media_args() -> Vec<String> {
    strings(&["-1", "-u", "{url}", "-n", "1", "-N", "-l"])
}

fn default_user_agent() -> String {
    "feedhook/0.1 (+feed relay)".to_string()
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            backend: default_reader_backend(),
            command: default_reader_command(),
            args: default_reader_args(),
            reversed_args: default_reader_reversed_args(),
            media_args: default_reader_media_args(),
            user_agent: default_user_agent(),
            max_feed_size_bytes: default_max_feed_size(),
        }
    }
}

/// Fixed payload sent instead of the item content for a recognized release title.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AnnouncementRule {
    /// Feed the override applies to.
    pub feed: String,
    /// Title fragment that identifies a release announcement.
    pub title_contains: String,
    /// Replacement description.
    pub description: String,
    /// Replacement avatar.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Per-feed-name rule table.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// Feeds (by name or category) whose source lists entries oldest-first.
    #[serde(default)]
    pub reversed: Vec<String>,
    /// Feeds cleaned with the loose rule.
    #[serde(default)]
    pub loose: Vec<String>,
    /// Feeds whose content is reduced to a single linked image.
    #[serde(default)]
    pub image_only: Vec<String>,
    /// Feeds sending a full image instead of a thumbnail.
    #[serde(default)]
    pub full_image: Vec<String>,
    /// Feeds dropping paid (`[$]`) articles.
    #[serde(default = "default_skip_paid")]
    pub skip_paid: Vec<String>,
    /// Feeds dropping `Re:` follow-ups.
    #[serde(default = "default_skip_replies")]
    pub skip_replies: Vec<String>,
    /// Feeds delivering only `New:` tracker entries.
    #[serde(default = "default_new_only")]
    pub new_only: Vec<String>,
    /// Release announcement overrides.
    #[serde(default)]
    pub announcements: Vec<AnnouncementRule>,
}

fn default_skip_paid() -> Vec<String> {
    strings(&["LWN"])
}

fn default_skip_replies() -> Vec<String> {
    strings(&["LKML"])
}

fn default_new_only() -> Vec<String> {
    strings(&["Bugzilla"])
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            reversed: Vec::new(),
            loose: Vec::new(),
            image_only: Vec::new(),
            full_image: Vec::new(),
            skip_paid: default_skip_paid(),
            skip_replies: default_skip_replies(),
            new_only: default_new_only(),
            announcements: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedhook.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Poll loop configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Feed reader configuration.
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Per-feed rules.
    #[serde(default)]
    pub rules: RulesConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedhookError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedhookError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDHOOK_DEFAULT_DESTINATIONS`: comma-joined default destination list
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(DEFAULT_DESTINATIONS_ENV) {
            let destinations = split_destinations(&value);
            if !destinations.is_empty() {
                self.sync.default_destinations = destinations;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_retries == 0 {
            return Err(FeedhookError::Validation(
                "sync.max_retries must be at least 1".to_string(),
            ));
        }
        if self.sync.char_limit == 0 {
            return Err(FeedhookError::Validation(
                "sync.char_limit must be greater than 0".to_string(),
            ));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(FeedhookError::Validation(
                "sync.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if !(self.sync.max_rate_limit_secs.is_finite() && self.sync.max_rate_limit_secs > 0.0) {
            return Err(FeedhookError::Validation(
                "sync.max_rate_limit_secs must be a positive number".to_string(),
            ));
        }
        if self.sync.default_rate_limit_secs > self.sync.max_rate_limit_secs {
            return Err(FeedhookError::Validation(
                "sync.default_rate_limit_secs must not exceed sync.max_rate_limit_secs".to_string(),
            ));
        }
        if self.sync.max_concurrent_feeds == 0 {
            return Err(FeedhookError::Validation(
                "sync.max_concurrent_feeds must be at least 1".to_string(),
            ));
        }
        if self.reader.backend == ReaderBackend::Command && self.reader.command.trim().is_empty() {
            return Err(FeedhookError::Validation(
                "reader.command is required for the command backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split a comma-joined destination list, dropping blanks.
pub fn split_destinations(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.sync.feeds_dir, "feeds");
        assert_eq!(config.sync.cache_dir, "data/cache");
        assert_eq!(config.sync.status_file, "data/status.json");
        assert!(config.sync.default_destinations.is_empty());
        assert_eq!(config.sync.poll_interval_secs, 300);
        assert_eq!(config.sync.char_limit, 1100);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.fetch_backoff_secs, 3);
        assert_eq!(config.sync.default_rate_limit_secs, 5.0);
        assert_eq!(config.sync.max_rate_limit_secs, 60.0);
        assert_eq!(config.sync.max_concurrent_feeds, 1);

        assert_eq!(config.reader.backend, ReaderBackend::Http);
        assert_eq!(config.reader.command, "rsstail");
        assert!(config.reader.args.contains(&"{url}".to_string()));

        assert_eq!(config.rules.skip_paid, vec!["LWN".to_string()]);
        assert_eq!(config.rules.skip_replies, vec!["LKML".to_string()]);
        assert_eq!(config.rules.new_only, vec!["Bugzilla".to_string()]);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/feedhook.log");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[sync]
feeds_dir = "/etc/feedhook/feeds"
cache_dir = "/var/cache/feedhook"
status_file = "/run/feedhook/status.json"
default_destinations = ["https://hooks.example.com/a", "https://hooks.example.com/b"]
poll_interval_secs = 120
char_limit = 800
max_retries = 5
fetch_timeout_secs = 10
fetch_backoff_secs = 1
delivery_retry_delay_ms = 500
default_rate_limit_secs = 2.5
destination_pacing_ms = 250
heartbeat_interval_secs = 15
max_concurrent_feeds = 4
placeholder_image = "https://img.example.com/blank.png"
username = "Feed Bot"

[reader]
backend = "command"
command = "/usr/bin/rsstail"
args = ["-u", "{url}"]
reversed_args = ["--reverse"]

[rules]
reversed = ["Oldest-First"]
loose = ["Poetry"]
image_only = ["Comics"]
full_image = ["Photos"]
skip_paid = []

[[rules.announcements]]
feed = "Distro"
title_contains = "ISO"
description = "A new release is out."
avatar_url = "https://img.example.com/distro.png"

[logging]
level = "debug"
file = "custom/feedhook.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.sync.feeds_dir, "/etc/feedhook/feeds");
        assert_eq!(config.sync.default_destinations.len(), 2);
        assert_eq!(config.sync.poll_interval_secs, 120);
        assert_eq!(config.sync.char_limit, 800);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.default_rate_limit_secs, 2.5);
        assert_eq!(config.sync.max_concurrent_feeds, 4);
        assert_eq!(config.sync.username.as_deref(), Some("Feed Bot"));

        assert_eq!(config.reader.backend, ReaderBackend::Command);
        assert_eq!(config.reader.command, "/usr/bin/rsstail");
        assert_eq!(config.reader.reversed_args, vec!["--reverse".to_string()]);
        // Not specified, default kept
        assert!(!config.reader.media_args.is_empty());

        assert_eq!(config.rules.reversed, vec!["Oldest-First".to_string()]);
        assert!(config.rules.skip_paid.is_empty());
        assert_eq!(config.rules.skip_replies, vec!["LKML".to_string()]);
        assert_eq!(config.rules.announcements.len(), 1);
        assert_eq!(config.rules.announcements[0].title_contains, "ISO");

        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.sync.poll_interval_secs, 300);
        assert_eq!(config.reader.backend, ReaderBackend::Http);
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");
        assert!(result.is_err());
        if let Err(FeedhookError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_parse_unknown_backend() {
        let result = Config::parse("[reader]\nbackend = \"carrier-pigeon\"\n");
        assert!(matches!(result, Err(FeedhookError::Config(_))));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(FeedhookError::Io(_))));
    }

    #[test]
    fn test_apply_env_overrides_destinations() {
        let original = std::env::var(DEFAULT_DESTINATIONS_ENV).ok();

        std::env::set_var(
            DEFAULT_DESTINATIONS_ENV,
            "https://hooks.example.com/1, https://hooks.example.com/2",
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(
            config.sync.default_destinations,
            vec![
                "https://hooks.example.com/1".to_string(),
                "https://hooks.example.com/2".to_string()
            ]
        );

        // Blank value leaves the configured list alone
        std::env::set_var(DEFAULT_DESTINATIONS_ENV, " , ");
        let mut config = Config::default();
        config.sync.default_destinations = vec!["https://keep.example.com".to_string()];
        config.apply_env_overrides();
        assert_eq!(config.sync.default_destinations.len(), 1);

        if let Some(val) = original {
            std::env::set_var(DEFAULT_DESTINATIONS_ENV, val);
        } else {
            std::env::remove_var(DEFAULT_DESTINATIONS_ENV);
        }
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.sync.max_retries = 0;
        assert!(matches!(config.validate(), Err(FeedhookError::Validation(_))));

        let mut config = Config::default();
        config.sync.char_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.max_concurrent_feeds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.max_rate_limit_secs = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.max_rate_limit_secs = 2.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reader.backend = ReaderBackend::Command;
        config.reader.command = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_destinations() {
        assert_eq!(
            split_destinations("a,b , ,c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_destinations("").is_empty());
    }
}
