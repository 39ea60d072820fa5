//! Feed types for feedhook.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{FeedhookError, Result};

/// Line prefix marking the item title in reader output.
pub const TITLE_MARKER: &str = "Title:";

/// Line prefix marking the item link.
pub const LINK_MARKER: &str = "Link:";

/// Line prefix marking the publication date.
pub const PUB_DATE_MARKER: &str = "Pub date:";

/// Line prefix opening the description block; everything after it is body.
pub const DESCRIPTION_MARKER: &str = "Description:";

/// Maximum title length in characters.
pub const MAX_TITLE_LENGTH: usize = 255;

/// Appended to descriptions cut at the length budget.
pub const TRUNCATION_MARKER: &str = " [...]";

/// A configured feed, loaded once per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedDefinition {
    /// Unique name; also the cache key and the rule dispatch key.
    pub name: String,
    /// Feed location.
    pub source_url: String,
    /// Delivery endpoints in order. Empty means the global default list.
    pub destinations: Vec<String>,
    /// Embed colour.
    pub color: u32,
    /// Display icon.
    pub avatar_url: Option<String>,
    /// Optional category, used for reversed-order detection.
    pub category: Option<String>,
}

impl FeedDefinition {
    /// Create a new definition with no destinations.
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            destinations: Vec::new(),
            color: 0,
            avatar_url: None,
            category: None,
        }
    }

    /// Set the destinations.
    pub fn with_destinations(mut self, destinations: Vec<String>) -> Self {
        self.destinations = destinations;
        self
    }

    /// Set the embed colour.
    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    /// Set the avatar.
    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Reject definitions without a name or source.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FeedhookError::Validation("feed name is empty".to_string()));
        }
        if self.source_url.trim().is_empty() {
            return Err(FeedhookError::Validation(format!(
                "feed '{}' has no source URL",
                self.name
            )));
        }
        Ok(())
    }

    /// Destinations to deliver to, falling back to `default` when none are set.
    pub fn resolve_destinations(&self, default: &[String]) -> Vec<String> {
        if self.destinations.is_empty() {
            default.to_vec()
        } else {
            self.destinations.clone()
        }
    }
}

/// Why a single fetch attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The reader did not answer within the timeout.
    #[error("timed out")]
    Timeout,
    /// Network, HTTP or process failure; worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),
    /// The reader answered, but not with a recognizable item.
    #[error("invalid output: {0}")]
    Invalid(String),
}

/// One item as produced by the feed reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedItem {
    /// Item title, never empty.
    pub title: String,
    /// Item link; the change-detection key.
    pub link: String,
    /// Publication date as emitted by the reader.
    pub pub_date: Option<String>,
    /// Unprocessed content block.
    pub body: String,
}

impl FetchedItem {
    /// Parse reader output.
    ///
    /// The first non-blank line must carry the title marker. Unknown lines
    /// outside the description block are dropped.
    pub fn parse(raw: &str) -> std::result::Result<Self, FetchError> {
        let mut lines = raw.lines().skip_while(|l| l.trim().is_empty());

        let first = lines
            .next()
            .ok_or_else(|| FetchError::Invalid("empty response".to_string()))?;
        let title = first
            .trim_start()
            .strip_prefix(TITLE_MARKER)
            .map(str::trim)
            .ok_or_else(|| {
                FetchError::Invalid(format!("expected '{TITLE_MARKER}' line, got '{}'", preview(first)))
            })?;
        if title.is_empty() {
            return Err(FetchError::Invalid("empty title".to_string()));
        }

        let mut link = String::new();
        let mut pub_date = None;
        let mut body: Vec<&str> = Vec::new();
        let mut in_body = false;

        for line in lines {
            if in_body {
                body.push(line);
                continue;
            }
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix(LINK_MARKER) {
                link = rest.trim().to_string();
            } else if let Some(rest) = trimmed.strip_prefix(PUB_DATE_MARKER) {
                let rest = rest.trim();
                if !rest.is_empty() {
                    pub_date = Some(rest.to_string());
                }
            } else if let Some(rest) = trimmed.strip_prefix(DESCRIPTION_MARKER) {
                in_body = true;
                let rest = rest.trim();
                if !rest.is_empty() {
                    body.push(rest);
                }
            }
        }

        Ok(Self {
            title: title.to_string(),
            link,
            pub_date,
            body: body.join("\n").trim().to_string(),
        })
    }

    /// Serialize back into the reader's shape, as stored in the cache.
    pub fn to_text(&self) -> String {
        let mut out = format!("{TITLE_MARKER} {}\n", self.title);
        if !self.link.is_empty() {
            out.push_str(&format!("{LINK_MARKER} {}\n", self.link));
        }
        if let Some(date) = &self.pub_date {
            out.push_str(&format!("{PUB_DATE_MARKER} {date}\n"));
        }
        if !self.body.is_empty() {
            out.push_str(&format!("{DESCRIPTION_MARKER}\n{}\n", self.body));
        }
        out
    }

    /// Publication time, or the current time when absent or unparsable.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.pub_date
            .as_deref()
            .and_then(parse_pub_date)
            .unwrap_or_else(Utc::now)
    }
}

fn preview(line: &str) -> String {
    line.chars().take(40).collect()
}

/// Parse the date formats feed tools emit (RFC 2822, RFC 3339, ctime).
pub fn parse_pub_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}

/// How the notification shows its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Full-width image.
    Image,
    /// Small thumbnail.
    Thumbnail,
}

impl ImageKind {
    /// Key used in the embed document.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Image => "image",
            ImageKind::Thumbnail => "thumbnail",
        }
    }
}

/// A notification ready for delivery, one per item and destination.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    /// Sender name shown by the destination.
    pub username: String,
    /// Sender avatar.
    pub avatar_url: Option<String>,
    /// Item title, at most 255 characters.
    pub title: String,
    /// Item link.
    pub url: String,
    /// Length-bounded description.
    pub description: String,
    /// Embed colour.
    pub color: u32,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Image display mode.
    pub image_kind: ImageKind,
    /// Image location.
    pub image_url: String,
    /// Author block name.
    pub author_name: String,
    /// Author block link.
    pub author_url: String,
    /// Author block icon.
    pub author_icon_url: Option<String>,
}

/// Per-cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStatistics {
    /// Feeds considered, valid or not.
    pub total: usize,
    /// Feeds with a new item.
    pub updated: usize,
    /// Feeds whose new item was dropped by a content filter.
    pub filtered: usize,
    /// Feeds that failed (definition, fetch or delivery).
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn test_feed_definition_validate() {
        assert!(FeedDefinition::new("News", "https://example.com/rss")
            .validate()
            .is_ok());
        assert!(FeedDefinition::new("", "https://example.com/rss")
            .validate()
            .is_err());
        assert!(FeedDefinition::new("News", "  ").validate().is_err());
    }

    #[test]
    fn test_resolve_destinations() {
        let default = vec!["https://hooks.example.com/default".to_string()];

        let feed = FeedDefinition::new("News", "https://example.com/rss");
        assert_eq!(feed.resolve_destinations(&default), default);

        let feed = feed.with_destinations(vec!["https://hooks.example.com/own".to_string()]);
        assert_eq!(
            feed.resolve_destinations(&default),
            vec!["https://hooks.example.com/own".to_string()]
        );
    }

    #[test]
    fn test_parse_item() {
        let raw = "\n\nTitle: Hello\nLink: https://x/1\nPub date: Mon, 01 Jan 2024 00:00:00 GMT\nDescription: <p>first</p>\n<p>second</p>\n";
        let item = FetchedItem::parse(raw).unwrap();

        assert_eq!(item.title, "Hello");
        assert_eq!(item.link, "https://x/1");
        assert_eq!(item.pub_date.as_deref(), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert_eq!(item.body, "<p>first</p>\n<p>second</p>");
    }

    #[test]
    fn test_parse_item_without_optional_lines() {
        let item = FetchedItem::parse("Title: Only a title").unwrap();
        assert_eq!(item.title, "Only a title");
        assert!(item.link.is_empty());
        assert!(item.pub_date.is_none());
        assert!(item.body.is_empty());
    }

    #[test]
    fn test_parse_item_drops_annotations() {
        let raw = "Title: Hello\nWARN: slow response\nLink: https://x/1\n";
        let item = FetchedItem::parse(raw).unwrap();
        assert_eq!(item.link, "https://x/1");
        assert!(!item.to_text().contains("WARN"));
    }

    #[test]
    fn test_parse_item_rejects_garbage() {
        assert!(matches!(FetchedItem::parse(""), Err(FetchError::Invalid(_))));
        assert!(matches!(FetchedItem::parse("  \n \n"), Err(FetchError::Invalid(_))));
        assert!(matches!(
            FetchedItem::parse("<html><head><title>Moved</title></head></html>"),
            Err(FetchError::Invalid(_))
        ));
        assert!(matches!(FetchedItem::parse("Title:   "), Err(FetchError::Invalid(_))));
    }

    #[test]
    fn test_to_text_parses_back() {
        let item = FetchedItem {
            title: "Hello".to_string(),
            link: "https://x/1".to_string(),
            pub_date: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
            body: "line one\nline two".to_string(),
        };
        let text = item.to_text();
        assert!(text.starts_with("Title: Hello\n"));
        assert!(text.contains("Link: https://x/1\n"));
        assert_eq!(FetchedItem::parse(&text).unwrap(), item);
    }

    #[test]
    fn test_published_at() {
        let item = FetchedItem::parse("Title: A\nPub date: Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        assert_eq!(
            item.published_at(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );

        let before = Utc::now();
        let item = FetchedItem::parse("Title: A\nPub date: sometime soon").unwrap();
        assert!(item.published_at() >= before);
    }

    #[test]
    fn test_parse_pub_date_formats() {
        assert!(parse_pub_date("2024-01-01T12:00:00+02:00").is_some());
        let ctime = parse_pub_date("Mon Jan  1 00:00:00 2024").unwrap();
        assert_eq!(ctime.year(), 2024);
        assert!(parse_pub_date("yesterday").is_none());
    }

    #[test]
    fn test_image_kind_as_str() {
        assert_eq!(ImageKind::Image.as_str(), "image");
        assert_eq!(ImageKind::Thumbnail.as_str(), "thumbnail");
    }
}
