//! Per-feed rule dispatch.
//!
//! Feeds are matched by name against the `[rules]` table. Unknown names get
//! the default cleanup rule, newest-first reading, thumbnails and no filters.

use crate::config::{AnnouncementRule, RulesConfig};
use crate::feed::types::{FeedDefinition, ImageKind};

/// Title prefix of paid/teaser articles.
pub const PAID_MARKER: &str = "[$]";

/// Title fragment of reply/follow-up posts.
pub const REPLY_MARKER: &str = "Re:";

/// Title fragment of newly filed tracker entries.
pub const NEW_MARKER: &str = "New:";

/// How the item body is cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentRule {
    /// Collapse links, strip separators and comment markers, one line per paragraph.
    #[default]
    Default,
    /// Keep line breaks and separators.
    Loose,
    /// Reduce the body to the single image linked from it.
    ImageOnly,
}

/// Title-based content filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFilter {
    /// Drop titles starting with `[$]`.
    SkipPaid,
    /// Drop titles containing `Re:`.
    SkipReplies,
    /// Drop titles without `New:`.
    NewOnly,
}

impl ContentFilter {
    /// Whether the filter drops an item with this title.
    pub fn drops(&self, title: &str) -> bool {
        match self {
            ContentFilter::SkipPaid => title.trim_start().starts_with(PAID_MARKER),
            ContentFilter::SkipReplies => title.contains(REPLY_MARKER),
            ContentFilter::NewOnly => !title.contains(NEW_MARKER),
        }
    }

    /// Short reason for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ContentFilter::SkipPaid => "paid article",
            ContentFilter::SkipReplies => "reply post",
            ContentFilter::NewOnly => "not a new entry",
        }
    }
}

/// Outcome of running the filters on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Deliver the item.
    Deliver,
    /// Drop the item for the given reason.
    Drop(&'static str),
}

/// Rules resolved for one feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedRules {
    /// Cleanup rule.
    pub content: ContentRule,
    /// Read the oldest entry instead of the newest.
    pub reversed: bool,
    /// Send a full image instead of a thumbnail.
    pub full_image: bool,
    /// Title filters, applied in order.
    pub filters: Vec<ContentFilter>,
    /// Release announcement override.
    pub announcement: Option<AnnouncementRule>,
}

impl FeedRules {
    /// Run the title filters.
    pub fn filter(&self, title: &str) -> FilterVerdict {
        self.filters
            .iter()
            .find(|f| f.drops(title))
            .map(|f| FilterVerdict::Drop(f.reason()))
            .unwrap_or(FilterVerdict::Deliver)
    }

    /// The announcement override, if this title triggers it.
    pub fn announcement_for(&self, title: &str) -> Option<&AnnouncementRule> {
        self.announcement
            .as_ref()
            .filter(|a| !a.title_contains.is_empty() && title.contains(&a.title_contains))
    }

    /// Display mode for a found image.
    pub fn image_kind(&self) -> ImageKind {
        if self.full_image {
            ImageKind::Image
        } else {
            ImageKind::Thumbnail
        }
    }
}

/// Lookup table from feed name to rules.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    config: RulesConfig,
}

fn listed(list: &[String], key: &str) -> bool {
    list.iter().any(|name| name.eq_ignore_ascii_case(key))
}

impl RuleTable {
    /// Create a table from configuration.
    pub fn new(config: RulesConfig) -> Self {
        Self { config }
    }

    /// Resolve the rules for a feed.
    pub fn for_feed(&self, feed: &FeedDefinition) -> FeedRules {
        let name = feed.name.as_str();
        let c = &self.config;

        let content = if listed(&c.image_only, name) {
            ContentRule::ImageOnly
        } else if listed(&c.loose, name) {
            ContentRule::Loose
        } else {
            ContentRule::Default
        };

        let reversed = listed(&c.reversed, name)
            || feed
                .category
                .as_deref()
                .is_some_and(|category| listed(&c.reversed, category));

        let mut filters = Vec::new();
        if listed(&c.skip_paid, name) {
            filters.push(ContentFilter::SkipPaid);
        }
        if listed(&c.skip_replies, name) {
            filters.push(ContentFilter::SkipReplies);
        }
        if listed(&c.new_only, name) {
            filters.push(ContentFilter::NewOnly);
        }

        let announcement = c
            .announcements
            .iter()
            .find(|a| a.feed.eq_ignore_ascii_case(name))
            .cloned();

        FeedRules {
            content,
            reversed,
            full_image: listed(&c.full_image, name),
            filters,
            announcement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RuleTable {
        RuleTable::new(RulesConfig {
            reversed: vec!["Oldest".to_string(), "archive".to_string()],
            loose: vec!["Poetry".to_string()],
            image_only: vec!["Comics".to_string()],
            full_image: vec!["Photos".to_string()],
            announcements: vec![AnnouncementRule {
                feed: "Distro".to_string(),
                title_contains: "ISO".to_string(),
                description: "New installation media available.".to_string(),
                avatar_url: Some("https://img.example.com/distro.png".to_string()),
            }],
            ..Default::default()
        })
    }

    fn feed(name: &str) -> FeedDefinition {
        FeedDefinition::new(name, "https://example.com/rss")
    }

    #[test]
    fn test_unknown_feed_gets_defaults() {
        let rules = table().for_feed(&feed("Somebody's Blog"));
        assert_eq!(rules, FeedRules::default());
        assert_eq!(rules.filter("[$] Paid Article"), FilterVerdict::Deliver);
        assert_eq!(rules.image_kind(), ImageKind::Thumbnail);
    }

    #[test]
    fn test_content_rule_dispatch() {
        let t = table();
        assert_eq!(t.for_feed(&feed("Poetry")).content, ContentRule::Loose);
        assert_eq!(t.for_feed(&feed("comics")).content, ContentRule::ImageOnly);
        assert_eq!(t.for_feed(&feed("News")).content, ContentRule::Default);
    }

    #[test]
    fn test_reversed_by_name_or_category() {
        let t = table();
        assert!(t.for_feed(&feed("Oldest")).reversed);
        assert!(t.for_feed(&feed("Other").with_category("Archive")).reversed);
        assert!(!t.for_feed(&feed("Other").with_category("news")).reversed);
    }

    #[test]
    fn test_full_image() {
        assert_eq!(table().for_feed(&feed("Photos")).image_kind(), ImageKind::Image);
    }

    #[test]
    fn test_paid_filter() {
        let rules = table().for_feed(&feed("LWN"));
        assert_eq!(rules.filter("[$] Paid Article"), FilterVerdict::Drop("paid article"));
        assert_eq!(rules.filter("Free article about [$]"), FilterVerdict::Deliver);
    }

    #[test]
    fn test_reply_filter_only_on_designated_feed() {
        let t = table();
        assert_eq!(
            t.for_feed(&feed("LKML")).filter("Re: kernel patch"),
            FilterVerdict::Drop("reply post")
        );
        assert_eq!(
            t.for_feed(&feed("News")).filter("Re: kernel patch"),
            FilterVerdict::Deliver
        );
    }

    #[test]
    fn test_new_only_filter() {
        let rules = table().for_feed(&feed("Bugzilla"));
        assert_eq!(
            rules.filter("[Bug 123] New: crash on boot"),
            FilterVerdict::Deliver
        );
        assert_eq!(
            rules.filter("[Bug 123] crash on boot"),
            FilterVerdict::Drop("not a new entry")
        );
    }

    #[test]
    fn test_announcement() {
        let rules = table().for_feed(&feed("Distro"));
        assert!(rules.announcement_for("2024.01.01 ISO released").is_some());
        assert!(rules.announcement_for("Package news").is_none());
        assert!(table()
            .for_feed(&feed("News"))
            .announcement_for("ISO released")
            .is_none());
    }
}
