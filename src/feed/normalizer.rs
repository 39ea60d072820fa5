//! Content normalization.
//!
//! Turns a cached item into the fields of a notification. The body goes
//! through a fixed sequence of steps, each a pure function over [`Document`]:
//!
//! 1. markup to text (`html2text`)
//! 2. [`Document::parse`] splits the text into paragraphs and separators
//! 3. [`collapse_links`] drops link footnotes and reference markers
//! 4. [`strip_comment_markers`] removes leftover `<!-- -->` markers
//! 5. separators are dropped (default rule) or kept as `---` (loose rule)
//! 6. [`Document::render`] reflows to one line per paragraph (default) or
//!    keeps the original breaks (loose)
//! 7. [`truncate_description`] enforces the length limit

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::feed::reader::{FeedReader, ReadRequest};
use crate::feed::rules::{ContentRule, FeedRules};
use crate::feed::types::{FetchedItem, ImageKind, MAX_TITLE_LENGTH, TRUNCATION_MARKER};

/// Column width handed to the markup converter.
const TEXT_WIDTH: usize = 80;

/// Characters that make up a horizontal separator line.
const SEPARATOR_CHARS: &[char] = &['─', '━', '-', '_', '=', '*', '~'];

/// Host suffixes treated as video hosts.
const VIDEO_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// Notification fields derived from one item.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    /// Title, at most 255 characters, double quotes replaced.
    pub title: String,
    /// Item link.
    pub link: String,
    /// Publication time.
    pub published_at: DateTime<Utc>,
    /// Cleaned and length-bounded description.
    pub description: String,
    /// Image location, placeholder when none was found.
    pub image_url: String,
    /// Image display mode.
    pub image_kind: ImageKind,
    /// Replacement avatar from an announcement override.
    pub avatar_override: Option<String>,
}

/// One block of the intermediate text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Consecutive non-blank lines.
    Paragraph(Vec<String>),
    /// A horizontal rule.
    Separator,
}

/// Intermediate text form: paragraphs and separators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Blocks in reading order.
    pub blocks: Vec<Block>,
}

impl Document {
    /// Split converted text into blocks.
    ///
    /// Blank lines end a paragraph; separator lines become their own block.
    pub fn parse(text: &str) -> Self {
        let mut blocks = Vec::new();
        let mut current: Vec<String> = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim_end();
            if trimmed.trim().is_empty() {
                if !current.is_empty() {
                    blocks.push(Block::Paragraph(std::mem::take(&mut current)));
                }
            } else if is_separator(trimmed) {
                if !current.is_empty() {
                    blocks.push(Block::Paragraph(std::mem::take(&mut current)));
                }
                blocks.push(Block::Separator);
            } else {
                current.push(trimmed.to_string());
            }
        }
        if !current.is_empty() {
            blocks.push(Block::Paragraph(current));
        }

        Self { blocks }
    }

    /// Apply `f` to every paragraph line, dropping lines that become blank
    /// and paragraphs that become empty.
    fn map_lines<F>(self, f: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let blocks = self
            .blocks
            .into_iter()
            .filter_map(|block| match block {
                Block::Paragraph(lines) => {
                    let lines: Vec<String> = lines
                        .iter()
                        .filter_map(|l| f(l.as_str()))
                        .filter(|l| !l.trim().is_empty())
                        .collect();
                    (!lines.is_empty()).then_some(Block::Paragraph(lines))
                }
                Block::Separator => Some(Block::Separator),
            })
            .collect();
        Self { blocks }
    }

    /// Drop all separator blocks.
    pub fn without_separators(self) -> Self {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .filter(|b| !matches!(b, Block::Separator))
                .collect(),
        }
    }

    /// Render back to text.
    ///
    /// `keep_breaks == false` joins the lines of a paragraph with spaces and
    /// separates paragraphs with a single line break.
    pub fn render(&self, keep_breaks: bool) -> String {
        let rendered: Vec<String> = self
            .blocks
            .iter()
            .map(|block| match block {
                Block::Paragraph(lines) if keep_breaks => lines.join("\n"),
                Block::Paragraph(lines) => lines
                    .iter()
                    .map(|l| l.trim())
                    .collect::<Vec<_>>()
                    .join(" "),
                Block::Separator => "---".to_string(),
            })
            .collect();

        let glue = if keep_breaks { "\n\n" } else { "\n" };
        rendered.join(glue)
    }
}

/// Whether a line is a horizontal separator.
fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.chars().count() >= 3 && line.chars().all(|c| SEPARATOR_CHARS.contains(&c))
}

/// Convert markup to text with `html2text`.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), TEXT_WIDTH)
}

/// Drop link footnote lines (`[1]: https://...`) and turn `[label][1]` into `label`.
pub fn collapse_links(doc: Document) -> Document {
    doc.map_lines(|line| {
        if is_footnote(line) {
            None
        } else {
            Some(collapse_references(line))
        }
    })
}

fn is_footnote(line: &str) -> bool {
    let line = line.trim_start();
    let Some(rest) = line.strip_prefix('[') else {
        return false;
    };
    match rest.split_once("]:") {
        Some((digits, _)) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn collapse_references(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(start) = rest.find('[') {
        let (before, after) = rest.split_at(start);
        out.push_str(before);
        match parse_reference(after) {
            Some((label, tail)) => {
                out.push_str(label);
                rest = tail;
            }
            None => {
                out.push('[');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse `[label][12]` at the start of `s`, returning the label and the remainder.
fn parse_reference(s: &str) -> Option<(&str, &str)> {
    let close = s.find(']')?;
    let label = &s[1..close];
    let tail = s[close + 1..].strip_prefix('[')?;
    let end = tail.find(']')?;
    let digits = &tail[..end];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((label, &tail[end + 1..]))
}

/// Remove `<!-- ... -->` spans and stray comment markers.
pub fn strip_comment_markers(doc: Document) -> Document {
    doc.map_lines(|line| {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;
        while let Some(start) = rest.find("<!--") {
            out.push_str(&rest[..start]);
            match rest[start..].find("-->") {
                Some(end) => rest = &rest[start + end + 3..],
                None => rest = "",
            }
        }
        out.push_str(rest);
        Some(out.replace("-->", ""))
    })
}

/// Cut text longer than `limit` characters at the last whitespace before the
/// limit and append the truncation marker.
pub fn truncate_description(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let cut: String = text.chars().take(limit).collect();
    let at_boundary = text.chars().nth(limit).is_some_and(char::is_whitespace);
    let end = if at_boundary {
        cut.len()
    } else {
        cut.rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(cut.len())
    };
    format!("{}{}", cut[..end].trim_end(), TRUNCATION_MARKER)
}

/// Remove control characters; line breaks survive when `keep_newlines` is set.
pub fn strip_control_chars(text: &str, keep_newlines: bool) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' if keep_newlines => Some('\n'),
            '\t' | '\n' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// Title cleanup: single line, double quotes replaced, at most 255 characters.
pub fn normalize_title(title: &str) -> String {
    strip_control_chars(title, false)
        .replace('"', "'")
        .trim()
        .chars()
        .take(MAX_TITLE_LENGTH)
        .collect()
}

/// Pull the quoted URL out of an anchor inside parentheses, as in
/// `(<a href="https://...">image</a>)`.
pub fn extract_anchor_url(html: &str) -> Option<String> {
    let mut rest = html;
    while let Some(open) = rest.find('(') {
        let inner = &rest[open + 1..];
        let close = inner.find(')').unwrap_or(inner.len());
        let group = &inner[..close];
        if let Some(url) = quoted_href(group) {
            return Some(url);
        }
        rest = inner;
    }
    None
}

fn quoted_href(fragment: &str) -> Option<String> {
    let start = fragment.find("href=")? + "href=".len();
    let value = &fragment[start..];
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &value[1..];
    let end = value.find(quote)?;
    let url = value[..end].trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// Whether a URL points at a known video host.
pub fn is_video_host(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .is_some_and(|host| {
            VIDEO_HOSTS
                .iter()
                .any(|h| host == *h || host.ends_with(&format!(".{h}")))
        })
}

/// Thumbnail URL for a video link.
pub fn video_thumbnail(candidate: &str) -> Option<String> {
    let parsed = url::Url::parse(candidate).ok()?;
    let id = video_id(&parsed)?;
    (!id.is_empty()).then(|| format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg"))
}

fn video_id(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?.to_lowercase();
    if host == "youtu.be" {
        return parsed.path_segments()?.next().map(str::to_string);
    }
    if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == "v") {
        return Some(v.into_owned());
    }

    let mut segments = parsed.path_segments()?;
    match segments.next() {
        Some("shorts") | Some("embed") | Some("live") => segments.next().map(str::to_string),
        _ => None,
    }
}

/// Pick an image from reader media output.
///
/// Video links map to their thumbnail; anything else is the first token taken
/// literally. Candidates that are not http(s) URLs or contain `@` are rejected.
pub fn classify_image_candidate(output: &str) -> Option<String> {
    let token = output.split_whitespace().next()?;
    let candidate = if is_video_host(token) {
        video_thumbnail(token)?
    } else {
        token.to_string()
    };
    usable_image(&candidate).then_some(candidate)
}

fn usable_image(candidate: &str) -> bool {
    !candidate.contains('@')
        && (candidate.starts_with("https://") || candidate.starts_with("http://"))
}

/// Converts cached items into notification fields.
#[derive(Debug, Clone)]
pub struct Normalizer {
    char_limit: usize,
    placeholder_image: String,
}

impl Normalizer {
    /// Create a normalizer.
    pub fn new(char_limit: usize, placeholder_image: impl Into<String>) -> Self {
        Self {
            char_limit,
            placeholder_image: placeholder_image.into(),
        }
    }

    /// Clean a body according to the content rule.
    pub fn clean_body(&self, body: &str, rule: ContentRule) -> String {
        if body.trim().is_empty() {
            return String::new();
        }

        let doc = Document::parse(&html_to_text(body));
        let doc = strip_comment_markers(collapse_links(doc));
        let text = match rule {
            ContentRule::Loose => doc.render(true),
            ContentRule::Default | ContentRule::ImageOnly => doc.without_separators().render(false),
        };

        truncate_description(&strip_control_chars(text.trim(), true), self.char_limit)
    }

    /// Everything that does not need another read: title, link, date,
    /// description, and the image for image-only feeds.
    pub fn normalize_text(&self, item: &FetchedItem, rules: &FeedRules) -> NormalizedItem {
        let title = normalize_title(&item.title);

        let (description, image) = match rules.content {
            ContentRule::ImageOnly => {
                let image = extract_anchor_url(&item.body).filter(|u| usable_image(u));
                (String::new(), image)
            }
            rule => (self.clean_body(&item.body, rule), None),
        };

        let mut normalized = NormalizedItem {
            title,
            link: strip_control_chars(item.link.trim(), false),
            published_at: item.published_at(),
            description,
            image_url: self.placeholder_image.clone(),
            image_kind: ImageKind::Thumbnail,
            avatar_override: None,
        };
        if let Some(url) = image {
            normalized.image_url = url;
            normalized.image_kind = rules.image_kind();
        }

        if let Some(announcement) = rules.announcement_for(&normalized.title) {
            debug!("Announcement override for '{}'", normalized.title);
            normalized.description =
                truncate_description(&announcement.description, self.char_limit);
            normalized.avatar_override = announcement.avatar_url.clone();
        }

        normalized
    }

    /// Look up the item image with a second, media-only read of the source.
    ///
    /// Failures are not errors: the placeholder stays in place.
    pub async fn resolve_image<R: FeedReader>(
        &self,
        reader: &R,
        source_url: &str,
        rules: &FeedRules,
        normalized: &mut NormalizedItem,
    ) {
        if rules.content == ContentRule::ImageOnly {
            return;
        }

        match reader.read(&ReadRequest::media(source_url, rules.reversed)).await {
            Ok(output) => match classify_image_candidate(&output) {
                Some(url) => {
                    normalized.image_url = url;
                    normalized.image_kind = rules.image_kind();
                }
                None => debug!("No usable image for {}", source_url),
            },
            Err(e) => debug!("Image lookup for {} failed: {}", source_url, e),
        }
    }
}
