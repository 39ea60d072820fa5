//! Feed-reading capability.
//!
//! A reader turns a feed URL into the plain-text single-item shape
//! (`Title:` / `Link:` / `Pub date:` / `Description:` lines) consumed by the
//! fetcher. Two backends exist: an in-process HTTP reader built on
//! `reqwest` + `feed-rs`, and a wrapper around an external command-line
//! feed tool.

use std::future::Future;
use std::time::Duration;

use feed_rs::model::Entry;
use reqwest::Client;
use tokio::process::Command;
use tracing::debug;

use crate::config::{ReaderBackend, ReaderConfig};
use crate::feed::normalizer::is_video_host;
use crate::feed::types::{
    FetchError, DESCRIPTION_MARKER, LINK_MARKER, PUB_DATE_MARKER, TITLE_MARKER,
};
use crate::{FeedhookError, Result};

/// Placeholder substituted with the feed URL in command arguments.
const URL_PLACEHOLDER: &str = "{url}";

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// What to read from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The single-item text block.
    Item,
    /// Whitespace-separated image candidates of the same item.
    Media,
}

/// A single read of one feed.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest<'a> {
    /// Feed location.
    pub url: &'a str,
    /// Read the oldest available entry instead of the newest.
    pub reversed: bool,
    /// What to read.
    pub mode: ReadMode,
}

impl<'a> ReadRequest<'a> {
    /// Request the newest (or, reversed, oldest) item.
    pub fn item(url: &'a str, reversed: bool) -> Self {
        Self {
            url,
            reversed,
            mode: ReadMode::Item,
        }
    }

    /// Request the image candidates of the same item.
    pub fn media(url: &'a str, reversed: bool) -> Self {
        Self {
            url,
            reversed,
            mode: ReadMode::Media,
        }
    }
}

/// The external feed-reading capability.
///
/// Implementations do not enforce the wall-clock bound themselves; the
/// fetcher wraps every call in a timeout and drops the future when it fires.
pub trait FeedReader: Send + Sync {
    /// Read one feed and return the raw text output.
    fn read(
        &self,
        request: &ReadRequest<'_>,
    ) -> impl Future<Output = std::result::Result<String, FetchError>> + Send;
}

/// Reader selected from configuration.
pub enum Reader {
    /// In-process reader.
    Http(HttpReader),
    /// External command reader.
    Command(CommandReader),
}

impl Reader {
    /// Build the configured reader.
    ///
    /// Fails with [`FeedhookError::Dependency`] when the command backend is
    /// selected and its program cannot be found.
    pub fn from_config(config: &ReaderConfig, timeout: Duration) -> Result<Self> {
        match config.backend {
            ReaderBackend::Http => Ok(Reader::Http(HttpReader::new(config, timeout)?)),
            ReaderBackend::Command => {
                let reader = CommandReader::new(config);
                reader.ensure_available()?;
                Ok(Reader::Command(reader))
            }
        }
    }
}

impl FeedReader for Reader {
    async fn read(&self, request: &ReadRequest<'_>) -> std::result::Result<String, FetchError> {
        match self {
            Reader::Http(reader) => reader.read(request).await,
            Reader::Command(reader) => reader.read(request).await,
        }
    }
}

/// Reader that downloads and parses the feed itself.
pub struct HttpReader {
    client: Client,
    max_feed_size: u64,
}

impl HttpReader {
    /// Create a new reader.
    pub fn new(config: &ReaderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FeedhookError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
        })
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transient(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transient(format!("HTTP error: {status}")));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(FetchError::Invalid(format!(
                    "feed too large: {content_length} bytes (max {} bytes)",
                    self.max_feed_size
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to read response: {e}")))?;

        if bytes.len() as u64 > self.max_feed_size {
            return Err(FetchError::Invalid(format!(
                "feed too large: {} bytes (max {} bytes)",
                bytes.len(),
                self.max_feed_size
            )));
        }

        Ok(bytes.to_vec())
    }
}

impl FeedReader for HttpReader {
    async fn read(&self, request: &ReadRequest<'_>) -> std::result::Result<String, FetchError> {
        let bytes = self.download(request.url).await?;
        let entry = select_entry(&bytes, request.reversed)?;

        Ok(match request.mode {
            ReadMode::Item => render_item(&entry),
            ReadMode::Media => render_media(&entry),
        })
    }
}

/// Parse feed bytes and pick the newest entry, or the oldest when reversed.
fn select_entry(bytes: &[u8], reversed: bool) -> std::result::Result<Entry, FetchError> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| FetchError::Invalid(format!("failed to parse feed: {e}")))?;

    let mut entries = feed.entries;
    if entries.is_empty() {
        return Err(FetchError::Invalid("feed has no entries".to_string()));
    }

    let entry = if reversed {
        entries.pop()
    } else {
        entries.into_iter().next()
    };
    entry.ok_or_else(|| FetchError::Invalid("feed has no entries".to_string()))
}

/// Render an entry in the single-item text shape.
fn render_item(entry: &Entry) -> String {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let mut out = format!("{TITLE_MARKER} {title}\n");
    if let Some(link) = entry.links.first() {
        out.push_str(&format!("{LINK_MARKER} {}\n", link.href));
    }
    if let Some(date) = entry.published.or(entry.updated) {
        out.push_str(&format!("{PUB_DATE_MARKER} {}\n", date.to_rfc2822()));
    }

    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()));
    if let Some(body) = body {
        out.push_str(&format!("{DESCRIPTION_MARKER} {body}\n"));
    }
    out
}

/// Render the image candidates of an entry, best first.
fn render_media(entry: &Entry) -> String {
    let mut candidates: Vec<String> = Vec::new();

    if let Some(link) = entry.links.first() {
        if is_video_host(&link.href) {
            candidates.push(link.href.clone());
        }
    }
    for media in &entry.media {
        candidates.extend(media.thumbnails.iter().map(|t| t.image.uri.clone()));
        candidates.extend(
            media
                .content
                .iter()
                .filter_map(|c| c.url.as_ref().map(|u| u.to_string())),
        );
    }
    candidates.extend(
        entry
            .links
            .iter()
            .filter(|l| l.rel.as_deref() == Some("enclosure"))
            .map(|l| l.href.clone()),
    );

    candidates.join(" ")
}

/// Reader that shells out to a command-line feed tool.
pub struct CommandReader {
    command: String,
    args: Vec<String>,
    reversed_args: Vec<String>,
    media_args: Vec<String>,
}

impl CommandReader {
    /// Create a new command reader.
    pub fn new(config: &ReaderConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            reversed_args: config.reversed_args.clone(),
            media_args: config.media_args.clone(),
        }
    }

    /// Check that the program can be found.
    pub fn ensure_available(&self) -> Result<()> {
        which::which(&self.command)
            .map(|_| ())
            .map_err(|_| FeedhookError::Dependency(format!("'{}' not found in PATH", self.command)))
    }

    /// Arguments for a request, with the URL substituted.
    fn build_args(&self, request: &ReadRequest<'_>) -> Vec<String> {
        let template = match request.mode {
            ReadMode::Item => &self.args,
            ReadMode::Media => &self.media_args,
        };
        let mut args: Vec<String> = template
            .iter()
            .map(|a| a.replace(URL_PLACEHOLDER, request.url))
            .collect();
        if request.reversed {
            args.extend(self.reversed_args.iter().cloned());
        }
        args
    }
}

impl FeedReader for CommandReader {
    async fn read(&self, request: &ReadRequest<'_>) -> std::result::Result<String, FetchError> {
        let args = self.build_args(request);
        debug!("Running {} {:?}", self.command, args);

        let output = Command::new(&self.command)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to run {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().next().unwrap_or("").trim().to_string();
            return Err(FetchError::Transient(format!(
                "{} exited with {}: {reason}",
                self.command, output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
