//! Per-feed change detection cache.
//!
//! One file per feed name holds the last delivered item in the reader's text
//! shape. Only the link is used to decide whether a fetched item is new.
//! Writes go through a temporary file and a rename so a reader never sees a
//! partial cache.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::feed::types::FetchedItem;
use crate::Result;

/// Cache file extension.
const CACHE_EXTENSION: &str = "cache";

/// Write `contents` to `path` through a sibling temporary file and a rename.
///
/// The temporary name is fixed per target, so a file left behind by a crash
/// is truncated and reused by the next write. One writer per target.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_path_for(path);

    {
        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(contents)?;
        temp_file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    PathBuf::from(temp_name)
}

/// Map a feed name to a file-system safe stem.
///
/// Not injective: names differing only in replaced characters share a stem.
pub(crate) fn file_stem(feed_name: &str) -> String {
    feed_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Directory of per-feed cache files.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache file of a feed.
    pub fn path_for(&self, feed_name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{CACHE_EXTENSION}", file_stem(feed_name)))
    }

    /// The last delivered item, if any.
    ///
    /// An unreadable cache entry counts as absent.
    pub fn last_item(&self, feed_name: &str) -> Result<Option<FetchedItem>> {
        let path = self.path_for(feed_name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match FetchedItem::parse(&content) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!("Ignoring unreadable cache {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Link of the last delivered item.
    pub fn last_link(&self, feed_name: &str) -> Result<Option<String>> {
        Ok(self.last_item(feed_name)?.map(|item| item.link))
    }

    /// Whether `fetched` is new for the feed.
    ///
    /// New means a non-empty link that differs from the cached one; title or
    /// date changes alone do not count.
    pub fn is_new(&self, feed_name: &str, fetched: &FetchedItem) -> Result<bool> {
        if fetched.link.is_empty() {
            debug!("Item of '{}' has no link", feed_name);
            return Ok(false);
        }
        Ok(self.last_link(feed_name)?.as_deref() != Some(fetched.link.as_str()))
    }

    /// Persist `fetched` as the feed's latest item.
    pub fn record_delivered(&self, feed_name: &str, fetched: &FetchedItem) -> Result<()> {
        let path = self.path_for(feed_name);
        write_atomic(&path, fetched.to_text().as_bytes())?;
        debug!("Cache updated: {}", path.display());
        Ok(())
    }
}
