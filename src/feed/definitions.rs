//! Feed definition loader.
//!
//! Each feed lives in its own TOML file under the feeds directory. The
//! directory is re-read every cycle so feeds can be added or removed without
//! a restart. Broken files are reported per file and never stop the cycle.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::split_destinations;
use crate::feed::cache::file_stem;
use crate::feed::types::FeedDefinition;
use crate::{FeedhookError, Result};

/// Extension of feed definition files.
pub const DEFINITION_EXTENSION: &str = "toml";

/// Name of the template written into an empty feeds directory.
pub const TEMPLATE_FILE_NAME: &str = "example.toml.template";

/// Example definition written when no feeds are configured.
pub const TEMPLATE: &str = r#"# Copy this file to <name>.toml and edit it.

# Unique feed name; also the cache key and the rules key.
name = "Example-Feed"

# Feed location.
source_url = "https://example.com/feed.xml"

# Webhook destinations, comma-joined or as a list.
# Leave out to use sync.default_destinations.
# destinations = "https://discord.com/api/webhooks/ID/TOKEN"
# destinations = ["https://hooks.example.com/a", "https://hooks.example.com/b"]

# Embed colour as an integer (0x3498db).
color = 3447003

# Optional display icon and category.
# avatar_url = "https://example.com/icon.png"
# category = "news"
"#;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DestinationList {
    Joined(String),
    List(Vec<String>),
}

impl DestinationList {
    fn into_vec(self) -> Vec<String> {
        match self {
            DestinationList::Joined(joined) => split_destinations(&joined),
            DestinationList::List(list) => list
                .iter()
                .flat_map(|entry| split_destinations(entry))
                .collect(),
        }
    }
}

/// On-disk shape of a definition. Required fields are optional here so a
/// missing one is reported by name.
#[derive(Debug, Deserialize)]
struct RawDefinition {
    name: Option<String>,
    source_url: Option<String>,
    destinations: Option<DestinationList>,
    #[serde(default)]
    color: u32,
    avatar_url: Option<String>,
    category: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse one definition file.
pub fn parse_definition(content: &str) -> Result<FeedDefinition> {
    let raw: RawDefinition = toml::from_str(content)
        .map_err(|e| FeedhookError::Config(format!("feed definition parse error: {e}")))?;

    let name = non_blank(raw.name)
        .ok_or_else(|| FeedhookError::Validation("missing required field 'name'".to_string()))?;
    let source_url = non_blank(raw.source_url).ok_or_else(|| {
        FeedhookError::Validation(format!("feed '{name}': missing required field 'source_url'"))
    })?;

    let definition = FeedDefinition {
        name,
        source_url,
        destinations: raw.destinations.map(DestinationList::into_vec).unwrap_or_default(),
        color: raw.color,
        avatar_url: non_blank(raw.avatar_url),
        category: non_blank(raw.category),
    };
    definition.validate()?;
    Ok(definition)
}

/// A definition file rejected for this cycle.
#[derive(Debug)]
pub struct InvalidDefinition {
    /// Offending file.
    pub path: PathBuf,
    /// Why it was rejected.
    pub error: FeedhookError,
}

/// Result of loading the feeds directory.
#[derive(Debug, Default)]
pub struct DefinitionSet {
    /// Valid definitions, in file name order.
    pub feeds: Vec<FeedDefinition>,
    /// Rejected files.
    pub invalid: Vec<InvalidDefinition>,
}

impl DefinitionSet {
    /// Number of definition files considered.
    pub fn total(&self) -> usize {
        self.feeds.len() + self.invalid.len()
    }
}

/// Loads feed definitions from a directory.
#[derive(Debug, Clone)]
pub struct DefinitionLoader {
    dir: PathBuf,
}

impl DefinitionLoader {
    /// Create a loader for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The feeds directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Definition files, sorted by file name. A missing directory has none.
    pub fn definition_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(DEFINITION_EXTENSION)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Load every definition.
    ///
    /// Unreadable, unparsable and incomplete files end up in
    /// [`DefinitionSet::invalid`]. So do files whose feed name maps to the
    /// same cache file as an earlier one, compared case-insensitively.
    pub fn load(&self) -> Result<DefinitionSet> {
        let mut set = DefinitionSet::default();
        let mut stems = HashSet::new();

        for path in self.definition_files()? {
            let parsed = fs::read_to_string(&path)
                .map_err(FeedhookError::from)
                .and_then(|content| parse_definition(&content));

            match parsed {
                Ok(feed) if !stems.insert(file_stem(&feed.name).to_lowercase()) => {
                    set.invalid.push(InvalidDefinition {
                        path,
                        error: FeedhookError::Validation(format!(
                            "duplicate feed name '{}' (shares a cache file with an earlier feed)",
                            feed.name
                        )),
                    });
                }
                Ok(feed) => {
                    debug!("Loaded feed '{}' from {}", feed.name, path.display());
                    set.feeds.push(feed);
                }
                Err(error) => set.invalid.push(InvalidDefinition { path, error }),
            }
        }

        Ok(set)
    }

    /// Write the example template when the directory has no definitions.
    ///
    /// Returns the template path when it was written.
    pub fn ensure_template(&self) -> Result<Option<PathBuf>> {
        if !self.definition_files()?.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(TEMPLATE_FILE_NAME);
        fs::write(&path, TEMPLATE)?;
        info!("Wrote feed template to {}", path.display());
        Ok(Some(path))
    }
}
