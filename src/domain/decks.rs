//! Deck identity and the read-only projection the renderer runtime works from.

use std::{
    fmt,
    num::ParseIntError,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use super::ProcessingStatus;

/// Markdown entry file every deck project carries at its root.
pub const ENTRY_FILE_NAME: &str = "slides.md";

const DEFAULT_THEME: &str = "default";
const FRONTMATTER_SCAN_LINES: usize = 20;

/// Stable identifier of a slide deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeckId(i64);

impl DeckId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeckId {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse().map(Self)
    }
}

impl From<i64> for DeckId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Minimal view of a slide record needed to preview, build and capture it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckDescriptor {
    pub id: DeckId,
    pub title: String,
    /// Absolute path to the markdown entry file; `None` until markdown has been exported.
    pub entry_file: Option<PathBuf>,
    pub theme: String,
    pub cover_filename: Option<String>,
    pub has_outlines: bool,
    pub status: ProcessingStatus,
}

impl DeckDescriptor {
    pub fn entry_file(&self) -> Option<&Path> {
        self.entry_file.as_deref()
    }
}

/// Resolve `<projects_root>/<home>/slides.md`.
///
/// Returns `None` for an empty home or one that would escape the projects root.
pub fn resolve_entry_file(projects_root: &Path, home: Option<&str>) -> Option<PathBuf> {
    let home = home.map(str::trim).filter(|value| !value.is_empty())?;
    let relative = Path::new(home);
    let escapes = relative.is_absolute()
        || relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
    if escapes {
        return None;
    }

    Some(projects_root.join(relative).join(ENTRY_FILE_NAME))
}

/// Read the `theme:` key from the leading frontmatter lines of a deck source.
pub fn theme_from_frontmatter(source: &str) -> String {
    source
        .lines()
        .take(FRONTMATTER_SCAN_LINES)
        .filter(|line| line.starts_with("theme"))
        .find_map(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_THEME)
        .to_string()
}
