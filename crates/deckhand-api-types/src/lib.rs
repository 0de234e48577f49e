//! Wire types shared between the deckhand HTTP surface and its clients.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Port of a running preview renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewPortResponse {
    pub port: u16,
}

/// Outcome of a successful deck build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub deck_id: i64,
    pub output_dir: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cover_filename: Option<String>,
    /// Present when the cover screenshot failed; the build itself still succeeded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub screenshot_error: Option<String>,
    pub elapsed_ms: u64,
}

/// Operation currently holding a deck's exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStateView {
    pub operation: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

/// Coarse authoring progress of a deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingStatus {
    UserInputSaved,
    OutlineSaved,
    MarkdownSaved,
    Completed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::UserInputSaved => "user-input-saved",
            ProcessingStatus::OutlineSaved => "outline-saved",
            ProcessingStatus::MarkdownSaved => "markdown-saved",
            ProcessingStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckStatusResponse {
    pub deck_id: i64,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub preview_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_operation: Option<LockStateView>,
}
