//! Read access to built presentations under `<presentation_root>/<deck_id>/`.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;

use crate::domain::DeckId;

const INDEX_FILE: &str = "index.html";

#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("invalid presentation path")]
    InvalidPath,
    #[error("presentation file not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A file served from a built presentation.
#[derive(Debug, Clone)]
pub struct PresentationFile {
    /// Path relative to the deck's output directory, used for content-type detection.
    pub relative_path: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct PresentationStore {
    root: PathBuf,
}

impl PresentationStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read `path` from the deck's build output.
    ///
    /// Directory paths resolve to `index.html`; unknown extension-less paths fall back
    /// to the deck's `index.html` so client-side slide routes keep working on reload.
    pub async fn read(&self, deck_id: DeckId, path: &str) -> Result<PresentationFile, PresentationError> {
        let deck_root = self.root.join(deck_id.to_string());
        let relative = normalize(path)?;

        match read_file(&deck_root, &relative).await {
            Err(PresentationError::NotFound) if Path::new(&relative).extension().is_none() => {
                read_file(&deck_root, INDEX_FILE).await
            }
            other => other,
        }
    }
}

fn normalize(path: &str) -> Result<String, PresentationError> {
    let trimmed = path.trim_start_matches('/');
    let relative = Path::new(trimmed);
    if relative.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    }) {
        return Err(PresentationError::InvalidPath);
    }

    if trimmed.is_empty() || trimmed.ends_with('/') {
        Ok(format!("{trimmed}{INDEX_FILE}"))
    } else {
        Ok(trimmed.to_string())
    }
}

async fn read_file(deck_root: &Path, relative: &str) -> Result<PresentationFile, PresentationError> {
    let mut absolute = deck_root.join(relative);
    let mut relative_path = relative.to_string();
    match fs::metadata(&absolute).await {
        Ok(meta) if meta.is_dir() => {
            absolute = absolute.join(INDEX_FILE);
            relative_path = format!("{}/{INDEX_FILE}", relative.trim_end_matches('/'));
        }
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(PresentationError::NotFound);
        }
        Err(err) => return Err(PresentationError::Io(err)),
    }

    match fs::read(&absolute).await {
        Ok(data) => Ok(PresentationFile {
            relative_path,
            bytes: Bytes::from(data),
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(PresentationError::NotFound),
        Err(err) => Err(PresentationError::Io(err)),
    }
}
