//! Cover images: render the deck's first slide in a headless browser and store it as PNG.

use std::{
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use metrics::counter;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::DeckDescriptor,
    runtime::{RendererSupervisor, SupervisorError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotRequest {
    pub url: String,
    pub viewport: Viewport,
    pub navigation_timeout: Duration,
    pub dark_mode: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("browser could not be launched: {message}")]
    Launch { message: String },
    #[error("navigation failed: {message}")]
    Navigation { message: String },
    #[error("screenshot capture failed: {message}")]
    Capture { message: String },
}

/// Headless browser able to load a page and return a PNG of the viewport.
///
/// Implementations must close the browser before returning, on success and failure alike.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn capture_png(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, BrowserError>;
}

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("renderer unavailable for screenshot: {0}")]
    Renderer(#[from] SupervisorError),
    #[error("browser launch failed: {0}")]
    BrowserLaunch(#[source] BrowserError),
    #[error("page capture failed: {0}")]
    Capture(#[source] BrowserError),
    #[error("failed to write screenshot `{}`: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<BrowserError> for ScreenshotError {
    fn from(error: BrowserError) -> Self {
        match error {
            BrowserError::Launch { .. } => ScreenshotError::BrowserLaunch(error),
            BrowserError::Navigation { .. } | BrowserError::Capture { .. } => {
                ScreenshotError::Capture(error)
            }
        }
    }
}

/// Result of a cover capture as carried by a build report.
pub type ScreenshotOutcome = Result<CapturedCover, ScreenshotError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCover {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScreenshotSettings {
    pub screenshots_dir: PathBuf,
    pub viewport: Viewport,
    pub navigation_timeout: Duration,
}

#[derive(Clone)]
pub struct ScreenshotCapturer {
    supervisor: RendererSupervisor,
    browser: Arc<dyn BrowserLauncher>,
    settings: ScreenshotSettings,
}

impl ScreenshotCapturer {
    pub fn new(
        supervisor: RendererSupervisor,
        browser: Arc<dyn BrowserLauncher>,
        settings: ScreenshotSettings,
    ) -> Self {
        Self {
            supervisor,
            browser,
            settings,
        }
    }

    pub fn screenshots_dir(&self) -> &Path {
        &self.settings.screenshots_dir
    }

    /// Capture the deck's live preview and store it as its cover image.
    pub async fn capture(
        &self,
        deck: &DeckDescriptor,
        entry_file: &Path,
    ) -> Result<CapturedCover, ScreenshotError> {
        let started_at = Instant::now();
        let result = self.capture_inner(deck, entry_file).await;
        match &result {
            Ok(cover) => info!(
                target = "application::screenshot",
                op = "capture",
                result = "ok",
                deck_id = %deck.id,
                cover = %cover.filename,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Cover screenshot stored"
            ),
            Err(err) => {
                counter!("deckhand_screenshot_failure_total").increment(1);
                warn!(
                    target = "application::screenshot",
                    op = "capture",
                    result = "error",
                    deck_id = %deck.id,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Cover screenshot failed"
                );
            }
        }
        result
    }

    async fn capture_inner(
        &self,
        deck: &DeckDescriptor,
        entry_file: &Path,
    ) -> Result<CapturedCover, ScreenshotError> {
        let port = self.supervisor.start_renderer(deck.id, entry_file).await?;
        let request = ScreenshotRequest {
            url: format!(
                "http://localhost:{port}{}",
                self.supervisor.paths().preview_base(deck.id)
            ),
            viewport: self.settings.viewport,
            navigation_timeout: self.settings.navigation_timeout,
            dark_mode: true,
        };
        let png = self.browser.capture_png(&request).await?;

        let filename = cover_filename(deck.cover_filename.as_deref());
        let path = self.settings.screenshots_dir.join(&filename);
        write_atomically(&self.settings.screenshots_dir, &path, png).await?;

        Ok(CapturedCover { filename, path })
    }
}

/// Reuse the deck's cover name when it is a bare file name, otherwise mint a fresh one.
fn cover_filename(existing: Option<&str>) -> String {
    existing
        .map(str::trim)
        .filter(|name| {
            let mut components = Path::new(name).components();
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            )
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.png", Uuid::new_v4()))
}

async fn write_atomically(dir: &Path, path: &Path, bytes: Vec<u8>) -> Result<(), ScreenshotError> {
    let dir = dir.to_path_buf();
    let target = path.to_path_buf();
    let write_error = |source: io::Error| ScreenshotError::Write {
        path: path.to_path_buf(),
        source,
    };

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        std::fs::create_dir_all(&dir)?;
        let mut file = NamedTempFile::new_in(&dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.persist(&target).map_err(|err| err.error)?;
        Ok(())
    })
    .await
    .map_err(|err| write_error(io::Error::other(err)))?
    .map_err(write_error)
}
