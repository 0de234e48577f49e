//! Static export of a deck: cover screenshot, renderer build, atomic swap of the output.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Instant,
};

use deckhand_api_types::BuildResult;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    domain::{DeckDescriptor, DeckId, ProcessingStatus},
    runtime::{PublicPaths, RendererCommand, RendererInvocation},
};

use super::{
    catalog::{CatalogError, DeckCatalog},
    locks::{BUILD_OPERATION, DeckBusy, DeckLocks},
    screenshot::{ScreenshotCapturer, ScreenshotOutcome},
};

const STDERR_LIMIT: usize = 4 * 1024;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Busy(#[from] DeckBusy),
    #[error("deck {deck_id} not found")]
    DeckNotFound { deck_id: DeckId },
    #[error("project path not found for deck {deck_id}")]
    ProjectPathNotFound {
        deck_id: DeckId,
        path: Option<PathBuf>,
    },
    #[error("renderer build failed (exit {exit_code:?}): {stderr}")]
    BuildToolFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("renderer build tool `{program}` unavailable: {source}")]
    BuildToolUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl BuildError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }

    fn code(&self) -> &'static str {
        match self {
            BuildError::Busy(_) => "busy",
            BuildError::DeckNotFound { .. } => "deck_not_found",
            BuildError::ProjectPathNotFound { .. } => "project_path_not_found",
            BuildError::BuildToolFailed { .. } => "build_tool_failed",
            BuildError::BuildToolUnavailable { .. } => "build_tool_unavailable",
            BuildError::Io { .. } => "io",
            BuildError::Catalog(_) => "catalog",
        }
    }
}

/// Outcome of a finished build. The screenshot may have failed without failing the build.
#[derive(Debug)]
pub struct BuildReport {
    pub deck_id: DeckId,
    pub output_dir: PathBuf,
    pub screenshot: ScreenshotOutcome,
    pub elapsed_ms: u64,
}

impl BuildReport {
    pub fn cover_filename(&self) -> Option<&str> {
        self.screenshot
            .as_ref()
            .ok()
            .map(|cover| cover.filename.as_str())
    }

    pub fn to_result(&self) -> BuildResult {
        BuildResult {
            deck_id: self.deck_id.get(),
            output_dir: self.output_dir.to_string_lossy().into_owned(),
            cover_filename: self.cover_filename().map(str::to_string),
            screenshot_error: self.screenshot.as_ref().err().map(ToString::to_string),
            elapsed_ms: self.elapsed_ms,
        }
    }
}

#[derive(Clone)]
pub struct BuildPipeline {
    catalog: Arc<dyn DeckCatalog>,
    locks: DeckLocks,
    capturer: ScreenshotCapturer,
    invocation: RendererInvocation,
    paths: PublicPaths,
    presentation_root: PathBuf,
}

impl BuildPipeline {
    pub fn new(
        catalog: Arc<dyn DeckCatalog>,
        locks: DeckLocks,
        capturer: ScreenshotCapturer,
        invocation: RendererInvocation,
        paths: PublicPaths,
        presentation_root: PathBuf,
    ) -> Self {
        Self {
            catalog,
            locks,
            capturer,
            invocation,
            paths,
            presentation_root,
        }
    }

    pub fn presentation_root(&self) -> &Path {
        &self.presentation_root
    }

    /// Build the deck under its exclusive lock.
    pub async fn build_deck(&self, deck_id: DeckId) -> Result<BuildReport, BuildError> {
        let started_at = Instant::now();
        let result = self
            .locks
            .with_lock(deck_id, BUILD_OPERATION, || self.run_build(deck_id, started_at))
            .await;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => {
                counter!("deckhand_build_total", "result" => "ok").increment(1);
                histogram!("deckhand_build_ms").record(elapsed_ms as f64);
                info!(
                    target = "application::build",
                    op = "build_deck",
                    result = "ok",
                    deck_id = %deck_id,
                    output_dir = %report.output_dir.display(),
                    cover = report.cover_filename().unwrap_or(""),
                    screenshot_ok = report.screenshot.is_ok(),
                    elapsed_ms,
                    "Deck built"
                );
            }
            Err(err) => {
                counter!("deckhand_build_total", "result" => err.code()).increment(1);
                warn!(
                    target = "application::build",
                    op = "build_deck",
                    result = "error",
                    error_code = err.code(),
                    deck_id = %deck_id,
                    elapsed_ms,
                    error = %err,
                    "Deck build failed"
                );
            }
        }
        result
    }

    /// Build and, on success, mark the deck completed in the catalog.
    pub async fn build_and_complete(&self, deck_id: DeckId) -> Result<BuildReport, BuildError> {
        let report = self.build_deck(deck_id).await?;
        self.record_status_best_effort(deck_id, ProcessingStatus::Completed)
            .await;
        Ok(report)
    }

    async fn run_build(
        &self,
        deck_id: DeckId,
        started_at: Instant,
    ) -> Result<BuildReport, BuildError> {
        let deck = self
            .catalog
            .find_deck(deck_id)
            .await?
            .ok_or(BuildError::DeckNotFound { deck_id })?;
        let entry_file = existing_entry_file(&deck).await?;

        self.record_status_best_effort(deck_id, ProcessingStatus::MarkdownSaved)
            .await;

        let screenshot = self.capturer.capture(&deck, &entry_file).await;
        if let Ok(cover) = &screenshot {
            if let Err(err) = self.catalog.record_cover(deck_id, &cover.filename).await {
                warn!(
                    target = "application::build",
                    op = "record_cover",
                    result = "error",
                    deck_id = %deck_id,
                    error = %err,
                    "Failed to record cover filename"
                );
            }
        }

        let output_dir = self.export(deck_id, &entry_file).await?;

        Ok(BuildReport {
            deck_id,
            output_dir,
            screenshot,
            elapsed_ms: started_at.elapsed().as_millis() as u64,
        })
    }

    async fn export(&self, deck_id: DeckId, entry_file: &Path) -> Result<PathBuf, BuildError> {
        tokio::fs::create_dir_all(&self.presentation_root)
            .await
            .map_err(BuildError::io("failed to create presentation root"))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".build-{deck_id}-"))
            .tempdir_in(&self.presentation_root)
            .map_err(BuildError::io("failed to create build staging directory"))?;

        let base = self.paths.presentation_base(deck_id);
        let RendererCommand {
            mut command,
            program,
            source,
        } = self
            .invocation
            .build_command(entry_file, &base, staging.path());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let tool_started_at = Instant::now();
        let output = command.output().await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BuildError::BuildToolUnavailable {
                    program: program.clone(),
                    source: err,
                }
            } else {
                BuildError::Io {
                    context: "failed to run renderer build",
                    source: err,
                }
            }
        })?;

        if !output.status.success() {
            return Err(BuildError::BuildToolFailed {
                exit_code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        info!(
            target = "application::build",
            op = "export",
            result = "ok",
            deck_id = %deck_id,
            program = %program,
            binary_source = %source,
            tool_elapsed_ms = tool_started_at.elapsed().as_millis() as u64,
            "Renderer build finished"
        );

        let output_dir = self.presentation_root.join(deck_id.to_string());
        match tokio::fs::remove_dir_all(&output_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(BuildError::io("failed to remove previous output")(err)),
        }

        let staged = staging.keep();
        if let Err(err) = tokio::fs::rename(&staged, &output_dir).await {
            let _ = tokio::fs::remove_dir_all(&staged).await;
            return Err(BuildError::io("failed to move build output into place")(err));
        }

        Ok(output_dir)
    }

    async fn record_status_best_effort(&self, deck_id: DeckId, status: ProcessingStatus) {
        if let Err(err) = self.catalog.record_status(deck_id, status).await {
            warn!(
                target = "application::build",
                op = "record_status",
                result = "error",
                deck_id = %deck_id,
                status = status.as_str(),
                error = %err,
                "Failed to record processing status"
            );
        }
    }
}

async fn existing_entry_file(deck: &DeckDescriptor) -> Result<PathBuf, BuildError> {
    let not_found = |path: Option<PathBuf>| BuildError::ProjectPathNotFound {
        deck_id: deck.id,
        path,
    };
    let entry_file = deck.entry_file().ok_or_else(|| not_found(None))?;
    match tokio::fs::try_exists(entry_file).await {
        Ok(true) => Ok(entry_file.to_path_buf()),
        _ => Err(not_found(Some(entry_file.to_path_buf()))),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut cut = text.len() - STDERR_LIMIT;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text[cut..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::screenshot::ScreenshotError;

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = format!("{}final error", "x".repeat(STDERR_LIMIT * 2));
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), STDERR_LIMIT);
        assert!(tail.ends_with("final error"));
        assert_eq!(stderr_tail(b"  short\n"), "short");
    }

    #[test]
    fn report_exposes_screenshot_failure_without_cover() {
        let report = BuildReport {
            deck_id: DeckId::new(8),
            output_dir: PathBuf::from("/srv/presentation/8"),
            screenshot: Err(ScreenshotError::Write {
                path: PathBuf::from("/srv/screenshots/x.png"),
                source: io::Error::other("disk full"),
            }),
            elapsed_ms: 40,
        };
        let result = report.to_result();
        assert_eq!(result.deck_id, 8);
        assert_eq!(result.cover_filename, None);
        assert!(
            result
                .screenshot_error
                .as_deref()
                .is_some_and(|message| message.contains("disk full"))
        );
    }
}
