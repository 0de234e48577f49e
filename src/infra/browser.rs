//! Headless Chrome adapter used for cover screenshots.

use std::{ffi::OsStr, path::PathBuf, thread, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::{
    Browser, LaunchOptions,
    protocol::cdp::{Emulation, Page::CaptureScreenshotFormatOption},
};
use tracing::debug;

use crate::application::screenshot::{BrowserError, BrowserLauncher, ScreenshotRequest};

const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(chrome_path: Option<PathBuf>) -> Self {
        Self { chrome_path }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn capture_png(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, BrowserError> {
        let chrome_path = self.chrome_path.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || capture_blocking(chrome_path, &request))
            .await
            .map_err(|err| BrowserError::Capture {
                message: format!("screenshot task aborted: {err}"),
            })?
    }
}

/// The browser is dropped, and with it the Chrome process, when this returns.
fn capture_blocking(
    chrome_path: Option<PathBuf>,
    request: &ScreenshotRequest,
) -> Result<Vec<u8>, BrowserError> {
    let browser = launch(chrome_path, request).map_err(|err| BrowserError::Launch {
        message: format!("{err:#}"),
    })?;
    let tab = browser
        .new_tab()
        .map_err(|err| BrowserError::Launch {
            message: format!("failed to open tab: {err:#}"),
        })?;
    tab.set_default_timeout(request.navigation_timeout);

    if request.dark_mode {
        tab.call_method(Emulation::SetEmulatedMedia {
            media: None,
            features: Some(vec![Emulation::MediaFeature {
                name: "prefers-color-scheme".to_string(),
                value: "dark".to_string(),
            }]),
        })
        .map_err(|err| BrowserError::Navigation {
            message: format!("failed to emulate dark mode: {err:#}"),
        })?;
    }

    tab.navigate_to(&request.url)
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|err| BrowserError::Navigation {
            message: format!("{}: {err:#}", request.url),
        })?;
    // client-side slide rendering continues briefly after the load event
    thread::sleep(SETTLE_DELAY);

    let png = tab
        .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        .map_err(|err| BrowserError::Capture {
            message: format!("{err:#}"),
        })?;
    debug!(
        target = "infra::browser",
        op = "capture_png",
        result = "ok",
        url = %request.url,
        bytes = png.len(),
        "Page captured"
    );
    Ok(png)
}

fn launch(chrome_path: Option<PathBuf>, request: &ScreenshotRequest) -> anyhow::Result<Browser> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .path(chrome_path)
        .window_size(Some((request.viewport.width, request.viewport.height)))
        .args(vec![
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--hide-scrollbars"),
        ])
        .build()
        .context("invalid browser launch options")?;
    Browser::new(options).context("failed to start Chrome")
}
