//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{BuildArgs, CliArgs, Command, RuntimeOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "deckhand";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_API_PREFIX: &str = "/api/slides";
const DEFAULT_BIN_NAME: &str = "slidev";
const DEFAULT_PACKAGE_RUNNER: &str = "npx --yes";
const DEFAULT_PACKAGE: &str = "@slidev/cli";
const DEFAULT_PROJECTS_ROOT: &str = "projects";
const DEFAULT_PORT_START: u16 = 3030;
const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PRESENTATION_ROOT: &str = "presentation";
const DEFAULT_SCREENSHOTS_DIR: &str = "screenshots";
const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CATALOG_PATH: &str = "decks.toml";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub renderer: RendererSettings,
    pub presentation: PresentationSettings,
    pub browser: BrowserSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub api_prefix: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub binary: Option<PathBuf>,
    pub bin_name: String,
    /// Runner command followed by the package name, e.g. `npx --yes @slidev/cli`.
    pub package_runner: Vec<String>,
    pub workspace_root: Option<PathBuf>,
    pub projects_root: PathBuf,
    pub port_start: u16,
    pub ready_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PresentationSettings {
    pub root: PathBuf,
    pub screenshots_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub chrome_path: Option<PathBuf>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("DECKHAND").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Build(args)) => raw.apply_runtime_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    renderer: RawRendererSettings,
    presentation: RawPresentationSettings,
    browser: RawBrowserSettings,
    catalog: RawCatalogSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(prefix) = overrides.server_api_prefix.as_ref() {
            self.server.api_prefix = Some(prefix.clone());
        }
        self.apply_runtime_overrides(&overrides.runtime);
    }

    fn apply_runtime_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(binary) = overrides.renderer_binary.as_ref() {
            self.renderer.binary = Some(binary.clone());
        }
        if let Some(port) = overrides.renderer_port_start {
            self.renderer.port_start = Some(port);
        }
        if let Some(root) = overrides.projects_root.as_ref() {
            self.renderer.projects_root = Some(root.clone());
        }
        if let Some(root) = overrides.presentation_root.as_ref() {
            self.presentation.root = Some(root.clone());
        }
        if let Some(dir) = overrides.screenshots_dir.as_ref() {
            self.presentation.screenshots_dir = Some(dir.clone());
        }
        if let Some(path) = overrides.catalog_path.as_ref() {
            self.catalog.path = Some(path.clone());
        }
        if let Some(path) = overrides.chrome_path.as_ref() {
            self.browser.chrome_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            renderer,
            presentation,
            browser,
            catalog,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            renderer: build_renderer_settings(renderer)?,
            presentation: build_presentation_settings(presentation)?,
            browser: build_browser_settings(browser)?,
            catalog: build_catalog_settings(catalog)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let api_prefix = server
        .api_prefix
        .unwrap_or_else(|| DEFAULT_API_PREFIX.to_string());
    if api_prefix.contains(['{', '}', '*', '?', '#']) {
        return Err(LoadError::invalid(
            "server.api_prefix",
            "must be a plain path without route syntax or query",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        api_prefix,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let binary = renderer
        .binary
        .filter(|path| !path.as_os_str().is_empty());
    let bin_name = non_empty(renderer.bin_name, DEFAULT_BIN_NAME);
    let package = non_empty(renderer.package, DEFAULT_PACKAGE);
    let runner = non_empty(renderer.package_runner, DEFAULT_PACKAGE_RUNNER);
    let package_runner: Vec<String> = runner
        .split_whitespace()
        .map(str::to_string)
        .chain(std::iter::once(package))
        .collect();

    let projects_root = non_empty_path(
        renderer.projects_root,
        DEFAULT_PROJECTS_ROOT,
        "renderer.projects_root",
    )?;

    let port_start = renderer.port_start.unwrap_or(DEFAULT_PORT_START);
    if port_start == 0 {
        return Err(LoadError::invalid(
            "renderer.port_start",
            "port must be greater than zero",
        ));
    }

    let ready_secs = renderer
        .ready_timeout_seconds
        .unwrap_or(DEFAULT_READY_TIMEOUT_SECS);
    if ready_secs == 0 {
        return Err(LoadError::invalid(
            "renderer.ready_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RendererSettings {
        binary,
        bin_name,
        package_runner,
        workspace_root: renderer
            .workspace_root
            .filter(|path| !path.as_os_str().is_empty()),
        projects_root,
        port_start,
        ready_timeout: Duration::from_secs(ready_secs),
    })
}

fn build_presentation_settings(
    presentation: RawPresentationSettings,
) -> Result<PresentationSettings, LoadError> {
    Ok(PresentationSettings {
        root: non_empty_path(
            presentation.root,
            DEFAULT_PRESENTATION_ROOT,
            "presentation.root",
        )?,
        screenshots_dir: non_empty_path(
            presentation.screenshots_dir,
            DEFAULT_SCREENSHOTS_DIR,
            "presentation.screenshots_dir",
        )?,
    })
}

fn build_browser_settings(browser: RawBrowserSettings) -> Result<BrowserSettings, LoadError> {
    let viewport_width = browser.viewport_width.unwrap_or(DEFAULT_VIEWPORT_WIDTH);
    let viewport_height = browser.viewport_height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT);
    if viewport_width == 0 || viewport_height == 0 {
        return Err(LoadError::invalid(
            "browser.viewport",
            "width and height must be greater than zero",
        ));
    }

    let navigation_secs = browser
        .navigation_timeout_seconds
        .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_SECS);
    if navigation_secs == 0 {
        return Err(LoadError::invalid(
            "browser.navigation_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(BrowserSettings {
        chrome_path: browser
            .chrome_path
            .filter(|path| !path.as_os_str().is_empty()),
        viewport_width,
        viewport_height,
        navigation_timeout: Duration::from_secs(navigation_secs),
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    Ok(CatalogSettings {
        path: non_empty_path(catalog.path, DEFAULT_CATALOG_PATH, "catalog.path")?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    api_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    binary: Option<PathBuf>,
    bin_name: Option<String>,
    package_runner: Option<String>,
    package: Option<String>,
    workspace_root: Option<PathBuf>,
    projects_root: Option<PathBuf>,
    port_start: Option<u16>,
    ready_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPresentationSettings {
    root: Option<PathBuf>,
    screenshots_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    chrome_path: Option<PathBuf>,
    viewport_width: Option<u32>,
    viewport_height: Option<u32>,
    navigation_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    path: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty(value: Option<String>, default: &str) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    match value {
        Some(path) if path.as_os_str().is_empty() => {
            Err(LoadError::invalid(key, "path must not be empty"))
        }
        Some(path) => Ok(path),
        None => Ok(PathBuf::from(default)),
    }
}
