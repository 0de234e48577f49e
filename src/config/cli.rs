use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the deckhand binary.
#[derive(Debug, Parser)]
#[command(
    name = "deckhand",
    version,
    about = "Slide renderer supervisor: live previews, builds and cover screenshots"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DECKHAND_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Build one deck's static presentation and cover, then exit.
    Build(BuildArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    /// Identifier of the deck to build.
    #[arg(long = "deck", value_name = "ID")]
    pub deck: i64,

    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}

/// Overrides shared by every command that drives the renderer.
#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Use this renderer executable instead of resolving one.
    #[arg(long = "renderer-binary", value_name = "PATH")]
    pub renderer_binary: Option<PathBuf>,

    /// Override the first port scanned for renderer processes.
    #[arg(long = "renderer-port-start", value_name = "PORT")]
    pub renderer_port_start: Option<u16>,

    /// Override the directory holding deck projects.
    #[arg(long = "projects-root", value_name = "PATH")]
    pub projects_root: Option<PathBuf>,

    /// Override the directory receiving built presentations.
    #[arg(long = "presentation-root", value_name = "PATH")]
    pub presentation_root: Option<PathBuf>,

    /// Override the directory receiving cover screenshots.
    #[arg(long = "screenshots-dir", value_name = "PATH")]
    pub screenshots_dir: Option<PathBuf>,

    /// Override the deck catalog file.
    #[arg(long = "catalog-path", value_name = "PATH")]
    pub catalog_path: Option<PathBuf>,

    /// Override the Chrome/Chromium executable used for screenshots.
    #[arg(long = "chrome-path", value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub runtime: RuntimeOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the path prefix the slide routes are mounted under.
    #[arg(long = "server-api-prefix", value_name = "PREFIX")]
    pub server_api_prefix: Option<String>,
}
