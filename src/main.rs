use std::{process, sync::Arc, time::Duration};

use deckhand::{
    application::{
        build::BuildPipeline,
        catalog::DeckCatalog,
        error::AppError,
        locks::DeckLocks,
        screenshot::{ScreenshotCapturer, ScreenshotSettings, Viewport},
    },
    config,
    domain::DeckId,
    infra::{
        browser::ChromeLauncher,
        catalog::TomlDeckCatalog,
        error::InfraError,
        http::{self, HttpState, PreviewProxy},
        presentations::PresentationStore,
        telemetry,
    },
    runtime::{
        PortLedger, PublicPaths, RendererInvocation, RendererSupervisor, SupervisorConfig,
        TcpReadiness,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Build(args) => run_build(settings, args).await,
    }
}

struct ApplicationContext {
    http_state: HttpState,
    supervisor: RendererSupervisor,
    builds: BuildPipeline,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let catalog = TomlDeckCatalog::load(
        settings.catalog.path.clone(),
        settings.renderer.projects_root.clone(),
    )
    .await
    .map_err(|err| AppError::from(InfraError::catalog(err.to_string())))?;
    let catalog: Arc<dyn DeckCatalog> = Arc::new(catalog);

    let paths = PublicPaths::new(&settings.server.api_prefix);
    let invocation = RendererInvocation::new(
        settings.renderer.binary.clone(),
        settings.renderer.bin_name.clone(),
        settings.renderer.workspace_root.clone(),
        settings.renderer.package_runner.clone(),
    );

    let supervisor = RendererSupervisor::new(
        PortLedger::new(),
        invocation.clone(),
        Arc::new(TcpReadiness),
        SupervisorConfig {
            port_start: settings.renderer.port_start,
            ready_timeout: settings.renderer.ready_timeout,
            paths: paths.clone(),
        },
    );

    let capturer = ScreenshotCapturer::new(
        supervisor.clone(),
        Arc::new(ChromeLauncher::new(settings.browser.chrome_path.clone())),
        ScreenshotSettings {
            screenshots_dir: settings.presentation.screenshots_dir.clone(),
            viewport: Viewport {
                width: settings.browser.viewport_width,
                height: settings.browser.viewport_height,
            },
            navigation_timeout: settings.browser.navigation_timeout,
        },
    );

    let locks = DeckLocks::new();
    let builds = BuildPipeline::new(
        catalog.clone(),
        locks.clone(),
        capturer,
        invocation,
        paths.clone(),
        settings.presentation.root.clone(),
    );

    let http_state = HttpState {
        catalog: catalog.clone(),
        supervisor: supervisor.clone(),
        locks,
        builds: builds.clone(),
        presentations: PresentationStore::new(settings.presentation.root.clone()),
        proxy: PreviewProxy::new(catalog, supervisor.clone()),
        screenshots_dir: settings.presentation.screenshots_dir.clone(),
        paths,
    };

    Ok(ApplicationContext {
        http_state,
        supervisor,
        builds,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let router = http::build_router(app.http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "deckhand::serve",
        addr = %settings.server.addr,
        api_prefix = %settings.server.api_prefix,
        "listening"
    );

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    stop_renderers(&app.supervisor, settings.server.graceful_shutdown).await;
    result
}

async fn run_build(settings: config::Settings, args: config::BuildArgs) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let deck_id = DeckId::new(args.deck);

    let outcome = app.builds.build_and_complete(deck_id).await;
    stop_renderers(&app.supervisor, settings.server.graceful_shutdown).await;

    let report = outcome?;
    match report.screenshot.as_ref() {
        Ok(cover) => info!(
            target = "deckhand::build",
            deck_id = %deck_id,
            output_dir = %report.output_dir.display(),
            cover = %cover.filename,
            elapsed_ms = report.elapsed_ms,
            "build finished"
        ),
        Err(err) => warn!(
            target = "deckhand::build",
            deck_id = %deck_id,
            output_dir = %report.output_dir.display(),
            error = %err,
            elapsed_ms = report.elapsed_ms,
            "build finished without cover"
        ),
    }
    Ok(())
}

async fn stop_renderers(supervisor: &RendererSupervisor, grace: Duration) {
    match tokio::time::timeout(grace, supervisor.kill_all()).await {
        Ok(terminated) => info!(
            target = "deckhand::shutdown",
            terminated, "renderer processes stopped"
        ),
        Err(_) => warn!(
            target = "deckhand::shutdown",
            grace_ms = grace.as_millis() as u64,
            "renderer shutdown exceeded grace period"
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "deckhand::shutdown", error = %err, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "deckhand::shutdown", error = %err, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "deckhand::shutdown", "shutdown signal received");
}
