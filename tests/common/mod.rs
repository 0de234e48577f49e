//! Fixtures shared by the integration tests: a shell-script renderer, a scripted
//! browser and a fully wired HTTP state over a temporary workspace.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, header::HOST},
    response::{IntoResponse, Response},
};
use deckhand::{
    application::{
        build::BuildPipeline,
        catalog::DeckCatalog,
        locks::DeckLocks,
        screenshot::{
            BrowserError, BrowserLauncher, ScreenshotCapturer, ScreenshotRequest,
            ScreenshotSettings, Viewport,
        },
    },
    domain::{DeckId, ProcessingStatus},
    infra::{
        catalog::{DeckRecord, TomlDeckCatalog},
        http::{HttpState, PreviewProxy},
        presentations::PresentationStore,
    },
    runtime::{
        PortLedger, PublicPaths, ReadinessError, ReadinessProbe, RendererInvocation,
        RendererSupervisor, SupervisorConfig,
    },
};
use tempfile::TempDir;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

const DEFAULT_BUILD: &str = r#"out="$6"
mkdir -p "$out/assets"
printf '<html>%s</html>' "$2" > "$out/index.html"
printf 'body{}' > "$out/assets/app.css""#;

/// Readiness probe that never waits.
pub struct AlwaysReady;

#[async_trait]
impl ReadinessProbe for AlwaysReady {
    async fn wait_until_ready(&self, _port: u16, _timeout: Duration) -> Result<(), ReadinessError> {
        Ok(())
    }
}

/// Stands in for the renderer's HTTP server: the first readiness check on a port binds
/// an in-process echo server there.
#[derive(Default)]
pub struct EchoUpstream {
    bound: Mutex<HashSet<u16>>,
}

#[async_trait]
impl ReadinessProbe for EchoUpstream {
    async fn wait_until_ready(&self, port: u16, _timeout: Duration) -> Result<(), ReadinessError> {
        let fresh = self
            .bound
            .lock()
            .map(|mut bound| bound.insert(port))
            .unwrap_or(false);
        if !fresh {
            return Ok(());
        }

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|err| ReadinessError::ReadinessTimeout {
                port,
                waited_ms: 0,
                last_error: err.to_string(),
            })?;
        let app = Router::new().fallback(echo);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(())
    }
}

async fn echo(request: Request) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_default();
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let mut response = format!("{} {target}", request.method()).into_response();
    if let Ok(value) = HeaderValue::from_str(&host) {
        response.headers_mut().insert("x-upstream-host", value);
    }
    response
}

/// Browser double that records requests and returns canned results.
pub struct FakeBrowser {
    pub fail: Option<BrowserError>,
    pub requests: Mutex<Vec<ScreenshotRequest>>,
}

impl FakeBrowser {
    pub fn succeeding() -> Self {
        Self {
            fail: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: BrowserError) -> Self {
        Self {
            fail: Some(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn capture_png(&self, request: &ScreenshotRequest) -> Result<Vec<u8>, BrowserError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        match &self.fail {
            Some(error) => Err(error.clone()),
            None => Ok(PNG_BYTES.to_vec()),
        }
    }
}

pub struct Workspace {
    pub dir: TempDir,
    pub projects_root: PathBuf,
    pub presentation_root: PathBuf,
    pub screenshots_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub binary: PathBuf,
    pub launches: PathBuf,
}

impl Workspace {
    /// `preview` runs for a preview launch, `build` for `build ...` launches.
    pub fn new(preview: &str, build: Option<&str>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path();
        let launches = root.join("launches.log");
        let binary = root.join("fake-slidev");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> \"{log}\"\nif [ \"$1\" = \"build\" ]; then\n{build}\nexit $?\nfi\n{preview}\n",
            log = launches.display(),
            build = build.unwrap_or(DEFAULT_BUILD),
        );
        fs::write(&binary, script).expect("script");
        let mut perms = fs::metadata(&binary).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&binary, perms).expect("set perms");

        Self {
            projects_root: root.join("projects"),
            presentation_root: root.join("presentation"),
            screenshots_dir: root.join("screenshots"),
            catalog_path: root.join("decks.toml"),
            binary,
            launches,
            dir,
        }
    }

    /// Write `projects/<home>/slides.md`.
    pub fn add_project(&self, home: &str) -> PathBuf {
        let project = self.projects_root.join(home);
        fs::create_dir_all(&project).expect("project dir");
        let entry = project.join("slides.md");
        fs::write(&entry, "---\ntheme: seriph\n---\n# Hello").expect("entry");
        entry
    }

    pub fn launches(&self) -> Vec<String> {
        fs::read_to_string(&self.launches)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn preview_launches(&self) -> usize {
        self.launches()
            .iter()
            .filter(|line| !line.starts_with("build "))
            .count()
    }

    pub fn build_launches(&self) -> usize {
        self.launches()
            .iter()
            .filter(|line| line.starts_with("build "))
            .count()
    }

    pub fn supervisor(
        &self,
        readiness: Arc<dyn ReadinessProbe>,
        port_start: u16,
        ready_timeout: Duration,
    ) -> RendererSupervisor {
        RendererSupervisor::new(
            PortLedger::new(),
            RendererInvocation::with_binary(&self.binary),
            readiness,
            SupervisorConfig {
                port_start,
                ready_timeout,
                paths: PublicPaths::default(),
            },
        )
    }
}

pub fn record(id: i64, home: Option<&str>) -> DeckRecord {
    DeckRecord {
        id: DeckId::new(id),
        title: format!("Deck {id}"),
        home: home.map(str::to_string),
        theme: None,
        cover_filename: None,
        has_outlines: true,
        status: Some(ProcessingStatus::OutlineSaved),
    }
}

/// Every collaborator wired over one workspace, as `serve` would.
pub struct Harness {
    pub workspace: Workspace,
    pub catalog: Arc<TomlDeckCatalog>,
    pub supervisor: RendererSupervisor,
    pub locks: DeckLocks,
    pub browser: Arc<FakeBrowser>,
    pub builds: BuildPipeline,
    pub state: HttpState,
}

pub struct HarnessOptions {
    pub readiness: Arc<dyn ReadinessProbe>,
    pub browser: FakeBrowser,
    pub port_start: u16,
    pub build_script: Option<&'static str>,
}

impl HarnessOptions {
    pub fn new(port_start: u16) -> Self {
        Self {
            readiness: Arc::new(AlwaysReady),
            browser: FakeBrowser::succeeding(),
            port_start,
            build_script: None,
        }
    }
}

pub fn harness(records: Vec<DeckRecord>, options: HarnessOptions) -> Harness {
    let workspace = Workspace::new("exec sleep 30", options.build_script);
    for record in &records {
        if let Some(home) = record.home.as_deref() {
            workspace.add_project(home);
        }
    }

    let catalog = Arc::new(TomlDeckCatalog::from_records(
        workspace.catalog_path.clone(),
        workspace.projects_root.clone(),
        records,
    ));
    let supervisor = workspace.supervisor(options.readiness, options.port_start, Duration::from_secs(5));
    let browser = Arc::new(options.browser);
    let capturer = ScreenshotCapturer::new(
        supervisor.clone(),
        browser.clone(),
        ScreenshotSettings {
            screenshots_dir: workspace.screenshots_dir.clone(),
            viewport: Viewport::default(),
            navigation_timeout: Duration::from_secs(5),
        },
    );
    let locks = DeckLocks::new();
    let dyn_catalog: Arc<dyn DeckCatalog> = catalog.clone();
    let paths = PublicPaths::default();
    let builds = BuildPipeline::new(
        dyn_catalog.clone(),
        locks.clone(),
        capturer,
        RendererInvocation::with_binary(&workspace.binary),
        paths.clone(),
        workspace.presentation_root.clone(),
    );
    let state = HttpState {
        catalog: dyn_catalog.clone(),
        supervisor: supervisor.clone(),
        locks: locks.clone(),
        builds: builds.clone(),
        presentations: PresentationStore::new(workspace.presentation_root.clone()),
        proxy: PreviewProxy::new(dyn_catalog, supervisor.clone()),
        screenshots_dir: workspace.screenshots_dir.clone(),
        paths,
    };

    Harness {
        workspace,
        catalog,
        supervisor,
        locks,
        browser,
        builds,
        state,
    }
}

pub fn read_to_string(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}
