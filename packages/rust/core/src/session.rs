//! Long-running dev session: initial build, file watching, incremental
//! rebuilds and the dev server with live reload.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use assetforge_graph::RunReport;
use assetforge_server::{DevServer, ReloadHub};
use assetforge_shared::{BuildMode, CancelToken, Result, WatchEvent};
use assetforge_watch::{
    FsWatcher, InputMatcher, PathFilter, RebuildFuture, Rebuilder, WatchCoordinator, WatchSummary,
};

use crate::BUILD_TASK;
use crate::project::{BuildOptions, Pipeline, Project};
use crate::test_runner::run_tests;

/// Watcher → coordinator channel depth.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub mode: BuildMode,
    /// Start the dev server alongside the watcher.
    pub serve: bool,
    /// Overrides `[server].port`.
    pub port: Option<u16>,
    /// Run the test runner after the initial build, before serving.
    /// `[watch].run_tests` enables it too.
    pub run_tests: bool,
    pub build: BuildOptions,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            mode: BuildMode::Dev,
            serve: true,
            port: None,
            run_tests: false,
            build: BuildOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionRebuilder
// ---------------------------------------------------------------------------

/// Runs incremental builds and tells browsers to reload when one succeeds.
pub struct SessionRebuilder {
    pipeline: Arc<Pipeline>,
    hub: Option<ReloadHub>,
}

impl SessionRebuilder {
    pub fn new(pipeline: Arc<Pipeline>, hub: Option<ReloadHub>) -> Self {
        Self { pipeline, hub }
    }
}

impl Rebuilder for SessionRebuilder {
    fn rebuild(&self, tasks: BTreeSet<String>, cancel: CancelToken) -> RebuildFuture {
        let pipeline = Arc::clone(&self.pipeline);
        let hub = self.hub.clone();
        Box::pin(async move {
            let report = pipeline.run_tasks(&tasks, &cancel).await?;
            if report.is_success() {
                if let Some(hub) = hub {
                    let clients = hub.reload();
                    info!(clients, "live reload sent");
                }
            }
            Ok(report)
        })
    }
}

// ---------------------------------------------------------------------------
// DevSession
// ---------------------------------------------------------------------------

pub struct DevSession {
    project: Project,
    pipeline: Arc<Pipeline>,
    hub: Option<ReloadHub>,
    server: Option<DevServer>,
    run_tests: bool,
    watcher: FsWatcher,
    /// Changes seen since the watcher started, including during the initial build.
    events: mpsc::Receiver<WatchEvent>,
}

impl DevSession {
    /// Validate the project's tasks, start watching and bind the dev server.
    ///
    /// All three failures are fatal and happen before anything is built.
    pub async fn start(project: &Project, options: WatchOptions) -> Result<Self> {
        let pipeline = Arc::new(project.pipeline(options.mode, &options.build)?);
        let config = project.config();
        let server_config = &config.server;

        let filter = PathFilter::new(
            project.root(),
            &config.watch.ignore,
            &[
                project.output_root(BuildMode::Dev),
                project.output_root(BuildMode::Prod),
            ],
        )?;
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let watcher = FsWatcher::start(filter, tx)?;

        let (hub, server) = if options.serve {
            let hub = server_config.livereload.then(ReloadHub::new);
            let addr = format!(
                "{}:{}",
                server_config.host,
                options.port.unwrap_or(server_config.port)
            );
            let server = DevServer::bind(&addr, pipeline.output_root(), hub.clone()).await?;
            (hub, Some(server))
        } else {
            (None, None)
        };

        Ok(Self {
            project: project.clone(),
            pipeline,
            hub,
            server,
            run_tests: options.run_tests || config.watch.run_tests,
            watcher,
            events,
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Full build of the `build` target.
    pub async fn initial_build(&self, cancel: &CancelToken) -> Result<RunReport> {
        self.pipeline.run(BUILD_TASK, cancel).await
    }

    /// Run the external test runner when the session has tests enabled.
    ///
    /// Returns `None` when disabled. A failing suite is reported, not fatal.
    pub async fn run_tests(&self) -> Result<Option<i32>> {
        if !self.run_tests {
            return Ok(None);
        }
        let code = run_tests(&self.project).await?;
        if code != 0 {
            warn!(code, "tests failed; still serving");
        }
        Ok(Some(code))
    }

    /// Serve, watch and rebuild until `shutdown` fires.
    #[instrument(skip_all, fields(mode = %self.pipeline.mode()))]
    pub async fn run(self, shutdown: CancelToken) -> Result<WatchSummary> {
        let config = self.project.config();
        let watcher = self.watcher;

        let server = self.server.map(|server| tokio::spawn(server.serve(shutdown.clone())));

        let matcher = InputMatcher::new(Arc::clone(self.pipeline.registry()))?;
        let rebuilder = Arc::new(SessionRebuilder::new(Arc::clone(&self.pipeline), self.hub));
        let coordinator = WatchCoordinator::new(
            matcher,
            rebuilder,
            Duration::from_millis(config.watch.debounce_ms),
        );
        let summary = coordinator.run(self.events, shutdown.clone()).await;

        drop(watcher);
        shutdown.cancel();
        if let Some(server) = server {
            match server.await {
                Ok(result) => result?,
                Err(err) => warn!(error = %err, "dev server task panicked"),
            }
        }
        summary
    }
}

/// Serve an already-built output root without live reload until `shutdown`.
pub async fn serve_static(
    project: &Project,
    mode: BuildMode,
    port: Option<u16>,
    shutdown: CancelToken,
) -> Result<()> {
    let server_config = &project.config().server;
    let addr = format!(
        "{}:{}",
        server_config.host,
        port.unwrap_or(server_config.port)
    );
    let server = DevServer::bind(&addr, project.output_root(mode), None).await?;
    server.serve(shutdown).await
}
