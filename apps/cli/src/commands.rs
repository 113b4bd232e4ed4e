//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result};
use tracing::{info, warn};

use assetforge_core::{
    BUILD_TASK, BuildOptions, DevSession, Project, WatchOptions, clean, run_tests, serve_static,
};
use assetforge_graph::RunReport;
use assetforge_shared::{BuildMode, CancelToken, FailurePolicy, ForgeError, init_config, load_config};

use crate::output::{BuildSpinner, render_report};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// assetforge: build, watch and serve front-end assets.
#[derive(Parser)]
#[command(
    name = "assetforge",
    version,
    about = "Front-end asset build orchestrator with watch mode and live reload.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Project root directory.
    #[arg(long, default_value = ".", global = true)]
    pub project: PathBuf,

    /// Config file (defaults to <project>/assetforge.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build a target and everything it depends on.
    Build {
        /// Build mode: dev or prod.
        #[arg(long, default_value = "prod")]
        mode: BuildMode,

        /// Task to build.
        #[arg(long, default_value = BUILD_TASK)]
        target: String,

        /// Maximum number of tasks running at once.
        #[arg(long)]
        jobs: Option<usize>,

        /// Rebuild tasks even when their inputs are unchanged.
        #[arg(long)]
        force: bool,

        /// What to do after a task fails: drain, abort or keep-going.
        #[arg(long)]
        failure_policy: Option<FailurePolicy>,
    },

    /// Build, then rebuild on change and serve with live reload.
    Watch {
        /// Build mode: dev or prod.
        #[arg(long, default_value = "dev")]
        mode: BuildMode,

        /// Watch and rebuild without starting the dev server.
        #[arg(long)]
        no_server: bool,

        /// Dev server port (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Run the test runner after the initial build, before serving.
        #[arg(long)]
        test: bool,
    },

    /// Build, then serve the output without live reload.
    Serve {
        /// Build mode: dev or prod.
        #[arg(long, default_value = "prod")]
        mode: BuildMode,

        /// Server port (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Remove build output (both modes unless --mode is given).
    Clean {
        #[arg(long)]
        mode: Option<BuildMode>,
    },

    /// Run the configured external test runner.
    Test,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a default assetforge.toml into the project.
    Init,
    /// Show resolved configuration.
    Show {
        /// Print as JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "assetforge=info",
        1 => "assetforge=debug",
        _ => "assetforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command, mapping configuration errors to exit code 2.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    match dispatch(cli).await {
        Err(err) if is_configuration(&err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(2))
        }
        other => other,
    }
}

fn is_configuration(err: &Report) -> bool {
    err.downcast_ref::<ForgeError>()
        .is_some_and(ForgeError::is_configuration)
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let root = cli.project.as_path();
    let config = cli.config.as_deref();

    match cli.command {
        Command::Build {
            mode,
            target,
            jobs,
            force,
            failure_policy,
        } => {
            let options = BuildOptions {
                force,
                jobs,
                failure_policy,
            };
            cmd_build(root, config, mode, &target, options).await
        }
        Command::Watch {
            mode,
            no_server,
            port,
            test,
        } => cmd_watch(root, config, mode, !no_server, port, test).await,
        Command::Serve { mode, port } => cmd_serve(root, config, mode, port).await,
        Command::Clean { mode } => cmd_clean(root, config, mode).await,
        Command::Test => cmd_test(root, config).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(root),
            ConfigAction::Show { json } => cmd_config_show(root, config, json),
        },
    }
}

/// Token cancelled on the first ctrl-c.
fn shutdown_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_build(
    root: &Path,
    config: Option<&Path>,
    mode: BuildMode,
    target: &str,
    options: BuildOptions,
) -> Result<ExitCode> {
    let project = Project::load(root, config)?;
    let pipeline = project.pipeline(mode, &options)?;
    let cancel = shutdown_on_ctrl_c();

    let report = run_with_spinner(format!("Building {target} ({mode})"), async {
        pipeline.run(target, &cancel).await
    })
    .await?;

    print!("{}", render_report(&report));
    Ok(exit_for(&report))
}

async fn cmd_watch(
    root: &Path,
    config: Option<&Path>,
    mode: BuildMode,
    serve: bool,
    port: Option<u16>,
    run_tests: bool,
) -> Result<ExitCode> {
    let project = Project::load(root, config)?;
    let options = WatchOptions {
        mode,
        serve,
        port,
        run_tests,
        build: BuildOptions::default(),
    };
    let session = DevSession::start(&project, options).await?;
    let shutdown = shutdown_on_ctrl_c();

    let report = run_with_spinner(format!("Building {BUILD_TASK} ({mode})"), async {
        session.initial_build(&shutdown).await
    })
    .await?;
    print!("{}", render_report(&report));
    if !report.is_success() {
        warn!("initial build failed; watching for changes");
    }
    if let Some(code) = session.run_tests().await? {
        println!("  Tests exited with code {code}");
    }

    if let Some(addr) = session.server_addr() {
        println!("  Serving {} at http://{addr}/", session.pipeline().output_root().display());
    }
    println!("  Watching {} (ctrl-c to stop)", project.root().display());

    let summary = session.run(shutdown).await?;
    println!(
        "  Stopped after {} rebuild(s), {} failed.",
        summary.rebuilds, summary.failed_rebuilds
    );
    Ok(ExitCode::SUCCESS)
}

async fn cmd_serve(
    root: &Path,
    config: Option<&Path>,
    mode: BuildMode,
    port: Option<u16>,
) -> Result<ExitCode> {
    let project = Project::load(root, config)?;
    let pipeline = project.pipeline(mode, &BuildOptions::default())?;
    let shutdown = shutdown_on_ctrl_c();

    let report = run_with_spinner(format!("Building {BUILD_TASK} ({mode})"), async {
        pipeline.run(BUILD_TASK, &shutdown).await
    })
    .await?;
    print!("{}", render_report(&report));
    if !report.is_success() {
        return Ok(ExitCode::FAILURE);
    }

    println!("  Serving {} (ctrl-c to stop)", pipeline.output_root().display());
    serve_static(&project, mode, port, shutdown).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_clean(root: &Path, config: Option<&Path>, mode: Option<BuildMode>) -> Result<ExitCode> {
    let project = Project::load(root, config)?;
    let modes = match mode {
        Some(mode) => vec![mode],
        None => vec![BuildMode::Dev, BuildMode::Prod],
    };

    let removed = clean(&project, &modes).await?;
    if removed.is_empty() {
        println!("  Nothing to clean.");
    }
    for path in removed {
        println!("  Removed {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_test(root: &Path, config: Option<&Path>) -> Result<ExitCode> {
    let project = Project::load(root, config)?;
    let code = run_tests(&project).await?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn cmd_config_init(root: &Path) -> Result<ExitCode> {
    let path = init_config(root)?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(root: &Path, config: Option<&Path>, json: bool) -> Result<ExitCode> {
    let config = load_config(root, config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn run_with_spinner<F>(message: String, run: F) -> Result<RunReport>
where
    F: std::future::Future<Output = assetforge_shared::Result<RunReport>>,
{
    let spinner = BuildSpinner::start(message);
    let result = run.await;
    spinner.finish();
    Ok(result?)
}

fn exit_for(report: &RunReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
