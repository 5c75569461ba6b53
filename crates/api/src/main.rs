use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use actlocal_api::config::ServerConfig;
use actlocal_api::engine::{plan_run, BackendSet, CreateRunRequest};
use actlocal_api::router::build_app_router;
use actlocal_api::state::AppState;
use actlocal_api::ws;
use actlocal_core::project::{InMemoryProjectStore, Project};
use actlocal_core::run::Engine;
use actlocal_executor::BackendError;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "actlocal")]
#[command(version)]
#[command(about = "Run GitHub Actions workflows locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon serving the HTTP and WebSocket API
    Daemon(DaemonArgs),
    /// Run one workflow directly, streaming output to stdout
    Run(RunArgs),
}

#[derive(Args)]
struct DaemonArgs {
    /// Bind address (overrides ACTLOCAL_HOST)
    #[arg(long)]
    host: Option<String>,
    /// Bind port (overrides ACTLOCAL_PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Shared secret clients must present (overrides ACTLOCAL_TOKEN)
    #[arg(long)]
    token: Option<String>,
    /// Register a project root; the first registered project is active
    #[arg(long = "project", value_name = "PATH")]
    projects: Vec<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Workflow file, relative to the project root
    workflow: String,
    /// Job id within the workflow
    #[arg(long)]
    job: Option<String>,
    /// Engine to run with: builtin, act or github (default: act)
    #[arg(long)]
    engine: Option<Engine>,
    /// Container image for the builtin engine
    #[arg(long)]
    image: Option<String>,
    /// Project root (default: current directory)
    #[arg(long)]
    project: Option<PathBuf>,
    /// Event name passed to act
    #[arg(long)]
    event: Option<String>,
    /// Event payload file passed to act
    #[arg(long)]
    event_path: Option<String>,
    /// Secrets file passed to act
    #[arg(long)]
    secret_file: Option<String>,
    /// Variables file passed to act
    #[arg(long = "var-file")]
    vars_file: Option<String>,
    /// Platform mapping passed to act, `label=image`
    #[arg(short = 'P', long = "platform")]
    platforms: Vec<String>,
    /// Repository for the github engine, `owner/name`
    #[arg(long)]
    repo: Option<String>,
    /// Git ref for the github engine
    #[arg(long = "ref")]
    git_ref: Option<String>,
    /// Workflow input for the github engine, `key=value`
    #[arg(short = 'i', long = "input", value_parser = parse_key_value)]
    inputs: Vec<(String, String)>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "actlocal_api=info,actlocal_executor=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Daemon(args) => run_daemon(args).await,
        Command::Run(args) => {
            let code = run_once(args).await?;
            std::process::exit(code);
        }
    }
}

async fn run_daemon(args: DaemonArgs) -> anyhow::Result<()> {
    // --- Configuration ---
    let mut config = ServerConfig::from_env().context("Invalid configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(token) = args.token {
        config.token = token;
        config.token_generated = false;
    }
    config
        .projects
        .extend(args.projects.into_iter().map(Project::from_path));
    tracing::info!(
        host = %config.host,
        port = config.port,
        projects = config.projects.len(),
        "Loaded daemon configuration"
    );

    if config.token_generated {
        println!("actlocal token: {}", config.token);
    }

    // --- App state ---
    let projects = Arc::new(InMemoryProjectStore::with_first_active(
        config.projects.clone(),
    ));
    let backends = BackendSet::new(config.docker.clone());
    let state = AppState::new(config.clone(), projects, backends);

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&state.broadcaster));

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid host address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(%addr, "actlocal daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!(
        in_flight = state.dispatcher.in_flight_count(),
        "Server stopped accepting connections, cancelling runs"
    );
    state
        .dispatcher
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    state.broadcaster.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Plan and execute a single run in the foreground. Returns its exit code.
async fn run_once(args: RunArgs) -> anyhow::Result<i32> {
    let root = match args.project {
        Some(path) => path,
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let projects = InMemoryProjectStore::with_first_active([Project::from_path(root)]);
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    let backends = BackendSet::new(config.docker.clone());

    let explicit_engine = args.engine.is_some();
    let request = CreateRunRequest {
        engine: args.engine,
        image: args.image,
        workflow_path: Some(args.workflow),
        job_id: args.job,
        event_name: args.event,
        event_path: args.event_path,
        secret_file: args.secret_file,
        vars_file: args.vars_file,
        platforms: args.platforms,
        repo: args.repo,
        git_ref: args.git_ref,
        inputs: args.inputs.into_iter().collect(),
        ..Default::default()
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT (Ctrl-C), cancelling run");
            ctrl_c_cancel.cancel();
        }
    });

    let planned = plan_run(request.clone(), &projects, &config.default_image)?;
    let engine = planned.spec.engine;
    let result = backends
        .for_engine(engine)
        .execute(planned.work, None, cancel.clone())
        .await;

    let result = match result {
        Err(BackendError::ToolMissing { tool: "act" }) if !explicit_engine => {
            tracing::warn!("act is not installed, falling back to the builtin engine");
            let fallback = CreateRunRequest {
                engine: Some(Engine::Builtin),
                ..request
            };
            let planned = plan_run(fallback, &projects, &config.default_image)?;
            backends
                .builtin
                .execute(planned.work, None, cancel)
                .await
        }
        other => other,
    };

    match result {
        Ok(code) => {
            tracing::info!(exit_code = code, "Run finished");
            Ok(code)
        }
        Err(e) => {
            eprintln!("[actlocal] error: {e}");
            Ok(1)
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
