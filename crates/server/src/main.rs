//! Launchpad Server
//!
//! Axum server that triggers deployments, streams their output live and
//! stops them on request. Also runs single deployments from the command line.

mod api;

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::{Parser, Subcommand};
use launchpad_core::deploy::{ensure_repos_dir, list_repositories};
use launchpad_core::{
    CommandSequencer, DeployConfig, DeployEvent, EventBroadcaster, EventSink, OutputType,
    ProcessRegistry,
};
use std::{future::Future, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

/// Application state shared by every handler
pub struct AppState {
    sequencer: CommandSequencer,
    registry: Arc<ProcessRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    /// Cancelled on shutdown so long-lived streams let the server exit
    shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;

#[derive(Parser, Clone)]
#[command(author, version, about = "Launchpad - clone, build and stream deployments")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Launchpad server (default)
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "3001")]
        port: u16,
        /// Shared repository root (overrides config and LAUNCHPAD_REPOS_DIR)
        #[arg(long)]
        repos_dir: Option<PathBuf>,
    },
    /// Run one deployment in this terminal, no server
    Deploy {
        /// Repository to deploy
        git_url: String,
        /// Branch to check out
        #[arg(short, long, default_value = "main")]
        branch: String,
        #[arg(long)]
        repos_dir: Option<PathBuf>,
    },
    /// List repositories under the repository root
    Repos {
        #[arg(long)]
        repos_dir: Option<PathBuf>,
    },
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Launchpad API",
        version = "1.0.0",
        description = "Trigger deployments and control running deployment processes"
    ),
    paths(api::deploy::deploy, api::deploy::stop, api::deploy::list_repos),
    components(schemas(
        api::deploy::DeployRequest,
        api::deploy::DeployResponse,
        api::deploy::StopRequest,
        api::deploy::StopResponse,
        api::deploy::ReposResponse,
        api::deploy::ErrorResponse
    )),
    tags(
        (name = "deploy", description = "Deployment trigger and stop control"),
        (name = "repos", description = "Checked-out repositories")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(json) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .unwrap_or_default(),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(e.to_string()))
            .unwrap_or_default(),
    }
}

/// Installs the tracing subscriber, honouring `RUST_LOG` (default `info`)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

async fn load_config(repos_dir: Option<PathBuf>) -> DeployConfig {
    let mut config = DeployConfig::load().await;
    if let Some(dir) = repos_dir {
        config.repos_dir = dir;
    }
    config
}

/// Resolves on Ctrl-C or SIGTERM after killing every tracked process
///
/// The registry stays closed afterwards, so an in-flight deployment stops at
/// its next step instead of holding graceful shutdown open.
async fn shutdown_signal(registry: Arc<ProcessRegistry>, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let killed = registry.kill_all();
    tracing::info!(killed, "shutdown signal received, stopping");
    shutdown.cancel();
}

// === Server Entry ===

pub async fn run_server(config: DeployConfig, host: &str, port: u16) -> anyhow::Result<()> {
    ensure_repos_dir(&config.repos_dir).await?;

    let broadcaster = Arc::new(EventBroadcaster::new(config.event_capacity));
    let registry = Arc::new(ProcessRegistry::new());
    let sink: Arc<dyn EventSink> = broadcaster.clone();
    let sequencer = CommandSequencer::with_process_runner(config, registry.clone(), sink);
    let shutdown = CancellationToken::new();

    let state: SharedState = Arc::new(AppState {
        sequencer,
        registry: registry.clone(),
        broadcaster,
        shutdown: shutdown.clone(),
    });

    let app = Router::new()
        .nest("/api", api::routes())
        .route("/api/openapi.json", get(serve_openapi))
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    println!("🚀 Launchpad Server running at http://{}", addr);
    println!("   Repositories: {}", state.sequencer.config().repos_dir.display());
    println!("   Deploy:  POST /api/deploy, POST /api/stop");
    println!("   Repos:   GET  /api/repos");
    println!("   Events:  GET  /api/events (SSE), /api/ws (WebSocket)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry, shutdown))
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Render one event for a terminal
fn print_event(event: &DeployEvent) {
    match event {
        DeployEvent::CommandOutput(e) => match e.output_type {
            OutputType::Stdout => println!("{}", e.output),
            OutputType::Stderr => eprintln!("{}", e.output),
            OutputType::System => println!("▶ {}", e.output),
            OutputType::Success => println!("✅ {}", e.output),
            OutputType::Error => eprintln!("❌ {}", e.output),
        },
        DeployEvent::CommandComplete { exit_code, .. } => {
            println!("Deployment finished with exit code {}", exit_code);
        }
    }
}

/// Kill every tracked process each time `next_interrupt` resolves to `true`
///
/// Installing a Ctrl-C handler replaces the default SIGINT action, so this
/// keeps listening for as long as the deployment runs.
async fn stop_on_interrupts<F, Fut>(registry: &ProcessRegistry, mut next_interrupt: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut interrupts = 0;
    while next_interrupt().await {
        interrupts += 1;
        let killed = registry.kill_all();
        tracing::info!(killed, interrupts, "interrupted, stopping deployment");
    }
    interrupts
}

/// Run a single deployment in-process, printing its output
async fn run_cli_deploy(config: DeployConfig, git_url: &str, branch: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DeployEvent>();
    let registry = Arc::new(ProcessRegistry::new());
    let sequencer = CommandSequencer::with_process_runner(config, registry.clone(), Arc::new(tx));

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let interrupt = {
        let registry = registry.clone();
        tokio::spawn(async move {
            stop_on_interrupts(&registry, || async { signal::ctrl_c().await.is_ok() }).await
        })
    };

    let outcome = sequencer.deploy(git_url, branch).await;
    interrupt.abort();
    // Dropping the sequencer closes the channel so the printer drains and exits
    drop(sequencer);
    let _ = printer.await;

    match outcome.error {
        None => Ok(()),
        Some(error) => Err(anyhow::anyhow!(error)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = Args::parse();

    match args.command {
        Some(CliCommand::Serve {
            host,
            port,
            repos_dir,
        }) => run_server(load_config(repos_dir).await, &host, port).await,
        Some(CliCommand::Deploy {
            git_url,
            branch,
            repos_dir,
        }) => run_cli_deploy(load_config(repos_dir).await, &git_url, &branch).await,
        Some(CliCommand::Repos { repos_dir }) => {
            let config = load_config(repos_dir).await;
            for repo in list_repositories(&config.repos_dir).await? {
                println!("{}", repo);
            }
            Ok(())
        }
        None => run_server(load_config(None).await, "127.0.0.1", 3001).await,
    }
}
