//! # dropgraph-daemon CLI
//!
//! `serve` runs the supervisor and its REST surface in the foreground.
//! `start`/`stop`/`status` are thin REST clients a human or script uses to
//! drive a running daemon. `node`/`dataisland`/`master` are the re-exec
//! targets the supervisor spawns as child processes; nothing invokes them
//! directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use dropgraph_daemon::{DaemonConfig, ManagerKind, Supervisor};

#[derive(Parser)]
#[command(name = "dropgraph-daemon")]
#[command(about = "Supervises dropgraph manager processes and advertises them on the local network")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ManagerKindArg {
    Node,
    Dataisland,
    Master,
}

impl From<ManagerKindArg> for ManagerKind {
    fn from(arg: ManagerKindArg) -> Self {
        match arg {
            ManagerKindArg::Node => ManagerKind::Node,
            ManagerKindArg::Dataisland => ManagerKind::DataIsland,
            ManagerKindArg::Master => ManagerKind::Master,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor and its REST surface in the foreground.
    Serve {
        /// Path to a YAML config file; defaults are used for anything absent.
        #[arg(long, env = "DROPGRAPH_DAEMON_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Ask a running daemon to start a manager.
    Start {
        kind: ManagerKindArg,
        #[arg(long, default_value = "127.0.0.1:8001")]
        daemon_addr: String,
    },
    /// Ask a running daemon to stop a manager.
    Stop {
        kind: ManagerKindArg,
        #[arg(long, default_value = "127.0.0.1:8001")]
        daemon_addr: String,
    },
    /// Report whether each manager kind is running.
    Status {
        #[arg(long, default_value = "127.0.0.1:8001")]
        daemon_addr: String,
    },
    /// Re-exec target: runs a Node Manager in this process until signaled.
    #[command(hide = true)]
    Node,
    /// Re-exec target: runs a Data Island Manager in this process until signaled.
    #[command(hide = true)]
    Dataisland,
    /// Re-exec target: runs a Master Manager in this process until signaled.
    #[command(hide = true)]
    Master,
}

fn main() -> ExitCode {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(run())
}

async fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::Start { kind, daemon_addr } => client_request(reqwest::Method::POST, &daemon_addr, kind.into()).await,
        Command::Stop { kind, daemon_addr } => client_request(reqwest::Method::DELETE, &daemon_addr, kind.into()).await,
        Command::Status { daemon_addr } => status(&daemon_addr).await,
        Command::Node => run_manager_subprocess(ManagerKind::Node).await,
        Command::Dataisland => run_manager_subprocess(ManagerKind::DataIsland).await,
        Command::Master => run_manager_subprocess(ManagerKind::Master).await,
    }
}

async fn serve(config_path: Option<PathBuf>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load daemon configuration");
            return ExitCode::from(1);
        }
    };

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, error = %e, "invalid bind_addr in daemon configuration");
            return ExitCode::from(1);
        }
    };

    let supervisor = Arc::new(Supervisor::new(config));
    let app = dropgraph_daemon::api::create_router(supervisor.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind daemon REST surface");
            return ExitCode::from(2);
        }
    };

    tracing::info!(%addr, "dropgraph daemon listening");
    let serve_result = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await;

    tracing::info!("shutting down child managers");
    supervisor.shutdown_all().await;

    match serve_result {
        Ok(()) => {
            tracing::info!("dropgraph daemon shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "daemon server error");
            ExitCode::from(2)
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig, Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            let contents = std::fs::read_to_string(&p)?;
            Ok(serde_yaml::from_str(&contents)?)
        }
        None => Ok(DaemonConfig::default()),
    }
}

async fn client_request(method: reqwest::Method, daemon_addr: &str, kind: ManagerKind) -> ExitCode {
    let url = format!("http://{daemon_addr}/managers/{}", kind.as_str());
    let client = reqwest::Client::new();
    match client.request(method, &url).send().await {
        Ok(resp) if resp.status().is_success() => {
            println!("{} manager: ok ({})", kind, resp.status());
            ExitCode::SUCCESS
        }
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            eprintln!("{kind} manager request failed: {status}: {body}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("could not reach daemon at {daemon_addr}: {e}");
            ExitCode::from(2)
        }
    }
}

async fn status(daemon_addr: &str) -> ExitCode {
    let client = reqwest::Client::new();
    let mut ok = true;
    for kind in [ManagerKind::Node, ManagerKind::DataIsland, ManagerKind::Master] {
        let url = format!("http://{daemon_addr}/managers/{}", kind.as_str());
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body = resp.text().await.unwrap_or_default();
                println!("{kind}: {body}");
            }
            Ok(resp) => {
                println!("{kind}: request failed ({})", resp.status());
                ok = false;
            }
            Err(e) => {
                eprintln!("could not reach daemon at {daemon_addr}: {e}");
                return ExitCode::from(2);
            }
        }
    }
    if ok { ExitCode::SUCCESS } else { ExitCode::from(2) }
}

/// The re-exec target for a manager subcommand. The full manager stack
/// (sessions, DLM, REST façade) is out of scope for this binary beyond the
/// Node Manager's own in-process pieces; what matters here is that the
/// process re-installs its own signal handling from scratch rather than
/// assuming anything about the parent daemon's handler state, and exits
/// cleanly once signaled.
async fn run_manager_subprocess(kind: ManagerKind) -> ExitCode {
    tracing::info!(%kind, "manager starting");

    let discovery_enabled = std::env::var("DROPGRAPH_DISCOVERY_ENABLED").map(|v| v == "true").unwrap_or(true);
    let discovery_host = std::env::var("DROPGRAPH_DISCOVERY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let node_manager_port: u16 = std::env::var("DROPGRAPH_NODE_MANAGER_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8002);

    // Keep the manager, its sweeper task, and its mdns advertisement alive
    // for the process's whole lifetime; otherwise they'd be dropped (and
    // the advertisement unregistered) before `shutdown_signal` is awaited.
    let _guard = if kind == ManagerKind::Node {
        let dlm = dropgraph_dlm::Dlm::new(dropgraph_dlm::DlmConfig::default());
        let executor: Arc<dyn dropgraph_core::AppExecutor> = Arc::new(dropgraph_dynlib::NativeLibExecutor::new());
        let node_manager = dropgraph_manager::NodeManager::new(dlm.clone(), executor, dropgraph_core::Concurrency::Bounded(8));
        let sweeper = dlm.spawn_sweeper();

        let advertisement = if discovery_enabled {
            match dropgraph_daemon::discovery::advertise(&discovery_host, node_manager_port) {
                Ok(a) => Some(a),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to advertise node manager on the local network");
                    None
                }
            }
        } else {
            None
        };

        tracing::info!("node manager ready");
        Some((node_manager, sweeper, advertisement))
    } else {
        if kind == ManagerKind::Master && discovery_enabled {
            let _ = dropgraph_daemon::discovery::subscribe(
                |peer| tracing::info!(host = %peer.host, port = peer.port, "node manager discovered"),
                |fullname| tracing::info!(fullname, "node manager left the network"),
            );
        }
        tracing::info!(%kind, "composite manager tier has no standalone children configured; idling until signaled");
        None
    };

    shutdown_signal().await;
    if let Some((_node_manager, sweeper, _advertisement)) = _guard {
        sweeper.abort();
    }
    tracing::info!(%kind, "manager shutting down");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received sigterm"),
    }
}
