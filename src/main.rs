//! agent-bridge
//!
//! Exposes a connected design-tool plugin to MCP clients. Tool calls become
//! tasks that are sent to the plugin over a WebSocket; the plugin's responses
//! are matched back to the waiting calls.
//!
//! Three listeners run side by side: the MCP endpoint, the agent WebSocket,
//! and an optional browser REPL.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use agent_bridge::{
    api,
    bridge::Bridge,
    config::{Config, ConfigError, Overrides},
    repl,
    shutdown::ShutdownCoordinator,
};
use axum::Router;
use clap::Parser as ClapParser;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// agent-bridge - MCP server for a remote plugin agent
#[derive(ClapParser, Debug)]
#[command(name = "agent-bridge", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (defaults to <config dir>/agent-bridge/config.toml)
    #[arg(long, env = "AGENT_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Host address for all listeners
    #[arg(long, env = "AGENT_BRIDGE_HOST")]
    host: Option<IpAddr>,

    /// Port for the MCP HTTP endpoint
    #[arg(long, env = "AGENT_BRIDGE_MCP_PORT")]
    mcp_port: Option<u16>,

    /// Port for the agent WebSocket
    #[arg(long, env = "AGENT_BRIDGE_AGENT_PORT")]
    agent_port: Option<u16>,

    /// Port for the REPL console
    #[arg(long, env = "AGENT_BRIDGE_REPL_PORT")]
    repl_port: Option<u16>,

    /// Seconds a task may wait for the agent's response
    #[arg(long, env = "AGENT_BRIDGE_TASK_TIMEOUT_SECS")]
    task_timeout_secs: Option<u64>,

    /// Do not start the REPL console
    #[arg(long)]
    no_repl: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host,
            mcp_port: self.mcp_port,
            agent_port: self.agent_port,
            repl_port: self.repl_port,
            task_timeout_secs: self.task_timeout_secs,
            disable_repl: self.no_repl,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::resolve(cli.config.as_deref(), &cli.overrides())?;
    run_server(config).await
}

/// Logs go to stderr so stdout stays free for tooling that wraps the binary.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "agent_bridge=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, AppError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::Bind { addr, source })
}

fn serve(
    name: &'static str,
    listener: TcpListener,
    app: Router,
    shutdown: ShutdownCoordinator,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await;
        if let Err(ref e) = result {
            tracing::error!(listener = name, error = %e, "server error");
        }
        result
    })
}

async fn run_server(config: Config) -> Result<(), AppError> {
    tracing::info!("agent-bridge starting");

    let bridge = Bridge::new(config.task_timeout());
    let shutdown = ShutdownCoordinator::new();
    let state = api::AppState::new(bridge.clone(), shutdown.clone());

    let mcp_listener = bind(config.mcp_addr()).await?;
    let agent_listener = bind(config.agent_addr()).await?;
    let repl_listener = match config.repl_addr() {
        Some(addr) => Some(bind(addr).await?),
        None => None,
    };

    tracing::info!(addr = %config.mcp_addr(), "MCP endpoint listening at /mcp");
    tracing::info!(addr = %config.agent_addr(), "agent WebSocket listening");

    let mut handles = vec![
        serve("mcp", mcp_listener, api::router(state.clone()), shutdown.clone()),
        serve("agent", agent_listener, api::agent_router(state.clone()), shutdown.clone()),
    ];
    if let Some(listener) = repl_listener {
        tracing::info!(addr = %listener.local_addr()?, "REPL console listening");
        handles.push(serve("repl", listener, repl::router(state), shutdown.clone()));
    }

    let agent_events = {
        let mut events = bridge.registry().subscribe_events();
        let registry = bridge.registry().clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!(?event, agents = registry.len(), "agent event");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        })
    };

    tracing::info!(timeout = ?config.task_timeout(), "agent-bridge ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C");

    // Signal WebSocket handlers to send close frames
    shutdown.shutdown();
    tracing::info!(active_connections = shutdown.active_connections(), "closing agent connections");
    let abandoned = bridge.correlator().abandon_all();
    if abandoned > 0 {
        tracing::warn!(abandoned, "pending tasks abandoned at shutdown");
    }
    // Long-lived MCP streams can hold graceful shutdown open indefinitely.
    let drain = async {
        for handle in handles {
            if let Err(e) = handle.await? {
                tracing::warn!(error = %e, "listener exited with error");
            }
        }
        Ok::<(), AppError>(())
    };
    match tokio::time::timeout(SHUTDOWN_GRACE, drain).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!(
            grace = ?SHUTDOWN_GRACE,
            active_connections = shutdown.active_connections(),
            "listeners still draining, exiting anyway"
        ),
    }
    agent_events.abort();

    tracing::info!("agent-bridge exiting");
    Ok(())
}
