use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ripq::config::{FallbackMode, OrchestratorConfig, ServerConfig, StrategyKind};
use ripq::server::Server;
use ripq::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "ripq")]
#[command(version)]
#[command(about = "Job orchestration engine for ripping and transcoding workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator and its HTTP API
    Server(ServerArgs),

    /// Print the resolved configuration as JSON and exit
    Config(ServerArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind the HTTP API to
    #[arg(long, env = "RIPQ_BIND", default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port for the HTTP API
    #[arg(long, env = "RIPQ_PORT", default_value = "8400")]
    port: u16,

    /// Worker selection policy
    #[arg(long, env = "RIPQ_STRATEGY", value_enum, default_value_t = StrategyKind::Priority)]
    strategy: StrategyKind,

    /// What to do with a queued job no worker can take
    #[arg(long, env = "RIPQ_FALLBACK", value_enum, default_value_t = FallbackMode::NextPriority)]
    fallback: FallbackMode,

    /// Seconds a job may wait for a worker under queue_and_wait
    #[arg(long, env = "RIPQ_ASSIGNMENT_TIMEOUT", default_value = "3600")]
    assignment_timeout: u64,

    /// Heartbeat age in seconds after which a worker is offline
    #[arg(long, env = "RIPQ_HEARTBEAT_TIMEOUT", default_value = "90")]
    heartbeat_timeout: u64,

    /// Expected seconds between worker heartbeats
    #[arg(long, env = "RIPQ_HEARTBEAT_INTERVAL", default_value = "30")]
    heartbeat_interval: u64,

    /// Missed heartbeat intervals before a worker is offline
    #[arg(long, env = "RIPQ_MISSED_HEARTBEATS", default_value = "3")]
    missed_heartbeats: u32,

    /// Seconds between health sweeps
    #[arg(long, env = "RIPQ_HEALTH_CHECK_INTERVAL", default_value = "30")]
    health_check_interval: u64,

    /// Seconds between dispatch passes when nothing wakes the dispatcher
    #[arg(long, env = "RIPQ_DISPATCH_INTERVAL", default_value = "5")]
    dispatch_interval: u64,

    /// Snapshot file; state is not persisted when omitted
    #[arg(long, env = "RIPQ_SNAPSHOT_PATH")]
    snapshot_path: Option<PathBuf>,

    /// Seconds between snapshots
    #[arg(long, env = "RIPQ_SNAPSHOT_INTERVAL", default_value = "30")]
    snapshot_interval: u64,
}

impl ServerArgs {
    fn into_config(self) -> ServerConfig {
        let orchestrator = OrchestratorConfig {
            assignment_strategy: self.strategy,
            fallback_mode: self.fallback,
            assignment_timeout_seconds: self.assignment_timeout,
            heartbeat_timeout_seconds: self.heartbeat_timeout,
            heartbeat_interval_seconds: self.heartbeat_interval,
            mark_offline_after_missed: self.missed_heartbeats,
            health_check_interval_seconds: self.health_check_interval,
            dispatch_interval_seconds: self.dispatch_interval,
        };

        let config = ServerConfig::new(SocketAddr::new(self.bind, self.port))
            .with_orchestrator(orchestrator);
        match self.snapshot_path {
            Some(path) => config.with_snapshot(path, self.snapshot_interval),
            None => config,
        }
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = Server::new(args.into_config())?;
    let token = install_shutdown_handler()?;
    server.run(token).await?;

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Config(server_args) => {
            let config = server_args.into_config();
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
