//! farm-instance — one member of the server farm.
//!
//! # Usage
//!
//! ```text
//! SERVER_ID=server-3 SERVER_PORT=8003 farm-instance
//! farm-instance --server-id server-3 --port 8003 --degraded-threshold 90
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use farm_instance::{InstanceConfig, InstanceState};

#[derive(Parser)]
#[command(name = "farm-instance", about = "Server farm instance endpoint")]
struct Cli {
    /// Identifier reported in every payload.
    #[arg(long, env = "SERVER_ID", default_value = "unknown")]
    server_id: String,

    /// Port to listen on.
    #[arg(long, env = "SERVER_PORT", default_value = "8000")]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// CPU or memory percent above which health reports degraded.
    #[arg(long, default_value = "80")]
    degraded_threshold: f64,

    /// Shortest slow-endpoint delay in seconds.
    #[arg(long, default_value = "1")]
    slow_min_secs: f64,

    /// Longest slow-endpoint delay in seconds.
    #[arg(long, default_value = "5")]
    slow_max_secs: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,farm_instance=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    if !(cli.slow_min_secs >= 0.0 && cli.slow_max_secs >= cli.slow_min_secs) {
        anyhow::bail!("slow endpoint delay bounds must satisfy 0 <= min <= max");
    }

    let config = InstanceConfig {
        server_id: cli.server_id,
        port: cli.port,
        degraded_threshold: cli.degraded_threshold,
        slow_delay: (
            Duration::from_secs_f64(cli.slow_min_secs),
            Duration::from_secs_f64(cli.slow_max_secs),
        ),
    };
    let state = InstanceState::new(config);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        server_id = %state.config().server_id,
        hostname = %state.hostname(),
        cpus = state.sampler().snapshot().cpu.count,
        "instance starting"
    );

    let shutdown_state = state.clone();
    axum::serve(listener, farm_instance::router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!(
                uptime_secs = shutdown_state.uptime().as_secs_f64(),
                total_requests = shutdown_state.requests(),
                "instance shutting down"
            );
        })
        .await?;

    Ok(())
}
