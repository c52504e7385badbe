//! farmd — the server farm control plane daemon.
//!
//! Assembles the control plane in one process:
//! - Instance registry (fixed at startup)
//! - Health and metrics aggregator
//! - Load-test driver
//! - Container runtime client (optional)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! farmd serve --servers 50 --base-port 8000
//! farmd serve --config farm.toml --no-docker --log-format json
//! farmd config --config farm.toml
//! ```
//!
//! Settings resolve as CLI flag, then config file, then built-in default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use farm_core::{FarmConfig, Registry};
use farm_docker::{ContainerControl, DockerControl};

#[derive(Parser)]
#[command(name = "farmd", about = "Server farm control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane API.
    Serve {
        #[command(flatten)]
        overrides: Overrides,

        /// Log output format.
        #[arg(long, value_enum, default_value = "plain")]
        log_format: LogFormat,
    },
    /// Print the effective configuration and exit.
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Path to farm.toml.
    #[arg(long, env = "FARM_CONFIG")]
    config: Option<PathBuf>,

    /// Address the API listens on.
    #[arg(long)]
    bind: Option<String>,

    /// Number of instances in the farm.
    #[arg(long, env = "NUM_SERVERS")]
    servers: Option<u32>,

    /// Host every instance listens on.
    #[arg(long)]
    host: Option<String>,

    /// Instance `id` listens on `base_port + id`.
    #[arg(long, env = "BASE_PORT")]
    base_port: Option<u16>,

    /// Skip the container runtime entirely.
    #[arg(long)]
    no_docker: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            overrides,
            log_format,
        } => {
            init_tracing(log_format);
            let config = load_config(&overrides)?;
            run_serve(config).await
        }
        Command::Config { overrides } => {
            let config = load_config(&overrides)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,farmd=debug,farm_api=debug,farm_health=debug".into());
    match format {
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Layer CLI flags over the config file over defaults.
fn load_config(overrides: &Overrides) -> anyhow::Result<FarmConfig> {
    let mut config = match &overrides.config {
        Some(path) => FarmConfig::from_file(path)?,
        None => FarmConfig::default(),
    };
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut FarmConfig, overrides: &Overrides) {
    if let Some(bind) = &overrides.bind {
        config.server.bind = bind.clone();
    }
    if let Some(count) = overrides.servers {
        config.registry.count = count;
    }
    if let Some(host) = &overrides.host {
        config.registry.host = host.clone();
    }
    if let Some(base_port) = overrides.base_port {
        config.registry.base_port = base_port;
    }
    if overrides.no_docker {
        config.docker.enabled = false;
    }
}

async fn connect_containers(config: &FarmConfig) -> Option<Arc<dyn ContainerControl>> {
    if !config.docker.enabled {
        info!("container runtime disabled");
        return None;
    }
    match DockerControl::connect(&config.docker.socket, Duration::from_secs(3)).await {
        Ok(docker) => {
            info!("container runtime connected");
            Some(Arc::new(docker))
        }
        Err(e) => {
            warn!(error = %e, "container runtime unavailable, continuing without it");
            None
        }
    }
}

async fn run_serve(config: FarmConfig) -> anyhow::Result<()> {
    info!("farm control plane starting");

    // ── Initialize subsystems ──────────────────────────────────

    let registry = Registry::from_config(&config.registry)?;
    info!(
        servers = registry.len(),
        host = %registry.host(),
        port_range = ?registry.port_range(),
        "registry built"
    );

    let timeouts = config.timeouts.resolve()?;
    let containers = connect_containers(&config).await;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start API server ───────────────────────────────────────

    let state = farm_api::ApiState::new(
        registry,
        timeouts,
        &config.load_test,
        containers,
        shutdown_rx,
    );
    let router = farm_api::build_router(state);
    let addr: SocketAddr = config.server.bind.parse()?;

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C; running load tests see the flag and stop.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    info!("farm control plane stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[registry]\ncount = 10\nbase_port = 7000\n\n[docker]\nenabled = true"
        )
        .unwrap();

        let overrides = Overrides {
            config: Some(file.path().to_path_buf()),
            servers: Some(4),
            no_docker: true,
            ..Overrides::default()
        };
        let config = load_config(&overrides).unwrap();
        assert_eq!(config.registry.count, 4);
        assert_eq!(config.registry.base_port, 7000);
        assert!(!config.docker.enabled);
    }

    #[test]
    fn defaults_without_file() {
        let config = load_config(&Overrides::default()).unwrap();
        assert_eq!(config, FarmConfig::default());
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "farmd",
            "serve",
            "--servers",
            "3",
            "--base-port",
            "9000",
            "--log-format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Command::Serve {
                overrides,
                log_format,
            } => {
                assert_eq!(overrides.servers, Some(3));
                assert_eq!(overrides.base_port, Some(9000));
                assert!(matches!(log_format, LogFormat::Json));
            }
            Command::Config { .. } => panic!("expected serve"),
        }
    }
}
