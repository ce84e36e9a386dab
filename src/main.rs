//! Stand web server
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───▶ tower layers (request ID, trace)
//!     ───▶ pipeline:
//!            static files → CORS → security headers → request log
//!            → rate limit → JSON body → operator-key filter → markup escape
//!            → compression → dispatcher (root view | mounts) → not found
//!     ◀─── terminal error handler renders any failure as JSON
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use stand_server::config::resolve_config;
use stand_server::http::HttpServer;
use stand_server::lifecycle::{signals, Shutdown};
use stand_server::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "stand-server")]
#[command(about = "JSON API server with a hardened request pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "STAND_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;

    logging::init(&config.observability.log_level);

    if cli.check {
        tracing::info!("Configuration is valid");
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.server.bind_address,
        environment = ?config.server.environment,
        mounts = config.mounts.len(),
        "stand-server starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
