use clap::Parser;
use std::path::PathBuf;

use tcp_balancer::config::{load_config, BalancerConfig};
use tcp_balancer::lifecycle::{wait_for_shutdown_signal, Balancer, Shutdown};
use tcp_balancer::observability::{logging, metrics};

/// Connection-level TCP load balancer.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "balancer.toml")]
    config: PathBuf,

    /// Retry other backends when a dial fails, overriding the file.
    #[arg(long)]
    failover: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config: BalancerConfig = load_config(&args.config)?;
    if args.failover {
        config.scheduler.failover = true;
    }

    logging::init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "tcp-balancer starting");

    tracing::info!(
        backends = config.backends.len(),
        listen = ?config.listener.listen,
        failover = config.scheduler.failover,
        health_checks = config.health_check.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let running = Balancer::new(config).start(&shutdown).await?;

    let signal = wait_for_shutdown_signal().await;
    tracing::info!(signal, "Shutdown signal received, draining");
    shutdown.trigger();

    tokio::select! {
        _ = running.wait() => {}
        signal = wait_for_shutdown_signal() => {
            tracing::warn!(signal, "Second signal received, forcing exit");
            std::process::exit(1);
        }
    }

    Ok(())
}
