#![forbid(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use goros::broker::{Broker, MemoryBroker};
use goros::config::{Args, Config};
use goros::metrics::{start_metrics_server, HealthState};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("load configuration")?;
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {e}");
    }

    init_logging(&config.log).context("initialize logging")?;

    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());

    let health_state = HealthState::new();
    if let Some(metrics_addr) = args.metrics_addr {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!(error = %e, "metrics server error");
            }
        });
    }
    health_state.set_ready(true);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
        }
        shutdown_tx.send_replace(true);
    });

    goros::run(config, broker, shutdown_rx)
        .await
        .context("router error")?;

    Ok(())
}

fn init_logging(log: &goros::config::LogSection) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (log.format.as_str(), log.file.is_empty()) {
        ("json", true) => builder.json().init(),
        ("json", false) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log.file)?;
            builder
                .json()
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        (_, true) => builder.init(),
        (_, false) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log.file)?;
            builder
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
    }
    Ok(())
}
