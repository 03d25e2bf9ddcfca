use std::path::Path;

use anyhow::{Context, Result};
use parley_bus::CommandBus;
use parley_services::{load_bus_config_file, BusConfig, StdioTransportConfig, TransportConfig};

use crate::cli_args::{Cli, CliCommand};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Validate => validate_config(&cli.config),
        CliCommand::Run { user } => run_bus(&cli.config, user).await,
    }
}

fn validate_config(path: &Path) -> Result<()> {
    let config = load_bus_config_file(path)?;
    println!("bus config validation passed: {}", config.summary());
    Ok(())
}

/// Points every stdio transport at `user`, adding one when none is configured.
pub(crate) fn prepare_stdio_transports(config: &mut BusConfig, user: Option<&str>) {
    if config.transports.is_empty() {
        config.transports.push(TransportConfig::Stdio(StdioTransportConfig {
            id: "stdio".to_string(),
            user: "local".to_string(),
            channel: "console".to_string(),
            grants: Vec::new(),
        }));
    }
    if let Some(user) = user {
        for transport in &mut config.transports {
            let TransportConfig::Stdio(stdio) = transport;
            stdio.user = user.to_string();
        }
    }
}

async fn run_bus(path: &Path, user: Option<String>) -> Result<()> {
    let mut config = load_bus_config_file(path)?;
    prepare_stdio_transports(&mut config, user.as_deref());

    let mut bus = CommandBus::start(config.settings(), &config.storage, &config)
        .await
        .with_context(|| format!("failed to start bus from {}", path.display()))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for interrupt")?;
    bus.stop().await;

    let metrics = bus.metrics();
    tracing::info!(
        received = metrics.received,
        handled = metrics.handled,
        dispatched = metrics.dispatched,
        failed = metrics.failed,
        panicked = metrics.panicked,
        "bus stopped"
    );
    Ok(())
}
