mod agent;
mod command;
mod config;
mod connection;
mod console;
mod service;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use agent::BoardAgent;
use command::ShellExecutor;
use config::{Cli, JsonFileConfig, Mode, Settings};
use connection::ReconnectSupervisor;
use transport::TcpConnector;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match &cli.mode {
        Some(Mode::Autostart { script }) => {
            let exe = std::env::current_exe().context("locating the agent binary")?;
            let command = format!("{} --config {} run &", exe.display(), cli.config.display());
            if service::autostart(script, &command)? {
                info!("Autostart added to {}", script.display());
            } else {
                info!("Autostart already present in {}", script.display());
            }
            return Ok(());
        }
        Some(Mode::DisableAutostart { script }) => {
            if service::disable_autostart(script)? {
                info!("Autostart removed from {}", script.display());
            } else {
                info!("No autostart block in {}", script.display());
            }
            return Ok(());
        }
        Some(Mode::Run) | None => {}
    }

    let provider = Arc::new(
        JsonFileConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    );
    let settings = Settings::resolve(&cli, provider.as_ref())?;

    info!(
        "Board agent starting: {}",
        settings.name.as_deref().unwrap_or("<unnamed>")
    );
    info!("  store: {}:{}", settings.host, settings.port);
    info!("  config: {}", provider.path().display());

    let connector = TcpConnector::new(&settings.host, settings.port, settings.connect_timeout);
    let executor = ShellExecutor::new().with_timeout(settings.command_timeout);
    let mut supervisor = ReconnectSupervisor::from_settings(&settings);
    let mut agent = BoardAgent::new(
        settings,
        Arc::new(connector),
        Arc::new(executor),
        provider,
    );

    let err = supervisor.run(&mut agent).await;
    error!("{}", err);
    Err(err.into())
}
