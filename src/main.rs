mod app;
mod artwork;
mod client;
mod compositor;
mod config;
mod display;
mod push;
mod socketio;
mod spectrum;
mod state;
mod sync;
mod types;
mod visualizer;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use crate::config::{Cli, Command, Config};

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Everything runs cooperatively on a single thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => {
            let config = Config::new(&cli.server, cli.timeout_ms, args)?;
            log::info!("Starting AirPlay display for {}", config.server_url);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            ctrlc::set_handler(move || {
                if *shutdown_tx.borrow() {
                    log::warn!("Second interrupt, exiting immediately");
                    std::process::exit(130);
                }
                log::info!("Received interrupt signal (Ctrl+C), shutting down...");
                let _ = shutdown_tx.send(true);
            })
            .context("Failed to set Ctrl+C handler")?;

            runtime.block_on(app::run(config, shutdown_rx))
        }
        Command::Visualizer { action } => {
            config::validate_server_url(&cli.server)?;
            let client = client::ServerClient::new(
                &cli.server,
                std::time::Duration::from_millis(cli.timeout_ms.max(1)),
            )?;
            runtime.block_on(app::control_visualizer(&client, action))
        }
    }
}
