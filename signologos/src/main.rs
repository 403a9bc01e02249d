mod cli;
mod commands;
mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use signologos_core::{AppStore, CoordinatorConfig, FileStorage};

use cli::{Cli, Command};

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let cli = Cli::parse();
    let mut config = CoordinatorConfig::discover(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.to_string_lossy().to_string();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: CoordinatorConfig) -> Result<()> {
    let storage = FileStorage::new(config.storage.resolve_data_dir());
    info!("Store: {}", storage.path_for(&config.storage.namespace).display());

    let store = AppStore::builder()
        .config(&config)
        .storage(Arc::new(storage))
        .build();

    match command {
        Command::Status => commands::status(&store),
        Command::Settings { action } => commands::settings(&store, action),
        Command::Export { path } => commands::export(&store, path),
        Command::Import { path } => commands::import(&store, &path),
        Command::ClearTraining => commands::clear_training(&store),
        Command::Session { seconds, train } => session::run(store, &config, seconds, train).await,
    }
}
