#[macro_use]
extern crate prettytable;

use std::process::ExitCode;

use anyhow::Result;
use atrope_core::cache::CacheManager;
use atrope_core::config::{self, Settings};
use atrope_core::dispatch::catalog::{CatalogDispatcher, InMemoryCatalogClient};
use atrope_core::dispatch::{Dispatcher, DispatcherManager, NoopDispatcher};
use atrope_core::ListManager;
use clap::Parser;
use directories::ProjectDirs;
use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::new(level_filter))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("atrope: {e}");
            ExitCode::FAILURE
        }
    }
}

fn default_dirs() -> ProjectDirs {
    ProjectDirs::from("org", "atrope", "atrope").expect("a valid home directory is required")
}

fn load_settings(settings_path: &std::path::Path) -> Settings {
    match config::read_settings_file(settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %settings_path.display(), error = %e, "no settings file, using defaults");
            Settings::default_paths()
        }
    }
}

/// Builds the configured dispatcher chain. Unknown dispatcher names are
/// logged and skipped rather than failing the whole run.
fn build_dispatcher_manager(settings: &Settings) -> DispatcherManager {
    let mut dispatchers: Vec<Box<dyn Dispatcher>> = Vec::new();
    for name in &settings.dispatchers {
        match name.as_str() {
            "noop" => dispatchers.push(Box::new(NoopDispatcher)),
            "catalog" => {
                let vo_mapping = match &settings.vo_mapping_path {
                    Some(path) => config::read_vo_mapping(path).unwrap_or_else(|e| {
                        warn!(path = %path.display(), error = %e, "cannot read VO mapping, using none");
                        Default::default()
                    }),
                    None => Default::default(),
                };
                dispatchers.push(Box::new(CatalogDispatcher::new(
                    InMemoryCatalogClient::new(),
                    vo_mapping,
                )));
            }
            other => warn!(dispatcher = other, "unknown dispatcher, skipping"),
        }
    }
    DispatcherManager::new(dispatchers, settings.global_prefix.clone())
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Version = cli.command {
        commands::version();
        return Ok(());
    }

    let dirs = default_dirs();
    let settings_path = cli
        .settings_path
        .unwrap_or_else(|| dirs.config_dir().join("settings.yaml"));
    let settings = load_settings(&settings_path);

    let sources_path = cli
        .sources_path
        .unwrap_or_else(|| dirs.config_dir().join("lists.yaml"));
    let ca_dir = cli.ca_dir.unwrap_or_else(|| settings.ca_dir.clone());
    let cache_dir = cli.cache_dir.unwrap_or_else(|| settings.cache_dir.clone());

    let mut manager = ListManager::load(&sources_path, &ca_dir)?;

    match cli.command {
        Commands::Index => commands::index(&manager).await,
        Commands::Verify { list, contents } => commands::verify(&mut manager, list, contents).await,
        Commands::Cache => {
            let cache_manager = CacheManager::new(cache_dir)?;
            commands::cache(&mut manager, &cache_manager).await
        }
        Commands::Sync => {
            let cache_manager = CacheManager::new(cache_dir)?;
            let dispatcher_manager = build_dispatcher_manager(&settings);
            commands::sync(&mut manager, &cache_manager, &dispatcher_manager).await
        }
        Commands::Add {
            name,
            url,
            endorser_dn,
            endorser_ca,
            token,
            force,
        } => commands::add(&mut manager, name, url, endorser_dn, endorser_ca, token, force),
        Commands::Version => unreachable!("handled above"),
    }
}
