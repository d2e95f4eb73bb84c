use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::Config;
use git::GitPublisher;

mod cli;
mod config;
mod deploy;
mod error;
mod git;
mod publish;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", if cli.verbose { "debug" } else { "info" });
    }
    env_logger::init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("DEPLOY_CONFIG").ok().map(PathBuf::from));

    let mut config = match config_path {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    cli.apply(&mut config)?;

    if config.repo.is_empty() {
        config.repo = git::discover_remote_url(Path::new("."), &config.remote)
            .context("Failed to determine the repository URL")?;
        log::info!("Using {} from remote {}", config.repo, config.remote);
    }

    let publisher = Arc::new(GitPublisher::from_config(&config));
    let result = deploy::deploy(&config, publisher, deploy::report_completion).await;

    Ok(match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}
