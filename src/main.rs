use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use chatrelay::app::{init_logging, AppConfig, AppState};
use chatrelay::cli::{Cli, Commands, ConfigCommand};
use chatrelay::models::{ChatMessage, ProviderSlot, ResponseRouter};
use chatrelay::platform::AppPaths;
use chatrelay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli {
        command,
        config: config_path,
        debug,
        json_logs,
    } = Cli::parse();
    let command = command.unwrap_or_default();

    let paths = AppPaths::new()?;

    if let Commands::Config {
        action: ConfigCommand::Init { force },
    } = command
    {
        return init_config(&paths, config_path, force).await;
    }

    let mut config = AppConfig::load(&paths, config_path.as_deref())
        .context("failed to load configuration")?;
    if json_logs {
        config.logging.json = true;
    }
    let _log_guard = init_logging(&config.logging, &paths.logs_dir(), debug)?;

    match command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
                config.validate()?;
            }
            info!("Starting ChatRelay {}", env!("CARGO_PKG_VERSION"));

            paths.ensure_dirs_exist()?;
            let addr = config.bind_address()?;
            let state = Arc::new(AppState::new(config, &paths).await?);
            server::serve(state, addr).await?;
        }
        Commands::Check => check_providers(&config).await?,
        Commands::Ask { text } => {
            let router = ResponseRouter::from_config(&config.providers, &config.health)?;
            let reply = router
                .get_response(&[ChatMessage::user(text.join(" "))])
                .await?;
            eprintln!("[{} via {} slot, {} attempt(s)]", reply.provider, reply.slot, reply.attempts);
            println!("{}", reply.content);
        }
        Commands::Config {
            action: ConfigCommand::Show,
        } => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Config {
            action: ConfigCommand::Init { force },
        } => init_config(&paths, config_path, force).await?,
    }

    Ok(())
}

async fn init_config(paths: &AppPaths, path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(|| paths.config_file());
    if path.exists() && !force {
        bail!(
            "configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    AppConfig::default().save(&path).await?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn check_providers(config: &AppConfig) -> anyhow::Result<()> {
    let router = ResponseRouter::from_config(&config.providers, &config.health)?;
    let health = router.health();

    let (primary, secondary) = tokio::join!(
        health.refresh(ProviderSlot::Primary),
        health.refresh(ProviderSlot::Secondary)
    );

    for snapshot in router.health_snapshot() {
        let status = match (&snapshot.healthy, &snapshot.last_error) {
            (true, _) => "healthy".to_string(),
            (false, Some(error)) => format!("unhealthy: {}", error),
            (false, None) => "unhealthy".to_string(),
        };
        println!("{:<10} {:<12} {}", snapshot.slot, snapshot.provider, status);
    }

    if !primary && !secondary {
        bail!("no provider is healthy");
    }
    Ok(())
}
