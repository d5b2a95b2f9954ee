//! doorlink CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use doorlink_client::audio::f32_samples;
use doorlink_client::cli::{Cli, Command, ConfigAction};
use doorlink_client::commands;
use doorlink_client::config::ClientConfig;
use doorlink_client::error::ClientResult;
use doorlink_core::tracing::{TracingConfig, init_tracing};
use doorlink_core::JsonFileStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::cli()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let source = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(url) = cli.url {
        config.device.url = url;
    }
    if let Some(token) = cli.token {
        config.device.token = Some(token);
    }
    config.debug |= cli.debug;

    let timeout = Duration::from_secs(cli.timeout.max(1));
    let compact = cli.compact;

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &source),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config, &source),
        },
        Command::History {
            kind,
            limit,
            delete,
        } => {
            let store = JsonFileStore::open(config.history_path(), config.history.max_records)?;
            match delete {
                Some(id) => commands::history::delete(&store, kind, id),
                None => commands::history::list(&store, kind, limit, compact),
            }
        }
        Command::Watch { events } => {
            let url = config.endpoint()?;
            let store =
                commands::history::open_for_session(&config.history_path(), config.history.max_records);
            commands::device::watch(&config, &url, &events, store, compact).await
        }
        Command::Query { target, limit } => {
            let session = commands::device::open(&config, &config.endpoint()?).await?;
            let result = commands::device::query(&session, &target, limit, timeout, compact).await;
            session.disconnect();
            result
        }
        Command::Password => {
            let session = commands::device::open(&config, &config.endpoint()?).await?;
            let result = commands::device::password(&session, timeout).await;
            session.disconnect();
            result
        }
        Command::Speak { file } => {
            let samples = f32_samples(&std::fs::read(&file)?);
            let session = commands::device::open(&config, &config.endpoint()?).await?;
            let result = commands::device::speak(&session, &config.audio, &samples)
                .await
                .map(|_| ());
            session.disconnect();
            result
        }
        Command::User {
            category,
            command,
            user_id,
            payload,
        } => {
            let session = commands::device::open(&config, &config.endpoint()?).await?;
            let result = commands::device::user(
                &session, category, command, user_id, payload, timeout, compact,
            )
            .await;
            session.disconnect();
            result
        }
    }
}
