//! floorsync CLI - queue edits offline and push them to the server of record
//!
//! Local changes are appended to a durable log and sent in batches once the
//! server is reachable.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::commands::common::{load_settings, resolve_config_path, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::config::{run_config_init, run_config_show};
use crate::commands::enqueue::run_enqueue;
use crate::commands::queue::{run_dead_letters, run_pending, run_purge, run_requeue};
use crate::commands::run::run_loop;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() -> Result<(), CliError> {
    let directive = "floorsync=info"
        .parse::<Directive>()
        .map_err(|error| CliError::Logging(format!("{error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Commands::Enqueue {
            change_type,
            model,
            object_id,
            version,
            data,
        } => {
            run_enqueue(
                change_type,
                &model,
                object_id,
                version,
                data.as_deref(),
                &db_path,
            )
            .await?;
        }
        Commands::Pending { json } => run_pending(json, &db_path).await?,
        Commands::Status { json } => {
            let settings = load_settings(&config_path)?;
            run_status(json, &db_path, &settings).await?;
        }
        Commands::Sync { strategy, json } => {
            let settings = load_settings(&config_path)?;
            run_sync(strategy, json, &db_path, &settings).await?;
        }
        Commands::Run => {
            let settings = load_settings(&config_path)?;
            run_loop(&db_path, &settings).await?;
        }
        Commands::DeadLetters { json } => run_dead_letters(json, &db_path).await?,
        Commands::Requeue { id } => run_requeue(&id, &db_path).await?,
        Commands::Purge => run_purge(&db_path).await?,
        Commands::Config { command } => match command {
            ConfigCommands::Init {
                server_url,
                auth_token,
                timeout,
            } => run_config_init(server_url, auth_token, timeout, &config_path)?,
            ConfigCommands::Show { json } => run_config_show(json, &config_path)?,
        },
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
