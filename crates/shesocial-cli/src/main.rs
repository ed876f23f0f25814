//! SheSocial CLI - inspect and edit the offline store from a terminal
//!
//! Every write lands in the local database first and is queued; `shesocial
//! sync` uploads the queue and pulls server changes.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::filter::Directive;

use crate::cli::{Cli, Commands, PermissionCommands, SyncCommands};
use crate::commands::common::{resolve_db_path, SyncOverrides};
use crate::commands::documents::{
    run_add, run_bookings, run_delete, run_events, run_get, run_list, run_search, run_update,
};
use crate::commands::permissions::{run_atoms, run_check, run_roles, run_validate};
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_sync_pull, run_sync_push};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_directive("shesocial_cli=info")?)
                .add_directive(log_directive("shesocial_core=warn")?),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;
    let overrides = SyncOverrides {
        api_url: cli.api_url,
        token: cli.token,
        refresh_token: cli.refresh_token,
    };

    match cli.command {
        Commands::Add {
            collection,
            fields,
            priority,
        } => run_add(collection, &fields, priority.into(), &db_path).await?,
        Commands::Update {
            collection,
            id,
            fields,
            priority,
        } => run_update(collection, &id, &fields, priority.into(), &db_path).await?,
        Commands::Delete {
            collection,
            id,
            priority,
        } => run_delete(collection, &id, priority.into(), &db_path).await?,
        Commands::Get { collection, id } => run_get(collection, &id, &db_path).await?,
        Commands::List {
            collection,
            limit,
            json,
        } => run_list(collection, limit, json, &db_path).await?,
        Commands::Search {
            query,
            searcher,
            limit,
            json,
        } => run_search(&query, &searcher, limit, json, &db_path).await?,
        Commands::Events { from, to, json } => run_events(&from, &to, json, &db_path).await?,
        Commands::Bookings { user_id, json } => run_bookings(&user_id, json, &db_path).await?,
        Commands::Sync { command } => match command {
            None => run_sync(&overrides, &db_path).await?,
            Some(SyncCommands::Push) => run_sync_push(&overrides, &db_path).await?,
            Some(SyncCommands::Pull { collection }) => {
                run_sync_pull(collection, &overrides, &db_path).await?;
            }
        },
        Commands::Status { probe, json } => run_status(probe, json, &overrides, &db_path).await?,
        Commands::Queue {
            failed,
            limit,
            json,
        } => run_queue(failed, limit, json, &db_path).await?,
        Commands::Permissions { command } => match command {
            PermissionCommands::Atoms { json } => run_atoms(json)?,
            PermissionCommands::Roles { json } => run_roles(json)?,
            PermissionCommands::Validate { atoms } => run_validate(&atoms)?,
            PermissionCommands::Check {
                atom,
                role,
                level,
                custom,
            } => run_check(&atom, &role, level.into(), &custom)?,
        },
    }

    Ok(())
}

fn log_directive(raw: &str) -> Result<Directive, CliError> {
    raw.parse()
        .map_err(|error| CliError::Config(format!("invalid log directive `{raw}`: {error}")))
}
