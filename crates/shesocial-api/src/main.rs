mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;
mod store;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use shesocial_core::clock::SystemClock;

use auth::JwtAuthority;
use config::AppConfig;
use routes::{app_router, AppState};

#[derive(Parser)]
#[command(name = "shesocial-api")]
#[command(about = "SheSocial sync API")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API (default)
    Serve,
    /// Print an access/refresh token pair for a member or admin id
    IssueToken {
        /// Subject of the tokens
        subject: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shesocial_api=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(AppConfig::from_env()?);

    if let Some(Command::IssueToken { subject }) = args.command {
        let pair = JwtAuthority::new(config).issue_pair(&subject)?;
        println!("{}", serde_json::to_string_pretty(&pair)?);
        return Ok(());
    }

    tracing::info!("Starting shesocial-api with config: {:?}", config);
    let state = AppState::initialize(config, Arc::new(SystemClock)).await?;
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("shesocial-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
