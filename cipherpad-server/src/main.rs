//! Cipherpad Sync Server
//!
//! A self-hostable backend for E2E encrypted note sync. The server stores
//! only opaque ciphertexts and key-derivation parameters -- it never
//! possesses encryption keys or plaintext notes.

mod auth;
mod config;
mod error;
mod handlers;
mod server;

use cipherpad_core::models::SigningKey;
use cipherpad_core::Db;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cipherpad-server", about = "Cipherpad encrypted note sync server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "cipherpad.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Run in debug mode (permits the built-in development signing key)
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::ServerConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        config::ServerConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.database_path = database;
    }
    if cli.debug {
        cfg.debug = true;
    }

    let signing_key = SigningKey::from_env();
    if signing_key.is_development_fallback() && !cfg.debug {
        anyhow::bail!(
            "SECRET_KEY_BASE is unset or still the development default; \
             set it, or pass --debug for local development"
        );
    }

    tracing::info!("Starting Cipherpad server on {}", cfg.listen_addr);

    let db = Db::open(&cfg.database_path)?;
    let state = server::AppState::new(db, signing_key, &cfg);
    let app = server::build_router(state, &cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
