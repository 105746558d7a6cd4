use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use authgate::{Authenticator, Config, config, protect};
use axum::{Json, Router, routing::get};

#[derive(Parser)]
#[command(name = "authgate")]
#[command(about = "OAuth2 client-credentials authentication gate")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a demo API behind the authentication gate
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Application name used to derive the audience identifier
        #[arg(long, env = "AUTHGATE_APP", default_value = "authgate-demo")]
        app: String,
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Perform a one-shot client-credentials exchange and report the outcome
    Token {
        /// Application name used to derive the audience identifier
        #[arg(long, env = "AUTHGATE_APP", default_value = "authgate-demo")]
        app: String,
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("authgate=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, app, config } => serve(port, &app, config).await,
        Commands::Token { app, config } => token(&app, config).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(p) => p,
        None => config::resolve_config_path()?,
    };
    config::load(&path)
}

async fn serve(port: u16, app: &str, config_path: Option<PathBuf>) -> Result<()> {
    let conf = load_config(config_path)?;
    let gate = Arc::new(Authenticator::new(app, conf)?);

    let protected = Router::new().route("/whoami", get(whoami));
    let router = Router::new()
        .route("/health", get(health))
        .merge(protect(protected, gate));

    let addr = format!("0.0.0.0:{}", port);
    info!("authentication gate listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn token(app: &str, config_path: Option<PathBuf>) -> Result<()> {
    let conf = load_config(config_path)?;
    let gate = Authenticator::new(app, conf)?;

    // The token itself is deliberately not printed.
    match gate.get_token().await {
        Ok(token) if token.is_empty() => {
            println!("exchange succeeded but the provider returned an empty token");
        }
        Ok(_) => println!("token exchange succeeded"),
        Err(e) => println!("token exchange failed: {}", e),
    }

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn whoami() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "authenticated": true }))
}
