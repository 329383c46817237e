use std::sync::Arc;

use clap::Parser;
use journal_core::{
    CognitoVerifier, CompletionBackend, DisabledVerifier, JournalConfig, OpenAiClient,
    TokenVerifier,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use journal_server::http::{self, HttpState};
use journal_server::subsystems::summary_store;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "journal.toml")]
    config: String,

    /// Check the summary store and exit
    #[arg(long)]
    health: bool,
}

fn build_verifier(config: &JournalConfig) -> Arc<dyn TokenVerifier> {
    if config.auth.user_pool_id.is_empty() {
        tracing::warn!("No user pool configured: every session is anonymous");
        return Arc::new(DisabledVerifier);
    }
    match CognitoVerifier::new(&config.auth) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            tracing::warn!("Token verification disabled: {}", e);
            Arc::new(DisabledVerifier)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience - production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match JournalConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Summary store (connects + bootstraps the table for postgres)
    let store = match summary_store::create_store_from_config(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open summary store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.health().await {
            Ok(v) => println!("✅ Summary store ({}) connected: {}", store.name(), v),
            Err(e) => {
                println!("❌ Summary store ({}) check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Journal health check passed");
        return Ok(());
    }

    let completion: Arc<dyn CompletionBackend> =
        match OpenAiClient::new(config.completion.clone()) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("Failed to create completion client: {}", e);
                std::process::exit(1);
            }
        };
    let verifier = build_verifier(&config);

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState::new(config, store, completion, verifier));
    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
