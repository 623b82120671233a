//! cask upload server binary.

use anyhow::{Context, Result};
use cask_core::config::{AppConfig, LinkConfig, LinkKeyConfig};
use cask_server::{AppState, create_router};
use cask_signer::{AccountKey, LinkSigner};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// cask - chunked uploads with signed read links
#[derive(Parser, Debug)]
#[command(name = "caskd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CASK_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("cask v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Register Prometheus metrics
    cask_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize storage backend
    let storage = cask_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Verify storage before accepting requests.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let signer = load_link_signer(&config.link).await?;

    if config.staging.enabled {
        tracing::info!(
            dir = %config.staging.dir().display(),
            retain = config.staging.retain,
            "Local staging enabled"
        );
    } else {
        tracing::info!("Local staging disabled, blocks are cut from the request stream");
    }

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    let state = AppState::new(config, storage, signer);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load configuration from an optional TOML file merged with `CASK_`
/// environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!("No config file found at {}, using defaults and environment", path);
    }

    figment
        .merge(Env::prefixed("CASK_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn load_account_key(config: &LinkKeyConfig) -> Result<AccountKey> {
    match config {
        LinkKeyConfig::File { path } => {
            let key_data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read key file: {}", path.display()))?;
            let key = AccountKey::from_base64(&key_data).context("failed to parse account key")?;
            tracing::info!(path = %path.display(), "Loaded account key from file");
            Ok(key)
        }
        LinkKeyConfig::Env { var } => {
            let key_data = std::env::var(var)
                .with_context(|| format!("account key env var not set: {var}"))?;
            let key = AccountKey::from_base64(&key_data).context("failed to parse account key")?;
            tracing::info!(var = %var, "Loaded account key from env");
            Ok(key)
        }
        LinkKeyConfig::Generate => {
            tracing::warn!("Generating ephemeral account key, issued links die with this process");
            Ok(AccountKey::generate())
        }
        LinkKeyConfig::Value { key } => {
            tracing::warn!("Using inline account key (not recommended for production)");
            AccountKey::from_base64(key).context("failed to parse account key")
        }
    }
}

async fn load_link_signer(config: &LinkConfig) -> Result<LinkSigner> {
    let key = load_account_key(&config.key).await?;
    let signer = LinkSigner::new(config.account.clone(), &config.endpoint, key)
        .context("failed to configure link signer")?;
    tracing::info!(
        endpoint = %config.endpoint,
        container = %config.container,
        ttl_secs = config.ttl_secs,
        "Link signer ready"
    );
    Ok(signer)
}
