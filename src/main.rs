use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use module_store::api::{self, ApiState};
use module_store::catalog;
use module_store::config::ServerConfig;
use module_store::license::LicenseService;
use module_store::store::LicenseStore;

const DEFAULT_LOG_FILTER: &str = "module_store=info,warp=warn";

fn parse_config_path() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            return Some(PathBuf::from(&args[i + 1]));
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config_path = parse_config_path();
    let config =
        ServerConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    if config.api_tokens.is_empty() {
        warn!("No API tokens configured; every /api/modules request will be rejected");
    }

    let store = LicenseStore::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open license database at {}",
            config.database_path.display()
        )
    })?;
    let store = Arc::new(store);

    if config.seed_catalog {
        catalog::seed_catalog(&store).context("Failed to seed module catalog")?;
    }

    let registry = config.registry().context("Failed to load module registry")?;
    info!(
        modules = registry.all().len(),
        "Loaded module registry"
    );

    let state = ApiState {
        service: Arc::new(LicenseService::new(
            store,
            catalog::static_fallback_modules(),
        )),
        registry: Arc::new(registry),
        tokens: Arc::new(config.api_tokens.clone()),
    };

    info!(
        bind = %config.bind,
        database = %config.database_path.display(),
        "Module store listening"
    );
    warp::serve(api::routes(state)).run(config.bind).await;

    Ok(())
}
