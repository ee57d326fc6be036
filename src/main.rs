//! extmod: external module host
//!
//! Minimal entry point: loads configuration, prepares the database and runs
//! one cron poll against the compiled-in modules.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use extmod_core::config::AppConfig;
use extmod_core::error::AppError;
use extmod_core::traits::{AdminNotifier, SettingsRepository};
use extmod_database::DatabasePool;
use extmod_plugin::{ModuleHost, StaticModuleLoader, TracingNotifier};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Module host failed");
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment.
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("EXTMOD_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting extmod v{}", env!("CARGO_PKG_VERSION"));

    // ── Database connection + migrations ─────────────────────────
    let pool = DatabasePool::connect(&config.database).await?;
    extmod_database::migration::run_migrations(pool.pool()).await?;

    let notifier: Arc<dyn AdminNotifier> = Arc::new(TracingNotifier);
    let repository: Arc<dyn SettingsRepository> =
        Arc::new(pool.settings_repository(notifier.clone()));
    if !repository.health_check().await? {
        return Err(AppError::database("Settings store health check failed"));
    }

    // ── Module host ──────────────────────────────────────────────
    let loader = Arc::new(StaticModuleLoader::new());
    let host = ModuleHost::new(
        config.settings.clone(),
        config.hooks.clone(),
        repository,
        loader,
        notifier,
    );

    let installed = host.registry().view().await?.installed().len();
    tracing::info!(installed, "Module registry loaded");

    // ── One externally driven cron poll ──────────────────────────
    let outcome = host.poll_cron().await?;
    tracing::info!(
        hook = %outcome.hook,
        responders = outcome.responders.len(),
        "Cron hook dispatched"
    );

    pool.close().await;
    Ok(())
}
