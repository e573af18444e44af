use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use openplan::http_config::HttpConfig;
use openplan::persistence::{Backend, ChangeFeed, RestPersistence, SqliteStore};
use openplan::utils::logging::init_logging;
use openplan::{validate_config, LogNotifier, PlannerSession, SyncConfig, SyncEntity};

async fn build_backend(config: &SyncConfig) -> Result<(Backend, openplan::RetryPolicies)> {
    match &config.rest_url {
        Some(rest_url) => {
            let http = HttpConfig::default();
            let mut rest = RestPersistence::new(rest_url, config.api_key.clone().unwrap_or_default(), &http)
                .context("Failed to create REST client")?;
            if let Some(token) = &config.access_token {
                rest = rest.with_access_token(token.clone());
            }
            warn!("No push channel for the REST backend; other sessions' changes appear on the next load");
            Ok((
                Backend::new(Arc::new(rest), Arc::new(ChangeFeed::new())),
                http.to_retry_policies(),
            ))
        }
        None => {
            if let Some(parent) = config.database_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let store = SqliteStore::open(&config.database_path).await?;
            Ok((Backend::local(Arc::new(store)), Default::default()))
        }
    }
}

fn log_snapshots<E: SyncEntity>(mut state: watch::Receiver<Vec<E>>) {
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let count = state.borrow_and_update().len();
            info!("[{}] {} entries", E::TABLE, count);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("Starting OpenPlan sync engine");

    let config = SyncConfig::load().context("Failed to load configuration")?;
    validate_config(&config)?;

    let (backend, policies) = build_backend(&config).await?;
    let mut session = PlannerSession::new(backend, policies, Arc::new(LogNotifier));

    let engines = match session.sign_in(&config.owner_id).await {
        Ok(engines) => engines,
        Err(e) => {
            error!("Failed to start sync for {}: {}", config.owner_id, e);
            return Err(e.into());
        }
    };
    log_snapshots(engines.schedule.subscribe_state());
    log_snapshots(engines.pool.subscribe_state());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    session.sign_out();
    Ok(())
}
