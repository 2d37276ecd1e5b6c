pub mod api;
pub mod config;
pub mod content_source;
pub mod coordinator;
pub mod errors;
mod metrics_defs;
pub mod reconcile;
pub mod record_store;
pub mod signature;
pub mod types;
mod upstream;

#[cfg(test)]
mod testutils;

pub use metrics_defs::ALL_METRICS;

use api::AppState;
use config::{Config, ValidationError};
use content_source::WebflowContentSource;
use coordinator::SyncCoordinator;
use errors::{SyncError, UpstreamError};
use reconcile::{Reconciler, SyncSettings};
use record_store::AirtableRecordStore;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use signature::SignatureVerifier;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use types::SyncReport;

#[derive(thiserror::Error, Debug)]
pub enum CmsSyncError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),
}

fn build_reconciler(
    config: &Config,
    records: Arc<AirtableRecordStore>,
) -> Result<Reconciler, CmsSyncError> {
    let content = WebflowContentSource::new(&config.content_source)?;
    Ok(Reconciler::new(
        Arc::new(content),
        records,
        SyncSettings::from(&config.sync),
    ))
}

/// The count endpoints and the reconciler share one record-store client.
fn build_state(config: &Config) -> Result<AppState, CmsSyncError> {
    let records = Arc::new(AirtableRecordStore::new(&config.record_store)?);
    let reconciler = build_reconciler(config, records.clone())?;

    Ok(AppState {
        coordinator: Arc::new(SyncCoordinator::new(reconciler, config.sync.debounce())),
        verifier: Arc::new(SignatureVerifier::new(&config.webhook)),
        records,
    })
}

/// Serves the sync and count endpoints on the main listener and health
/// checks on the admin listener.
pub async fn run(config: Config) -> Result<(), CmsSyncError> {
    config.validate()?;

    if config.webhook.secrets.is_empty() && config.webhook.raw_body_secret.is_none() {
        tracing::warn!("No webhook secret configured, signed requests are not verified");
    }

    let state = build_state(&config)?;
    let app = api::router(state);

    let ready = Arc::new(AtomicBool::new(false));
    let admin_ready = ready.clone();
    let admin_service =
        AdminService::<_, CmsSyncError>::new(move || admin_ready.load(Ordering::Relaxed));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        "Listening"
    );
    ready.store(true, Ordering::Relaxed);

    let api_task = async {
        axum::serve(listener, app).await?;
        Ok::<(), CmsSyncError>(())
    };

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

/// Runs one reconciliation without the HTTP surface.
pub async fn sync_once(config: Config) -> Result<Result<SyncReport, SyncError>, CmsSyncError> {
    config.validate()?;
    let records = Arc::new(AirtableRecordStore::new(&config.record_store)?);
    let reconciler = build_reconciler(&config, records)?;
    Ok(reconciler.run().await)
}
