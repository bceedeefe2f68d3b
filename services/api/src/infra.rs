use chrono::NaiveDate;
use gridflow::config::AppConfig;
use gridflow::error::AppError;
use gridflow::store::InMemoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Opens the configured snapshot, or an empty store when snapshots are disabled.
pub(crate) fn open_store(config: &AppConfig) -> Result<InMemoryStore, AppError> {
    match &config.data.snapshot_path {
        Some(path) => Ok(InMemoryStore::load(path)?),
        None => Ok(InMemoryStore::new()),
    }
}

pub(crate) fn save_store(config: &AppConfig, store: &InMemoryStore) -> Result<(), AppError> {
    if let Some(path) = &config.data.snapshot_path {
        store.save(path)?;
        tracing::info!(path = %path.display(), "snapshot saved");
    }
    Ok(())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
