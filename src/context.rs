//! Explicit wiring of the long-lived collaborators: store handle, sheet
//! source and configuration. Engines are built from a context instead of
//! reaching for process-wide singletons.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::info;

use crate::config::ServiceConfig;
use crate::sheets::{SharedSheetSource, SheetsClient};
use crate::storage::{MemoryStore, PostgresStore, RecordStore, SharedRecordStore};

#[derive(Clone)]
pub struct AppContext {
    pub store: SharedRecordStore,
    pub source: SharedSheetSource,
    pub config: Arc<ServiceConfig>,
}

impl AppContext {
    pub fn new(store: SharedRecordStore, source: SharedSheetSource, config: ServiceConfig) -> Self {
        Self { store, source, config: Arc::new(config) }
    }

    /// Connect the configured store (Postgres when `DATABASE_URL` is set,
    /// memory otherwise), prepare its schema, and build the Sheets client.
    pub async fn from_config(config: ServiceConfig) -> Result<Self> {
        let store: SharedRecordStore = match &config.database_url {
            Some(url) => {
                let pg = PostgresStore::connect(url).await.context("While connecting to the Postgres document store")?;
                Arc::new(pg)
            }
            None => {
                info!(target: "startup", "DATABASE_URL not set; records are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        store.ensure_schema().await.with_context(|| format!("While preparing the {} store schema", store.backend()))?;

        let client = SheetsClient::new(
            &config.sheets_api_base,
            &config.spreadsheet_id,
            &config.sheet_range,
            config.sheets_auth.clone(),
            config.sheets_timeout,
        )
        .context("While building the Sheets client")?;
        if config.spreadsheet_id.is_empty() {
            tracing::warn!(target: "startup", "SPREADSHEET_ID not set; sync requests will fail until it is configured");
        }
        Ok(Self::new(store, Arc::new(client), config))
    }
}
