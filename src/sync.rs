//!
//! sheetsync sync engine
//! ---------------------
//! One sync pass reads the configured sheet range, turns every data row into
//! a record and persists it. Rows are independent: a row that fails to
//! transform or persist is reported in the pass summary and the pass moves on.
//! Only a failure to read the sheet fails the whole pass.
//!
//! Persistence is append-only unless an upsert key is configured, in which
//! case a row replaces the existing record with the same key values.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::record::{MalformedDatePolicy, RecordFields};
use crate::retry::{retry_if, RetryConfig};
use crate::sheets::{IngestError, SharedSheetSource, SheetRows};
use crate::storage::{SharedRecordStore, StoreError, Upserted};
use crate::transform::row_to_fields;

/// A problem tied to one sheet row. `row` is the 1-based sheet row number,
/// so the first data row is row 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Data rows seen, header excluded.
    pub rows_read: usize,
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<RowIssue>,
    /// Rows persisted with a date stored as null.
    pub warnings: Vec<RowIssue>,
}

impl SyncReport {
    pub fn failed(&self) -> usize { self.failures.len() }
    pub fn is_clean(&self) -> bool { self.failures.is_empty() }
}

pub struct SyncEngine {
    source: SharedSheetSource,
    store: SharedRecordStore,
    upsert_key: Vec<String>,
    policy: MalformedDatePolicy,
    retry: RetryConfig,
    timeout: Duration,
}

impl SyncEngine {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            source: ctx.source.clone(),
            store: ctx.store.clone(),
            upsert_key: ctx.config.upsert_key.clone(),
            policy: ctx.config.malformed_dates,
            retry: ctx.config.retry.clone(),
            timeout: ctx.config.sync_timeout,
        }
    }

    /// Read the sheet, retrying transient failures.
    pub async fn fetch_raw(&self) -> AppResult<SheetRows> {
        let rows = retry_if("fetch_sheet", &self.retry, || self.source.fetch_rows(), IngestError::is_transient).await?;
        Ok(rows)
    }

    /// Run one pass bounded by the configured timeout. Dropping the returned
    /// future cancels the pass; records written before that stay written.
    pub async fn sync(&self) -> AppResult<SyncReport> {
        match tokio::time::timeout(self.timeout, self.run_pass()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(target: "sync", "sync pass exceeded {:?}", self.timeout);
                Err(AppError::ingestion("sync_timeout".to_string(), format!("sync pass exceeded {:?}", self.timeout)))
            }
        }
    }

    async fn run_pass(&self) -> AppResult<SyncReport> {
        info!(target: "sync", source = %self.source.describe(), "sync pass started");
        let rows = self.fetch_raw().await?;
        let mut report = SyncReport::default();
        if rows.len() < 2 {
            info!(target: "sync", rows = rows.len(), "no data rows; nothing to sync");
            return Ok(report);
        }
        let Some((headers, data)) = rows.split_first() else { return Ok(report) };
        report.rows_read = data.len();

        for (offset, row) in data.iter().enumerate() {
            let sheet_row = offset + 2;
            let transformed = match row_to_fields(headers, row, self.policy) {
                Ok(t) => t,
                Err(e) => {
                    warn!(target: "sync", row = sheet_row, "row skipped: {}", e);
                    report.failures.push(RowIssue { row: sheet_row, reason: e.to_string() });
                    continue;
                }
            };
            for w in &transformed.warnings {
                report.warnings.push(RowIssue { row: sheet_row, reason: w.to_string() });
            }
            match self.persist(transformed.fields).await {
                Ok(Upserted::Created(_)) => report.created += 1,
                Ok(Upserted::Updated(_)) => report.updated += 1,
                Err(e) => {
                    warn!(target: "sync", row = sheet_row, "row not persisted: {}", e);
                    report.failures.push(RowIssue { row: sheet_row, reason: e.to_string() });
                }
            }
        }

        info!(
            target: "sync",
            rows = report.rows_read,
            created = report.created,
            updated = report.updated,
            failed = report.failed(),
            warnings = report.warnings.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    async fn persist(&self, fields: RecordFields) -> Result<Upserted, StoreError> {
        if self.upsert_key.is_empty() {
            let rec = retry_if("create_record", &self.retry, || self.store.create(fields.clone()), StoreError::is_transient).await?;
            return Ok(Upserted::Created(rec));
        }
        retry_if("upsert_record", &self.retry, || self.store.upsert(&self.upsert_key, fields.clone()), StoreError::is_transient).await
    }
}
