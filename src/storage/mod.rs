//!
//! sheetsync storage module
//! ------------------------
//! Persistence gateway shared by the sync and query engines. `RecordStore` is
//! the abstract document store: create, key-based upsert, filtered find with
//! skip/limit, filtered count, and lookup by id. Two backends implement it:
//!
//! - `MemoryStore`: insertion-ordered records behind a `parking_lot::RwLock`.
//! - `PostgresStore`: one JSONB document per record in a `carriers` table.
//!
//! Both backends list records in insertion order and evaluate filters as
//! case-insensitive literal substring matches ANDed across fields.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use uuid::Uuid;

use crate::record::{CarrierRecord, RecordFields};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("record rejected: {0}")]
    Rejected(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

impl StoreError {
    /// Connection-level failures may succeed on a later attempt; rejected
    /// documents and bad filters never will.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Backend(_) => true,
            StoreError::Postgres(e) => {
                if e.is_closed() { return true; }
                match e.code() {
                    Some(state) => {
                        let c = state.code();
                        c.starts_with("08") || c == "40001" || c == "40P01" || c == "57P01"
                    }
                    None => false,
                }
            }
            StoreError::Rejected(_) | StoreError::InvalidFilter(_) => false,
        }
    }
}

/// Field name -> pattern constraints, ANDed. Patterns are literal text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    criteria: BTreeMap<String, String>,
}

impl FilterSet {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.insert(field, pattern);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, pattern: impl Into<String>) {
        self.criteria.insert(field.into(), pattern.into());
    }

    pub fn is_empty(&self) -> bool { self.criteria.is_empty() }
    pub fn len(&self) -> usize { self.criteria.len() }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> { self.criteria.iter() }

    /// Compile the criteria into case-insensitive literal matchers.
    pub fn matcher(&self) -> Result<FilterMatcher, StoreError> {
        let mut parts = Vec::with_capacity(self.criteria.len());
        for (field, pattern) in &self.criteria {
            let re = RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
                .map_err(|e| StoreError::InvalidFilter(format!("{}: {}", field, e)))?;
            parts.push((field.clone(), re));
        }
        Ok(FilterMatcher { parts })
    }
}

/// Compiled form of a `FilterSet`.
pub struct FilterMatcher {
    parts: Vec<(String, Regex)>,
}

impl FilterMatcher {
    /// A record matches when every filtered field is present, non-null, and
    /// contains its pattern. An empty filter matches everything.
    pub fn matches(&self, fields: &RecordFields) -> bool {
        self.parts.iter().all(|(field, re)| {
            fields
                .get(field)
                .and_then(|v| v.as_match_text())
                .map(|text| re.is_match(&text))
                .unwrap_or(false)
        })
    }
}

/// `ILIKE` pattern for a literal substring: escape `\`, `%` and `_`, wrap in `%`.
pub fn ilike_substring(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('%');
    for c in pattern.chars() {
        if matches!(c, '\\' | '%' | '_') { out.push('\\'); }
        out.push(c);
    }
    out.push('%');
    out
}

/// Values of the upsert key fields, or None when any is missing, null or
/// blank. Rows without a full key are never merged with each other.
pub fn key_values(key: &[String], fields: &RecordFields) -> Option<Vec<String>> {
    if key.is_empty() { return None; }
    key.iter()
        .map(|k| fields.get(k).and_then(|v| v.as_match_text()).filter(|s| !s.trim().is_empty()))
        .collect()
}

/// Keys a document store would refuse or that collide with the record id.
pub fn validate_fields(fields: &RecordFields) -> Result<(), StoreError> {
    for key in fields.keys() {
        if key == "_id" {
            return Err(StoreError::Rejected("field '_id' collides with the record identifier".into()));
        }
        if key.starts_with('$') {
            return Err(StoreError::Rejected(format!("field '{}' may not start with '$'", key)));
        }
    }
    Ok(())
}

/// Outcome of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted {
    Created(CarrierRecord),
    Updated(CarrierRecord),
}

impl Upserted {
    pub fn record(&self) -> &CarrierRecord {
        match self {
            Upserted::Created(r) | Upserted::Updated(r) => r,
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Prepare backend structures (tables, indexes). Idempotent.
    async fn ensure_schema(&self) -> Result<(), StoreError> { Ok(()) }

    /// Persist a new record and assign its id.
    async fn create(&self, fields: RecordFields) -> Result<CarrierRecord, StoreError>;

    /// Replace the first record whose `key` fields equal those of `fields`,
    /// or create a new one when none matches or a key value is absent.
    async fn upsert(&self, key: &[String], fields: RecordFields) -> Result<Upserted, StoreError>;

    /// Matching records in insertion order, after skipping `skip`, at most `limit`.
    async fn find(&self, filter: &FilterSet, skip: u64, limit: u64) -> Result<Vec<CarrierRecord>, StoreError>;

    /// Total matching records, independent of pagination.
    async fn count(&self, filter: &FilterSet) -> Result<u64, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CarrierRecord>, StoreError>;

    fn backend(&self) -> &'static str;
}

pub type SharedRecordStore = Arc<dyn RecordStore>;
