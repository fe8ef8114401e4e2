use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{key_values, validate_fields, FilterSet, RecordStore, StoreError, Upserted};
use crate::record::{CarrierRecord, RecordFields};

#[derive(Default)]
struct Inner {
    /// Insertion order is the listing order.
    records: Vec<CarrierRecord>,
    /// id -> position in `records`
    index: HashMap<Uuid, usize>,
}

/// Process-local record store. Cloning shares the same records.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.inner.read().records.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Snapshot of every record in insertion order.
    pub fn all(&self) -> Vec<CarrierRecord> { self.inner.read().records.clone() }

    fn push(inner: &mut Inner, fields: RecordFields) -> CarrierRecord {
        let rec = CarrierRecord::new(Uuid::new_v4(), fields);
        inner.index.insert(rec.id, inner.records.len());
        inner.records.push(rec.clone());
        rec
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, fields: RecordFields) -> Result<CarrierRecord, StoreError> {
        validate_fields(&fields)?;
        let mut w = self.inner.write();
        Ok(Self::push(&mut w, fields))
    }

    async fn upsert(&self, key: &[String], fields: RecordFields) -> Result<Upserted, StoreError> {
        validate_fields(&fields)?;
        let mut w = self.inner.write();
        let Some(wanted) = key_values(key, &fields) else {
            return Ok(Upserted::Created(Self::push(&mut w, fields)));
        };
        let existing = w.records.iter().position(|r| key_values(key, &r.fields).as_ref() == Some(&wanted));
        match existing {
            Some(pos) => {
                let rec = &mut w.records[pos];
                rec.fields = fields;
                Ok(Upserted::Updated(rec.clone()))
            }
            None => Ok(Upserted::Created(Self::push(&mut w, fields))),
        }
    }

    async fn find(&self, filter: &FilterSet, skip: u64, limit: u64) -> Result<Vec<CarrierRecord>, StoreError> {
        let m = filter.matcher()?;
        let r = self.inner.read();
        Ok(r.records
            .iter()
            .filter(|rec| m.matches(&rec.fields))
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &FilterSet) -> Result<u64, StoreError> {
        let m = filter.matcher()?;
        let r = self.inner.read();
        Ok(r.records.iter().filter(|rec| m.matches(&rec.fields)).count() as u64)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CarrierRecord>, StoreError> {
        let r = self.inner.read();
        Ok(r.index.get(&id).and_then(|pos| r.records.get(*pos)).cloned())
    }

    fn backend(&self) -> &'static str { "memory" }
}
