use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_postgres::types::ToSql;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};
use uuid::Uuid;

use super::{ilike_substring, key_values, validate_fields, FilterSet, RecordStore, StoreError, Upserted};
use crate::record::{CarrierRecord, RecordFields};

const TABLE: &str = "carriers";

/// Records as JSONB documents; `seq` fixes the listing order and `keys`
/// the field order, which JSONB does not keep.
pub struct PostgresStore {
    client: Client,
    /// Serializes key lookup and write of concurrent upserts from this process.
    upsert_lock: Mutex<()>,
}

impl PostgresStore {
    /// Connect once and keep the connection for the life of the process.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(target: "storage", "postgres connection error: {}", e);
            }
        });
        info!(target: "storage", "connected to postgres document store");
        Ok(Self { client, upsert_lock: Mutex::new(()) })
    }

    fn row_to_record(row: &Row) -> Result<CarrierRecord, StoreError> {
        let id: Uuid = row.try_get(0)?;
        let doc: JsonValue = row.try_get(1)?;
        let keys: Vec<String> = row.try_get(2)?;
        Ok(CarrierRecord::new(id, CarrierRecord::fields_from_json_ordered(&doc, &keys)))
    }
}

/// Build `doc->>(key) ILIKE pattern AND ...` with numbered parameters starting
/// at `$1`. Field names travel as parameters, never as SQL text.
fn filter_clause(filter: &FilterSet) -> (String, Vec<String>) {
    if filter.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut preds = Vec::with_capacity(filter.len());
    let mut params = Vec::with_capacity(filter.len() * 2);
    for (field, pattern) in filter.iter() {
        let k = params.len() + 1;
        preds.push(format!("doc->>(${}::text) ILIKE ${}::text", k, k + 1));
        params.push(field.clone());
        params.push(ilike_substring(pattern));
    }
    (format!(" WHERE {}", preds.join(" AND ")), params)
}

/// Equality on every key field, for upsert lookup.
fn key_clause(key: &[String], values: &[String]) -> (String, Vec<String>) {
    let mut preds = Vec::with_capacity(key.len());
    let mut params = Vec::with_capacity(key.len() * 2);
    for (field, value) in key.iter().zip(values) {
        let k = params.len() + 1;
        preds.push(format!("doc->>(${}::text) = ${}::text", k, k + 1));
        params.push(field.clone());
        params.push(value.clone());
    }
    (format!(" WHERE {}", preds.join(" AND ")), params)
}

fn as_params(values: &[String]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|s| s as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (\
                seq BIGSERIAL PRIMARY KEY, \
                id UUID NOT NULL UNIQUE, \
                doc JSONB NOT NULL, \
                keys TEXT[] NOT NULL DEFAULT '{{}}'); \
             ALTER TABLE {TABLE} ADD COLUMN IF NOT EXISTS keys TEXT[] NOT NULL DEFAULT '{{}}'"
        );
        self.client.batch_execute(&ddl).await?;
        Ok(())
    }

    async fn create(&self, fields: RecordFields) -> Result<CarrierRecord, StoreError> {
        validate_fields(&fields)?;
        let id = Uuid::new_v4();
        let doc = CarrierRecord::fields_to_json(&fields);
        let keys = CarrierRecord::field_order(&fields);
        let sql = format!("INSERT INTO {TABLE} (id, doc, keys) VALUES ($1, $2, $3)");
        self.client.execute(&sql, &[&id, &doc, &keys]).await?;
        Ok(CarrierRecord::new(id, fields))
    }

    async fn upsert(&self, key: &[String], fields: RecordFields) -> Result<Upserted, StoreError> {
        validate_fields(&fields)?;
        let Some(values) = key_values(key, &fields) else {
            return Ok(Upserted::Created(self.create(fields).await?));
        };
        let _guard = self.upsert_lock.lock().await;
        let (clause, params) = key_clause(key, &values);
        let sql = format!("SELECT id FROM {TABLE}{clause} ORDER BY seq LIMIT 1");
        let existing = self.client.query_opt(&sql, &as_params(&params)).await?;
        match existing {
            Some(row) => {
                let id: Uuid = row.try_get(0)?;
                let doc = CarrierRecord::fields_to_json(&fields);
                let keys = CarrierRecord::field_order(&fields);
                let sql = format!("UPDATE {TABLE} SET doc = $1, keys = $2 WHERE id = $3");
                self.client.execute(&sql, &[&doc, &keys, &id]).await?;
                Ok(Upserted::Updated(CarrierRecord::new(id, fields)))
            }
            None => Ok(Upserted::Created(self.create(fields).await?)),
        }
    }

    async fn find(&self, filter: &FilterSet, skip: u64, limit: u64) -> Result<Vec<CarrierRecord>, StoreError> {
        let (clause, strings) = filter_clause(filter);
        let n = strings.len();
        let offset = i64::try_from(skip).unwrap_or(i64::MAX);
        let take = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut params = as_params(&strings);
        params.push(&offset);
        params.push(&take);
        let sql = format!("SELECT id, doc, keys FROM {TABLE}{clause} ORDER BY seq OFFSET ${} LIMIT ${}", n + 1, n + 2);
        let rows = self.client.query(&sql, &params).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count(&self, filter: &FilterSet) -> Result<u64, StoreError> {
        let (clause, strings) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM {TABLE}{clause}");
        let row = self.client.query_one(&sql, &as_params(&strings)).await?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CarrierRecord>, StoreError> {
        let sql = format!("SELECT id, doc, keys FROM {TABLE} WHERE id = $1");
        match self.client.query_opt(&sql, &[&id]).await? {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    fn backend(&self) -> &'static str { "postgres" }
}
