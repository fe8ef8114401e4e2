//! Filtered, paginated reads over the record store.
//!
//! Client parameters arrive as raw strings; `PageRequest::from_params`
//! validates them once so the engine only ever sees a well-formed request.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::config::{DEFAULT_LIMIT, DEFAULT_PAGE};
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::record::CarrierRecord;
use crate::storage::{FilterSet, SharedRecordStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
    pub filters: FilterSet,
}

/// Limits a request is validated against.
#[derive(Debug, Clone)]
pub struct QueryRules {
    pub max_page_size: u64,
    /// Empty allows any field.
    pub queryable_fields: Vec<String>,
}

fn parse_positive(name: &str, raw: Option<&str>, default: u64) -> AppResult<u64> {
    let Some(raw) = raw.map(str::trim) else { return Ok(default) };
    if raw.is_empty() { return Ok(default); }
    match raw.parse::<u64>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(AppError::bad_request(format!("invalid_{}", name), format!("{} must be an integer >= 1, got '{}'", name, raw))),
    }
}

/// Decode the JSON-encoded filter object. Scalar values are matched as text;
/// nulls, arrays and nested objects are refused.
fn parse_filters(raw: Option<&str>, rules: &QueryRules) -> AppResult<FilterSet> {
    let mut filters = FilterSet::new();
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else { return Ok(filters) };
    let parsed: JsonValue = serde_json::from_str(raw)
        .map_err(|e| AppError::bad_request("invalid_filters".to_string(), format!("filters must be a JSON object: {}", e)))?;
    let JsonValue::Object(map) = parsed else {
        return Err(AppError::bad_request("invalid_filters", "filters must be a JSON object"));
    };
    for (field, value) in map {
        if !rules.queryable_fields.is_empty() && !rules.queryable_fields.iter().any(|f| f == &field) {
            return Err(AppError::bad_request("filter_not_allowed".to_string(), format!("field '{}' is not filterable", field)));
        }
        let pattern = match value {
            JsonValue::String(s) => s,
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            _ => return Err(AppError::bad_request("invalid_filters".to_string(), format!("filter for '{}' must be a string", field))),
        };
        filters.insert(field, pattern);
    }
    Ok(filters)
}

impl PageRequest {
    /// Validate raw `page`, `limit` and `filters` parameters. Missing values
    /// take the defaults (page 1, limit 100); `limit` above the maximum page
    /// size is clamped.
    pub fn from_params(page: Option<&str>, limit: Option<&str>, filters: Option<&str>, rules: &QueryRules) -> AppResult<Self> {
        let page = parse_positive("page", page, DEFAULT_PAGE)?;
        let limit = parse_positive("limit", limit, DEFAULT_LIMIT)?.min(rules.max_page_size.max(1));
        let filters = parse_filters(filters, rules)?;
        Ok(Self { page, limit, filters })
    }

    pub fn new(page: u64, limit: u64, filters: FilterSet) -> Self { Self { page: page.max(1), limit: limit.max(1), filters } }

    pub fn skip(&self) -> u64 { (self.page - 1).saturating_mul(self.limit) }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub data: Vec<CarrierRecord>,
    /// All matching records, not just this page.
    pub total: u64,
}

pub struct QueryEngine {
    store: SharedRecordStore,
    rules: QueryRules,
}

impl QueryEngine {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            store: ctx.store.clone(),
            rules: QueryRules { max_page_size: ctx.config.max_page_size, queryable_fields: ctx.config.queryable_fields.clone() },
        }
    }

    pub fn rules(&self) -> &QueryRules { &self.rules }

    pub async fn list(&self, req: &PageRequest) -> AppResult<Page> {
        let data = self.store.find(&req.filters, req.skip(), req.limit).await?;
        let total = self.store.count(&req.filters).await?;
        debug!(target: "query", page = req.page, limit = req.limit, filters = req.filters.len(), returned = data.len(), total, "list");
        Ok(Page { data, total })
    }

    /// Look up one record. A malformed id cannot name a record, so it is
    /// reported as not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<CarrierRecord> {
        let not_found = || AppError::not_found("carrier_not_found", "Carrier not found");
        let Ok(uuid) = Uuid::parse_str(id.trim()) else { return Err(not_found()) };
        self.store.find_by_id(uuid).await?.ok_or_else(not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> QueryRules { QueryRules { max_page_size: 1000, queryable_fields: Vec::new() } }

    #[test]
    fn defaults_apply_when_params_are_missing() {
        let req = PageRequest::from_params(None, None, None, &rules()).unwrap();
        assert_eq!((req.page, req.limit), (1, 100));
        assert!(req.filters.is_empty());
        assert_eq!(req.skip(), 0);
    }

    #[test]
    fn skip_is_page_minus_one_times_limit() {
        let req = PageRequest::from_params(Some("3"), Some("10"), Some("{}"), &rules()).unwrap();
        assert_eq!(req.skip(), 20);
    }

    #[test]
    fn invalid_pagination_is_bad_request() {
        for (page, limit) in [(Some("0"), None), (Some("-1"), None), (Some("abc"), None), (None, Some("0")), (None, Some("1.5"))] {
            let err = PageRequest::from_params(page, limit, None, &rules()).unwrap_err();
            assert_eq!(err.http_status(), 400, "page={:?} limit={:?}", page, limit);
        }
    }

    #[test]
    fn limit_is_clamped_to_max_page_size() {
        let r = QueryRules { max_page_size: 50, queryable_fields: Vec::new() };
        assert_eq!(PageRequest::from_params(None, Some("500"), None, &r).unwrap().limit, 50);
    }

    #[test]
    fn filters_accept_scalars_only() {
        let req = PageRequest::from_params(None, None, Some(r#"{"state":"CA","dot_number":123,"active":true}"#), &rules()).unwrap();
        let pairs: Vec<(String, String)> = req.filters.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(pairs, vec![
            ("active".to_string(), "true".to_string()),
            ("dot_number".to_string(), "123".to_string()),
            ("state".to_string(), "CA".to_string()),
        ]);
        for bad in [r#"{"state":null}"#, r#"{"state":["CA"]}"#, r#"["state"]"#, "{not json", r#""CA""#] {
            let err = PageRequest::from_params(None, None, Some(bad), &rules()).unwrap_err();
            assert_eq!(err.http_status(), 400, "filters {}", bad);
        }
    }

    #[test]
    fn allow_list_limits_filter_fields() {
        let r = QueryRules { max_page_size: 100, queryable_fields: vec!["state".into()] };
        assert!(PageRequest::from_params(None, None, Some(r#"{"state":"CA"}"#), &r).is_ok());
        let err = PageRequest::from_params(None, None, Some(r#"{"password":"x"}"#), &r).unwrap_err();
        assert_eq!(err.code_str(), "filter_not_allowed");
    }
}
