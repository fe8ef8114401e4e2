//! Process configuration read from the environment.
//!
//! `main` loads a `.env` file first (if present), so every setting can come
//! from either place. Unset values fall back to defaults; values that are
//! set but do not parse are reported instead of being ignored.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::record::MalformedDatePolicy;
use crate::retry::RetryConfig;
use crate::sheets::SheetsAuth;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RANGE: &str = "FMSCA_records (2)!A:Z";
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 100;
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    /// Mount point of every API route.
    pub api_prefix: String,
    /// Postgres connection string; `None` keeps records in memory.
    pub database_url: Option<String>,
    pub spreadsheet_id: String,
    pub sheet_range: String,
    pub sheets_api_base: String,
    pub sheets_auth: Option<SheetsAuth>,
    pub sheets_timeout: Duration,
    pub sync_timeout: Duration,
    pub retry: RetryConfig,
    /// Fields identifying a record across syncs; empty means append-only.
    pub upsert_key: Vec<String>,
    /// Filterable fields; empty allows any field.
    pub queryable_fields: Vec<String>,
    pub max_page_size: u64,
    pub malformed_dates: MalformedDatePolicy,
    pub cors_permissive: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            api_prefix: "/api".to_string(),
            database_url: None,
            spreadsheet_id: String::new(),
            sheet_range: DEFAULT_RANGE.to_string(),
            sheets_api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            sheets_auth: None,
            sheets_timeout: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
            upsert_key: Vec::new(),
            queryable_fields: Vec::new(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            malformed_dates: MalformedDatePolicy::Null,
            cors_permissive: true,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated list; entries are trimmed and empty entries dropped.
fn parse_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_num<T: std::str::FromStr>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>> {
    match non_empty(vars, name) {
        Some(v) => v.parse::<T>().map(Some).map_err(|_| anyhow!("{} must be a number, got '{}'", name, v)),
        None => Ok(None),
    }
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Read configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let mut cfg = ServiceConfig::default();
        if let Some(p) = parse_num::<u16>(vars, "PORT")? { cfg.port = p; }
        if let Some(prefix) = non_empty(vars, "API_PREFIX") {
            let trimmed = prefix.trim_end_matches('/');
            cfg.api_prefix = if trimmed.starts_with('/') || trimmed.is_empty() { trimmed.to_string() } else { format!("/{}", trimmed) };
        }
        cfg.database_url = non_empty(vars, "DATABASE_URL");
        if let Some(id) = non_empty(vars, "SPREADSHEET_ID") { cfg.spreadsheet_id = id; }
        if let Some(r) = non_empty(vars, "SHEET_RANGE") { cfg.sheet_range = r; }
        if let Some(b) = non_empty(vars, "SHEETS_API_BASE") { cfg.sheets_api_base = b; }
        // Token wins over key when both are present
        cfg.sheets_auth = match (non_empty(vars, "SHEETS_ACCESS_TOKEN"), non_empty(vars, "SHEETS_API_KEY")) {
            (Some(token), _) => Some(SheetsAuth::Bearer(token)),
            (None, Some(key)) => Some(SheetsAuth::ApiKey(key)),
            (None, None) => None,
        };
        if let Some(s) = parse_num::<u64>(vars, "SHEETS_TIMEOUT_SECS")? { cfg.sheets_timeout = Duration::from_secs(s.max(1)); }
        if let Some(s) = parse_num::<u64>(vars, "SYNC_TIMEOUT_SECS")? { cfg.sync_timeout = Duration::from_secs(s.max(1)); }
        if let Some(n) = parse_num::<usize>(vars, "RETRY_ATTEMPTS")? { cfg.retry = RetryConfig::with_attempts(n); }
        if let Some(k) = non_empty(vars, "UPSERT_KEY") { cfg.upsert_key = parse_list(&k); }
        if let Some(q) = non_empty(vars, "QUERYABLE_FIELDS") { cfg.queryable_fields = parse_list(&q); }
        if let Some(m) = parse_num::<u64>(vars, "MAX_PAGE_SIZE")? { cfg.max_page_size = m.max(1); }
        if let Some(p) = non_empty(vars, "MALFORMED_DATES") {
            cfg.malformed_dates = p.parse().map_err(|e: String| anyhow!("MALFORMED_DATES: {}", e))?;
        }
        if let Some(c) = non_empty(vars, "CORS_PERMISSIVE") {
            cfg.cors_permissive = parse_bool(&c).ok_or_else(|| anyhow!("CORS_PERMISSIVE must be a boolean, got '{}'", c))?;
        }
        Ok(cfg)
    }

    /// One-line summary for the startup log, without secrets.
    pub fn summary(&self) -> String {
        format!(
            "port={}, api_prefix='{}', store={}, spreadsheet_id='{}', range='{}', sheets_auth={}, upsert_key={:?}, queryable_fields={:?}, max_page_size={}, malformed_dates={:?}, cors_permissive={}",
            self.port,
            self.api_prefix,
            if self.database_url.is_some() { "postgres" } else { "memory" },
            self.spreadsheet_id,
            self.sheet_range,
            match &self.sheets_auth { Some(SheetsAuth::Bearer(_)) => "bearer", Some(SheetsAuth::ApiKey(_)) => "api_key", None => "none" },
            self.upsert_key,
            self.queryable_fields,
            self.max_page_size,
            self.malformed_dates,
            self.cors_permissive,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = ServiceConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.api_prefix, "/api");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.sheet_range, "FMSCA_records (2)!A:Z");
        assert!(cfg.upsert_key.is_empty());
        assert!(cfg.cors_permissive);
        assert_eq!(cfg.malformed_dates, MalformedDatePolicy::Null);
    }

    #[test]
    fn reads_every_setting() {
        let cfg = ServiceConfig::from_vars(&vars(&[
            ("PORT", "8080"),
            ("API_PREFIX", "v1/"),
            ("DATABASE_URL", "postgres://localhost/carriers"),
            ("SPREADSHEET_ID", "abc"),
            ("SHEET_RANGE", "Sheet1!A:C"),
            ("SHEETS_API_KEY", "key"),
            ("RETRY_ATTEMPTS", "5"),
            ("UPSERT_KEY", "dot_number, mc_number,"),
            ("QUERYABLE_FIELDS", "state,legal_name"),
            ("MAX_PAGE_SIZE", "50"),
            ("MALFORMED_DATES", "reject"),
            ("CORS_PERMISSIVE", "off"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.api_prefix, "/v1");
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/carriers"));
        assert!(matches!(cfg.sheets_auth, Some(SheetsAuth::ApiKey(_))));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.upsert_key, vec!["dot_number", "mc_number"]);
        assert_eq!(cfg.queryable_fields, vec!["state", "legal_name"]);
        assert_eq!(cfg.max_page_size, 50);
        assert_eq!(cfg.malformed_dates, MalformedDatePolicy::Reject);
        assert!(!cfg.cors_permissive);
    }

    #[test]
    fn access_token_takes_precedence() {
        let cfg = ServiceConfig::from_vars(&vars(&[("SHEETS_API_KEY", "key-secret"), ("SHEETS_ACCESS_TOKEN", "tok-secret")])).unwrap();
        assert!(matches!(cfg.sheets_auth, Some(SheetsAuth::Bearer(_))));
        let summary = cfg.summary();
        assert!(summary.contains("sheets_auth=bearer"));
        assert!(!summary.contains("secret"));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(ServiceConfig::from_vars(&vars(&[("PORT", "eighty")])).is_err());
        assert!(ServiceConfig::from_vars(&vars(&[("MALFORMED_DATES", "ignore")])).is_err());
        assert!(ServiceConfig::from_vars(&vars(&[("CORS_PERMISSIVE", "maybe")])).is_err());
    }
}
