//! Spreadsheet ingestion.
//!
//! `SheetSource` is the boundary the sync engine reads rows through.
//! `SheetsClient` talks to the Google Sheets v4 `values.get` endpoint;
//! `StaticSheet` serves fixed rows from memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

/// Rows as returned by the source; the first row is the header.
pub type SheetRows = Vec<Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("spreadsheet source is not configured: {0}")]
    NotConfigured(String),
    #[error("sheets authentication failed (HTTP {status}): {body}")]
    Auth { status: u16, body: String },
    #[error("invalid sheet or range (HTTP {status}): {body}")]
    InvalidRange { status: u16, body: String },
    #[error("sheets API error (HTTP {status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("sheets request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected sheets response: {0}")]
    Decode(String),
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::NotConfigured(_) => "sheets_not_configured",
            IngestError::Auth { .. } => "sheets_auth",
            IngestError::InvalidRange { .. } => "sheets_range",
            IngestError::Upstream { .. } => "sheets_upstream",
            IngestError::Transport(_) => "sheets_transport",
            IngestError::Decode(_) => "sheets_decode",
        }
    }

    /// Network failures, throttling and server-side errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Transport(_) => true,
            IngestError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        let code = status.as_u16();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => IngestError::Auth { status: code, body },
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => IngestError::InvalidRange { status: code, body },
            _ => IngestError::Upstream { status: code, body },
        }
    }
}

#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Fetch the configured range. An empty range yields no rows.
    async fn fetch_rows(&self) -> Result<SheetRows, IngestError>;

    /// Human-readable source description for logs.
    fn describe(&self) -> String;
}

pub type SharedSheetSource = Arc<dyn SheetSource>;

/// How requests authenticate against the Sheets API.
#[derive(Clone)]
pub enum SheetsAuth {
    /// OAuth 2 access token sent as a bearer header.
    Bearer(String),
    /// API key appended as `key=`; only works for publicly readable sheets.
    ApiKey(String),
}

impl std::fmt::Debug for SheetsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetsAuth::Bearer(_) => write!(f, "Bearer(<redacted>)"),
            SheetsAuth::ApiKey(_) => write!(f, "ApiKey(<redacted>)"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

/// Render one cell as text. The API returns formatted strings by default, but
/// unformatted numbers and booleans are accepted too.
fn cell_text(v: JsonValue) -> String {
    match v {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Clone)]
pub struct SheetsClient {
    base: Url,
    client: reqwest::Client,
    spreadsheet_id: String,
    range: String,
    auth: Option<SheetsAuth>,
}

impl SheetsClient {
    pub fn new(api_base: &str, spreadsheet_id: &str, range: &str, auth: Option<SheetsAuth>, timeout: Duration) -> Result<Self, IngestError> {
        let base = Url::parse(api_base).map_err(|e| IngestError::NotConfigured(format!("invalid sheets API base '{}': {}", api_base, e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client, spreadsheet_id: spreadsheet_id.to_string(), range: range.to_string(), auth })
    }

    fn values_url(&self) -> Result<Url, IngestError> {
        let path = format!(
            "/v4/spreadsheets/{}/values/{}",
            urlencoding::encode(&self.spreadsheet_id),
            urlencoding::encode(&self.range)
        );
        let mut url = self.base.join(&path).map_err(|e| IngestError::NotConfigured(e.to_string()))?;
        url.query_pairs_mut().append_pair("majorDimension", "ROWS");
        if let Some(SheetsAuth::ApiKey(key)) = &self.auth {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }
}

#[async_trait]
impl SheetSource for SheetsClient {
    async fn fetch_rows(&self) -> Result<SheetRows, IngestError> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(IngestError::NotConfigured("SPREADSHEET_ID is empty".into()));
        }
        let mut req = self.client.get(self.values_url()?);
        if let Some(SheetsAuth::Bearer(token)) = &self.auth {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::from_status(status, body));
        }
        let bytes = resp.bytes().await?;
        let range: ValueRange = serde_json::from_slice(&bytes).map_err(|e| IngestError::Decode(e.to_string()))?;
        let rows: SheetRows = range.values.into_iter().map(|row| row.into_iter().map(cell_text).collect()).collect();
        debug!(target: "sheets", rows = rows.len(), range = %self.range, "fetched sheet values");
        Ok(rows)
    }

    fn describe(&self) -> String {
        format!("sheets:{}!{}", self.spreadsheet_id, self.range)
    }
}

/// In-memory rows; swap with `replace` to simulate an edited sheet.
#[derive(Clone, Default)]
pub struct StaticSheet {
    rows: Arc<parking_lot::RwLock<SheetRows>>,
}

impl StaticSheet {
    pub fn new(rows: SheetRows) -> Self { Self { rows: Arc::new(parking_lot::RwLock::new(rows)) } }

    /// Convenience for literal tables in tests and seeds.
    pub fn from_strs(rows: &[&[&str]]) -> Self {
        Self::new(rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect())
    }

    pub fn replace(&self, rows: SheetRows) { *self.rows.write() = rows; }
}

#[async_trait]
impl SheetSource for StaticSheet {
    async fn fetch_rows(&self) -> Result<SheetRows, IngestError> { Ok(self.rows.read().clone()) }

    fn describe(&self) -> String { "static".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(auth: Option<SheetsAuth>) -> SheetsClient {
        SheetsClient::new("https://sheets.example.test", "sheet-123", "FMSCA_records (2)!A:Z", auth, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn values_url_encodes_range_and_key() {
        let url = client(Some(SheetsAuth::ApiKey("k1".into()))).values_url().unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://sheets.example.test/v4/spreadsheets/sheet-123/values/FMSCA_records%20%282%29%21A%3AZ"), "{}", s);
        assert!(s.contains("majorDimension=ROWS"));
        assert!(s.contains("key=k1"));
    }

    #[test]
    fn bearer_auth_is_not_put_in_query() {
        let url = client(Some(SheetsAuth::Bearer("secret".into()))).values_url().unwrap();
        assert!(!url.as_str().contains("secret"));
        assert_eq!(format!("{:?}", SheetsAuth::Bearer("secret".into())), "Bearer(<redacted>)");
    }

    #[test]
    fn status_classification() {
        assert!(matches!(IngestError::from_status(StatusCode::FORBIDDEN, String::new()), IngestError::Auth { status: 403, .. }));
        assert!(matches!(IngestError::from_status(StatusCode::NOT_FOUND, String::new()), IngestError::InvalidRange { .. }));
        let throttled = IngestError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(throttled.is_transient());
        assert!(IngestError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!IngestError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_transient());
    }

    #[test]
    fn cells_render_as_text() {
        assert_eq!(cell_text(JsonValue::String("a".into())), "a");
        assert_eq!(cell_text(serde_json::json!(12)), "12");
        assert_eq!(cell_text(serde_json::json!(true)), "true");
        assert_eq!(cell_text(JsonValue::Null), "");
    }

    #[tokio::test]
    async fn empty_spreadsheet_id_is_not_configured() {
        let c = SheetsClient::new("https://sheets.example.test", " ", "A:Z", None, Duration::from_secs(1)).unwrap();
        let err = c.fetch_rows().await.unwrap_err();
        assert_eq!(err.code(), "sheets_not_configured");
    }

    #[tokio::test]
    async fn static_sheet_serves_and_replaces_rows() {
        let sheet = StaticSheet::from_strs(&[&["Name"], &["a"]]);
        assert_eq!(sheet.fetch_rows().await.unwrap().len(), 2);
        sheet.replace(vec![]);
        assert!(sheet.fetch_rows().await.unwrap().is_empty());
    }
}
