//!
//! sheetsync record model
//! ----------------------
//! A carrier record is a semi-structured document: an ordered map from a
//! normalized header name to a scalar value. The field set is not fixed at
//! compile time; it is whatever the sheet's header row held when the record
//! was synced.
//!
//! Header labels become field keys through `normalize`. Three designated
//! temporal fields are coerced into UTC date-times; every other cell is kept
//! verbatim as text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Fields that receive date-time coercion.
pub const TEMPORAL_FIELDS: [&str; 3] = ["created_dt", "modified_dt", "out_of_service_date"];

/// Naive layouts tried after RFC 3339. Naive values are read as UTC.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Header-ordered field map of one record.
pub type RecordFields = IndexMap<String, FieldValue>;

/// Lower-case the header and replace each space with an underscore.
pub fn normalize(header: &str) -> String {
    header.to_lowercase().replace(' ', "_")
}

pub fn is_temporal(key: &str) -> bool { TEMPORAL_FIELDS.contains(&key) }

/// What to do with a temporal cell that does not parse as a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedDatePolicy {
    /// Persist the field as null and keep the row.
    #[default]
    Null,
    /// Fail the row.
    Reject,
}

impl std::str::FromStr for MalformedDatePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(MalformedDatePolicy::Null),
            "reject" => Ok(MalformedDatePolicy::Reject),
            other => Err(format!("unknown malformed date policy '{}', expected null or reject", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field '{field}' has unparseable date '{raw}'")]
pub struct CoerceError {
    pub field: String,
    pub raw: String,
}

/// A single stored scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    DateTime(DateTime<Utc>),
    Null,
}

impl FieldValue {
    /// Text a filter pattern is matched against. Dates use the same RFC 3339
    /// rendering as their JSON form so every backend agrees.
    pub fn as_match_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::DateTime(dt) => Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            FieldValue::Null => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self.as_match_text() {
            Some(s) => JsonValue::String(s),
            None => JsonValue::Null,
        }
    }

    /// Rebuild a value from its stored JSON form; temporal keys parse back into dates.
    pub fn from_stored(key: &str, value: &JsonValue) -> FieldValue {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::String(s) if is_temporal(key) => match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => FieldValue::DateTime(dt.with_timezone(&Utc)),
                Err(_) => FieldValue::Text(s.clone()),
            },
            JsonValue::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self { FieldValue::Text(s.to_string()) }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_match_text() {
            Some(s) => serializer.serialize_str(&s),
            None => serializer.serialize_none(),
        }
    }
}

/// Parse a date-time cell. Returns None when no accepted layout matches.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
        }
    }
    None
}

/// Coerce one raw cell for the given field key.
///
/// Non-temporal fields pass through as text. Temporal fields become a date,
/// `Null` when empty, and follow `policy` when the text does not parse.
pub fn coerce(key: &str, raw: &str, policy: MalformedDatePolicy) -> Result<FieldValue, CoerceError> {
    if !is_temporal(key) {
        return Ok(FieldValue::Text(raw.to_string()));
    }
    if raw.trim().is_empty() {
        return Ok(FieldValue::Null);
    }
    match parse_datetime(raw) {
        Some(dt) => Ok(FieldValue::DateTime(dt)),
        None => match policy {
            MalformedDatePolicy::Null => Ok(FieldValue::Null),
            MalformedDatePolicy::Reject => Err(CoerceError { field: key.to_string(), raw: raw.to_string() }),
        },
    }
}

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarrierRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(flatten)]
    pub fields: RecordFields,
}

impl CarrierRecord {
    pub fn new(id: Uuid, fields: RecordFields) -> Self { Self { id, fields } }

    pub fn get(&self, key: &str) -> Option<&FieldValue> { self.fields.get(key) }

    /// Field map as a JSON object, the shape document backends store.
    pub fn fields_to_json(fields: &RecordFields) -> JsonValue {
        let map: serde_json::Map<String, JsonValue> = fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        JsonValue::Object(map)
    }

    /// Inverse of `fields_to_json`; non-object documents yield an empty map.
    pub fn fields_from_json(doc: &JsonValue) -> RecordFields {
        match doc {
            JsonValue::Object(map) => map.iter().map(|(k, v)| (k.clone(), FieldValue::from_stored(k, v))).collect(),
            _ => RecordFields::new(),
        }
    }

    /// Field keys in header order, kept next to documents whose storage
    /// does not preserve key order (JSONB).
    pub fn field_order(fields: &RecordFields) -> Vec<String> { fields.keys().cloned().collect() }

    /// Rebuild fields from a document, laid out in `order`. Keys missing from
    /// `order` follow in document order.
    pub fn fields_from_json_ordered(doc: &JsonValue, order: &[String]) -> RecordFields {
        let mut fields = Self::fields_from_json(doc);
        let mut ordered = RecordFields::with_capacity(fields.len());
        for key in order {
            if let Some(v) = fields.shift_remove(key) {
                ordered.insert(key.clone(), v);
            }
        }
        ordered.extend(fields);
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_lowercases_and_underscores() {
        assert_eq!(normalize("Legal Name"), "legal_name");
        assert_eq!(normalize("DOT  Number"), "dot__number");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("already_normal"), "already_normal");
    }

    #[test]
    fn normalize_is_idempotent() {
        for h in ["Created DT", "Out Of Service Date", " Phone ", "ÉTAT Code", "a\tb c"] {
            let once = normalize(h);
            assert_eq!(normalize(&once), once, "header {:?}", h);
        }
    }

    #[test]
    fn temporal_set_is_fixed() {
        assert!(is_temporal("created_dt"));
        assert!(is_temporal("modified_dt"));
        assert!(is_temporal("out_of_service_date"));
        assert!(!is_temporal("legal_name"));
        assert!(!is_temporal("Created_DT"));
    }

    #[test]
    fn coerce_passes_text_through() {
        let v = coerce("legal_name", "ACME TRUCKING", MalformedDatePolicy::Null).unwrap();
        assert_eq!(v, FieldValue::Text("ACME TRUCKING".into()));
        // Empty non-temporal cells stay empty strings
        assert_eq!(coerce("phone", "", MalformedDatePolicy::Null).unwrap(), FieldValue::Text(String::new()));
    }

    #[test]
    fn coerce_parses_supported_date_layouts() {
        let expected = Utc.with_ymd_and_hms(2023, 4, 5, 13, 30, 0).unwrap();
        for raw in [
            "2023-04-05T13:30:00Z",
            "2023-04-05T15:30:00+02:00",
            "2023-04-05 13:30:00",
            "2023-04-05T13:30:00",
            "04/05/2023 13:30:00",
            "04/05/2023 13:30",
        ] {
            assert_eq!(coerce("created_dt", raw, MalformedDatePolicy::Reject).unwrap(), FieldValue::DateTime(expected), "raw {:?}", raw);
        }
        let midnight = Utc.with_ymd_and_hms(2021, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(coerce("out_of_service_date", "12/31/2021", MalformedDatePolicy::Reject).unwrap(), FieldValue::DateTime(midnight));
        assert_eq!(coerce("modified_dt", "2021-12-31", MalformedDatePolicy::Reject).unwrap(), FieldValue::DateTime(midnight));
    }

    #[test]
    fn date_round_trips_through_json_form() {
        let v = coerce("modified_dt", "2020-01-02T03:04:05Z", MalformedDatePolicy::Null).unwrap();
        let json = v.to_json();
        assert_eq!(json, JsonValue::String("2020-01-02T03:04:05Z".into()));
        assert_eq!(FieldValue::from_stored("modified_dt", &json), v);
    }

    #[test]
    fn empty_temporal_cell_is_null() {
        assert_eq!(coerce("created_dt", "", MalformedDatePolicy::Reject).unwrap(), FieldValue::Null);
        assert_eq!(coerce("created_dt", "   ", MalformedDatePolicy::Reject).unwrap(), FieldValue::Null);
    }

    #[test]
    fn malformed_date_follows_policy() {
        assert_eq!(coerce("created_dt", "not a date", MalformedDatePolicy::Null).unwrap(), FieldValue::Null);
        let err = coerce("created_dt", "13/45/2020", MalformedDatePolicy::Reject).unwrap_err();
        assert_eq!(err.field, "created_dt");
        assert_eq!(err.raw, "13/45/2020");
    }

    #[test]
    fn policy_parses_from_config_text() {
        assert_eq!("NULL".parse::<MalformedDatePolicy>().unwrap(), MalformedDatePolicy::Null);
        assert_eq!(" reject ".parse::<MalformedDatePolicy>().unwrap(), MalformedDatePolicy::Reject);
        assert!("drop".parse::<MalformedDatePolicy>().is_err());
    }

    #[test]
    fn record_serializes_flat_with_id() {
        let id = Uuid::nil();
        let mut fields = RecordFields::new();
        fields.insert("legal_name".into(), "ACME".into());
        fields.insert("created_dt".into(), FieldValue::DateTime(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()));
        fields.insert("out_of_service_date".into(), FieldValue::Null);
        let json = serde_json::to_value(CarrierRecord::new(id, fields)).unwrap();
        assert_eq!(json["_id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["legal_name"], "ACME");
        assert_eq!(json["created_dt"], "2022-01-01T00:00:00Z");
        assert!(json["out_of_service_date"].is_null());
    }

    #[test]
    fn stored_documents_restore_typed_fields() {
        let doc = serde_json::json!({"state": "CA", "created_dt": "2022-01-01T00:00:00Z", "note": "2022-01-01T00:00:00Z", "count": 3});
        let fields = CarrierRecord::fields_from_json(&doc);
        assert!(matches!(fields.get("created_dt"), Some(FieldValue::DateTime(_))));
        assert_eq!(fields.get("note"), Some(&FieldValue::Text("2022-01-01T00:00:00Z".into())));
        assert_eq!(fields.get("count"), Some(&FieldValue::Text("3".into())));
        assert_eq!(CarrierRecord::fields_to_json(&fields)["state"], "CA");
    }

    fn keys(fields: &RecordFields) -> Vec<&str> { fields.keys().map(String::as_str).collect() }

    #[test]
    fn json_form_keeps_header_order() {
        let mut fields = RecordFields::new();
        fields.insert("legal_name".into(), "ACME".into());
        fields.insert("dot_number".into(), "42".into());
        fields.insert("created_dt".into(), FieldValue::DateTime(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()));
        let back = CarrierRecord::fields_from_json(&CarrierRecord::fields_to_json(&fields));
        assert_eq!(keys(&back), vec!["legal_name", "dot_number", "created_dt"]);
        assert_eq!(back, fields);
    }

    #[test]
    fn stored_key_order_overrides_document_order() {
        // JSONB hands keys back sorted by length then bytes
        let doc = serde_json::json!({"state": "CA", "dot_number": "1", "legal_name": "ACME"});
        let order = vec!["legal_name".to_string(), "dot_number".to_string(), "state".to_string()];
        assert_eq!(keys(&CarrierRecord::fields_from_json_ordered(&doc, &order)), vec!["legal_name", "dot_number", "state"]);

        // stale or partial order lists still yield every field exactly once
        let partial = vec!["missing".to_string(), "legal_name".to_string()];
        assert_eq!(keys(&CarrierRecord::fields_from_json_ordered(&doc, &partial)), vec!["legal_name", "state", "dot_number"]);
        assert_eq!(CarrierRecord::field_order(&CarrierRecord::fields_from_json_ordered(&doc, &order)), order);
    }
}
