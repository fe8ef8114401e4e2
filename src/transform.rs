//! Row transformer: header row + data row -> record fields.

use crate::record::{coerce, is_temporal, normalize, CoerceError, FieldValue, MalformedDatePolicy, RecordFields};

/// Result of transforming one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub fields: RecordFields,
    /// Temporal fields whose non-empty text did not parse and were stored as null.
    pub warnings: Vec<CoerceError>,
}

/// Build the field map for one data row.
///
/// Every distinct header key yields one entry. Cells missing from a short row read
/// as empty strings and cells past the last header are ignored. When two
/// headers normalize to the same key the right-most column's value wins.
pub fn row_to_fields(headers: &[String], row: &[String], policy: MalformedDatePolicy) -> Result<Transformed, CoerceError> {
    let mut fields = RecordFields::with_capacity(headers.len());
    let mut warnings = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        let key = normalize(header);
        let raw = row.get(idx).map(String::as_str).unwrap_or("");
        let value = coerce(&key, raw, policy)?;
        if value == FieldValue::Null && is_temporal(&key) && !raw.trim().is_empty() {
            warnings.push(CoerceError { field: key.clone(), raw: raw.to_string() });
        }
        // a repeated key keeps its first position and takes the later value
        fields.insert(key, value);
    }
    Ok(Transformed { fields, warnings })
}
