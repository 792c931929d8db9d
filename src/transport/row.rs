//! Row representation shared by every transport backend.
//!
//! Devices speak hyphenated field names (`rate-limit`); application code is
//! allowed to use underscores. Writes are converted to the device form,
//! reads gain an underscored alias for every hyphenated key so callers stay
//! protocol-agnostic.

use std::collections::BTreeMap;

/// One device row: an ordered mapping of field name to string value.
pub type Row = BTreeMap<String, String>;

pub fn row_from(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Device form of a single key. Dot-prefixed internals (`.id`) pass through.
pub fn device_key(key: &str) -> String {
    if key.starts_with('.') {
        key.to_string()
    } else {
        key.replace('_', "-")
    }
}

/// Converts every key of a row to device form.
pub fn to_device_row(row: &Row) -> Row {
    row.iter()
        .map(|(k, v)| (device_key(k), v.clone()))
        .collect()
}

/// Adds an underscored alias for each hyphenated key of a freshly read row.
pub fn normalize_row(row: Row) -> Row {
    let mut normalized = Row::new();
    for (key, value) in row {
        if !key.starts_with('.') {
            let alias = key.replace('-', "_");
            if alias != key {
                normalized.entry(alias).or_insert_with(|| value.clone());
            }
        }
        normalized.insert(key, value);
    }
    normalized
}
