//! Redaction of sensitive row fields before anything reaches a log line or
//! an error report.

use super::row::Row;

const SENSITIVE_FIELDS: [&str; 5] = [
    "password",
    "secret",
    "snmp-community",
    "community",
    "private-key",
];

pub const REDACTED: &str = "***REDACTED***";

pub fn redact_row(row: &Row) -> Row {
    let mut sanitized = row.clone();
    for field in SENSITIVE_FIELDS {
        if let Some(value) = sanitized.get_mut(field) {
            *value = REDACTED.to_string();
        }
        let underscored = field.replace('-', "_");
        if let Some(value) = sanitized.get_mut(&underscored) {
            *value = REDACTED.to_string();
        }
    }
    sanitized
}
