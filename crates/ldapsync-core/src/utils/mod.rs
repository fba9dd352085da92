//! Utility functions

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a record identifier
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a timestamp for storage
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a stored timestamp
pub fn parse_timestamp(s: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Database(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Parse an optional stored timestamp
pub fn parse_optional_timestamp(s: Option<String>) -> crate::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_storage_format() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(&now)).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
