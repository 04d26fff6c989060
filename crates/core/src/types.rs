use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Datetime layouts found in legacy dumps, tried in order after RFC 3339.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a legacy timestamp.
///
/// Accepts Unix seconds (JSON number or numeric string), RFC 3339, the
/// layouts in [`DATETIME_FORMATS`], or a bare `YYYY-MM-DD` date (midnight).
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<Timestamp> {
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Today at 00:00 UTC, used when a record has no creation marker.
pub fn today() -> Timestamp {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}

/// Stringify a legacy record id. Integers and non-empty strings only.
pub fn recid_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn epoch_seconds_parse() {
        let ts = parse_timestamp(&json!(200)).unwrap();
        assert_eq!(ts.timestamp(), 200);
        assert_eq!(parse_timestamp(&json!("200")).unwrap().timestamp(), 200);
    }

    #[test]
    fn legacy_datetime_layouts_parse() {
        let a = parse_timestamp(&json!("2011-03-04 10:20:30")).unwrap();
        let b = parse_timestamp(&json!("2011-03-04T10:20:30")).unwrap();
        let c = parse_timestamp(&json!("2011-03-04T10:20:30+00:00")).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn bare_date_is_midnight() {
        let ts = parse_timestamp(&json!("2011-03-04")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2011-03-04T00:00:00+00:00");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
        assert!(parse_timestamp(&json!({"t": 1})).is_none());
    }

    #[test]
    fn recid_accepts_numbers_and_strings() {
        assert_eq!(recid_string(&json!(7)).as_deref(), Some("7"));
        assert_eq!(recid_string(&json!(" 42 ")).as_deref(), Some("42"));
        assert!(recid_string(&json!("")).is_none());
        assert!(recid_string(&json!(1.5)).is_none());
    }
}
