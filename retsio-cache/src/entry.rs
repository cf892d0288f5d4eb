//! Cache entries and the staleness rule.

use chrono::{DateTime, SecondsFormat, Utc};
use retsio_protocol::parse_rets_datetime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The (version, timestamp) pair that identifies a metadata revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStamp {
    pub version: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CacheStamp {
    pub fn new(version: Option<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self { version, timestamp }
    }

    /// Builds a stamp from raw setting values.
    pub fn from_settings(version: Option<&str>, timestamp: Option<&str>) -> Self {
        Self {
            version: version.map(str::to_string),
            timestamp: timestamp.and_then(parse_rets_datetime),
        }
    }
}

/// Decides whether a cached entry must be refetched.
///
/// The entry is stale only when the live timestamp is strictly newer AND
/// the version string is unchanged. A version change on its own keeps the
/// cached entry. A missing timestamp on either side never compares newer.
pub fn is_stale(cached: &CacheStamp, live: &CacheStamp) -> bool {
    match (live.timestamp, cached.timestamp) {
        (Some(live_ts), Some(cached_ts)) => live_ts > cached_ts && live.version == cached.version,
        _ => false,
    }
}

/// Persisted metadata snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataCacheEntry {
    pub version: Option<String>,
    /// ISO 8601 timestamp as written; parsed leniently on read.
    pub timestamp: Option<String>,
    pub payload: Value,
}

impl MetadataCacheEntry {
    pub fn new(stamp: &CacheStamp, payload: Value) -> Self {
        Self {
            version: stamp.version.clone(),
            timestamp: stamp
                .timestamp
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            payload,
        }
    }

    /// Returns the stamp recorded with this entry.
    pub fn stamp(&self) -> CacheStamp {
        CacheStamp::from_settings(self.version.as_deref(), self.timestamp.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2016, 1, 15, hour, 0, 0).unwrap())
    }

    fn stamp(version: &str, hour: u32) -> CacheStamp {
        CacheStamp::new(Some(version.to_string()), ts(hour))
    }

    #[test]
    fn test_stale_when_newer_and_same_version() {
        assert!(is_stale(&stamp("1.2", 10), &stamp("1.2", 11)));
    }

    #[test]
    fn test_fresh_when_timestamp_unchanged() {
        assert!(!is_stale(&stamp("1.2", 10), &stamp("1.2", 10)));
        assert!(!is_stale(&stamp("1.2", 10), &stamp("1.3", 10)));
    }

    #[test]
    fn test_fresh_when_timestamp_older() {
        assert!(!is_stale(&stamp("1.2", 10), &stamp("1.2", 9)));
    }

    #[test]
    fn test_version_change_alone_keeps_cache() {
        // Newer timestamp but a different version: the entry is reused
        assert!(!is_stale(&stamp("1.2", 10), &stamp("1.3", 11)));
    }

    #[test]
    fn test_missing_timestamps_never_stale() {
        let cached = CacheStamp::new(Some("1.2".to_string()), None);
        assert!(!is_stale(&cached, &stamp("1.2", 11)));

        let live = CacheStamp::new(Some("1.2".to_string()), None);
        assert!(!is_stale(&stamp("1.2", 10), &live));
    }

    #[test]
    fn test_missing_versions_compare_equal() {
        let cached = CacheStamp::new(None, ts(10));
        let live = CacheStamp::new(None, ts(11));
        assert!(is_stale(&cached, &live));
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = MetadataCacheEntry::new(&stamp("1.2", 12), json!({"a": "b"}));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "version": "1.2",
                "timestamp": "2016-01-15T12:00:00.000Z",
                "payload": {"a": "b"}
            })
        );
        assert_eq!(entry.stamp(), stamp("1.2", 12));
    }

    #[test]
    fn test_entry_lenient_timestamp() {
        let entry: MetadataCacheEntry = serde_json::from_value(json!({
            "version": "1.2",
            "timestamp": "Fri, 15 Jan 2016 12:00:00 GMT",
            "payload": null
        }))
        .unwrap();
        assert_eq!(entry.stamp().timestamp, ts(12));

        let entry: MetadataCacheEntry = serde_json::from_value(json!({
            "version": null,
            "timestamp": "not a date",
            "payload": {}
        }))
        .unwrap();
        assert_eq!(entry.stamp(), CacheStamp::default());
    }
}
