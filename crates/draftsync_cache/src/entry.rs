//! Cache entry, namespace and metadata types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A logical partition of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Full records. Bounded and aged.
    Records,
    /// Catalogs. Bounded and aged.
    Catalogs,
    /// Lightweight list summaries. Unbounded.
    List,
    /// User and organization settings. Unbounded.
    Settings,
}

impl Namespace {
    /// Every namespace.
    pub const ALL: [Namespace; 4] = [
        Namespace::Records,
        Namespace::Catalogs,
        Namespace::List,
        Namespace::Settings,
    ];

    /// Stable name used in storage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Records => "records",
            Namespace::Catalogs => "catalogs",
            Namespace::List => "list",
            Namespace::Settings => "settings",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cached document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Record id.
    pub id: String,
    /// The cached document.
    pub data: Value,
    /// Server-side version of `data`, when known.
    #[serde(default)]
    pub data_version: Option<u64>,
    /// When the entry was written, in epoch milliseconds.
    pub cached_at: u64,
    /// When the entry was last read, in epoch milliseconds.
    #[serde(default)]
    pub last_accessed_at: Option<u64>,
}

impl CacheEntry {
    /// Timestamp used for LRU ordering.
    pub fn lru_timestamp(&self) -> u64 {
        self.last_accessed_at.unwrap_or(self.cached_at)
    }

    /// Age at `now` measured from `cached_at`.
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.cached_at)
    }
}

/// Lightweight summary of a record kept in [`Namespace::List`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListSummary {
    /// Record id.
    pub id: String,
    /// Record key the record is stored under remotely.
    #[serde(default)]
    pub filename: Option<String>,
    /// Client the record belongs to.
    #[serde(default)]
    pub client_name: Option<String>,
    /// Server-side modification time, as sent by the server.
    #[serde(default)]
    pub updated_at: Option<Value>,
    /// Server-side version.
    #[serde(default)]
    pub data_version: Option<u64>,
}

impl ListSummary {
    /// Extracts the summary fields of a full record.
    pub fn from_record(id: &str, data: &Value) -> Self {
        let text = |field: &str| data.get(field).and_then(Value::as_str).map(str::to_string);
        Self {
            id: id.to_string(),
            filename: text("filename"),
            client_name: text("client_name").or_else(|| text("clientName")),
            updated_at: data.get("updated_at").cloned(),
            data_version: data_version_of(data),
        }
    }
}

/// Reads the `data_version` field of a record.
pub(crate) fn data_version_of(data: &Value) -> Option<u64> {
    data.get("data_version").and_then(Value::as_u64)
}

/// Bookkeeping about the last synchronization with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Layout version of the cache.
    pub version: String,
    /// Last successful synchronization, in epoch milliseconds.
    #[serde(default)]
    pub last_sync: Option<u64>,
    /// User the cache belongs to.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Organization the cache belongs to.
    #[serde(default)]
    pub organization_id: Option<String>,
}

impl CacheMetadata {
    pub(crate) const LAYOUT_VERSION: &'static str = "1.0.0";

    pub(crate) fn empty(now: u64) -> Self {
        Self {
            version: Self::LAYOUT_VERSION.to_string(),
            last_sync: Some(now),
            user_id: None,
            organization_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lru_timestamp_falls_back_to_cached_at() {
        let mut entry = CacheEntry {
            id: "q1".into(),
            data: json!({}),
            data_version: None,
            cached_at: 10,
            last_accessed_at: None,
        };
        assert_eq!(entry.lru_timestamp(), 10);
        entry.last_accessed_at = Some(25);
        assert_eq!(entry.lru_timestamp(), 25);
        assert_eq!(entry.age_millis(40), 30);
        assert_eq!(entry.age_millis(5), 0);
    }

    #[test]
    fn summary_from_record() {
        let data = json!({
            "filename": "Acme_2025-01-01.json",
            "clientName": "Acme",
            "updated_at": "2025-01-01T10:00:00Z",
            "data_version": 7,
            "items": [1, 2, 3]
        });
        let summary = ListSummary::from_record("q1", &data);
        assert_eq!(summary.id, "q1");
        assert_eq!(summary.filename.as_deref(), Some("Acme_2025-01-01.json"));
        assert_eq!(summary.client_name.as_deref(), Some("Acme"));
        assert_eq!(summary.data_version, Some(7));
    }

    #[test]
    fn entry_tolerates_missing_optional_fields() {
        let entry: CacheEntry =
            serde_json::from_str(r#"{"id":"q1","data":{"x":1},"cached_at":5}"#).unwrap();
        assert_eq!(entry.data_version, None);
        assert_eq!(entry.last_accessed_at, None);
    }

    #[test]
    fn namespace_names_are_distinct() {
        let mut names: Vec<_> = Namespace::ALL.iter().map(|n| n.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Namespace::ALL.len());
    }
}
