//! Core domain types shared by the store, search and clustering layers.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of the record that owns an embedding.
///
/// Ordering is meaningful: it is the deterministic tie-break for equal
/// similarities in search results and cluster ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OwnerId(u64);

impl OwnerId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Creates from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| EngineError::invalid("owner_id", format!("'{s}' is not an id: {e}")))
    }
}

/// Logical collection an embedding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Solution,
    Issue,
}

impl Collection {
    /// Every known collection, in storage order.
    pub const ALL: [Collection; 2] = [Collection::Solution, Collection::Issue];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Solution => "solution",
            Self::Issue => "issue",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = EngineError;

    /// Accepts singular and plural tags (`issue`, `issues`), case-insensitive.
    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solution" | "solutions" => Ok(Self::Solution),
            "issue" | "issues" => Ok(Self::Issue),
            other => Err(EngineError::invalid(
                "collection",
                format!("unknown collection '{other}', use 'solutions' or 'issues'"),
            )),
        }
    }
}

/// Summary fields of a record as held by the record store.
///
/// This is the snapshot attached to search results; the engine never
/// writes it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    #[serde(rename = "id")]
    pub owner_id: OwnerId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl RecordSummary {
    pub fn new(
        owner_id: OwnerId,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            title: title.into(),
            description: description.into(),
            status: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Predicate over record summary fields used to scope a candidate pool.
///
/// Every field that is set must match exactly; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl RecordFilter {
    /// Filter that accepts every record.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn matches(&self, record: &RecordSummary) -> bool {
        fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match wanted {
                Some(w) => actual.as_deref() == Some(w.as_str()),
                None => true,
            }
        }
        field_matches(&self.status, &record.status)
            && field_matches(&self.category, &record.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_parsing() {
        assert_eq!("issues".parse::<Collection>().unwrap(), Collection::Issue);
        assert_eq!("Solution".parse::<Collection>().unwrap(), Collection::Solution);

        let err = "petitions".parse::<Collection>().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidArgument {
                name: "collection",
                ..
            }
        ));
    }

    #[test]
    fn test_owner_id_bytes_and_order() {
        let id = OwnerId::new(42);
        assert_eq!(OwnerId::from_bytes(id.to_bytes()), id);
        assert!(OwnerId::new(3) < OwnerId::new(10));
        assert!("abc".parse::<OwnerId>().is_err());
        assert_eq!(" 12 ".parse::<OwnerId>().unwrap(), OwnerId::new(12));
    }

    #[test]
    fn test_filter_matching() {
        let record = RecordSummary::new(OwnerId::new(1), "Pothole", "Deep pothole on Main St")
            .with_status("reported")
            .with_category("roads");

        assert!(RecordFilter::any().matches(&record));
        assert!(RecordFilter::any().with_status("reported").matches(&record));
        assert!(
            RecordFilter::any()
                .with_status("reported")
                .with_category("roads")
                .matches(&record)
        );
        assert!(!RecordFilter::any().with_status("resolved").matches(&record));

        let solution = RecordSummary::new(OwnerId::new(2), "Fix it", "");
        assert!(!RecordFilter::any().with_status("reported").matches(&solution));
    }

    #[test]
    fn test_record_summary_json_shape() {
        let json = r#"{"id": 5, "title": "Broken light", "status": "reported"}"#;
        let record: RecordSummary = serde_json::from_str(json).unwrap();
        assert_eq!(record.owner_id, OwnerId::new(5));
        assert_eq!(record.description, "");
        assert_eq!(record.category, None);
    }
}
