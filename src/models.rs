//! Row types for the four owned relations, plus the search-result and
//! relation-target value types shared across the ingest and search modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub metadata: Value,
    pub community_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub text: String,
    pub text_hash: String,
    pub token_count: i32,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSource {
    pub id: i64,
    pub chunk_id: i64,
    pub document_id: i64,
    pub start_index: i32,
    pub end_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRelation {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub rel_type: Option<String>,
    pub weight: f32,
}

/// The result search mode a row was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Vector,
    Bm25,
    Graph,
    Community,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub document_id: i64,
    pub title: String,
    pub text: String,
    pub score: f32,
    pub mode: SearchMode,
    pub community_id: Option<i32>,
    pub relation_type: Option<String>,
}

/// Either a bare title or a titled relation with optional type/weight, as
/// accepted by the `relations` ingest option and the backup file format.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationTarget {
    pub title: String,
    pub rel_type: Option<String>,
    pub weight: Option<f32>,
}

impl RelationTarget {
    pub fn bare(title: impl Into<String>) -> Self {
        Self { title: title.into(), rel_type: None, weight: None }
    }
}

/// Accepts both `"Title"` and `{"title": "...", "type": "...", "weight": ...}`
/// wire forms, matching the backup file's documented compatibility rule.
impl<'de> Deserialize<'de> for RelationTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Bare(String),
            Full { title: String, #[serde(rename = "type")] rel_type: Option<String>, weight: Option<f32> },
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Bare(title) => RelationTarget { title, rel_type: None, weight: None },
            Wire::Full { title, rel_type, weight } => RelationTarget { title, rel_type, weight },
        })
    }
}

impl Serialize for RelationTarget {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        if self.rel_type.is_none() && self.weight.is_none() {
            return serializer.serialize_str(&self.title);
        }
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("title", &self.title)?;
        if let Some(t) = &self.rel_type {
            map.serialize_entry("type", t)?;
        }
        if let Some(w) = self.weight {
            if (w - 1.0).abs() > f32::EPSILON {
                map.serialize_entry("weight", &w)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_target_accepts_bare_string() {
        let parsed: RelationTarget = serde_json::from_str("\"Some Title\"").unwrap();
        assert_eq!(parsed.title, "Some Title");
        assert!(parsed.rel_type.is_none());
        assert!(parsed.weight.is_none());
    }

    #[test]
    fn relation_target_accepts_full_object() {
        let parsed: RelationTarget =
            serde_json::from_str(r#"{"title": "Other", "type": "cites", "weight": 0.5}"#).unwrap();
        assert_eq!(parsed.title, "Other");
        assert_eq!(parsed.rel_type.as_deref(), Some("cites"));
        assert_eq!(parsed.weight, Some(0.5));
    }

    #[test]
    fn relation_target_serializes_bare_when_default_weight() {
        let target = RelationTarget::bare("Plain");
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, "\"Plain\"");
    }

    #[test]
    fn relation_target_serializes_object_when_weight_set() {
        let target = RelationTarget { title: "T".into(), rel_type: None, weight: Some(2.0) };
        let json = serde_json::to_string(&target).unwrap();
        assert!(json.contains("\"weight\":2.0"));
    }
}
