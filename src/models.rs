//! Core data models used throughout Cora.
//!
//! These types represent the knowledge records, search hits, sessions, and
//! API results that flow through the indexing and answering pipeline:
//!
//! ```text
//! data tree → Article / DocumentChunk → IndexedRecord → vector store
//!                                                            ↓
//!                                              query → Hit → AnswerResult
//!                                                          → ClassificationResult
//! ```
//!
//! # Identity
//!
//! An [`IndexedRecord`]'s id is a pure function of its identity tuple
//! `(source_kind, source_id, language, chunk_ordinal)`, so re-indexing an
//! unchanged source produces the same ids and the upsert is idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The language codes Cora indexes and summarizes. Kurdish variants
/// (Sorani `ckb`, Kurmanji `kmr`) are distinct languages here.
pub const SUPPORTED_LANGUAGES: [&str; 4] = ["en", "ar", "ckb", "kmr"];

/// Per-language text fields of an article. Absent languages are empty
/// strings, not missing keys.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LanguageFields {
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    pub ar: String,
    #[serde(default)]
    pub ckb: String,
    #[serde(default)]
    pub kmr: String,
}

impl LanguageFields {
    pub fn get(&self, language: &str) -> &str {
        match language {
            "en" => &self.en,
            "ar" => &self.ar,
            "ckb" => &self.ckb,
            "kmr" => &self.kmr,
            _ => "",
        }
    }
}

/// A structured knowledge-base article as it appears in the source JSON.
///
/// An article exists in at least one language; one [`IndexedRecord`] is
/// emitted per non-empty language variant.
#[derive(Debug, Clone, Deserialize)]
pub struct Article {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// App scope tag, e.g. `"ana"`, `"self-care"`, `"hakki"`.
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub title: LanguageFields,
    #[serde(default)]
    pub body: LanguageFields,
}

/// Accepts both `"17"` and `17` for article ids.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "article id must be a string or number, got {}",
            other
        ))),
    }
}

/// A chunk of a long document (e.g. a PDF page span), identified by
/// `(source_path, ordinal)`.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub source_path: String,
    pub ordinal: i64,
    pub text: String,
    /// 1-based page span the chunk was cut from (approximate).
    pub page_start: i64,
    pub page_end: i64,
    /// Detected language, or `"unknown"`.
    pub language: String,
}

/// Metadata stored alongside each record in the vector collection.
///
/// `kind` is `"article"` or `"pdf"`; the optional fields are populated
/// according to the kind.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RecordMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_ordinal: Option<i64>,
}

/// One embedded document unit in the vector store.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    /// Deterministic identity, see [`record_id`].
    pub record_id: String,
    /// The payload that gets embedded.
    pub text: String,
    /// Dense vector; filled by the store on upsert when absent.
    pub embedding: Option<Vec<f32>>,
    pub metadata: RecordMetadata,
}

/// Computes the deterministic record id from the identity tuple.
///
/// The id is a SHA-256 digest over the tuple fields with a separator that
/// cannot occur inside them, so equal tuples (and only equal tuples)
/// collide. Re-indexing unchanged source therefore rewrites the same rows.
pub fn record_id(source_kind: &str, source_id: &str, language: &str, chunk_ordinal: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(language.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk_ordinal.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// A query result with engine-native distance and normalized similarity.
///
/// Invariants: `distance >= 0` and `similarity = 1 / (1 + distance)`,
/// so `0 < similarity <= 1` with higher meaning closer.
#[derive(Debug, Clone)]
pub struct Hit {
    pub record_id: String,
    pub text: String,
    pub metadata: RecordMetadata,
    pub distance: f32,
    pub similarity: f32,
}

/// A knowledge source cited in an [`AnswerResult`], projected from a hit
/// that was actually placed in the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Rounded to 3 decimal places.
    pub similarity: f64,
}

/// Result of one Q&A request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// `"high"`, `"medium"`, or `"low"`, derived from the top similarity.
    pub confidence: String,
    pub retrieved_docs: usize,
    pub session_id: String,
    pub language: String,
}

/// Result of one ticket classification.
///
/// Enum-like fields are open strings: unknown values pass through
/// unchanged and the routing caller decides what to do with them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub detected_language: String,
    pub detected_dialect: String,
    pub category: String,
    pub issue_type: String,
    pub routing_department: String,
    pub recommended_article_ids: Vec<String>,
    pub sentiment: String,
    /// One-line summary per supported language; keys are exactly
    /// [`SUPPORTED_LANGUAGES`].
    pub summaries: BTreeMap<String, String>,
}

/// One message in a session.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_deterministic() {
        let a = record_id("article", "17", "en", 0);
        let b = record_id("article", "17", "en", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_record_id_distinct_tuples() {
        let ids = [
            record_id("article", "17", "en", 0),
            record_id("article", "17", "ar", 0),
            record_id("article", "18", "en", 0),
            record_id("pdf", "17", "en", 0),
            record_id("pdf", "manual.pdf", "unknown", 0),
            record_id("pdf", "manual.pdf", "unknown", 1),
        ];
        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "ids {} and {} collided", i, j);
                }
            }
        }
    }

    #[test]
    fn test_record_id_separator_prevents_concatenation_collisions() {
        assert_ne!(
            record_id("article", "1", "en", 0),
            record_id("articl", "e1", "en", 0)
        );
    }

    #[test]
    fn test_article_id_accepts_number() {
        let article: Article = serde_json::from_str(
            r#"{"id": 17, "app_name": "ana", "title": {"en": "Reset"}, "body": {"en": "Steps"}}"#,
        )
        .unwrap();
        assert_eq!(article.id, "17");
        assert_eq!(article.title.get("en"), "Reset");
        assert_eq!(article.title.get("ar"), "");
    }

    #[test]
    fn test_metadata_type_rename() {
        let meta = RecordMetadata {
            kind: "article".to_string(),
            article_id: Some("17".to_string()),
            language: "en".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "article");
        assert!(json.get("source_path").is_none());
    }
}
