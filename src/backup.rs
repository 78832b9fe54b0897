//! Line-delimited JSON backup format: parsing, validation, and the async
//! file primitives `export`/`import` are built on.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::models::RelationTarget;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(rename = "startIndex")]
    pub start_index: i32,
    #[serde(rename = "endIndex")]
    pub end_index: i32,
    #[serde(rename = "tokenCount")]
    pub token_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub title: String,
    pub content: String,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(rename = "communityId", skip_serializing_if = "Option::is_none")]
    pub community_id: Option<i32>,
    pub chunks: Vec<BackupChunk>,
    #[serde(default)]
    pub relations: Vec<RelationTarget>,
}

/// Overwrites `path` with empty content. Call once before a run of [`append_line`] calls.
pub async fn truncate(path: &Path) -> Result<()> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path).await?;
    Ok(())
}

/// Appends one document as a single JSON line, opening and flushing the file
/// handle per call (no writer is kept open across documents).
pub async fn append_line(path: &Path, doc: &BackupDocument) -> Result<()> {
    let mut line = serde_json::to_string(doc)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub dimensions: HashSet<usize>,
    pub errors: Vec<String>,
    pub duplicate_hashes: Vec<String>,
}

/// Validates already-read backup lines (one JSON object per non-empty line).
pub fn validate_lines(lines: &[String]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut dimensions = HashSet::new();
    let mut seen_hashes = HashSet::new();
    let mut duplicate_hashes = Vec::new();
    let mut total_documents = 0usize;
    let mut total_chunks = 0usize;

    for (i, raw) in lines.iter().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!("line {}: invalid json: {e}", i + 1));
                continue;
            }
        };

        let title = value.get("title").and_then(Value::as_str);
        let content = value.get("content").and_then(Value::as_str);
        let content_hash = value.get("contentHash").and_then(Value::as_str);

        if title.map(str::is_empty).unwrap_or(true) {
            errors.push(format!("line {}: missing or empty title", i + 1));
        }
        if content.map(str::is_empty).unwrap_or(true) {
            errors.push(format!("line {}: missing or empty content", i + 1));
        }
        match content_hash {
            Some(h) if !h.is_empty() => {
                if !seen_hashes.insert(h.to_string()) {
                    duplicate_hashes.push(h.to_string());
                }
            }
            _ => errors.push(format!("line {}: missing or empty contentHash", i + 1)),
        }

        total_documents += 1;

        match value.get("chunks").and_then(Value::as_array) {
            Some(chunks) => {
                for (ci, chunk) in chunks.iter().enumerate() {
                    total_chunks += 1;
                    match chunk.get("embedding").and_then(Value::as_array) {
                        Some(embedding) => {
                            dimensions.insert(embedding.len());
                        }
                        None => errors.push(format!("line {}: chunk {ci} missing embedding array", i + 1)),
                    }
                }
            }
            None => errors.push(format!("line {}: missing chunks array", i + 1)),
        }
    }

    let valid = errors.is_empty() && dimensions.len() <= 1;
    ValidationReport { valid, total_documents, total_chunks, dimensions, errors, duplicate_hashes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(title: &str, hash: &str, dim: usize) -> String {
        serde_json::json!({
            "title": title,
            "content": "body",
            "contentHash": hash,
            "metadata": {},
            "chunks": [{"text": "t", "embedding": vec![0.0_f32; dim], "startIndex": 0, "endIndex": 1, "tokenCount": 1}],
            "relations": []
        })
        .to_string()
    }

    #[test]
    fn valid_single_document_passes() {
        let lines = vec![line("A", "hash-a", 4)];
        let report = validate_lines(&lines);
        assert!(report.valid);
        assert_eq!(report.total_documents, 1);
        assert_eq!(report.total_chunks, 1);
        assert_eq!(report.dimensions, HashSet::from([4]));
    }

    #[test]
    fn mismatched_dimensions_are_flagged_invalid() {
        let lines = vec![line("A", "hash-a", 4), line("B", "hash-b", 8)];
        let report = validate_lines(&lines);
        assert!(!report.valid);
        assert_eq!(report.dimensions.len(), 2);
    }

    #[test]
    fn duplicate_content_hash_is_tracked_but_not_fatal_alone() {
        let lines = vec![line("A", "same-hash", 4), line("B", "same-hash", 4)];
        let report = validate_lines(&lines);
        assert_eq!(report.duplicate_hashes, vec!["same-hash".to_string()]);
        assert!(report.valid);
    }

    #[test]
    fn missing_chunks_field_is_an_error() {
        let bad = serde_json::json!({"title":"A","content":"c","contentHash":"h"}).to_string();
        let report = validate_lines(&[bad]);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("missing chunks array")));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let lines = vec![String::new(), line("A", "h", 2), String::new()];
        let report = validate_lines(&lines);
        assert_eq!(report.total_documents, 1);
    }

    #[test]
    fn relations_accept_both_bare_and_full_wire_forms() {
        let raw = serde_json::json!({
            "title": "A", "content": "c", "contentHash": "h", "metadata": {},
            "chunks": [], "relations": ["Bare Title", {"title": "Full", "type": "cites", "weight": 0.5}]
        })
        .to_string();
        let doc: BackupDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc.relations[0].title, "Bare Title");
        assert_eq!(doc.relations[1].rel_type.as_deref(), Some("cites"));
    }
}
