//! Deterministic context-string builders used by the global-query flow and
//! exposed to callers who want to reproduce the same formatting themselves.

use crate::models::{DocumentRelation, SearchResult};

/// `"[1] <title>\n<text>\n\n[2] ..."`, trailing whitespace trimmed.
pub fn build_context(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n{}\n\n", i + 1, r.title, r.text));
    }
    out.trim_end().to_string()
}

/// A relation edge paired with the titles of the documents it connects, for
/// display purposes only.
pub struct RelationEdge<'a> {
    pub source_title: &'a str,
    pub target_title: &'a str,
    pub relation: &'a DocumentRelation,
}

/// Prepends a `"=== Document Relations ==="` block when `relations` is
/// non-empty; otherwise identical to [`build_context`].
pub fn build_graph_context(results: &[SearchResult], relations: &[RelationEdge<'_>]) -> String {
    if relations.is_empty() {
        return build_context(results);
    }

    let mut out = String::from("=== Document Relations ===\n");
    for edge in relations {
        match &edge.relation.rel_type {
            Some(t) => out.push_str(&format!("{} \u{2192} {} [{}]\n", edge.source_title, edge.target_title, t)),
            None => out.push_str(&format!("{} \u{2192} {}\n", edge.source_title, edge.target_title)),
        }
    }
    out.push('\n');
    out.push_str(&build_context(results));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchMode;

    fn result(title: &str, text: &str) -> SearchResult {
        SearchResult {
            chunk_id: 1,
            document_id: 1,
            title: title.to_string(),
            text: text.to_string(),
            score: 1.0,
            mode: SearchMode::Vector,
            community_id: None,
            relation_type: None,
        }
    }

    #[test]
    fn build_context_numbers_entries_and_trims_trailing_whitespace() {
        let results = vec![result("A", "alpha"), result("B", "beta")];
        let ctx = build_context(&results);
        assert_eq!(ctx, "[1] A\nalpha\n\n[2] B\nbeta");
    }

    #[test]
    fn build_graph_context_without_relations_matches_build_context() {
        let results = vec![result("A", "alpha")];
        assert_eq!(build_graph_context(&results, &[]), build_context(&results));
    }

    #[test]
    fn build_graph_context_prepends_relation_block() {
        let results = vec![result("A", "alpha")];
        let relation = DocumentRelation { id: 1, source_id: 1, target_id: 2, rel_type: Some("cites".into()), weight: 1.0 };
        let edges = vec![RelationEdge { source_title: "A", target_title: "B", relation: &relation }];
        let ctx = build_graph_context(&results, &edges);
        assert!(ctx.starts_with("=== Document Relations ===\nA \u{2192} B [cites]\n\n"));
        assert!(ctx.ends_with("[1] A\nalpha"));
    }
}
