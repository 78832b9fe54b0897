//! Pluggable reranking backend.
//!
//! Like [`crate::embedder::Embedder`], the core never speaks to a rerank
//! provider directly; callers wire up an HTTP client, a cross-encoder, or a
//! test double behind this trait. Used by [`crate::store::RagStore::global_query`]
//! to reorder a community's retrieved chunks before they are folded into its
//! partial-answer context.

use async_trait::async_trait;

use crate::models::SearchResult;

/// Reorders (and may drop) a set of search results for a given query.
/// Implementors return the same results, reordered/filtered; they must not
/// invent results that were not passed in.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> anyhow::Result<Vec<SearchResult>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Reverses result order deterministically, with no network involved.
    pub struct ReversingReranker;

    #[async_trait]
    impl Reranker for ReversingReranker {
        async fn rerank(&self, _query: &str, mut results: Vec<SearchResult>) -> anyhow::Result<Vec<SearchResult>> {
            results.reverse();
            Ok(results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ReversingReranker;
    use super::*;
    use crate::models::SearchMode;

    fn result(title: &str) -> SearchResult {
        SearchResult {
            chunk_id: 1,
            document_id: 1,
            title: title.to_string(),
            text: "t".to_string(),
            score: 1.0,
            mode: SearchMode::Vector,
            community_id: None,
            relation_type: None,
        }
    }

    #[tokio::test]
    async fn reranker_can_reorder_results() {
        let reranker = ReversingReranker;
        let results = vec![result("A"), result("B")];
        let reranked = reranker.rerank("q", results).await.unwrap();
        assert_eq!(reranked[0].title, "B");
        assert_eq!(reranked[1].title, "A");
    }
}
