//! Pluggable embedding backend.
//!
//! The core never speaks to a model provider directly; callers wire up an
//! HTTP client, a local model, or a test double behind this trait.

use async_trait::async_trait;

/// Batched text-to-vector embedding. Implementors must return one vector per
/// input text, in the same order, each of the handle's configured dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder for tests: each vector is a hash of its text
    /// broadcast across `dimension` slots, with no network involved.
    pub struct MockEmbedder {
        pub dimension: usize,
        pub calls: AtomicUsize,
    }

    impl MockEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self { dimension, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let h = t.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
                    let v = (h % 1000) as f32 / 1000.0;
                    vec![v; self.dimension]
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockEmbedder;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn mock_embedder_returns_one_vector_per_text_in_order() {
        let embedder = MockEmbedder::new(8);
        let out = embedder.embed(&["a", "b", "c"]).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.len() == 8));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
