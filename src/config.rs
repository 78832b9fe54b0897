//! Handle configuration.
//!
//! Bootstrap (env/TOML loading, CLI flags) lives outside this crate; callers
//! build a [`RagConfig`] explicitly and pass it to [`crate::store::RagStore::init`].

/// Configuration for a [`crate::store::RagStore`].
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// `postgres://` connection string.
    pub connection_string: String,
    /// Dimension of stored embeddings. All chunk embeddings must match this.
    pub dimension: usize,
    /// Text-search configuration name passed to the BM25 extension (e.g. `"simple"`, `"english"`).
    pub text_config: String,
    /// Schema the four relations live under.
    pub rag_schema: String,
    /// Max connections in the pool. Defaults to `num_cpus::get() * 2`.
    pub pool_max_size: usize,
    /// Connect timeout for new pool connections.
    pub connect_timeout_secs: u64,
    /// Batch size used for the "batches of 500" bulk operations throughout ingest/backup.
    pub statement_batch_size: usize,
}

impl RagConfig {
    /// Start from a connection string with every other field at its default.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_text_config(mut self, text_config: impl Into<String>) -> Self {
        self.text_config = text_config.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.rag_schema = schema.into();
        self
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            dimension: 2048,
            text_config: "simple".to_string(),
            rag_schema: "public".to_string(),
            pool_max_size: num_cpus::get() * 2,
            connect_timeout_secs: 30,
            statement_batch_size: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dimension_is_2048() {
        let cfg = RagConfig::new("postgres://localhost/test");
        assert_eq!(cfg.dimension, 2048);
        assert_eq!(cfg.text_config, "simple");
        assert_eq!(cfg.statement_batch_size, 500);
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = RagConfig::new("postgres://localhost/test")
            .with_dimension(768)
            .with_text_config("english")
            .with_schema("rag");
        assert_eq!(cfg.dimension, 768);
        assert_eq!(cfg.text_config, "english");
        assert_eq!(cfg.rag_schema, "rag");
    }
}
