//! Schema bootstrap: extensions, the four owned relations, and their indexes.

use deadpool_postgres::Object as Client;
use tracing::warn;

use crate::config::RagConfig;
use crate::error::Result;

/// Creates extensions, relations, and indexes if they do not already exist.
/// Safe to call on every `init()`; every statement is idempotent.
pub async fn bootstrap(client: &Client, config: &RagConfig) -> Result<()> {
    let schema = &config.rag_schema;
    let dim = config.dimension;

    client.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {schema}")).await?;
    client.batch_execute("CREATE EXTENSION IF NOT EXISTS vectorscale").await?;
    client.batch_execute("CREATE EXTENSION IF NOT EXISTS pg_textsearch").await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {schema}.documents (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                community_id INT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {schema}.chunks (
                id BIGSERIAL PRIMARY KEY,
                text TEXT NOT NULL,
                text_hash TEXT NOT NULL UNIQUE,
                token_count INT NOT NULL,
                embedding VECTOR({dim}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {schema}.chunk_sources (
                id BIGSERIAL PRIMARY KEY,
                chunk_id BIGINT NOT NULL REFERENCES {schema}.chunks(id) ON DELETE CASCADE,
                document_id BIGINT NOT NULL REFERENCES {schema}.documents(id) ON DELETE CASCADE,
                start_index INT NOT NULL,
                end_index INT NOT NULL
            )"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {schema}.document_relations (
                id BIGSERIAL PRIMARY KEY,
                source_id BIGINT NOT NULL REFERENCES {schema}.documents(id) ON DELETE CASCADE,
                target_id BIGINT NOT NULL REFERENCES {schema}.documents(id) ON DELETE CASCADE,
                rel_type TEXT,
                weight REAL NOT NULL DEFAULT 1.0,
                UNIQUE(source_id, target_id)
            )"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE INDEX IF NOT EXISTS idx_chunk_sources_chunk ON {schema}.chunk_sources(chunk_id);
             CREATE INDEX IF NOT EXISTS idx_chunk_sources_document ON {schema}.chunk_sources(document_id);
             CREATE INDEX IF NOT EXISTS idx_document_relations_source ON {schema}.document_relations(source_id);
             CREATE INDEX IF NOT EXISTS idx_document_relations_target ON {schema}.document_relations(target_id);
             CREATE INDEX IF NOT EXISTS idx_documents_community ON {schema}.documents(community_id);"
        ))
        .await?;

    // ANN and BM25 indexes are best-effort: a database without the matching
    // extension version can still serve exact scans, just slower.
    if let Err(e) = client
        .batch_execute(&format!(
            "CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON {schema}.chunks
             USING diskann (embedding vector_cosine_ops)"
        ))
        .await
    {
        warn!("failed to create DiskANN index on chunks.embedding, falling back to exact scans: {e}");
    }

    let text_config = &config.text_config;
    if let Err(e) = client
        .batch_execute(&format!(
            "CREATE INDEX IF NOT EXISTS idx_chunks_text_bm25 ON {schema}.chunks
             USING bm25 (text) WITH (text_config = '{text_config}')"
        ))
        .await
    {
        warn!("failed to create BM25 index on chunks.text, falling back to plain text matching: {e}");
    }

    Ok(())
}
