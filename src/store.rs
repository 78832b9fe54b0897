//! Public facade: the single stateful handle callers hold.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::backup::{self, BackupChunk, BackupDocument};
use crate::community;
use crate::config::RagConfig;
use crate::db::batches;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::hash;
use crate::ingest::{self, IngestDoc, IngestOptions, IngestResult};
use crate::models::{Document, DocumentRelation, SearchResult};
use crate::pool::RagPool;
use crate::rerank::Reranker;
use crate::schema;
use crate::search::{self, RetrievalMode, SearchConfig};
use crate::vector::to_pgvector_literal;

/// The sole public entry point. Owns the connection pool; cheap to clone
/// (the pool itself is reference-counted).
#[derive(Clone)]
pub struct RagStore {
    config: RagConfig,
    pool: RagPool,
    bootstrapped: Arc<OnceCell<()>>,
}

impl RagStore {
    /// Builds the connection pool. Schema bootstrap happens lazily on first use.
    pub fn new(config: RagConfig) -> Result<Self> {
        let pool = RagPool::build(&config)?;
        Ok(Self { config, pool, bootstrapped: Arc::new(OnceCell::new()) })
    }

    /// Builds the pool and eagerly runs schema bootstrap (extensions, tables, indexes).
    pub async fn init(config: RagConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.ensure_bootstrapped().await?;
        Ok(store)
    }

    async fn ensure_bootstrapped(&self) -> Result<()> {
        self.bootstrapped
            .get_or_try_init(|| async {
                let client = self.pool.get().await?;
                schema::bootstrap(&client, &self.config).await?;
                info!(schema = %self.config.rag_schema, "rag schema bootstrapped");
                Ok::<(), RagError>(())
            })
            .await?;
        Ok(())
    }

    /// Closes the connection pool. Outstanding checkouts finish and are
    /// dropped rather than recycled; the handle is unusable afterward.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Drops this schema's four owned relations entirely. Irreversible.
    pub async fn drop(&self) -> Result<()> {
        let schema = &self.config.rag_schema;
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "DROP TABLE IF EXISTS {schema}.chunk_sources CASCADE;
                 DROP TABLE IF EXISTS {schema}.document_relations CASCADE;
                 DROP TABLE IF EXISTS {schema}.chunks CASCADE;
                 DROP TABLE IF EXISTS {schema}.documents CASCADE;"
            ))
            .await?;
        Ok(())
    }

    pub async fn ingest(&self, docs: &[IngestDoc], opts: &IngestOptions) -> Result<IngestResult> {
        self.ensure_bootstrapped().await?;
        ingest::ingest(&self.pool, &self.config, docs, opts).await
    }

    pub async fn retrieve(&self, embed: &dyn Embedder, cfg: &SearchConfig) -> Result<Vec<SearchResult>> {
        self.ensure_bootstrapped().await?;
        search::search(&self.pool, &self.config, embed, cfg).await
    }

    /// Alias for [`Self::retrieve`] kept for callers that think in terms of
    /// "querying" rather than "retrieving" — identical behavior.
    pub async fn query(&self, embed: &dyn Embedder, cfg: &SearchConfig) -> Result<Vec<SearchResult>> {
        self.retrieve(embed, cfg).await
    }

    pub async fn detect_communities(&self) -> Result<i32> {
        self.ensure_bootstrapped().await?;
        let client = self.pool.get().await?;
        ingest::recompute_communities(&client, &self.config.rag_schema, &self.config).await
    }

    pub async fn fetch_relations(&self, document_id: i64) -> Result<Vec<DocumentRelation>> {
        self.ensure_bootstrapped().await?;
        let schema = &self.config.rag_schema;
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT id, source_id, target_id, rel_type, weight FROM {schema}.document_relations
                     WHERE source_id = $1 OR target_id = $1"
                ),
                &[&document_id],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DocumentRelation {
                id: r.get(0),
                source_id: r.get(1),
                target_id: r.get(2),
                rel_type: r.get(3),
                weight: r.get(4),
            })
            .collect())
    }

    pub async fn export_backup(&self, path: &Path) -> Result<ExportSummary> {
        self.ensure_bootstrapped().await?;
        let schema = &self.config.rag_schema;
        let client = self.pool.get().await?;

        backup::truncate(path).await?;

        let doc_rows = client
            .query(&format!("SELECT id, title, content, content_hash, metadata, community_id FROM {schema}.documents ORDER BY id"), &[])
            .await?;

        let mut documents_exported = 0usize;
        for doc_row in &doc_rows {
            let doc_id: i64 = doc_row.get(0);
            let chunk_rows = client
                .query(
                    &format!(
                        "SELECT c.text, c.embedding::text, cs.start_index, cs.end_index, c.token_count
                         FROM {schema}.chunk_sources cs
                         JOIN {schema}.chunks c ON c.id = cs.chunk_id
                         WHERE cs.document_id = $1
                         ORDER BY cs.start_index"
                    ),
                    &[&doc_id],
                )
                .await?;
            let chunks: Vec<BackupChunk> = chunk_rows
                .into_iter()
                .map(|r| {
                    let embedding_text: String = r.get(1);
                    BackupChunk {
                        text: r.get(0),
                        embedding: crate::vector::from_pgvector_literal(&embedding_text),
                        start_index: r.get(2),
                        end_index: r.get(3),
                        token_count: r.get(4),
                    }
                })
                .collect();

            let relation_rows = client
                .query(
                    &format!(
                        "SELECT d.title, r.rel_type, r.weight FROM {schema}.document_relations r
                         JOIN {schema}.documents d ON d.id = r.target_id
                         WHERE r.source_id = $1"
                    ),
                    &[&doc_id],
                )
                .await?;
            let relations = relation_rows
                .into_iter()
                .map(|r| {
                    let title: String = r.get(0);
                    let rel_type: Option<String> = r.get(1);
                    let weight: f32 = r.get(2);
                    crate::models::RelationTarget { title, rel_type, weight: Some(weight) }
                })
                .collect();

            let line = BackupDocument {
                title: doc_row.get(1),
                content: doc_row.get(2),
                content_hash: doc_row.get(3),
                metadata: doc_row.get(4),
                community_id: doc_row.get(5),
                chunks,
                relations,
            };
            backup::append_line(path, &line).await?;
            documents_exported += 1;
        }

        Ok(ExportSummary { documents_exported, output_path: path.to_path_buf() })
    }

    pub async fn validate_backup(&self, path: &Path) -> Result<backup::ValidationReport> {
        let contents = tokio::fs::read_to_string(path).await?;
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();
        Ok(backup::validate_lines(&lines))
    }

    pub async fn import_backup(&self, path: &Path, expected_dimension: Option<usize>) -> Result<ImportSummary> {
        self.ensure_bootstrapped().await?;
        let contents = tokio::fs::read_to_string(path).await?;
        let raw_lines: Vec<String> = contents.lines().map(str::to_string).collect();
        let report = backup::validate_lines(&raw_lines);
        if !report.valid {
            return Err(RagError::InvalidBackup(format!(
                "{} error(s), dimensions observed: {:?}",
                report.errors.len(),
                report.dimensions
            )));
        }

        let schema = &self.config.rag_schema;
        let client = self.pool.get().await?;

        let mut documents_imported = 0usize;
        let mut chunks_inserted = 0usize;
        let mut duplicates_skipped = 0usize;
        let mut warnings = Vec::new();
        let mut title_to_ids: HashMap<String, Vec<i64>> = HashMap::new();
        let mut all_relations: Vec<(String, crate::models::RelationTarget)> = Vec::new();

        for raw in &raw_lines {
            if raw.trim().is_empty() {
                continue;
            }
            let doc: BackupDocument = serde_json::from_str(raw)?;

            if let (Some(expected), Some(first_chunk)) = (expected_dimension, doc.chunks.first()) {
                if first_chunk.embedding.len() != expected {
                    warnings.push(format!("skipped '{}': embedding dimension {} != expected {}", doc.title, first_chunk.embedding.len(), expected));
                    continue;
                }
            }

            let existing = client
                .query_opt(&format!("SELECT id FROM {schema}.documents WHERE content_hash = $1"), &[&doc.content_hash])
                .await?;
            if let Some(row) = existing {
                let id: i64 = row.get(0);
                title_to_ids.entry(doc.title.clone()).or_default().push(id);
                duplicates_skipped += 1;
                warnings.push(format!("duplicate content_hash for '{}', skipped insert", doc.title));
                for r in &doc.relations {
                    all_relations.push((doc.title.clone(), r.clone()));
                }
                continue;
            }

            let mut txn = client.transaction().await?;
            let row = txn
                .query_one(
                    &format!("INSERT INTO {schema}.documents (title, content, content_hash, metadata, community_id) VALUES ($1, $2, $3, $4, $5) RETURNING id"),
                    &[&doc.title, &doc.content, &doc.content_hash, &doc.metadata, &doc.community_id],
                )
                .await?;
            let doc_id: i64 = row.get(0);

            for chunk in &doc.chunks {
                let text_hash = hash::text_hash(&chunk.text);
                let literal = to_pgvector_literal(&chunk.embedding);
                let inserted = txn
                    .query_opt(
                        &format!(
                            "INSERT INTO {schema}.chunks (text, text_hash, token_count, embedding) VALUES ($1, $2, $3, $4::vector)
                             ON CONFLICT (text_hash) DO NOTHING RETURNING id"
                        ),
                        &[&chunk.text, &text_hash, &chunk.token_count, &literal],
                    )
                    .await?;
                let chunk_id: i64 = match inserted {
                    Some(r) => {
                        chunks_inserted += 1;
                        r.get(0)
                    }
                    None => {
                        let r = txn.query_one(&format!("SELECT id FROM {schema}.chunks WHERE text_hash = $1"), &[&text_hash]).await?;
                        r.get(0)
                    }
                };
                txn.execute(
                    &format!("INSERT INTO {schema}.chunk_sources (chunk_id, document_id, start_index, end_index) VALUES ($1, $2, $3, $4)"),
                    &[&chunk_id, &doc_id, &chunk.start_index, &chunk.end_index],
                )
                .await?;
            }
            txn.commit().await?;

            title_to_ids.entry(doc.title.clone()).or_default().push(doc_id);
            documents_imported += 1;
            for r in &doc.relations {
                all_relations.push((doc.title.clone(), r.clone()));
            }
        }

        let mut relation_rows: Vec<(i64, i64, Option<String>, f32)> = Vec::new();
        for (source_title, target) in &all_relations {
            if target.title == *source_title {
                continue;
            }
            let Some(source_ids) = title_to_ids.get(source_title) else { continue };
            let Some(target_ids) = title_to_ids.get(&target.title) else { continue };
            for &sid in source_ids {
                for &tid in target_ids {
                    relation_rows.push((sid, tid, target.rel_type.clone(), target.weight.unwrap_or(1.0)));
                }
            }
        }
        for batch in batches(&relation_rows, self.config.statement_batch_size) {
            for (sid, tid, rel_type, weight) in batch {
                client
                    .execute(
                        &format!(
                            "INSERT INTO {schema}.document_relations (source_id, target_id, rel_type, weight)
                             VALUES ($1, $2, $3, $4) ON CONFLICT (source_id, target_id) DO NOTHING"
                        ),
                        &[sid, tid, rel_type, weight],
                    )
                    .await?;
            }
        }

        Ok(ImportSummary { documents_imported, chunks_inserted, duplicates_skipped, warnings })
    }

    pub async fn build_community_summaries(&self, embed: Arc<dyn Embedder>, summarize: &dyn Fn(&[Document]) -> String, min_community_size: usize) -> Result<CommunitySummaryReport> {
        self.ensure_bootstrapped().await?;
        let schema = &self.config.rag_schema;
        let client = self.pool.get().await?;

        client
            .execute(&format!("DELETE FROM {schema}.documents WHERE metadata ->> '_ragts_type' = 'community_summary'"), &[])
            .await?;

        let rows = client
            .query(
                &format!(
                    "SELECT id, title, content, content_hash, metadata, community_id, created_at FROM {schema}.documents
                     WHERE community_id IS NOT NULL"
                ),
                &[],
            )
            .await?;

        let mut by_community: HashMap<i32, Vec<Document>> = HashMap::new();
        for row in rows {
            let doc = Document {
                id: row.get(0),
                title: row.get(1),
                content: row.get(2),
                content_hash: row.get(3),
                metadata: row.get(4),
                community_id: row.get(5),
                created_at: row.get(6),
            };
            if let Some(c) = doc.community_id {
                by_community.entry(c).or_default().push(doc);
            }
        }

        let mut communities_processed = 0usize;
        let mut summaries_generated = 0usize;

        for (community_id, members) in &by_community {
            communities_processed += 1;
            if members.len() < min_community_size {
                continue;
            }
            let summary_text = summarize(members);
            let member_titles: Vec<String> = members.iter().map(|m| m.title.clone()).collect();
            let title = format!("_ragts_community_{community_id}");
            let metadata = serde_json::json!({
                "_ragts_type": "community_summary",
                "_ragts_community_id": community_id,
                "_ragts_member_titles": member_titles,
            });

            let doc = IngestDoc { title, content: summary_text, metadata };
            let ingest_opts = IngestOptions::new(embed.clone());
            ingest::ingest(&self.pool, &self.config, std::slice::from_ref(&doc), &ingest_opts).await?;
            summaries_generated += 1;
        }

        Ok(CommunitySummaryReport { communities_processed, summaries_generated })
    }

    pub async fn global_query(
        &self,
        embed: &dyn Embedder,
        generate: &(dyn Fn(&str, &str) -> String + Sync),
        query: &str,
        limit: Option<usize>,
        max_communities: Option<usize>,
        rerank: Option<&dyn Reranker>,
    ) -> Result<GlobalQueryResult> {
        self.ensure_bootstrapped().await?;
        let schema = &self.config.rag_schema;
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT title, metadata FROM {schema}.documents
                     WHERE metadata ->> '_ragts_type' = 'community_summary'
                     ORDER BY (metadata ->> '_ragts_community_id')::int"
                ),
                &[],
            )
            .await?;

        let take = max_communities.unwrap_or(rows.len());
        let search_limit = limit.unwrap_or(10);

        let mut partial_answers = Vec::new();
        for row in rows.into_iter().take(take) {
            let title: String = row.get(0);
            let metadata: serde_json::Value = row.get(1);
            let community_id = metadata.get("_ragts_community_id").and_then(serde_json::Value::as_i64).unwrap_or_default();
            let member_titles: Vec<String> = metadata
                .get("_ragts_member_titles")
                .and_then(serde_json::Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            let mut cfg = SearchConfig::new(query);
            cfg.mode = RetrievalMode::Vector;
            cfg.limit = search_limit;
            let mut results = search::search(&self.pool, &self.config, embed, &cfg).await?;
            results.retain(|r| r.title == title || member_titles.contains(&r.title));

            if results.is_empty() {
                continue;
            }
            if let Some(reranker) = rerank {
                results = reranker.rerank(query, results).await.map_err(|e| RagError::Rerank(e.to_string()))?;
            }
            let context = crate::context::build_context(&results);
            let answer = generate(&context, query);
            partial_answers.push(PartialAnswer { community_id, answer });
        }

        let combined: String = partial_answers
            .iter()
            .map(|p| format!("[Community {}]\n{}\n\n", p.community_id, p.answer))
            .collect::<String>()
            .trim_end()
            .to_string();
        let answer = generate(&combined, query);

        Ok(GlobalQueryResult { answer, partial_answers })
    }
}

#[derive(Debug, Clone)]
pub struct PartialAnswer {
    pub community_id: i64,
    pub answer: String,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalQueryResult {
    pub answer: String,
    pub partial_answers: Vec<PartialAnswer>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub documents_exported: usize,
    pub output_path: std::path::PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub documents_imported: usize,
    pub chunks_inserted: usize,
    pub duplicates_skipped: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommunitySummaryReport {
    pub communities_processed: usize,
    pub summaries_generated: usize,
}
