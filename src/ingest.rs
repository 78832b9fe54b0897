//! Content-hash + chunk-text deduplicating ingest pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};

use crate::backup::{self, BackupChunk, BackupDocument};
use crate::chunker::{self, ChunkOptions};
use crate::community;
use crate::config::RagConfig;
use crate::db::batches;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::hash;
use crate::models::RelationTarget;
use crate::pool::RagPool;
use crate::vector::to_pgvector_literal;

/// One document submitted for ingestion.
#[derive(Debug, Clone)]
pub struct IngestDoc {
    pub title: String,
    pub content: String,
    pub metadata: Value,
}

impl IngestDoc {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { title: title.into(), content: content.into(), metadata: Value::Object(Default::default()) }
    }
}

pub type TransformChunk = dyn Fn(&str, &IngestDoc) -> String + Send + Sync;
pub type ProgressFn = dyn Fn(&str, usize, usize) + Send + Sync;

/// Per-call ingest configuration. `embed` is the only required field.
pub struct IngestOptions {
    pub embed: Arc<dyn Embedder>,
    pub chunk_options: ChunkOptions,
    pub transform_chunk: Option<Box<TransformChunk>>,
    pub batch_size: usize,
    pub backup_path: Option<PathBuf>,
    pub relations: Option<HashMap<String, Vec<RelationTarget>>>,
    pub on_progress: Option<Box<ProgressFn>>,
}

impl IngestOptions {
    pub fn new(embed: Arc<dyn Embedder>) -> Self {
        Self {
            embed,
            chunk_options: ChunkOptions::default(),
            transform_chunk: None,
            batch_size: 64,
            backup_path: None,
            relations: None,
            on_progress: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestResult {
    pub documents_inserted: usize,
    pub duplicates_skipped: usize,
    pub chunks_inserted: usize,
    pub chunks_reused: usize,
    pub relations_inserted: usize,
    pub unresolved_relations: Vec<String>,
    pub communities_detected: i32,
}

struct DedupEntry {
    text: String,
    token_count: i32,
    sources: Vec<(i64, i32, i32)>,
}

struct NewDoc {
    id: i64,
    title: String,
    content: String,
}

pub async fn ingest(pool: &RagPool, config: &RagConfig, docs: &[IngestDoc], opts: &IngestOptions) -> Result<IngestResult> {
    let schema = &config.rag_schema;
    let client = pool.get().await?;
    let total = docs.len();

    let mut result = IngestResult::default();
    let mut dedup: HashMap<String, DedupEntry> = HashMap::new();
    let mut new_docs: Vec<NewDoc> = Vec::new();
    let mut title_to_ids: HashMap<String, Vec<i64>> = HashMap::new();

    // Step 1: per-document insert + chunk.
    for (i, doc) in docs.iter().enumerate() {
        let content_hash = hash::content_hash(&doc.title, &doc.content);
        let existing = client
            .query_opt(&format!("SELECT id FROM {schema}.documents WHERE content_hash = $1"), &[&content_hash])
            .await?;

        if existing.is_some() {
            result.duplicates_skipped += 1;
            debug!(title = %doc.title, "duplicate content, skipping");
        } else {
            let row = client
                .query_one(
                    &format!(
                        "INSERT INTO {schema}.documents (title, content, content_hash, metadata) VALUES ($1, $2, $3, $4) RETURNING id"
                    ),
                    &[&doc.title, &doc.content, &content_hash, &doc.metadata],
                )
                .await?;
            let doc_id: i64 = row.get(0);
            title_to_ids.entry(doc.title.clone()).or_default().push(doc_id);
            new_docs.push(NewDoc { id: doc_id, title: doc.title.clone(), content: doc.content.clone() });
            result.documents_inserted += 1;

            for chunk in chunker::chunk(&doc.content, &opts.chunk_options, None) {
                let final_text = match &opts.transform_chunk {
                    Some(f) => f(&chunk.text, doc),
                    None => chunk.text.clone(),
                };
                let text_hash = hash::text_hash(&final_text);
                let entry = dedup.entry(text_hash).or_insert_with(|| DedupEntry {
                    text: final_text,
                    token_count: chunk.token_count as i32,
                    sources: Vec::new(),
                });
                entry.sources.push((doc_id, chunk.start_index as i32, chunk.end_index as i32));
            }
        }

        if let Some(cb) = &opts.on_progress {
            cb(&doc.title, i + 1, total);
        }
    }

    info!(documents_inserted = result.documents_inserted, duplicates = result.duplicates_skipped, "ingest: documents processed");

    // Step 2: which chunk texts already exist.
    let all_hashes: Vec<String> = dedup.keys().cloned().collect();
    let mut existing_hashes: HashMap<String, i64> = HashMap::new();
    for batch in batches(&all_hashes, config.statement_batch_size) {
        let rows = client
            .query(&format!("SELECT text_hash, id FROM {schema}.chunks WHERE text_hash = ANY($1)"), &[&batch])
            .await?;
        for row in rows {
            let h: String = row.get(0);
            let id: i64 = row.get(1);
            existing_hashes.insert(h, id);
        }
    }
    result.chunks_reused = existing_hashes.len();

    // Step 3: embed the new texts in order, in batches.
    let new_hashes: Vec<String> = all_hashes.iter().filter(|h| !existing_hashes.contains_key(*h)).cloned().collect();
    let mut new_embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    for batch in batches(&new_hashes, opts.batch_size) {
        let texts: Vec<&str> = batch.iter().map(|h| dedup[h].text.as_str()).collect();
        let vectors = opts.embed.embed(&texts).await.map_err(|e| crate::error::RagError::Embed(e.to_string()))?;
        for (h, v) in batch.iter().zip(vectors.into_iter()) {
            new_embeddings.insert(h.clone(), v);
        }
    }

    // Step 4: insert new chunk rows, then resolve text_hash -> chunk_id for everything.
    for batch in batches(&new_hashes, config.statement_batch_size) {
        insert_chunk_batch(&client, schema, batch, &dedup, &new_embeddings).await?;
    }

    let mut hash_to_chunk_id: HashMap<String, i64> = existing_hashes;
    for batch in batches(&all_hashes, config.statement_batch_size) {
        let rows = client
            .query(&format!("SELECT text_hash, id FROM {schema}.chunks WHERE text_hash = ANY($1)"), &[&batch])
            .await?;
        for row in rows {
            let h: String = row.get(0);
            let id: i64 = row.get(1);
            hash_to_chunk_id.insert(h, id);
        }
    }
    result.chunks_inserted = new_hashes.len();

    // Step 5: chunk_sources junction rows.
    let mut source_rows: Vec<(i64, i64, i32, i32)> = Vec::new();
    for (h, entry) in &dedup {
        if let Some(&chunk_id) = hash_to_chunk_id.get(h) {
            for &(doc_id, start, end) in &entry.sources {
                source_rows.push((chunk_id, doc_id, start, end));
            }
        }
    }
    for batch in batches(&source_rows, config.statement_batch_size) {
        insert_chunk_source_batch(&client, schema, batch).await?;
    }

    // Step 7: backup append.
    if let Some(path) = &opts.backup_path {
        append_backup_entries(&client, schema, path, &new_docs, &hash_to_chunk_id, opts).await?;
    }

    // Step 8: relations.
    if let Some(relations) = &opts.relations {
        let (inserted, unresolved) =
            insert_relations(&client, schema, config, relations, &title_to_ids).await?;
        result.relations_inserted = inserted;
        result.unresolved_relations = unresolved;
    }

    // Step 9: community detection, only if the caller passed a relations map at all.
    if opts.relations.is_some() {
        result.communities_detected = recompute_communities(&client, schema, config).await?;
    }

    Ok(result)
}

async fn insert_chunk_batch(
    client: &deadpool_postgres::Object,
    schema: &str,
    batch: &[String],
    dedup: &HashMap<String, DedupEntry>,
    embeddings: &HashMap<String, Vec<f32>>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut sql = format!("INSERT INTO {schema}.chunks (text, text_hash, token_count, embedding) VALUES ");
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
    for (i, h) in batch.iter().enumerate() {
        let entry = &dedup[h];
        let embedding = embeddings.get(h).cloned().unwrap_or_default();
        if i > 0 {
            sql.push(',');
        }
        let base = i * 4;
        sql.push_str(&format!("(${}, ${}, ${}, ${}::vector)", base + 1, base + 2, base + 3, base + 4));
        params.push(Box::new(entry.text.clone()));
        params.push(Box::new(h.clone()));
        params.push(Box::new(entry.token_count));
        params.push(Box::new(to_pgvector_literal(&embedding)));
    }
    sql.push_str(" ON CONFLICT (text_hash) DO NOTHING");
    let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
    client.execute(sql.as_str(), &refs).await?;
    Ok(())
}

async fn insert_chunk_source_batch(client: &deadpool_postgres::Object, schema: &str, batch: &[(i64, i64, i32, i32)]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut sql = format!("INSERT INTO {schema}.chunk_sources (chunk_id, document_id, start_index, end_index) VALUES ");
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
    for (i, (chunk_id, doc_id, start, end)) in batch.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        let base = i * 4;
        sql.push_str(&format!("(${}, ${}, ${}, ${})", base + 1, base + 2, base + 3, base + 4));
        params.push(Box::new(*chunk_id));
        params.push(Box::new(*doc_id));
        params.push(Box::new(*start));
        params.push(Box::new(*end));
    }
    let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
    client.execute(sql.as_str(), &refs).await?;
    Ok(())
}

async fn append_backup_entries(
    client: &deadpool_postgres::Object,
    schema: &str,
    path: &std::path::Path,
    new_docs: &[NewDoc],
    hash_to_chunk_id: &HashMap<String, i64>,
    opts: &IngestOptions,
) -> Result<()> {
    // Resolve embeddings for every hash referenced by these documents (new or reused).
    let all_hashes: Vec<String> = hash_to_chunk_id.keys().cloned().collect();
    let mut embedding_by_hash: HashMap<String, Vec<f32>> = HashMap::new();
    for batch in batches(&all_hashes, 500) {
        let rows = client
            .query(
                &format!("SELECT text_hash, embedding::text FROM {schema}.chunks WHERE text_hash = ANY($1)"),
                &[&batch],
            )
            .await?;
        for row in rows {
            let h: String = row.get(0);
            let lit: String = row.get(1);
            embedding_by_hash.insert(h, crate::vector::from_pgvector_literal(&lit));
        }
    }

    for doc in new_docs {
        let reparsed = chunker::chunk(&doc.content, &opts.chunk_options, None);
        let mut backup_chunks = Vec::with_capacity(reparsed.len());
        for c in reparsed {
            let final_text = match &opts.transform_chunk {
                Some(f) => f(&c.text, &IngestDoc { title: doc.title.clone(), content: doc.content.clone(), metadata: Value::Null }),
                None => c.text.clone(),
            };
            let h = hash::text_hash(&final_text);
            let embedding = embedding_by_hash.get(&h).cloned().unwrap_or_default();
            backup_chunks.push(BackupChunk {
                text: final_text,
                embedding,
                start_index: c.start_index as i32,
                end_index: c.end_index as i32,
                token_count: c.token_count as i32,
            });
        }

        let row = client
            .query_one(&format!("SELECT content_hash, metadata FROM {schema}.documents WHERE id = $1"), &[&doc.id])
            .await?;
        let content_hash: String = row.get(0);
        let metadata: Value = row.get(1);

        let line = BackupDocument {
            title: doc.title.clone(),
            content: doc.content.clone(),
            content_hash,
            metadata,
            community_id: None,
            chunks: backup_chunks,
            relations: Vec::new(),
        };
        backup::append_line(path, &line).await?;
    }
    Ok(())
}

async fn insert_relations(
    client: &deadpool_postgres::Object,
    schema: &str,
    config: &RagConfig,
    relations: &HashMap<String, Vec<RelationTarget>>,
    title_to_ids: &HashMap<String, Vec<i64>>,
) -> Result<(usize, Vec<String>)> {
    let mut resolved: HashMap<String, Vec<i64>> = title_to_ids.clone();

    let mut missing_titles: Vec<String> = Vec::new();
    for targets in relations.values() {
        for t in targets {
            if !resolved.contains_key(&t.title) {
                missing_titles.push(t.title.clone());
            }
        }
    }
    for batch in batches(&missing_titles, config.statement_batch_size) {
        let rows = client
            .query(&format!("SELECT id, title FROM {schema}.documents WHERE title = ANY($1)"), &[&batch])
            .await?;
        for row in rows {
            let id: i64 = row.get(0);
            let title: String = row.get(1);
            resolved.entry(title).or_default().push(id);
        }
    }

    let mut rows: Vec<(i64, i64, Option<String>, f32)> = Vec::new();
    let mut unresolved: Vec<String> = Vec::new();

    for (source_title, targets) in relations {
        let Some(source_ids) = resolved.get(source_title) else { continue };
        for target in targets {
            if target.title == *source_title {
                continue; // self-reference: skipped silently
            }
            match resolved.get(&target.title) {
                Some(target_ids) if !target_ids.is_empty() => {
                    for &sid in source_ids {
                        for &tid in target_ids {
                            rows.push((sid, tid, target.rel_type.clone(), target.weight.unwrap_or(1.0)));
                        }
                    }
                }
                _ => unresolved.push(target.title.clone()),
            }
        }
    }
    unresolved.sort();
    unresolved.dedup();

    let mut inserted = 0usize;
    for batch in batches(&rows, config.statement_batch_size) {
        inserted += insert_relation_batch(client, schema, batch).await?;
    }

    Ok((inserted, unresolved))
}

async fn insert_relation_batch(
    client: &deadpool_postgres::Object,
    schema: &str,
    batch: &[(i64, i64, Option<String>, f32)],
) -> Result<usize> {
    if batch.is_empty() {
        return Ok(0);
    }
    let mut sql = format!("INSERT INTO {schema}.document_relations (source_id, target_id, rel_type, weight) VALUES ");
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
    for (i, (sid, tid, rel_type, weight)) in batch.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        let base = i * 4;
        sql.push_str(&format!("(${}, ${}, ${}, ${})", base + 1, base + 2, base + 3, base + 4));
        params.push(Box::new(*sid));
        params.push(Box::new(*tid));
        params.push(Box::new(rel_type.clone()));
        params.push(Box::new(*weight));
    }
    sql.push_str(" ON CONFLICT (source_id, target_id) DO NOTHING");
    let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
    let affected = client.execute(sql.as_str(), &refs).await?;
    Ok(affected as usize)
}

pub(crate) async fn recompute_communities(client: &deadpool_postgres::Object, schema: &str, config: &RagConfig) -> Result<i32> {
    let doc_rows = client.query(&format!("SELECT id FROM {schema}.documents"), &[]).await?;
    let doc_ids: Vec<i64> = doc_rows.iter().map(|r| r.get(0)).collect();

    let edge_rows = client.query(&format!("SELECT source_id, target_id FROM {schema}.document_relations"), &[]).await?;
    let edges: Vec<(i64, i64)> = edge_rows.iter().map(|r| (r.get(0), r.get(1))).collect();

    let (assignment, count) = community::detect(&doc_ids, &edges);

    let pairs: Vec<(i64, i32)> = assignment.into_iter().collect();
    for batch in batches(&pairs, config.statement_batch_size) {
        for (doc_id, community_id) in batch {
            client
                .execute(
                    &format!("UPDATE {schema}.documents SET community_id = $1 WHERE id = $2"),
                    &[community_id, doc_id],
                )
                .await?;
        }
    }

    Ok(count)
}
