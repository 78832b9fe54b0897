//! Hybrid (vector + BM25) search with reciprocal-rank fusion, relation-graph
//! expansion, and community-boost expansion.

use std::collections::HashMap;

use tokio_postgres::Row;

use crate::config::RagConfig;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::models::{SearchMode, SearchResult};
use crate::pool::RagPool;
use crate::vector::to_pgvector_literal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Vector,
    Bm25,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub query: String,
    pub vector_query: Option<String>,
    pub mode: RetrievalMode,
    pub limit: usize,
    pub threshold: Option<f32>,
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub graph_hops: Option<u32>,
    pub graph_weight: f32,
    pub graph_decay: f32,
    pub graph_chunk_limit: usize,
    pub community_boost: Option<f32>,
}

impl SearchConfig {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            vector_query: None,
            mode: RetrievalMode::Hybrid,
            limit: 10,
            threshold: None,
            rrf_k: 60.0,
            vector_weight: 1.0,
            bm25_weight: 1.0,
            graph_hops: None,
            graph_weight: 1.0,
            graph_decay: 1.0,
            graph_chunk_limit: 200,
            community_boost: None,
        }
    }
}

struct PrimaryRow {
    chunk_id: i64,
    document_id: i64,
    title: String,
    text: String,
    score: f32,
    community_id: Option<i32>,
}

fn row_to_primary(row: &Row) -> PrimaryRow {
    PrimaryRow {
        chunk_id: row.get("chunk_id"),
        document_id: row.get("document_id"),
        title: row.get("title"),
        text: row.get("text"),
        score: row.get::<_, f64>("score") as f32,
        community_id: row.get("community_id"),
    }
}

pub async fn search(pool: &RagPool, config: &RagConfig, embed: &dyn Embedder, cfg: &SearchConfig) -> Result<Vec<SearchResult>> {
    let schema = &config.rag_schema;
    let client = pool.get().await?;
    let fetch_limit = (cfg.limit * 3).max(cfg.limit);

    let embed_text = cfg.vector_query.as_deref().unwrap_or(&cfg.query);
    let mut query_vector: Option<Vec<f32>> = None;
    if cfg.mode != RetrievalMode::Bm25 {
        let vecs = embed.embed(&[embed_text]).await.map_err(|e| RagError::Embed(e.to_string()))?;
        query_vector = vecs.into_iter().next();
    }

    let mut results: Vec<SearchResult> = match cfg.mode {
        RetrievalMode::Vector => {
            let rows = vector_search(&client, schema, query_vector.as_deref().unwrap_or_default(), fetch_limit, cfg.threshold).await?;
            rows.into_iter().map(|r| to_search_result_primary(r, SearchMode::Vector, None)).collect()
        }
        RetrievalMode::Bm25 => {
            let rows = bm25_search(&client, schema, &cfg.query, fetch_limit).await?;
            rows.into_iter().map(|r| to_search_result_primary(r, SearchMode::Bm25, None)).collect()
        }
        RetrievalMode::Hybrid => {
            let (vector_rows, bm25_rows) = tokio::try_join!(
                vector_search(&client, schema, query_vector.as_deref().unwrap_or_default(), fetch_limit, None),
                bm25_search(&client, schema, &cfg.query, fetch_limit),
            )?;
            fuse_rrf(vector_rows, bm25_rows, cfg.rrf_k, cfg.vector_weight, cfg.bm25_weight)
        }
    };

    dedup_by_text(&mut results);
    results.truncate(cfg.limit);

    let mut any_expansion = false;

    if let Some(hops) = cfg.graph_hops.filter(|h| *h > 0) {
        let seed_docs: Vec<i64> = results.iter().map(|r| r.document_id).collect();
        if !seed_docs.is_empty() {
            let expanded = expand_graph(&client, schema, &seed_docs, hops, cfg.graph_decay, cfg.graph_chunk_limit, cfg.rrf_k, cfg.graph_weight, &results).await?;
            if !expanded.is_empty() {
                any_expansion = true;
                results.extend(expanded);
            }
        }
    }

    if let Some(boost) = cfg.community_boost.filter(|b| *b > 0.0) {
        if let Some(top_community) = dominant_community(&results) {
            let q = match &query_vector {
                Some(v) => v.clone(),
                None => embed.embed(&[embed_text]).await.map_err(|e| RagError::Embed(e.to_string()))?.into_iter().next().unwrap_or_default(),
            };
            let expanded = expand_community(&client, schema, top_community, &q, cfg.graph_chunk_limit, cfg.rrf_k, boost, &results).await?;
            if !expanded.is_empty() {
                any_expansion = true;
                results.extend(expanded);
            }
        }
    }

    if any_expansion {
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    }

    Ok(results)
}

async fn vector_search(
    client: &deadpool_postgres::Object,
    schema: &str,
    query_vector: &[f32],
    limit: usize,
    threshold: Option<f32>,
) -> Result<Vec<PrimaryRow>> {
    let literal = to_pgvector_literal(query_vector);
    let limit = limit as i64;
    let sql = format!(
        "SELECT chunk_id, document_id, title, text, community_id, score FROM (
             SELECT DISTINCT ON (c.id)
                    c.id AS chunk_id, cs.document_id AS document_id, d.title AS title, c.text AS text,
                    d.community_id AS community_id,
                    1.0 - (c.embedding <=> $1::vector) AS score
             FROM {schema}.chunks c
             JOIN {schema}.chunk_sources cs ON cs.chunk_id = c.id
             JOIN {schema}.documents d ON d.id = cs.document_id
             ORDER BY c.id, cs.document_id DESC
         ) tie_broken
         WHERE ($2::real IS NULL OR score > $2)
         ORDER BY score DESC
         LIMIT $3"
    );
    let rows = client.query(&sql, &[&literal, &threshold, &limit]).await?;
    Ok(rows.iter().map(row_to_primary).collect())
}

async fn bm25_search(client: &deadpool_postgres::Object, schema: &str, query: &str, limit: usize) -> Result<Vec<PrimaryRow>> {
    let limit = limit as i64;
    let sql = format!(
        "SELECT chunk_id, document_id, title, text, community_id, score FROM (
             SELECT DISTINCT ON (c.id)
                    c.id AS chunk_id, cs.document_id AS document_id, d.title AS title, c.text AS text,
                    d.community_id AS community_id,
                    -(c.text <=> $1) AS score
             FROM {schema}.chunks c
             JOIN {schema}.chunk_sources cs ON cs.chunk_id = c.id
             JOIN {schema}.documents d ON d.id = cs.document_id
             WHERE (c.text <=> $1) < 0
             ORDER BY c.id, cs.document_id DESC
         ) tie_broken
         ORDER BY score DESC
         LIMIT $2"
    );
    let rows = client.query(&sql, &[&query, &limit]).await?;
    Ok(rows.iter().map(row_to_primary).collect())
}

fn fuse_rrf(vector_rows: Vec<PrimaryRow>, bm25_rows: Vec<PrimaryRow>, rrf_k: f32, vector_weight: f32, bm25_weight: f32) -> Vec<SearchResult> {
    let mut by_chunk: HashMap<i64, (PrimaryRow, f32)> = HashMap::new();

    for (rank, row) in vector_rows.into_iter().enumerate() {
        let contribution = vector_weight / (rrf_k + rank as f32 + 1.0);
        by_chunk.entry(row.chunk_id).and_modify(|(_, s)| *s += contribution).or_insert_with(|| {
            let score = contribution;
            (row, score)
        });
    }
    for (rank, row) in bm25_rows.into_iter().enumerate() {
        let contribution = bm25_weight / (rrf_k + rank as f32 + 1.0);
        by_chunk
            .entry(row.chunk_id)
            .and_modify(|(_, s)| *s += contribution)
            .or_insert_with(|| (row, contribution));
    }

    let mut merged: Vec<SearchResult> = by_chunk
        .into_values()
        .map(|(row, score)| SearchResult {
            chunk_id: row.chunk_id,
            document_id: row.document_id,
            title: row.title,
            text: row.text,
            score,
            mode: SearchMode::Vector,
            community_id: row.community_id,
            relation_type: None,
        })
        .collect();
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

/// Builds a result from a primary (vector/BM25) row, keeping the community
/// id the row's tie-broken document already carries.
fn to_search_result_primary(row: PrimaryRow, mode: SearchMode, relation_type: Option<String>) -> SearchResult {
    SearchResult {
        chunk_id: row.chunk_id,
        document_id: row.document_id,
        title: row.title,
        text: row.text,
        score: row.score,
        mode,
        community_id: row.community_id,
        relation_type,
    }
}

/// Builds a result from a graph/community-expansion row, where the
/// community id is supplied explicitly by the caller rather than the row.
fn to_search_result(row: PrimaryRow, mode: SearchMode, community_id: Option<i32>, relation_type: Option<String>) -> SearchResult {
    SearchResult {
        chunk_id: row.chunk_id,
        document_id: row.document_id,
        title: row.title,
        text: row.text,
        score: row.score,
        mode,
        community_id,
        relation_type,
    }
}

fn dedup_by_text(results: &mut Vec<SearchResult>) {
    let mut seen = std::collections::HashSet::new();
    results.retain(|r| seen.insert(r.text.clone()));
}

struct GraphNode {
    document_id: i64,
    path_weight: f32,
    rel_type: Option<String>,
}

async fn expand_graph(
    client: &deadpool_postgres::Object,
    schema: &str,
    seed_docs: &[i64],
    hops: u32,
    decay: f32,
    chunk_limit: usize,
    rrf_k: f32,
    graph_weight: f32,
    existing: &[SearchResult],
) -> Result<Vec<SearchResult>> {
    let hops = hops as i32;
    let sql = format!(
        "WITH RECURSIVE expansion(document_id, path_weight, rel_type, depth, visited) AS (
            SELECT CASE WHEN r.source_id = ANY($1) THEN r.target_id ELSE r.source_id END,
                   COALESCE(r.weight, 1.0) * $2::real,
                   r.rel_type,
                   1,
                   ARRAY[CASE WHEN r.source_id = ANY($1) THEN r.source_id ELSE r.target_id END]
            FROM {schema}.document_relations r
            WHERE (r.source_id = ANY($1) OR r.target_id = ANY($1))
              AND NOT (CASE WHEN r.source_id = ANY($1) THEN r.target_id ELSE r.source_id END = ANY($1))
            UNION ALL
            SELECT CASE WHEN r.source_id = e.document_id THEN r.target_id ELSE r.source_id END,
                   e.path_weight * COALESCE(r.weight, 1.0) * $2::real,
                   r.rel_type,
                   e.depth + 1,
                   e.visited || e.document_id
            FROM expansion e
            JOIN {schema}.document_relations r ON r.source_id = e.document_id OR r.target_id = e.document_id
            WHERE e.depth < $3
              AND NOT (CASE WHEN r.source_id = e.document_id THEN r.target_id ELSE r.source_id END = ANY($1))
              AND NOT (CASE WHEN r.source_id = e.document_id THEN r.target_id ELSE r.source_id END = ANY(e.visited))
        )
        SELECT document_id, MAX(path_weight) AS path_weight,
               (ARRAY_AGG(rel_type ORDER BY path_weight DESC))[1] AS rel_type
        FROM expansion
        GROUP BY document_id"
    );

    let rows = client.query(&sql, &[&seed_docs, &decay, &hops]).await?;
    let mut nodes: Vec<GraphNode> = rows
        .iter()
        .map(|row| GraphNode {
            document_id: row.get("document_id"),
            path_weight: row.get::<_, f64>("path_weight") as f32,
            rel_type: row.get("rel_type"),
        })
        .collect();
    nodes.sort_by(|a, b| b.path_weight.partial_cmp(&a.path_weight).unwrap_or(std::cmp::Ordering::Equal));

    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let seen_texts: std::collections::HashSet<&str> = existing.iter().map(|r| r.text.as_str()).collect();
    let doc_ids: Vec<i64> = nodes.iter().map(|n| n.document_id).collect();
    let weight_by_doc: HashMap<i64, (f32, Option<String>)> =
        nodes.into_iter().map(|n| (n.document_id, (n.path_weight, n.rel_type))).collect();

    let chunk_limit = chunk_limit as i64;
    let sql = format!(
        "SELECT c.id AS chunk_id, d.id AS document_id, d.title AS title, c.text AS text
         FROM {schema}.chunks c
         JOIN {schema}.chunk_sources cs ON cs.chunk_id = c.id
         JOIN {schema}.documents d ON d.id = cs.document_id
         WHERE d.id = ANY($1)
         GROUP BY c.id, d.id, d.title, c.text
         LIMIT $2"
    );
    let rows = client.query(&sql, &[&doc_ids, &chunk_limit]).await?;

    let mut candidates: Vec<(PrimaryRow, f32, Option<String>)> = rows
        .into_iter()
        .filter_map(|row| {
            let text: String = row.get("text");
            if seen_texts.contains(text.as_str()) {
                return None;
            }
            let document_id: i64 = row.get("document_id");
            let (weight, rel_type) = weight_by_doc.get(&document_id).cloned().unwrap_or((0.0, None));
            Some((
                PrimaryRow { chunk_id: row.get("chunk_id"), document_id, title: row.get("title"), text, score: 0.0, community_id: None },
                weight,
                rel_type,
            ))
        })
        .collect();

    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Ok(candidates
        .into_iter()
        .enumerate()
        .map(|(i, (row, _, rel_type))| {
            let score = graph_weight / (rrf_k + i as f32 + 1.0);
            let mut result = to_search_result(row, SearchMode::Graph, None, rel_type);
            result.score = score;
            result
        })
        .collect())
}

fn dominant_community(results: &[SearchResult]) -> Option<i32> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for r in results {
        if let Some(c) = r.community_id {
            *counts.entry(c).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(c, _)| c)
}

async fn expand_community(
    client: &deadpool_postgres::Object,
    schema: &str,
    community_id: i32,
    query_vector: &[f32],
    chunk_limit: usize,
    rrf_k: f32,
    boost: f32,
    existing: &[SearchResult],
) -> Result<Vec<SearchResult>> {
    let literal = to_pgvector_literal(query_vector);
    let chunk_limit = chunk_limit as i64;
    let sql = format!(
        "SELECT c.id AS chunk_id, d.id AS document_id, d.title AS title, c.text AS text,
                d.community_id AS community_id,
                1.0 - (c.embedding <=> $1::vector) AS score
         FROM {schema}.chunks c
         JOIN {schema}.chunk_sources cs ON cs.chunk_id = c.id
         JOIN {schema}.documents d ON d.id = cs.document_id
         WHERE d.community_id = $2
           AND NOT (d.metadata ->> '_ragts_type' = 'community_summary')
         GROUP BY c.id, d.id, d.title, c.text, d.community_id
         ORDER BY score DESC
         LIMIT $3"
    );
    let rows = client.query(&sql, &[&literal, &community_id, &chunk_limit]).await?;

    let seen_texts: std::collections::HashSet<&str> = existing.iter().map(|r| r.text.as_str()).collect();
    let filtered: Vec<PrimaryRow> = rows
        .iter()
        .map(row_to_primary)
        .filter(|r| !seen_texts.contains(r.text.as_str()))
        .collect();

    Ok(filtered
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let score = boost / (rrf_k + i as f32 + 1.0);
            let mut result = to_search_result(row, SearchMode::Community, Some(community_id), None);
            result.score = score;
            result
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(chunk_id: i64, text: &str, score: f32) -> PrimaryRow {
        PrimaryRow { chunk_id, document_id: 1, title: "T".into(), text: text.into(), score, community_id: None }
    }

    #[test]
    fn rrf_fusion_favors_items_ranked_highly_in_both_lists() {
        let vector_rows = vec![row(1, "a", 0.9), row(2, "b", 0.8)];
        let bm25_rows = vec![row(2, "b", 5.0), row(1, "a", 3.0)];
        let fused = fuse_rrf(vector_rows, bm25_rows, 60.0, 1.0, 1.0);
        // both appear in both lists with close ranks; fused score must be positive and ordered
        assert_eq!(fused.len(), 2);
        assert!(fused[0].score >= fused[1].score);
    }

    #[test]
    fn rrf_fusion_scores_item_present_in_one_list_lower_than_in_both() {
        let vector_rows = vec![row(1, "a", 0.9)];
        let bm25_rows = vec![row(1, "a", 5.0), row(2, "b", 3.0)];
        let fused = fuse_rrf(vector_rows, bm25_rows, 60.0, 1.0, 1.0);
        let a = fused.iter().find(|r| r.chunk_id == 1).unwrap();
        let b = fused.iter().find(|r| r.chunk_id == 2).unwrap();
        assert!(a.score > b.score);
    }

    #[test]
    fn rrf_fusion_carries_community_id_through_from_primary_rows() {
        let mut a = row(1, "a", 0.9);
        a.community_id = Some(3);
        let fused = fuse_rrf(vec![a], vec![], 60.0, 1.0, 1.0);
        assert_eq!(fused[0].community_id, Some(3));
    }

    #[test]
    fn dedup_by_text_keeps_first_occurrence() {
        let mut results = vec![
            SearchResult { chunk_id: 1, document_id: 1, title: "A".into(), text: "same".into(), score: 1.0, mode: SearchMode::Vector, community_id: None, relation_type: None },
            SearchResult { chunk_id: 2, document_id: 1, title: "B".into(), text: "same".into(), score: 0.5, mode: SearchMode::Bm25, community_id: None, relation_type: None },
        ];
        dedup_by_text(&mut results);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, 1);
    }

    #[test]
    fn dominant_community_picks_most_frequent() {
        let results = vec![
            SearchResult { chunk_id: 1, document_id: 1, title: "A".into(), text: "a".into(), score: 1.0, mode: SearchMode::Vector, community_id: Some(1), relation_type: None },
            SearchResult { chunk_id: 2, document_id: 2, title: "B".into(), text: "b".into(), score: 1.0, mode: SearchMode::Vector, community_id: Some(2), relation_type: None },
            SearchResult { chunk_id: 3, document_id: 3, title: "C".into(), text: "c".into(), score: 1.0, mode: SearchMode::Vector, community_id: Some(2), relation_type: None },
        ];
        assert_eq!(dominant_community(&results), Some(2));
    }

    #[test]
    fn dominant_community_is_none_when_no_result_has_one() {
        let results = vec![SearchResult { chunk_id: 1, document_id: 1, title: "A".into(), text: "a".into(), score: 1.0, mode: SearchMode::Vector, community_id: None, relation_type: None }];
        assert_eq!(dominant_community(&results), None);
    }
}
