use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::processing::embedder::cosine_similarity;
use crate::state::AppState;
use crate::validation::require_len;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;
const SNIPPET_CHARS: usize = 240;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub document_id: Uuid,
    pub filename: String,
    pub chunk_index: i32,
    pub score: f32,
    pub snippet: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChunkCandidate {
    pub document_id: Uuid,
    pub filename: String,
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
}

fn snippet(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head.trim_end())
    } else {
        head
    }
}

/// Top `limit` candidates by cosine similarity to `query`, best first.
/// Non-positive scores are dropped.
pub fn rank(query: &[f32], candidates: Vec<ChunkCandidate>, limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|c| {
            let score = cosine_similarity(query, &c.embedding);
            (score > 0.0).then(|| SearchHit {
                document_id: c.document_id,
                filename: c.filename,
                chunk_index: c.chunk_index,
                score,
                snippet: snippet(&c.content),
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    hits.truncate(limit);
    hits
}

/// POST /api/search
pub async fn handle_search(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    require_len("Query", &req.query, 1, 1000)?;
    let limit = req.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let query = state
        .embedder
        .embed(std::slice::from_ref(&req.query))
        .await?
        .pop()
        .unwrap_or_default();

    let candidates: Vec<ChunkCandidate> = sqlx::query_as(
        r#"
        SELECT c.document_id, d.filename, c.chunk_index, c.content, c.embedding
        FROM document_chunks c
        JOIN documents d ON d.id = c.document_id
        WHERE d.tenant_id = $1 AND d.status = 'PROCESSED'
        "#,
    )
    .bind(auth.tenant_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rank(&query, candidates, limit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::embedder::HashingEmbedder;

    fn candidate(embedder: &HashingEmbedder, filename: &str, index: i32, text: &str) -> ChunkCandidate {
        ChunkCandidate {
            document_id: Uuid::new_v4(),
            filename: filename.to_string(),
            chunk_index: index,
            content: text.to_string(),
            embedding: embedder.embed_one(text),
        }
    }

    #[test]
    fn test_rank_orders_by_similarity_and_truncates() {
        let embedder = HashingEmbedder::new(256);
        let candidates = vec![
            candidate(&embedder, "hiking.txt", 0, "mountain trail hiking boots"),
            candidate(&embedder, "invoice.pdf", 0, "invoice payment due in thirty days"),
            candidate(&embedder, "invoice.pdf", 1, "payment terms and invoice number"),
        ];
        let query = embedder.embed_one("invoice payment");
        let hits = rank(&query, candidates, 2);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.filename == "invoice.pdf"));
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_rank_drops_unrelated_and_empty_vectors() {
        let embedder = HashingEmbedder::new(256);
        let mut empty = candidate(&embedder, "blank.txt", 0, "");
        empty.embedding = Vec::new();
        let hits = rank(&embedder.embed_one("invoice"), vec![empty], 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_snippet_truncates_long_content() {
        let long = "word ".repeat(100);
        let s = snippet(&long);
        assert!(s.ends_with("..."));
        assert!(s.chars().count() <= SNIPPET_CHARS + 3);
        assert_eq!(snippet("short"), "short");
    }
}
