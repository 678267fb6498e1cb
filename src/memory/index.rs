//! Associative text index.
//!
//! The session only needs three operations from its long-term store, so the
//! engine sits behind [`AssociativeIndex`] and tests can substitute a stub.
//! The bundled engine keeps embeddings in a per-session SQLite file and
//! scores by cosine similarity.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::llm::embeddings::TextEmbedder;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index storage error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("embedding codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The retriever contract the session depends on.
#[async_trait]
pub trait AssociativeIndex: Send + Sync {
    /// Index a batch of texts.
    async fn add_texts(&self, texts: &[String]) -> Result<(), IndexError>;
    /// Up to `k` snippets per query, deduplicated across queries.
    async fn retrieve(&self, queries: &[String], k: usize) -> Result<Vec<String>, IndexError>;
    /// Drop the on-disk state and start empty.
    async fn clear(&self) -> Result<(), IndexError>;
}

/// SQLite-backed engine: one directory per session, embeddings stored as
/// bincode blobs, full-scan cosine scoring.
pub struct SqliteVectorIndex {
    dir: PathBuf,
    pool: RwLock<SqlitePool>,
    embedder: Arc<dyn TextEmbedder>,
}

impl SqliteVectorIndex {
    pub async fn open(dir: PathBuf, embedder: Arc<dyn TextEmbedder>) -> Result<Self, IndexError> {
        let pool = connect(&dir).await?;
        Ok(Self {
            dir,
            pool: RwLock::new(pool),
            embedder,
        })
    }
}

async fn connect(dir: &Path) -> Result<SqlitePool, IndexError> {
    std::fs::create_dir_all(dir)?;
    let options = SqliteConnectOptions::new()
        .filename(dir.join("index.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )
    .execute(&pool)
    .await?;
    Ok(pool)
}

#[async_trait]
impl AssociativeIndex for SqliteVectorIndex {
    async fn add_texts(&self, texts: &[String]) -> Result<(), IndexError> {
        if texts.is_empty() {
            return Ok(());
        }
        let vectors = self.embedder.embed(texts).await;
        let pool = self.pool.read().await;
        let now = chrono::Utc::now().timestamp();

        for (text, vector) in texts.iter().zip(vectors) {
            // A one-element vector is the embedder's failure placeholder;
            // indexing it would poison retrieval.
            if vector.len() <= 1 {
                warn!("skipping text with placeholder embedding: {:.40}", text);
                continue;
            }
            let blob = bincode::serialize(&vector)?;
            sqlx::query(
                "INSERT INTO memories (id, content, embedding, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(text)
            .bind(blob)
            .bind(now)
            .execute(&*pool)
            .await?;
        }
        Ok(())
    }

    async fn retrieve(&self, queries: &[String], k: usize) -> Result<Vec<String>, IndexError> {
        if queries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vectors = self.embedder.embed(queries).await;

        let pool = self.pool.read().await;
        let rows = sqlx::query("SELECT id, content, embedding FROM memories")
            .fetch_all(&*pool)
            .await?;

        let mut entries: Vec<(String, String, Vec<f32>)> = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            entries.push((row.get("id"), row.get("content"), bincode::deserialize(&blob)?));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        for query_vector in &query_vectors {
            let mut scored: Vec<(&(String, String, Vec<f32>), f32)> = entries
                .iter()
                .map(|entry| (entry, cosine_similarity(query_vector, &entry.2)))
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for ((id, content, _), _) in scored.into_iter().take(k) {
                if seen.insert(id.clone()) {
                    results.push(content.clone());
                }
            }
        }
        Ok(results)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let mut pool = self.pool.write().await;
        pool.close().await;
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        } else {
            warn!("index directory {} does not exist", self.dir.display());
        }
        *pool = connect(&self.dir).await?;
        info!("cleared associative index at {}", self.dir.display());
        Ok(())
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let dot_product: f32 = a[..len].iter().zip(&b[..len]).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
