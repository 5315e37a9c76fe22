//! Persistent [`EmbeddingCache`] in SQLite.
//!
//! Vectors live in `embedding_cache`, keyed by `(text_hash, model)`, as
//! little-endian f32 BLOBs. The corpus hash last indexed per model lives in
//! `guidance_meta`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use pillar_audit_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingCache};

use crate::{db, migrate};

pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Open (creating if needed) the cache database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Number of cached vectors for `model`.
    pub async fn count(&self, model: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache WHERE model = ?")
            .bind(model)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl EmbeddingCache for SqliteCache {
    async fn get(&self, text_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query("SELECT vector FROM embedding_cache WHERE text_hash = ? AND model = ?")
            .bind(text_hash)
            .bind(model)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            let blob: Vec<u8> = r.get("vector");
            blob_to_vec(&blob)
        }))
    }

    async fn put(&self, text_hash: &str, model: &str, vector: &[f32]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_cache (text_hash, model, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(text_hash, model) DO UPDATE SET
                dims = excluded.dims,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(text_hash)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn corpus_hash(&self, model: &str) -> Result<Option<String>> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT corpus_hash FROM guidance_meta WHERE model = ?")
                .bind(model)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    async fn record_corpus_hash(&self, model: &str, hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO guidance_meta (model, corpus_hash, built_at)
            VALUES (?, ?, ?)
            ON CONFLICT(model) DO UPDATE SET
                corpus_hash = excluded.corpus_hash,
                built_at = excluded.built_at
            "#,
        )
        .bind(model)
        .bind(hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
