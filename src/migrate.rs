use anyhow::Result;
use sqlx::SqlitePool;

/// Create the cache tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            text_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (text_hash, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Corpus hash last indexed per embedding model
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS guidance_meta (
            model TEXT PRIMARY KEY,
            corpus_hash TEXT NOT NULL,
            built_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embedding_cache_model ON embedding_cache(model)")
        .execute(pool)
        .await?;

    Ok(())
}
