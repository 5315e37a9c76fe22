//! `pillar guidance list`, `pillar guidance build` and `pillar init`.

use anyhow::Result;

use crate::config::Config;
use crate::embedder::Embedder;
use crate::guidance::{build_index, load_corpus, IndexState};
use crate::sqlite_cache::SqliteCache;

pub fn run_guidance_list(config: &Config) -> Result<()> {
    let corpus = load_corpus(config.guidance.corpus.as_deref())?;
    println!("guidance {} ({} clauses)", corpus.version, corpus.clauses.len());
    println!("  hash: {}", corpus.hash());

    let mut clauses: Vec<_> = corpus.clauses.iter().collect();
    clauses.sort_by(|a, b| a.pillar.cmp(&b.pillar).then_with(|| a.id.cmp(&b.id)));

    let mut current = None;
    for clause in clauses {
        if current != Some(clause.pillar) {
            println!();
            println!("{}", clause.pillar.display_name());
            current = Some(clause.pillar);
        }
        println!("  [{}] {}", clause.id, clause.text);
        if !clause.source_reference.is_empty() {
            println!("      {}", clause.source_reference);
        }
    }
    Ok(())
}

/// Embed the corpus into the cache ahead of an audit.
pub async fn run_guidance_build(config: &Config) -> Result<()> {
    let corpus = load_corpus(config.guidance.corpus.as_deref())?;
    let embedder = Embedder::from_config(config).await?;
    let (index, state) = build_index(&embedder, &corpus).await?;
    let stats = embedder.stats();

    let state = match state {
        IndexState::Fresh => "built",
        IndexState::Unchanged => "up to date",
        IndexState::Rebuilt => "rebuilt (corpus changed)",
    };
    println!("guidance build");
    println!("  corpus: {} ({} clauses)", index.corpus_version(), index.len());
    println!("  model: {}", embedder.model_version());
    println!("  index: {}", state);
    println!("  cache hits: {}", stats.cache_hits);
    println!("  embedded: {}", stats.cache_misses);
    Ok(())
}

pub async fn run_init(config: &Config) -> Result<()> {
    let cache = SqliteCache::open(&config.cache.path).await?;
    cache.close().await;
    println!("Cache initialized at {}", config.cache.path.display());
    Ok(())
}
