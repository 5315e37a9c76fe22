//! # Pillar Audit
//!
//! Retrieval-augmented compliance checks for Terraform against the six
//! Well-Architected pillars.
//!
//! Pillar Audit chunks infrastructure definitions into resource blocks,
//! embeds them next to a versioned corpus of pillar guidance, retrieves the
//! closest guidance per block, asks a reasoning model for structured
//! findings, and aggregates them into a report with a pass/fail verdict.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │ connector  │──▶│ Chunker  │──▶│ embed+retrieve│──▶│ Analyzer  │
//! │    _fs     │   │  (HCL)   │   │  (workers)    │   │ (LLM)     │
//! └────────────┘   └──────────┘   └──────┬────────┘   └─────┬─────┘
//!                                        │                  │
//!                            ┌───────────┴──┐        ┌──────▼─────┐
//!                            │ Guidance     │        │ Aggregator │──▶ report
//!                            │ Index+SQLite │        └────────────┘
//!                            └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pillar init                          # create the embedding cache
//! pillar chunks ./infra                # inspect chunking, offline
//! pillar guidance build                # pre-embed the guidance corpus
//! pillar audit ./infra                 # full run; exit 1 on any HIGH finding
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Discovers infrastructure files |
//! | [`embedding`] | Embedding providers |
//! | [`reasoning`] | Reasoning-model providers |
//! | [`retry`] | Backoff and timeouts around provider calls |
//! | [`embedder`] | Cached, batched embedding adapter |
//! | [`guidance`] | Corpus loading and index lifecycle |
//! | [`prompts`] | Prompt templates from `[analysis].prompt_dir` |
//! | [`analyzer`] | Per-chunk reasoning call |
//! | [`pipeline`] | Concurrent orchestration |
//! | [`report`] | JSON report, summary, exit codes |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! Pure logic (models, chunking, retrieval, prompt contract, aggregation)
//! lives in the `pillar-audit-core` crate.

pub mod analyzer;
pub mod audit_cmd;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedder;
pub mod embedding;
pub mod guidance;
pub mod guidance_cmd;
pub mod http;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod reasoning;
pub mod report;
pub mod retry;
pub mod sqlite_cache;
