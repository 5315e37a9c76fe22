//! # Pillar Audit Core
//!
//! Pure logic for Pillar Audit: data models, the HCL block chunker, the
//! guidance index and retriever, the reasoning-model prompt contract, and
//! the findings aggregator.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O. Provider
//! seams ([`embedding::EmbeddingBackend`], [`embedding::EmbeddingCache`],
//! [`analysis::ReasoningBackend`]) are traits implemented by the
//! `pillar-audit` application crate and by test doubles.
//!
//! ## Data Flow
//!
//! ```text
//! files ──▶ chunk ──▶ embed ──▶ retrieve ──▶ analysis ──▶ aggregate ──▶ AnalysisReport
//!                       ▲           ▲
//!                       └─ guidance index (built once, read-only)
//! ```

pub mod aggregate;
pub mod analysis;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod guidance;
pub mod models;
pub mod retrieve;
