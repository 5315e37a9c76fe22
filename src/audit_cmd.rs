//! `pillar audit` and `pillar chunks`.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer::Analyzer;
use crate::config::Config;
use crate::connector_fs::scan_root;
use crate::embedder::Embedder;
use crate::guidance::load_corpus;
use crate::pipeline::{collect_chunks, Pipeline, PipelineSettings};
use crate::progress::{AuditProgressEvent, AuditProgressReporter};
use crate::report;

pub struct AuditOptions {
    pub output: Option<PathBuf>,
    pub require_coverage: bool,
    pub print_json: bool,
}

/// Run an audit over `root`, write the report, and return the exit code.
pub async fn run_audit(
    config: &Config,
    root: &Path,
    options: &AuditOptions,
    progress: &dyn AuditProgressReporter,
) -> Result<i32> {
    let root_label = root.display().to_string();

    // Fail on configuration before any provider is contacted.
    let corpus = load_corpus(config.guidance.corpus.as_deref())?;
    let analyzer = Arc::new(Analyzer::from_config(config)?);
    let embedder = Arc::new(Embedder::from_config(config).await?);

    progress.report(AuditProgressEvent::Scanning {
        root: root_label.clone(),
    });
    let scan = scan_root(root, &config.chunking)?;

    let pipeline = Pipeline::new(embedder, analyzer, PipelineSettings::from_config(config));
    let report = pipeline
        .run(&root_label, scan, &corpus, progress, ctrl_c())
        .await?;

    let output = options
        .output
        .clone()
        .unwrap_or_else(report::default_output_name);
    report::write_report(&report, &output)?;

    if options.print_json {
        println!("{}", report::to_json(&report)?);
    } else {
        print!("{}", report::render_summary(&report));
        println!("  report: {}", output.display());
    }

    Ok(report::exit_code(&report, options.require_coverage))
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// List the chunks `root` produces, plus any files that were skipped.
///
/// Offline: no provider is contacted.
pub fn run_chunks(config: &Config, root: &Path) -> Result<()> {
    let scan = scan_root(root, &config.chunking)?;
    let files_scanned = scan.files_scanned();
    let mut warnings = scan.warnings;
    let (chunks, parse_warnings) = collect_chunks(scan.files, config.chunking.max_tokens);
    warnings.extend(parse_warnings);

    for chunk in &chunks {
        let part = match chunk.part {
            Some((i, n)) => format!("  part {}/{}", i, n),
            None => String::new(),
        };
        println!(
            "{}:{}-{}  {}{}  {}",
            chunk.file_path,
            chunk.line_range.start,
            chunk.line_range.end,
            chunk.address(),
            part,
            &chunk.id[..12.min(chunk.id.len())]
        );
    }
    for w in &warnings {
        println!("warning  {:?}  {}  {}", w.kind, w.subject, w.message);
    }
    println!(
        "{} files, {} chunks, {} warnings",
        files_scanned,
        chunks.len(),
        warnings.len()
    );
    Ok(())
}
