//! Filesystem discovery of infrastructure definition files.
//!
//! Walks a root directory, keeps files matching `[chunking].include_globs`
//! and not matching the exclude set, and reads them as UTF-8. Paths are
//! reported relative to the root with `/` separators, sorted, so a scan of
//! the same tree always yields the same list.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use pillar_audit_core::chunk::SourceFile;
use pillar_audit_core::models::{Warning, WarningKind};

use crate::config::ChunkingConfig;

/// Always excluded, in addition to `[chunking].exclude_globs`.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/.terraform/**", "**/node_modules/**"];

/// Files found under a root plus the ones that could not be read.
#[derive(Debug, Default)]
pub struct Scan {
    pub files: Vec<SourceFile>,
    pub warnings: Vec<Warning>,
}

impl Scan {
    /// Files seen, readable or not.
    pub fn files_scanned(&self) -> usize {
        self.files.len() + self.warnings.len()
    }
}

pub fn scan_root(root: &Path, config: &ChunkingConfig) -> Result<Scan> {
    if !root.exists() {
        bail!("Scan root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut scan = Scan::default();

    // A single file given as root is matched by its own name.
    let base = if root.is_file() {
        root.parent().unwrap_or(root)
    } else {
        root
    };

    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(base).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        match String::from_utf8(bytes) {
            Ok(text) => scan.files.push(SourceFile::new(rel_str, text)),
            Err(e) => {
                tracing::warn!(file = %rel_str, "skipping file that is not valid UTF-8");
                scan.warnings.push(Warning::new(
                    WarningKind::SourceUnreadable,
                    rel_str,
                    format!("not valid UTF-8: {}", e.utf8_error()),
                ));
            }
        }
    }

    scan.files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(
        root = %root.display(),
        files = scan.files.len(),
        unreadable = scan.warnings.len(),
        "scan complete"
    );
    Ok(scan)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
