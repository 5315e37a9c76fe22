//! Audit progress reporting.
//!
//! Reports observable progress during `pillar audit` so users see what is
//! being scanned and how many chunks are left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an audit run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditProgressEvent {
    /// Walking the root for infrastructure files. Total unknown.
    Scanning { root: String },
    /// Embedding the guidance corpus.
    Indexing { root: String, clauses: u64 },
    /// `n` of `total` chunks have finished analysis.
    Analyzing { root: String, n: u64, total: u64 },
}

/// Reports audit progress. Implementations write to stderr (human or JSON).
pub trait AuditProgressReporter: Send + Sync {
    fn report(&self, event: AuditProgressEvent);
}

/// Human-friendly progress on stderr: "audit infra/  analyzing  12 / 40 chunks".
pub struct StderrProgress;

impl AuditProgressReporter for StderrProgress {
    fn report(&self, event: AuditProgressEvent) {
        let line = match &event {
            AuditProgressEvent::Scanning { root } => format!("audit {}  scanning...\n", root),
            AuditProgressEvent::Indexing { root, clauses } => format!(
                "audit {}  indexing  {} guidance clauses\n",
                root,
                format_number(*clauses)
            ),
            AuditProgressEvent::Analyzing { root, n, total } => format!(
                "audit {}  analyzing  {} / {} chunks\n",
                root,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AuditProgressReporter for JsonProgress {
    fn report(&self, event: AuditProgressEvent) {
        let obj = match &event {
            AuditProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "scanning"
            }),
            AuditProgressEvent::Indexing { root, clauses } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "indexing",
                "clauses": clauses
            }),
            AuditProgressEvent::Analyzing { root, n, total } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "analyzing",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl AuditProgressReporter for NoProgress {
    fn report(&self, _event: AuditProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn AuditProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
