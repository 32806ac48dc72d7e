//! Run progress reporting.
//!
//! Reports observable progress during `reconcile run` so operators see how
//! many records are resolved and how they split across outcomes. Progress is
//! emitted on **stderr** so stdout stays parseable for scripts (decisions
//! in `--dry-run`, the final summary otherwise).

use std::io::Write;

use crate::models::{EntityKind, RunSummary};

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// Input files are being read. Total unknown.
    Reading,
    /// `summary.total()` of `total` records have a decision.
    Resolving {
        kind: EntityKind,
        total: u64,
        summary: RunSummary,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    /// Emit a progress event. Called by the orchestrator after each decision.
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr:
/// "reconcile track  1,234 / 5,000 records  (matched 1,100, unmatched 120, failed 14)".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Reading => "reconcile  reading input...\n".to_string(),
            RunProgressEvent::Resolving {
                kind,
                total,
                summary,
            } => format!(
                "reconcile {}  {} / {} records  (matched {}, unmatched {}, failed {})\n",
                kind,
                format_number(summary.total()),
                format_number(*total),
                format_number(summary.matched),
                format_number(summary.unmatched),
                format_number(summary.failed)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Reading => serde_json::json!({
                "event": "progress",
                "phase": "reading"
            }),
            RunProgressEvent::Resolving {
                kind,
                total,
                summary,
            } => serde_json::json!({
                "event": "progress",
                "phase": "resolving",
                "kind": kind,
                "n": summary.total(),
                "total": total,
                "matched": summary.matched,
                "unmatched": summary.unmatched,
                "failed": summary.failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
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
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
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
