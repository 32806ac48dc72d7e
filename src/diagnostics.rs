//! Near-miss dumps.
//!
//! When a record's best candidate falls below the acceptance threshold, the
//! scored candidates are written as pretty JSON to
//! `{dump_dir}/{YYYY-MM-DD}/closest_match-{kind}-{keyword}.json` for manual
//! review. Dumping never affects the decision: write errors are logged and
//! dropped.

use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::models::EntityKind;
use crate::score::{BestMatch, ScoredCandidate};

/// Longest keyword kept in a dump file name.
const MAX_SLUG_LEN: usize = 80;

#[derive(Debug, Serialize)]
struct NearMiss<'a> {
    record_id: &'a str,
    kind: EntityKind,
    keyword: &'a str,
    threshold: f64,
    best: Option<&'a ScoredCandidate>,
    candidates: &'a [ScoredCandidate],
}

#[derive(Debug, Clone)]
pub struct NearMissDumper {
    dir: PathBuf,
    threshold: f64,
}

impl NearMissDumper {
    pub fn new(dir: impl Into<PathBuf>, threshold: f64) -> Self {
        Self {
            dir: dir.into(),
            threshold,
        }
    }

    /// Dump the scoring for one record. Errors are logged, not returned.
    pub fn dump(&self, record_id: &str, kind: EntityKind, keyword: &str, best: &BestMatch) {
        if let Err(e) = self.try_dump(record_id, kind, keyword, best) {
            warn!("near-miss dump for {} failed: {:#}", record_id, e);
        }
    }

    fn try_dump(
        &self,
        record_id: &str,
        kind: EntityKind,
        keyword: &str,
        best: &BestMatch,
    ) -> Result<PathBuf> {
        let path = dump_path(&self.dir, kind, keyword);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let payload = NearMiss {
            record_id,
            kind,
            keyword,
            threshold: self.threshold,
            best: best.best(),
            candidates: best.scored(),
        };
        let json = serde_json::to_string_pretty(&payload)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn dump_path(dir: &Path, kind: EntityKind, keyword: &str) -> PathBuf {
    let date = Utc::now().format("%Y-%m-%d").to_string();
    dir.join(date)
        .join(format!("closest_match-{}-{}.json", kind, slug(keyword)))
}

/// File-name-safe form of a keyword.
fn slug(keyword: &str) -> String {
    let s: String = keyword
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_SLUG_LEN)
        .collect();
    if s.is_empty() {
        "empty".to_string()
    } else {
        s
    }
}
