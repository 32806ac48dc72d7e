//! Decision sinks and the run ledger.
//!
//! A [`DecisionSink`] receives every [`MatchDecision`] the orchestrator
//! emits. Writes are idempotent: the SQLite sink keys rows by
//! `(record_id, kind, extracted_at)` and only rewrites a row when the
//! SHA-256 of its content changed, so re-running over unchanged input and an
//! unchanged catalog leaves the table as it was.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::models::{EntityKind, MatchDecision, RunSummary, Verdict};

/// Destination for match decisions.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn write(&self, decision: &MatchDecision) -> Result<()>;
}

/// Persists decisions into `match_decisions`.
pub struct SqliteSink {
    pool: SqlitePool,
    run_id: String,
    changed: AtomicU64,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool, run_id: impl Into<String>) -> Self {
        Self {
            pool,
            run_id: run_id.into(),
            changed: AtomicU64::new(0),
        }
    }

    /// Rows inserted or rewritten by this sink.
    pub fn changed(&self) -> u64 {
        self.changed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DecisionSink for SqliteSink {
    async fn write(&self, decision: &MatchDecision) -> Result<()> {
        let content_hash = content_hash(decision);
        let (candidate_id, candidate_name, candidate_json, reason) = match &decision.verdict {
            Verdict::Matched { candidate } => (
                Some(candidate.id.clone()),
                Some(candidate.name.clone()),
                Some(serde_json::to_string(candidate)?),
                None,
            ),
            Verdict::Unmatched => (None, None, None, None),
            Verdict::Failed { reason } => (None, None, None, Some(reason.clone())),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO match_decisions (record_id, kind, extracted_at, outcome, candidate_id, candidate_name, candidate_json, confidence, reason, run_id, decided_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(record_id, kind, extracted_at) DO UPDATE SET
                outcome = excluded.outcome,
                candidate_id = excluded.candidate_id,
                candidate_name = excluded.candidate_name,
                candidate_json = excluded.candidate_json,
                confidence = excluded.confidence,
                reason = excluded.reason,
                run_id = excluded.run_id,
                decided_at = excluded.decided_at,
                content_hash = excluded.content_hash
            WHERE match_decisions.content_hash != excluded.content_hash
            "#,
        )
        .bind(&decision.record_id)
        .bind(decision.kind.as_str())
        .bind(decision.extracted_at.to_rfc3339())
        .bind(decision.verdict.label())
        .bind(candidate_id)
        .bind(candidate_name)
        .bind(candidate_json)
        .bind(decision.confidence)
        .bind(reason)
        .bind(&self.run_id)
        .bind(Utc::now().timestamp())
        .bind(&content_hash)
        .execute(&self.pool)
        .await?;

        self.changed
            .fetch_add(result.rows_affected(), Ordering::Relaxed);
        Ok(())
    }
}

/// SHA-256 over the decision's key and content.
pub fn content_hash(decision: &MatchDecision) -> String {
    let mut hasher = Sha256::new();
    hasher.update(decision.record_id.as_bytes());
    hasher.update(decision.kind.as_str().as_bytes());
    hasher.update(decision.extracted_at.timestamp_micros().to_le_bytes());
    hasher.update(decision.verdict.label().as_bytes());
    match &decision.verdict {
        Verdict::Matched { candidate } => hasher.update(candidate.id.as_bytes()),
        Verdict::Failed { reason } => hasher.update(reason.as_bytes()),
        Verdict::Unmatched => {}
    }
    hasher.update(decision.confidence.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collects decisions in memory.
#[derive(Default)]
pub struct MemorySink {
    decisions: Mutex<Vec<MatchDecision>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<MatchDecision> {
        self.decisions
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DecisionSink for MemorySink {
    async fn write(&self, decision: &MatchDecision) -> Result<()> {
        let mut guard = self
            .decisions
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?;
        guard.push(decision.clone());
        Ok(())
    }
}

/// Prints each decision as one JSON line on stdout (`run --dry-run`).
#[derive(Default)]
pub struct JsonLinesSink;

#[async_trait]
impl DecisionSink for JsonLinesSink {
    async fn write(&self, decision: &MatchDecision) -> Result<()> {
        let line = serde_json::to_string(decision)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Run ledger
// ═══════════════════════════════════════════════════════════════════════

/// One row of `reconcile_runs`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub kind: String,
    pub transport: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub records: i64,
    pub matched: i64,
    pub unmatched: i64,
    pub failed: i64,
    pub aborted_reason: Option<String>,
}

pub async fn begin_run(
    pool: &SqlitePool,
    run_id: &str,
    kind: EntityKind,
    transport: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO reconcile_runs (id, kind, transport, started_at) VALUES (?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(kind.as_str())
    .bind(transport)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_run(
    pool: &SqlitePool,
    run_id: &str,
    summary: &RunSummary,
    aborted: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE reconcile_runs
        SET finished_at = ?, records = ?, matched = ?, unmatched = ?, failed = ?, aborted_reason = ?
        WHERE id = ?
        "#,
    )
    .bind(Utc::now().timestamp())
    .bind(summary.total() as i64)
    .bind(summary.matched as i64)
    .bind(summary.unmatched as i64)
    .bind(summary.failed as i64)
    .bind(aborted)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, transport, started_at, finished_at, records, matched, unmatched, failed, aborted_reason
        FROM reconcile_runs
        ORDER BY started_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| RunRecord {
            id: row.get("id"),
            kind: row.get("kind"),
            transport: row.get("transport"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            records: row.get("records"),
            matched: row.get("matched"),
            unmatched: row.get("unmatched"),
            failed: row.get("failed"),
            aborted_reason: row.get("aborted_reason"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use crate::models::{CatalogCandidate, LocalTagRecord};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(id: &str) -> LocalTagRecord {
        LocalTagRecord {
            id: id.into(),
            artist: Some("Interpol".into()),
            album: None,
            track: None,
            composer: None,
            conductor: None,
            track_number: None,
            year: None,
            extracted_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    fn matched(record: &LocalTagRecord, candidate_id: &str, confidence: f64) -> MatchDecision {
        MatchDecision {
            record_id: record.id.clone(),
            extracted_at: record.extracted_at,
            kind: EntityKind::Artist,
            verdict: Verdict::Matched {
                candidate: CatalogCandidate {
                    id: candidate_id.into(),
                    kind: EntityKind::Artist,
                    name: "Interpol".into(),
                    artist_names: vec![],
                    album_name: None,
                    rank: 0,
                    extra: Default::default(),
                },
            },
            confidence,
        }
    }

    async fn pool(tmp: &TempDir) -> SqlitePool {
        let pool = db::connect_path(&tmp.path().join("sink.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn repeated_writes_do_not_duplicate() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let r = record("a");

        let first = SqliteSink::new(pool.clone(), "run-1");
        first.write(&matched(&r, "x1", 100.0)).await.unwrap();
        assert_eq!(first.changed(), 1);

        let second = SqliteSink::new(pool.clone(), "run-2");
        second.write(&matched(&r, "x1", 100.0)).await.unwrap();
        assert_eq!(second.changed(), 0);

        let (count, run_id): (i64, String) =
            sqlx::query_as("SELECT COUNT(*), MAX(run_id) FROM match_decisions")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(run_id, "run-1");
    }

    #[tokio::test]
    async fn changed_decision_overwrites_row() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let r = record("a");

        let sink = SqliteSink::new(pool.clone(), "run-1");
        sink.write(&matched(&r, "x1", 90.0)).await.unwrap();
        sink.write(&MatchDecision::failed(&r, EntityKind::Artist, "HTTP 401"))
            .await
            .unwrap();
        assert_eq!(sink.changed(), 2);

        let (outcome, reason): (String, Option<String>) =
            sqlx::query_as("SELECT outcome, reason FROM match_decisions")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(outcome, "failed");
        assert_eq!(reason.as_deref(), Some("HTTP 401"));
    }

    #[tokio::test]
    async fn ledger_records_counts() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        begin_run(&pool, "run-1", EntityKind::Album, "offline").await.unwrap();
        let summary = RunSummary {
            matched: 3,
            unmatched: 1,
            failed: 2,
        };
        finish_run(&pool, "run-1", &summary, Some("remote unavailable"))
            .await
            .unwrap();

        let runs = recent_runs(&pool, 5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].records, 6);
        assert_eq!(runs[0].kind, "album");
        assert_eq!(runs[0].aborted_reason.as_deref(), Some("remote unavailable"));
    }

    #[test]
    fn hash_tracks_outcome() {
        let r = record("a");
        let a = matched(&r, "x1", 100.0);
        let b = MatchDecision::failed(&r, EntityKind::Artist, "boom");
        assert_eq!(content_hash(&a), content_hash(&a.clone()));
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
