use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per (record, kind, extraction); rewritten only when the
    // decision content changes.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS match_decisions (
            record_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            extracted_at TEXT NOT NULL,
            outcome TEXT NOT NULL,
            candidate_id TEXT,
            candidate_name TEXT,
            candidate_json TEXT,
            confidence REAL NOT NULL,
            reason TEXT,
            run_id TEXT NOT NULL,
            decided_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            UNIQUE(record_id, kind, extracted_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Run ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconcile_runs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            transport TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            records INTEGER NOT NULL DEFAULT 0,
            matched INTEGER NOT NULL DEFAULT 0,
            unmatched INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            aborted_reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_match_decisions_kind_outcome ON match_decisions(kind, outcome)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reconcile_runs_started_at ON reconcile_runs(started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
