//! Database statistics and run history.
//!
//! Summarizes what has been reconciled: decision counts per entity kind and
//! outcome, average confidence of matches, and the most recent runs from the
//! ledger. Used by `reconcile stats` to confirm runs are landing as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::progress::format_number;
use crate::sink::{recent_runs, RunRecord};

/// Runs shown in the history table.
const RECENT_RUNS: i64 = 10;

/// Per-kind breakdown of decision outcomes.
struct KindStats {
    kind: String,
    matched: i64,
    unmatched: i64,
    failed: i64,
    avg_confidence: Option<f64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM match_decisions")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let rows = sqlx::query(
        r#"
        SELECT
            kind,
            SUM(CASE WHEN outcome = 'matched' THEN 1 ELSE 0 END) AS matched,
            SUM(CASE WHEN outcome = 'unmatched' THEN 1 ELSE 0 END) AS unmatched,
            SUM(CASE WHEN outcome = 'failed' THEN 1 ELSE 0 END) AS failed,
            AVG(CASE WHEN outcome = 'matched' THEN confidence END) AS avg_confidence
        FROM match_decisions
        GROUP BY kind
        ORDER BY kind
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let kinds: Vec<KindStats> = rows
        .iter()
        .map(|row| KindStats {
            kind: row.get("kind"),
            matched: row.get("matched"),
            unmatched: row.get("unmatched"),
            failed: row.get("failed"),
            avg_confidence: row.get("avg_confidence"),
        })
        .collect();

    let runs = recent_runs(&pool, RECENT_RUNS).await?;

    println!("Catalog Reconcile — Database Stats");
    println!("==================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Decisions:   {}", format_number(total.max(0) as u64));

    if !kinds.is_empty() {
        println!();
        println!("  By kind:");
        println!(
            "  {:<8} {:>9} {:>10} {:>8} {:>9}",
            "KIND", "MATCHED", "UNMATCHED", "FAILED", "AVG CONF"
        );
        println!("  {}", "-".repeat(48));
        for k in &kinds {
            let conf = k
                .avg_confidence
                .map(|c| format!("{:.1}", c))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<8} {:>9} {:>10} {:>8} {:>9}",
                k.kind, k.matched, k.unmatched, k.failed, conf
            );
        }
    }

    if !runs.is_empty() {
        println!();
        println!("  Recent runs:");
        println!(
            "  {:<8} {:<8} {:<9} {:>7} {:>7} {:>9} {:>6}   {}",
            "RUN", "KIND", "SOURCE", "RECORDS", "MATCHED", "UNMATCHED", "FAILED", "STARTED"
        );
        println!("  {}", "-".repeat(84));
        for run in &runs {
            println!("  {}", format_run(run));
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_run(run: &RunRecord) -> String {
    let short_id: String = run.id.chars().take(8).collect();
    let mut line = format!(
        "{:<8} {:<8} {:<9} {:>7} {:>7} {:>9} {:>6}   {}",
        short_id,
        run.kind,
        run.transport,
        run.records,
        run.matched,
        run.unmatched,
        run.failed,
        format_ts_relative(run.started_at)
    );
    if run.finished_at.is_none() {
        line.push_str("  (unfinished)");
    } else if let Some(reason) = &run.aborted_reason {
        line.push_str(&format!("  ({})", reason));
    }
    line
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
