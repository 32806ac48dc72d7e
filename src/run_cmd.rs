//! The `reconcile run` command.
//!
//! Wires the configured collaborators together (input files, catalog
//! transport, decision sink, progress reporter, cancellation) around a
//! [`Reconciler`] and prints the run summary.

use anyhow::{bail, Result};
use log::{info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cancel::{self, CancelHandle};
use crate::catalog::{CatalogClient, CatalogTransport};
use crate::catalog_http::HttpTransport;
use crate::catalog_offline::OfflineTransport;
use crate::config::Config;
use crate::db;
use crate::diagnostics::NearMissDumper;
use crate::input;
use crate::migrate;
use crate::models::EntityKind;
use crate::normalize::Normalizer;
use crate::progress::{ProgressMode, RunProgressEvent};
use crate::reconcile::{ReconcileSettings, Reconciler, RunReport};
use crate::sink::{self, JsonLinesSink, SqliteSink};

/// Options for one `reconcile run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub kind: EntityKind,
    /// Input file or directory overriding `input.root`.
    pub input: Option<PathBuf>,
    pub limit: Option<usize>,
    pub offline: bool,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

/// Build the catalog transport: the offline table or the HTTP service.
pub fn build_transport(
    config: &Config,
    normalizer: &Normalizer,
    offline: bool,
) -> Result<Arc<dyn CatalogTransport>> {
    if offline {
        Ok(Arc::new(OfflineTransport::new(&config.offline, normalizer)))
    } else {
        Ok(Arc::new(HttpTransport::from_config(&config.catalog)?))
    }
}

pub async fn run_reconcile(config: &Config, opts: RunOptions) -> Result<RunReport> {
    let progress = opts.progress.reporter();
    progress.report(RunProgressEvent::Reading);

    let mut batch = input::read_records(&config.input, opts.input.as_deref())?;
    if let Some(limit) = opts.limit {
        batch.records.truncate(limit);
    }
    info!(
        "read {} records from {} files ({} lines skipped)",
        batch.records.len(),
        batch.files,
        batch.skipped
    );

    let normalizer = Arc::new(Normalizer::from_config(&config.matching));
    let transport = build_transport(config, &normalizer, opts.offline)?;
    let transport_name = transport.name().to_string();
    let client = Arc::new(CatalogClient::from_config(transport, &config.catalog));

    let mut reconciler = Reconciler::new(
        client,
        normalizer,
        opts.kind,
        ReconcileSettings::from(config),
    );
    if let Some(dir) = &config.diagnostics.dump_dir {
        reconciler = reconciler.with_dumper(NearMissDumper::new(dir, config.matching.threshold));
    }

    let (cancel, _signal) = cancel::channel();
    let guards = arm_cancellation(&cancel, config.run.timeout_secs);
    let records = batch.records;
    let record_count = records.len();

    let result = if opts.dry_run {
        let report = reconciler
            .run(records, &JsonLinesSink, progress.as_ref(), &cancel)
            .await;
        report.and_then(|report| {
            let stderr = std::io::stderr();
            let mut out = stderr.lock();
            print_summary(&mut out, opts.kind, record_count, batch.skipped, &report, None)?;
            Ok(report)
        })
    } else {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let run_id = Uuid::new_v4().to_string();
        sink::begin_run(&pool, &run_id, opts.kind, &transport_name).await?;

        let sqlite_sink = SqliteSink::new(pool.clone(), run_id.clone());
        let report = reconciler
            .run(records, &sqlite_sink, progress.as_ref(), &cancel)
            .await;

        let finished = match report {
            Ok(report) => {
                sink::finish_run(&pool, &run_id, &report.summary, report.stopped.as_deref())
                    .await?;
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                print_summary(
                    &mut out,
                    opts.kind,
                    record_count,
                    batch.skipped,
                    &report,
                    Some((&run_id, sqlite_sink.changed())),
                )?;
                Ok(report)
            }
            Err(e) => {
                sink::finish_run(&pool, &run_id, &Default::default(), Some("run failed"))
                    .await
                    .ok();
                Err(e)
            }
        };
        pool.close().await;
        finished
    };

    for guard in guards {
        guard.abort();
    }

    let report = result?;
    if let Some(reason) = &report.stopped {
        bail!("{}", reason);
    }
    Ok(report)
}

/// Cancel on Ctrl-C and, when configured, on the run timeout.
fn arm_cancellation(
    cancel: &CancelHandle,
    timeout_secs: Option<u64>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut guards = Vec::new();

    let on_interrupt = cancel.clone();
    guards.push(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after in-flight records");
            on_interrupt.cancel("run cancelled: operator abort");
        }
    }));

    if let Some(secs) = timeout_secs {
        guards.push(cancel.cancel_after(
            Duration::from_secs(secs),
            format!("run cancelled: timed out after {}s", secs),
        ));
    }

    guards
}

fn print_summary(
    out: &mut dyn Write,
    kind: EntityKind,
    records: usize,
    skipped: usize,
    report: &RunReport,
    persisted: Option<(&str, u64)>,
) -> Result<()> {
    let s = &report.summary;
    writeln!(out, "reconcile {}", kind)?;
    writeln!(out, "  records: {}", records)?;
    if skipped > 0 {
        writeln!(out, "  skipped input lines: {}", skipped)?;
    }
    writeln!(out, "  matched: {}", s.matched)?;
    writeln!(out, "  unmatched: {}", s.unmatched)?;
    writeln!(out, "  failed: {}", s.failed)?;
    if let Some((run_id, changed)) = persisted {
        writeln!(out, "  decisions written: {}", changed)?;
        writeln!(out, "  run: {}", run_id)?;
    }
    match &report.stopped {
        Some(reason) => writeln!(out, "  stopped: {}", reason)?,
        None => writeln!(out, "ok")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunSummary;

    #[test]
    fn summary_block_ends_with_ok() {
        let report = RunReport {
            summary: RunSummary {
                matched: 7,
                unmatched: 2,
                failed: 1,
            },
            stopped: None,
        };
        let mut buf = Vec::new();
        print_summary(&mut buf, EntityKind::Track, 10, 0, &report, Some(("abc", 10))).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("reconcile track\n"));
        assert!(text.contains("  matched: 7\n"));
        assert!(text.contains("  run: abc\n"));
        assert!(text.ends_with("ok\n"));
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn summary_write_error_is_returned() {
        let report = RunReport::default();
        let result = print_summary(&mut Broken, EntityKind::Album, 0, 0, &report, None);
        assert!(result.is_err());
    }

    #[test]
    fn stopped_summary_names_reason() {
        let report = RunReport {
            summary: RunSummary::default(),
            stopped: Some("run aborted: catalog unavailable".into()),
        };
        let mut buf = Vec::new();
        print_summary(&mut buf, EntityKind::Artist, 3, 1, &report, None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("  skipped input lines: 1\n"));
        assert!(text.ends_with("  stopped: run aborted: catalog unavailable\n"));
    }
}
