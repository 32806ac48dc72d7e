//! Reconciliation orchestrator.
//!
//! Drives every input record through normalize → search → score → decide and
//! hands exactly one [`MatchDecision`] per record to a [`DecisionSink`]:
//!
//! ```text
//! records ─▶ worker pool (≤ max_concurrency) ─▶ completion channel ─▶ sink
//!                 │                                     │
//!                 └─ CatalogClient (shared limiter)     └─ summary, progress,
//!                                                          failure circuit
//! ```
//!
//! Failures stay at the record boundary: a rejected search, exhausted
//! retries, a record without the field its kind needs, even a panicking
//! worker all become `Failed` decisions for that record alone.
//!
//! Decisions are emitted in completion order. When
//! `run.max_consecutive_failures` records in a row fail because the catalog
//! stayed unavailable, the run is aborted through the shared cancel handle.
//! Records that were never started when a run is cancelled or aborted are
//! emitted as `Failed` with the cancellation reason.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cancel::{CancelHandle, CancelSignal};
use crate::catalog::{CatalogClient, CatalogError, SearchQuery};
use crate::config::Config;
use crate::diagnostics::NearMissDumper;
use crate::models::{EntityKind, LocalTagRecord, MatchDecision, RunSummary, Verdict};
use crate::normalize::{NormalizedKey, Normalizer};
use crate::progress::{RunProgressEvent, RunProgressReporter};
use crate::score::{BestMatch, Scorer};
use crate::sink::DecisionSink;

/// Orchestrator tunables.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub threshold: f64,
    pub max_concurrency: usize,
    pub max_consecutive_failures: u32,
}

impl From<&Config> for ReconcileSettings {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.matching.threshold,
            max_concurrency: config.run.max_concurrency,
            max_consecutive_failures: config.run.max_consecutive_failures,
        }
    }
}

/// How a record's resolution touched the remote catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteContact {
    /// The catalog answered (with results or a rejection).
    Reachable,
    /// Transient failures until retries ran out.
    Exhausted,
    /// No request was completed (missing field, cancellation, worker panic).
    None,
}

/// A record's decision plus what it tells the failure circuit.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub decision: MatchDecision,
    pub contact: RemoteContact,
}

/// Final report for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Set when the run stopped early: abort on sustained remote failure,
    /// operator abort, or timeout.
    pub stopped: Option<String>,
}

#[derive(Clone)]
pub struct Reconciler {
    client: Arc<CatalogClient>,
    normalizer: Arc<Normalizer>,
    kind: EntityKind,
    settings: ReconcileSettings,
    dumper: Option<NearMissDumper>,
}

impl Reconciler {
    pub fn new(
        client: Arc<CatalogClient>,
        normalizer: Arc<Normalizer>,
        kind: EntityKind,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            client,
            normalizer,
            kind,
            settings,
            dumper: None,
        }
    }

    /// Write near-miss dumps for records that fall below the threshold.
    pub fn with_dumper(mut self, dumper: NearMissDumper) -> Self {
        self.dumper = Some(dumper);
        self
    }

    /// Resolve one record. Never fails: every error becomes a `Failed`
    /// decision.
    pub async fn resolve(&self, record: &LocalTagRecord, cancel: &CancelSignal) -> RecordOutcome {
        let key = NormalizedKey::from_record(&self.normalizer, record);

        let query = match SearchQuery::for_key(self.kind, &key) {
            Ok(q) => q,
            Err(reason) => {
                return RecordOutcome {
                    decision: MatchDecision::failed(record, self.kind, reason),
                    contact: RemoteContact::None,
                };
            }
        };

        let scorer = Scorer::new(self.kind, &key, &self.normalizer);
        let mut best = BestMatch::new();
        let mut pages = self.client.search(query, cancel.clone());

        loop {
            match pages.next_page().await {
                Ok(Some(candidates)) => {
                    for candidate in candidates {
                        let score = scorer.score(&candidate);
                        best.offer(candidate, score);
                    }
                    // Later pages only hold higher ranks; an exact hit cannot be beaten.
                    if best.is_exact() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let contact = match &e {
                        CatalogError::Exhausted { .. } => RemoteContact::Exhausted,
                        CatalogError::Rejected(_) => RemoteContact::Reachable,
                        CatalogError::Cancelled(_) => RemoteContact::None,
                    };
                    return RecordOutcome {
                        decision: MatchDecision::failed(record, self.kind, e.to_string()),
                        contact,
                    };
                }
            }
        }

        let verdict = best.verdict(self.settings.threshold);
        if verdict == Verdict::Unmatched && best.best().is_some() {
            if let Some(dumper) = &self.dumper {
                dumper.dump(&record.id, self.kind, scorer.local(), &best);
            }
        }

        RecordOutcome {
            decision: MatchDecision {
                record_id: record.id.clone(),
                extracted_at: record.extracted_at,
                kind: self.kind,
                verdict,
                confidence: best.confidence(),
            },
            contact: RemoteContact::Reachable,
        }
    }

    /// Resolve every record and write each decision to `sink`.
    ///
    /// Returns an error only when the sink fails; the run is cancelled first
    /// so in-flight workers stop issuing requests.
    pub async fn run(
        &self,
        records: Vec<LocalTagRecord>,
        sink: &dyn DecisionSink,
        progress: &dyn RunProgressReporter,
        cancel: &CancelHandle,
    ) -> Result<RunReport> {
        let total = records.len() as u64;
        let signal = cancel.signal();
        let (tx, mut rx) = mpsc::unbounded_channel::<RecordOutcome>();

        let mut queue = records.into_iter();
        let mut in_flight = 0usize;
        let mut summary = RunSummary::default();
        let mut consecutive_failures = 0u32;

        loop {
            while in_flight < self.settings.max_concurrency && !signal.is_cancelled() {
                let Some(record) = queue.next() else {
                    break;
                };
                self.spawn_worker(record, signal.clone(), tx.clone());
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            let Some(outcome) = rx.recv().await else {
                break;
            };
            in_flight -= 1;

            match outcome.contact {
                RemoteContact::Exhausted => consecutive_failures += 1,
                RemoteContact::Reachable => consecutive_failures = 0,
                RemoteContact::None => {}
            }
            if consecutive_failures >= self.settings.max_consecutive_failures
                && !signal.is_cancelled()
            {
                let reason = format!(
                    "run aborted: {} consecutive records failed with the catalog unavailable",
                    consecutive_failures
                );
                error!("{}", reason);
                cancel.cancel(reason);
            }

            log_decision(&outcome.decision);
            if let Err(e) = sink.write(&outcome.decision).await {
                cancel.cancel("run aborted: sink write failed");
                return Err(e).with_context(|| {
                    format!("Failed to write decision for {}", outcome.decision.record_id)
                });
            }
            summary.record(&outcome.decision.verdict);
            progress.report(RunProgressEvent::Resolving {
                kind: self.kind,
                total,
                summary,
            });
        }

        // Records never started keep the one-decision-per-record guarantee.
        let stopped = signal.reason();
        let unstarted_reason = stopped.clone().unwrap_or_else(|| "run cancelled".to_string());
        for record in queue {
            let decision = MatchDecision::failed(&record, self.kind, unstarted_reason.clone());
            sink.write(&decision)
                .await
                .with_context(|| format!("Failed to write decision for {}", record.id))?;
            summary.record(&decision.verdict);
        }
        if stopped.is_some() {
            progress.report(RunProgressEvent::Resolving {
                kind: self.kind,
                total,
                summary,
            });
        }

        Ok(RunReport { summary, stopped })
    }

    fn spawn_worker(
        &self,
        record: LocalTagRecord,
        signal: CancelSignal,
        tx: mpsc::UnboundedSender<RecordOutcome>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let worker = tokio::spawn({
                let this = this.clone();
                let record = record.clone();
                async move { this.resolve(&record, &signal).await }
            });
            let outcome = worker.await.unwrap_or_else(|e| RecordOutcome {
                decision: MatchDecision::failed(&record, this.kind, format!("worker failed: {e}")),
                contact: RemoteContact::None,
            });
            let _ = tx.send(outcome);
        });
    }
}

fn log_decision(decision: &MatchDecision) {
    match &decision.verdict {
        Verdict::Matched { candidate } => info!(
            "{} {}: matched '{}' ({}) confidence {:.1}",
            decision.kind, decision.record_id, candidate.name, candidate.id, decision.confidence
        ),
        Verdict::Unmatched => warn!(
            "{} {}: unmatched (best confidence {:.1})",
            decision.kind, decision.record_id, decision.confidence
        ),
        Verdict::Failed { reason } => {
            warn!("{} {}: failed: {}", decision.kind, decision.record_id, reason)
        }
    }
}
