//! Library-level pipeline tests against in-memory catalog transports.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use catalog_reconcile::cancel;
use catalog_reconcile::catalog::{
    CatalogClient, CatalogTransport, ClientSettings, PageAttempt, PageRequest, RawPage,
    SearchField,
};
use catalog_reconcile::models::{EntityKind, LocalTagRecord, MatchDecision, Verdict};
use catalog_reconcile::normalize::Normalizer;
use catalog_reconcile::progress::NoProgress;
use catalog_reconcile::rate_limit::RateLimiter;
use catalog_reconcile::reconcile::{ReconcileSettings, Reconciler, RunReport};
use catalog_reconcile::sink::MemorySink;

type Responder = dyn Fn(&PageRequest) -> PageAttempt + Send + Sync;

/// Transport driven by a closure; logs every request.
struct MockCatalog {
    respond: Box<Responder>,
    log: Mutex<Vec<(Instant, u32, Option<String>)>>,
}

impl MockCatalog {
    fn new(respond: impl Fn(&PageRequest) -> PageAttempt + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            log: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<(Instant, u32, Option<String>)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogTransport for MockCatalog {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_page(&self, request: &PageRequest) -> PageAttempt {
        self.log.lock().unwrap().push((
            Instant::now(),
            request.offset,
            request.query.term(SearchField::Artist).map(str::to_string),
        ));
        (self.respond)(request)
    }
}

fn first_page(request: &PageRequest, names: &[&str]) -> PageAttempt {
    if request.offset > 0 {
        return PageAttempt::Success(RawPage::default());
    }
    PageAttempt::Success(RawPage {
        items: names
            .iter()
            .enumerate()
            .map(|(i, n)| json!({"id": format!("x{}", i + 1), "name": n, "type": "artist"}))
            .collect(),
        declared_total: Some(names.len() as u64),
    })
}

struct Harness {
    kind: EntityKind,
    page_size: u32,
    delay: Duration,
    max_retries: u32,
    threshold: f64,
    concurrency: usize,
    max_consecutive_failures: u32,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            kind: EntityKind::Artist,
            page_size: 20,
            delay: Duration::ZERO,
            max_retries: 0,
            threshold: 70.0,
            concurrency: 1,
            max_consecutive_failures: 100,
        }
    }
}

impl Harness {
    fn reconciler(&self, transport: Arc<MockCatalog>) -> Reconciler {
        let client = CatalogClient::new(
            transport,
            Arc::new(RateLimiter::new(self.delay)),
            ClientSettings {
                page_size: self.page_size,
                max_retries: self.max_retries,
                backoff_base: Duration::from_millis(50),
                max_backoff: Duration::from_millis(200),
                max_pages: 20,
            },
        );
        Reconciler::new(
            Arc::new(client),
            Arc::new(Normalizer::default()),
            self.kind,
            ReconcileSettings {
                threshold: self.threshold,
                max_concurrency: self.concurrency,
                max_consecutive_failures: self.max_consecutive_failures,
            },
        )
    }

    async fn run(
        &self,
        transport: Arc<MockCatalog>,
        records: Vec<LocalTagRecord>,
    ) -> (RunReport, Vec<MatchDecision>) {
        let sink = MemorySink::new();
        let (handle, _signal) = cancel::channel();
        let report = self
            .reconciler(transport)
            .run(records, &sink, &NoProgress, &handle)
            .await
            .unwrap();
        (report, sink.decisions())
    }
}

fn record(id: &str, artist: &str) -> LocalTagRecord {
    LocalTagRecord {
        id: id.into(),
        artist: Some(artist.into()),
        album: None,
        track: None,
        composer: None,
        conductor: None,
        track_number: None,
        year: None,
        extracted_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
    }
}

fn ten_records() -> Vec<LocalTagRecord> {
    (1..=10)
        .map(|i| record(&format!("r{}", i), &format!("Artist {}", i)))
        .collect()
}

fn sorted(mut decisions: Vec<MatchDecision>) -> Vec<MatchDecision> {
    decisions.sort_by(|a, b| a.record_id.cmp(&b.record_id));
    decisions
}

#[tokio::test(start_paused = true)]
async fn permanent_error_fails_only_its_record() {
    let transport = MockCatalog::new(|req| {
        if req.query.term(SearchField::Artist) == Some("Artist 4") {
            PageAttempt::Permanent("HTTP 400: malformed query".into())
        } else {
            let artist = req.query.term(SearchField::Artist).unwrap_or("").to_string();
            first_page(req, &[artist.as_str()])
        }
    });
    let harness = Harness {
        concurrency: 3,
        ..Default::default()
    };
    let (report, decisions) = harness.run(transport, ten_records()).await;

    assert_eq!(decisions.len(), 10);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.matched, 9);
    assert!(report.stopped.is_none());

    let failed: Vec<_> = decisions
        .iter()
        .filter(|d| matches!(d.verdict, Verdict::Failed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].record_id, "r4");
}

#[tokio::test(start_paused = true)]
async fn rerun_yields_identical_decisions() {
    let respond = |req: &PageRequest| {
        first_page(req, &["Artist 1", "Artist 10", "Artist 3 and Friends", "Someone Else"])
    };
    let harness = Harness {
        concurrency: 4,
        ..Default::default()
    };

    let (_, first) = harness.run(MockCatalog::new(respond), ten_records()).await;
    let (_, second) = harness.run(MockCatalog::new(respond), ten_records()).await;

    assert_eq!(first.len(), 10);
    assert_eq!(sorted(first), sorted(second));
}

#[tokio::test(start_paused = true)]
async fn raising_threshold_never_adds_matches() {
    let respond = |req: &PageRequest| {
        first_page(
            req,
            &["Artist 1", "Artist 2 Tribute Band", "Artists of 3", "Ensemble 4"],
        )
    };

    let mut previous = u64::MAX;
    for threshold in [0.0, 40.0, 60.0, 70.0, 85.0, 100.0] {
        let harness = Harness {
            threshold,
            ..Default::default()
        };
        let (report, _) = harness.run(MockCatalog::new(respond), ten_records()).await;
        assert!(
            report.summary.matched <= previous,
            "threshold {} matched {} > {}",
            threshold,
            report.summary.matched,
            previous
        );
        previous = report.summary.matched;
    }
}

#[tokio::test(start_paused = true)]
async fn pagination_stops_on_first_empty_page() {
    let transport = MockCatalog::new(|req| {
        if req.offset == 0 {
            PageAttempt::Success(RawPage {
                items: (0..20)
                    .map(|i| json!({"id": format!("o{}", i), "name": format!("Other Act {}", i)}))
                    .collect(),
                declared_total: Some(100),
            })
        } else {
            PageAttempt::Success(RawPage {
                items: vec![],
                declared_total: Some(100),
            })
        }
    });
    let (report, _) = Harness::default()
        .run(transport.clone(), vec![record("r1", "Interpol")])
        .await;

    let offsets: Vec<u32> = transport.requests().iter().map(|(_, o, _)| *o).collect();
    assert_eq!(offsets, vec![0, 20]);
    assert_eq!(report.summary.total(), 1);
}

#[tokio::test(start_paused = true)]
async fn sallie_ford_matches_only_the_exact_candidate() {
    let local = "Sallie Ford & The Sound Outside";

    let near = MockCatalog::new(|req| first_page(req, &["Sallie Ford and Friends"]));
    let (report, decisions) = Harness::default()
        .run(near, vec![record("s1", local)])
        .await;
    assert_eq!(report.summary.unmatched, 1);
    assert!(decisions[0].confidence < 70.0);

    let both = MockCatalog::new(|req| {
        first_page(
            req,
            &["Sallie Ford and Friends", "Sallie Ford & The Sound Outside"],
        )
    });
    let (report, decisions) = Harness::default()
        .run(both, vec![record("s1", local)])
        .await;
    assert_eq!(report.summary.matched, 1);
    assert_eq!(decisions[0].matched_id(), Some("x2"));
    assert_eq!(decisions[0].confidence, 100.0);
}

#[tokio::test(start_paused = true)]
async fn album_candidate_without_artist_does_not_win() {
    let transport = MockCatalog::new(|req| {
        if req.offset > 0 {
            return PageAttempt::Success(RawPage::default());
        }
        PageAttempt::Success(RawPage {
            items: vec![
                json!({"id": "no-artist", "name": "Antics", "type": "album"}),
                json!({
                    "id": "right",
                    "name": "Antics",
                    "type": "album",
                    "artists": [{"name": "Interpol"}]
                }),
            ],
            declared_total: Some(2),
        })
    });
    let mut interpol = record("a1", "Interpol");
    interpol.album = Some("Antics".into());

    let harness = Harness {
        kind: EntityKind::Album,
        ..Default::default()
    };
    let (report, decisions) = harness.run(transport, vec![interpol]).await;

    assert_eq!(report.summary.matched, 1);
    assert_eq!(decisions[0].matched_id(), Some("right"));
    assert_eq!(decisions[0].confidence, 100.0);
}

#[tokio::test(start_paused = true)]
async fn partial_name_does_not_stop_paging_before_exact_one() {
    let transport = MockCatalog::new(|req| {
        first_page(
            req,
            &["Sallie Ford", "The Sound", "Sallie Ford & The Sound Outside"],
        )
    });
    let (report, decisions) = Harness::default()
        .run(transport, vec![record("s1", "Sallie Ford & The Sound Outside")])
        .await;

    assert_eq!(report.summary.matched, 1);
    assert_eq!(decisions[0].matched_id(), Some("x3"));
}

#[tokio::test]
async fn concurrent_workers_respect_request_spacing() {
    let delay = Duration::from_millis(25);
    let transport = MockCatalog::new(|req| first_page(req, &["Nobody"]));
    let harness = Harness {
        concurrency: 4,
        delay,
        ..Default::default()
    };
    let (report, _) = harness.run(transport.clone(), ten_records()).await;
    assert_eq!(report.summary.total(), 10);

    let mut times: Vec<Instant> = transport.requests().iter().map(|(t, _, _)| *t).collect();
    times.sort();
    // Each record: first page plus the empty terminator.
    assert_eq!(times.len(), 20);
    let slack = Duration::from_millis(3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] + slack >= delay);
    }
    assert!(times[19] - times[0] + slack >= delay * 19);
}

#[tokio::test(start_paused = true)]
async fn sustained_remote_failure_aborts_run() {
    let transport = MockCatalog::new(|_| PageAttempt::transient("HTTP 503"));
    let harness = Harness {
        max_retries: 1,
        max_consecutive_failures: 3,
        ..Default::default()
    };
    let (report, decisions) = harness.run(transport.clone(), ten_records()).await;

    let reason = report.stopped.clone().unwrap();
    assert!(reason.starts_with("run aborted"), "{}", reason);
    assert_eq!(decisions.len(), 10);
    assert_eq!(report.summary.failed, 10);
    // Three records, two attempts each; nothing after the abort.
    assert_eq!(transport.requests().len(), 6);

    let unstarted = decisions.iter().find(|d| d.record_id == "r10").unwrap();
    assert_eq!(
        unstarted.verdict,
        Verdict::Failed {
            reason: reason.clone()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn rejection_resets_failure_streak() {
    let transport = MockCatalog::new(|req| {
        match req.query.term(SearchField::Artist) {
            Some("Artist 3") | Some("Artist 6") | Some("Artist 9") => {
                PageAttempt::Permanent("HTTP 404".into())
            }
            _ => PageAttempt::transient("HTTP 502"),
        }
    });
    let harness = Harness {
        max_consecutive_failures: 3,
        ..Default::default()
    };
    let (report, decisions) = harness.run(transport, ten_records()).await;

    // Every third record is rejected, so streaks never reach three.
    assert!(report.stopped.is_none());
    assert_eq!(decisions.len(), 10);
    assert_eq!(report.summary.failed, 10);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_issues_no_requests() {
    let transport = MockCatalog::new(|req| first_page(req, &["Artist 1"]));
    let reconciler = Harness::default().reconciler(transport.clone());
    let sink = MemorySink::new();
    let (handle, _signal) = cancel::channel();
    handle.cancel("run cancelled: operator abort");

    let report = reconciler
        .run(ten_records(), &sink, &NoProgress, &handle)
        .await
        .unwrap();

    assert!(transport.requests().is_empty());
    assert_eq!(report.summary.failed, 10);
    assert_eq!(report.stopped.as_deref(), Some("run cancelled: operator abort"));
    assert!(sink.decisions().iter().all(|d| d.verdict
        == Verdict::Failed {
            reason: "run cancelled: operator abort".into()
        }));
}
