//! Catalog client: paginated, rate-limited, retrying candidate retrieval.
//!
//! The client sits between the orchestrator and a [`CatalogTransport`]
//! (HTTP, offline table, or a test double). One logical search becomes a
//! lazily pulled sequence of pages:
//!
//! ```text
//! search(query) ─▶ CandidatePages ─ next_page() ─▶ acquire slot ─▶ transport.fetch_page()
//!                        ▲                                              │
//!                        └──── retry state machine ◀── Transient ───────┤
//!                                                      Permanent ───────┴─▶ CatalogError::Rejected
//! ```
//!
//! # Pagination
//!
//! Pages are requested at `offset = 0, page_size, 2 * page_size, ...` and the
//! sequence ends on the **first page with zero items**. The total the service
//! declares is recorded on the cursor but never used to decide termination:
//! it overstates availability often enough to produce requests for pages that
//! do not exist. `max_pages` is a hard upper bound on top of that.
//!
//! # Retry Strategy
//!
//! Each request attempt yields a [`PageAttempt`]:
//! - `Success` → page returned
//! - `Transient` (timeout, 408, 5xx, 429) → retry with exponential backoff
//!   (`backoff_base_ms * 2^(n-1)`, capped at `max_backoff_ms`); a
//!   server-provided `Retry-After` is honoured in full, even past the cap
//! - `Permanent` (other 4xx, bad credentials) → fail immediately
//!
//! At most `1 + max_retries` attempts are made per page.
//!
//! # Payload validation
//!
//! Items are validated into [`CatalogCandidate`]s here. An item without a
//! string `id` and `name`, or with a `type` that disagrees with the query,
//! is skipped; the rest of the page is kept. Fields the scorer does not use
//! are preserved in [`CatalogCandidate::extra`].

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cancel::CancelSignal;
use crate::config::CatalogConfig;
use crate::models::{CatalogCandidate, EntityKind};
use crate::normalize::NormalizedKey;
use crate::rate_limit::RateLimiter;

// ═══════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════

/// A field filter in a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Artist,
    Album,
    Track,
    Year,
}

impl SearchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Artist => "artist",
            SearchField::Album => "album",
            SearchField::Track => "track",
            SearchField::Year => "year",
        }
    }
}

/// One logical search: an entity-type filter plus field terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub kind: EntityKind,
    pub terms: Vec<(SearchField, String)>,
}

impl SearchQuery {
    /// Build the search for `kind` from a normalized record.
    ///
    /// Every discriminating field the record carries is included. Fails with
    /// a reason when the field the kind is named after is missing.
    pub fn for_key(kind: EntityKind, key: &NormalizedKey) -> Result<Self, String> {
        let artist = key.primary_artist();
        let mut terms = Vec::new();

        match kind {
            EntityKind::Artist => {
                if artist.is_empty() {
                    return Err("record has no artist, composer, or conductor tag".to_string());
                }
                terms.push((SearchField::Artist, artist.to_string()));
            }
            EntityKind::Album => {
                if key.album.is_empty() {
                    return Err("record has no album tag".to_string());
                }
                if !artist.is_empty() {
                    terms.push((SearchField::Artist, artist.to_string()));
                }
                terms.push((SearchField::Album, key.album.clone()));
                if let Some(year) = &key.year {
                    terms.push((SearchField::Year, year.clone()));
                }
            }
            EntityKind::Track => {
                if key.track.is_empty() {
                    return Err("record has no track title tag".to_string());
                }
                if !artist.is_empty() {
                    terms.push((SearchField::Artist, artist.to_string()));
                }
                if !key.album.is_empty() {
                    terms.push((SearchField::Album, key.album.clone()));
                }
                terms.push((SearchField::Track, key.track.clone()));
            }
        }

        Ok(Self { kind, terms })
    }

    /// Value of the field filter, if present.
    pub fn term(&self, field: SearchField) -> Option<&str> {
        self.terms
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    /// Query string in `field:value` form, e.g. `artist:Interpol album:Antics`.
    pub fn text(&self) -> String {
        self.terms
            .iter()
            .map(|(field, value)| format!("{}:{}", field.as_str(), value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Transport contract
// ═══════════════════════════════════════════════════════════════════════

/// One page request handed to a transport.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub query: SearchQuery,
    pub offset: u32,
    pub limit: u32,
}

/// Raw page returned by a transport, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub items: Vec<Value>,
    /// Total the service claims is available. Informational only.
    pub declared_total: Option<u64>,
}

/// Result of a single request attempt.
#[derive(Debug, Clone)]
pub enum PageAttempt {
    Success(RawPage),
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    Permanent(String),
}

impl PageAttempt {
    pub fn transient(reason: impl Into<String>) -> Self {
        PageAttempt::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }
}

/// A remote catalog that can serve one search page per call.
///
/// Implementations perform exactly one request per call and classify the
/// outcome. Pacing, retries, and pagination belong to [`CatalogClient`].
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    /// Short identifier used in logs (e.g. `"http"`, `"offline"`).
    fn name(&self) -> &str;

    async fn fetch_page(&self, request: &PageRequest) -> PageAttempt;
}

// ═══════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("catalog rejected request: {0}")]
    Rejected(String),

    #[error("catalog unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("{0}")]
    Cancelled(String),
}

impl CatalogError {
    /// True when the remote kept failing transiently until retries ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, CatalogError::Exhausted { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════

/// Tunables for [`CatalogClient`], derived from [`CatalogConfig`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub page_size: u32,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub max_pages: u32,
}

impl From<&CatalogConfig> for ClientSettings {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_pages: config.max_pages,
        }
    }
}

/// Pagination state for one query. Owned by a single [`CandidatePages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: u32,
    pub page_size: u32,
    pub declared_total: Option<u64>,
    pub pages_fetched: u32,
}

impl PageCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            offset: 0,
            page_size,
            declared_total: None,
            pages_fetched: 0,
        }
    }

    fn advance(&mut self, declared_total: Option<u64>) {
        self.offset += self.page_size;
        self.pages_fetched += 1;
        if declared_total.is_some() {
            self.declared_total = declared_total;
        }
    }
}

/// Retry bookkeeping for one page request.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_retries: u32,
    next_backoff: Duration,
    max_backoff: Duration,
}

impl RetryState {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            attempt: 0,
            max_retries: settings.max_retries,
            next_backoff: settings.backoff_base,
            max_backoff: settings.max_backoff,
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record a started attempt.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
    }

    /// After a transient failure: the delay before the next attempt, or
    /// `None` when no attempts remain.
    pub fn on_transient(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        if self.attempt > self.max_retries {
            return None;
        }
        let backoff = self.next_backoff.min(self.max_backoff);
        self.next_backoff = (self.next_backoff * 2).min(self.max_backoff);
        Some(backoff.max(retry_after.unwrap_or_default()))
    }
}

/// Searches a remote catalog through a transport, sharing one rate limiter
/// across every caller.
pub struct CatalogClient {
    transport: Arc<dyn CatalogTransport>,
    limiter: Arc<RateLimiter>,
    settings: ClientSettings,
}

impl CatalogClient {
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        limiter: Arc<RateLimiter>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            limiter,
            settings,
        }
    }

    /// Build a client from configuration with its own rate limiter.
    pub fn from_config(transport: Arc<dyn CatalogTransport>, config: &CatalogConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.request_delay_ms,
        )));
        Self::new(transport, limiter, ClientSettings::from(config))
    }

    /// Start a search. Nothing is requested until the first
    /// [`next_page`](CandidatePages::next_page); each call starts from page 0.
    pub fn search(&self, query: SearchQuery, cancel: CancelSignal) -> CandidatePages<'_> {
        CandidatePages {
            client: self,
            query,
            cursor: PageCursor::new(self.settings.page_size),
            cancel,
            done: false,
        }
    }

    /// Fetch one page, retrying transient failures.
    async fn fetch_with_retry(
        &self,
        request: &PageRequest,
        cancel: &CancelSignal,
    ) -> Result<RawPage, CatalogError> {
        let mut retry = RetryState::new(&self.settings);

        loop {
            if let Some(reason) = cancel.reason() {
                return Err(CatalogError::Cancelled(reason));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CatalogError::Cancelled(cancel.reason().unwrap_or_default()));
                }
                _ = self.limiter.acquire() => {}
            }

            retry.begin_attempt();
            match self.transport.fetch_page(request).await {
                PageAttempt::Success(page) => return Ok(page),
                PageAttempt::Permanent(reason) => return Err(CatalogError::Rejected(reason)),
                PageAttempt::Transient {
                    reason,
                    retry_after,
                } => match retry.on_transient(retry_after) {
                    Some(delay) => {
                        warn!(
                            "{} search '{}' offset {} failed (attempt {}): {}; retrying in {:?}",
                            self.transport.name(),
                            request.query.text(),
                            request.offset,
                            retry.attempts(),
                            reason,
                            delay
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(CatalogError::Cancelled(cancel.reason().unwrap_or_default()));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        return Err(CatalogError::Exhausted {
                            attempts: retry.attempts(),
                            last: reason,
                        });
                    }
                },
            }
        }
    }
}

/// Lazily fetched candidate pages for one query.
pub struct CandidatePages<'a> {
    client: &'a CatalogClient,
    query: SearchQuery,
    cursor: PageCursor,
    cancel: CancelSignal,
    done: bool,
}

impl CandidatePages<'_> {
    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Fetch the next page of validated candidates.
    ///
    /// Returns `Ok(None)` once the sequence is finished. A page whose items
    /// were all malformed yields `Ok(Some(vec![]))` and paging continues.
    pub async fn next_page(&mut self) -> Result<Option<Vec<CatalogCandidate>>, CatalogError> {
        if self.done {
            return Ok(None);
        }
        if self.cursor.pages_fetched >= self.client.settings.max_pages {
            debug!(
                "search '{}' stopped at page limit ({})",
                self.query.text(),
                self.client.settings.max_pages
            );
            self.done = true;
            return Ok(None);
        }

        let request = PageRequest {
            query: self.query.clone(),
            offset: self.cursor.offset,
            limit: self.cursor.page_size,
        };

        let page = match self.client.fetch_with_retry(&request, &self.cancel).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        if page.items.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let base_rank = self.cursor.offset;
        let candidates = page
            .items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let rank = base_rank + i as u32;
                let candidate = candidate_from_item(self.query.kind, rank, item);
                if candidate.is_none() {
                    debug!(
                        "skipping malformed {} item at rank {} for '{}'",
                        self.query.kind,
                        rank,
                        self.query.text()
                    );
                }
                candidate
            })
            .collect();

        self.cursor.advance(page.declared_total);
        Ok(Some(candidates))
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<CatalogCandidate>, CatalogError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}

/// Validate one raw payload item into a candidate.
///
/// Requires non-empty string `id` and `name`. `artists` may be a list of
/// objects with a `name` or a list of strings; `album` may be an object with
/// a `name` or a string. Everything else lands in `extra`.
pub fn candidate_from_item(kind: EntityKind, rank: u32, item: Value) -> Option<CatalogCandidate> {
    let Value::Object(mut map) = item else {
        return None;
    };

    if let Some(t) = map.get("type").and_then(Value::as_str) {
        if t != kind.as_str() {
            return None;
        }
    }

    let id = take_string(&mut map, "id")?;
    let name = take_string(&mut map, "name")?;

    let artist_names = match map.remove("artists") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        _ => Vec::new(),
    };

    let album_name = match map.remove("album") {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(o)) => o.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
    .filter(|s| !s.trim().is_empty());

    Some(CatalogCandidate {
        id,
        kind,
        name,
        artist_names,
        album_name,
        rank,
        extra: map,
    })
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}
