use anyhow::{bail, Result};
use std::time::Instant;

use crate::catalog::{CatalogTransport, PageAttempt, PageRequest, SearchField, SearchQuery};
use crate::normalize::Normalizer;

/// Outcome of a single probe request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub status: &'static str,
    pub healthy: bool,
    pub items: usize,
    pub detail: Option<String>,
}

/// Issue one artist search for `term`, without retries.
pub async fn probe(
    transport: &dyn CatalogTransport,
    normalizer: &Normalizer,
    term: &str,
) -> ProbeResult {
    let term = normalizer.normalize(term);
    let request = PageRequest {
        query: SearchQuery {
            kind: crate::models::EntityKind::Artist,
            terms: vec![(SearchField::Artist, term)],
        },
        offset: 0,
        limit: 1,
    };

    match transport.fetch_page(&request).await {
        PageAttempt::Success(page) => ProbeResult {
            status: "OK",
            healthy: true,
            items: page.items.len(),
            detail: None,
        },
        PageAttempt::Transient { reason, .. } => ProbeResult {
            status: "UNAVAILABLE",
            healthy: false,
            items: 0,
            detail: Some(reason),
        },
        PageAttempt::Permanent(reason) => ProbeResult {
            status: "REJECTED",
            healthy: false,
            items: 0,
            detail: Some(reason),
        },
    }
}

/// Run the probe command and print the result. Fails when unhealthy.
pub async fn run_probe(
    transport: &dyn CatalogTransport,
    normalizer: &Normalizer,
    term: &str,
) -> Result<()> {
    let started = Instant::now();
    let result = probe(transport, normalizer, term).await;
    let elapsed = started.elapsed();

    println!(
        "{:<10} {:<12} {:<8} {:>6}  LATENCY",
        "TRANSPORT", "STATUS", "HEALTHY", "ITEMS"
    );
    println!(
        "{:<10} {:<12} {:<8} {:>6}  {} ms",
        transport.name(),
        result.status,
        result.healthy,
        result.items,
        elapsed.as_millis()
    );
    if let Some(detail) = &result.detail {
        println!("  {}", detail);
    }

    if !result.healthy {
        bail!("catalog probe failed ({})", result.status);
    }
    Ok(())
}
