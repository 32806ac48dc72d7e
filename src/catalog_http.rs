//! HTTP catalog transport.
//!
//! Issues `GET {base_url}/search?q=...&type=...&limit=...&offset=...[&market=...]`
//! with a bearer token and classifies the response:
//!
//! - 2xx with a `{"<kind>s": {"items": [...], "total": N}}` body → success
//! - 2xx with an unreadable body → transient (the service is misbehaving,
//!   not the request)
//! - HTTP 429 → transient, honouring `Retry-After` (seconds)
//! - HTTP 408 → transient
//! - HTTP 5xx, timeouts, connection errors → transient
//! - any other HTTP 4xx → permanent
//!
//! The access token is read once from the environment variable named by
//! `catalog.token_env`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::catalog::{CatalogTransport, PageAttempt, PageRequest, RawPage};
use crate::config::CatalogConfig;

/// Longest error body echoed into a failure reason.
const MAX_REASON_BODY: usize = 200;

pub struct HttpTransport {
    client: reqwest::Client,
    search_url: String,
    market: Option<String>,
    token: Option<String>,
}

impl HttpTransport {
    /// Build a transport, reading the access token from the environment.
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let token = match std::env::var(&config.token_env) {
            Ok(t) if !t.trim().is_empty() => t,
            _ => bail!("{} environment variable not set", config.token_env),
        };
        Self::new(config, Some(token))
    }

    /// Build a transport with an explicit token (`None` sends no credential).
    pub fn new(config: &CatalogConfig, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            search_url: format!("{}/search", config.base_url.trim_end_matches('/')),
            market: config.market.clone(),
            token,
        })
    }
}

#[async_trait]
impl CatalogTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_page(&self, request: &PageRequest) -> PageAttempt {
        let mut params: Vec<(&str, String)> = vec![
            ("q", request.query.text()),
            ("type", request.query.kind.as_str().to_string()),
            ("limit", request.limit.to_string()),
            ("offset", request.offset.to_string()),
        ];
        if let Some(market) = &self.market {
            params.push(("market", market.clone()));
        }

        let mut builder = self.client.get(&self.search_url).query(&params);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return PageAttempt::transient("request timed out"),
            Err(e) => return PageAttempt::transient(format!("request failed: {}", e)),
        };

        let status = response.status();

        if status.is_success() {
            return match response.json::<Value>().await {
                Ok(json) => parse_search_response(&json, request.query.kind.plural()),
                Err(e) => PageAttempt::transient(format!("unreadable response body: {}", e)),
            };
        }

        // Rate limited, timed out, or server error: retry
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body_text = response.text().await.unwrap_or_default();
            return PageAttempt::Transient {
                reason: failure_reason(status, &body_text),
                retry_after,
            };
        }

        // Other client errors are not retried
        let body_text = response.text().await.unwrap_or_default();
        PageAttempt::Permanent(failure_reason(status, &body_text))
    }
}

/// Extract `items` and `total` from a search response body.
///
/// A body missing the section for the requested kind is treated as an empty
/// page.
pub fn parse_search_response(json: &Value, section: &str) -> PageAttempt {
    let Some(section) = json.get(section) else {
        return PageAttempt::Success(RawPage::default());
    };
    let items = section
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let declared_total = section.get("total").and_then(Value::as_u64);
    PageAttempt::Success(RawPage {
        items,
        declared_total,
    })
}

fn failure_reason(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {}", status.as_u16());
    }
    let snippet: String = body.chars().take(MAX_REASON_BODY).collect();
    format!("HTTP {}: {}", status.as_u16(), snippet)
}
