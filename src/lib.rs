//! # Catalog Reconcile
//!
//! Resolves locally extracted music tags (artist, album, track, composer,
//! conductor) to canonical identifiers in a remote music catalog.
//!
//! Each input record is normalized, searched for through a paged,
//! rate-limited catalog endpoint, and the candidates are scored by fuzzy
//! token-set similarity. Every record yields exactly one decision:
//! `matched` (with the chosen candidate), `unmatched`, or `failed` (with a
//! reason). Decisions are upserted into SQLite, so runs can be repeated.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Tag exports │──▶│ Orchestrator │──▶│   Scorer    │──▶│  SQLite  │
//! │  (NDJSON)   │   │ worker pool  │   │ token-set   │   │ decisions│
//! └─────────────┘   └──────┬───────┘   └─────────────┘   └──────────┘
//!                          │
//!                          ▼
//!                  ┌───────────────┐    ┌──────────────────┐
//!                  │ Catalog client│──▶ │ HTTP  /  offline │
//!                  │ pages, retry, │    │    transport     │
//!                  │  rate limit   │    └──────────────────┘
//!                  └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reconcile init                          # create database
//! reconcile run --kind artist --offline   # resolve from the offline table
//! reconcile run --kind track              # resolve against the remote catalog
//! reconcile stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`normalize`] | Tag string normalization |
//! | [`rate_limit`] | Shared minimum-spacing rate limiter |
//! | [`catalog`] | Catalog client: paging, retry, candidate validation |
//! | [`catalog_http`] | HTTP search transport |
//! | [`catalog_offline`] | Offline name→id table transport |
//! | [`score`] | Similarity scoring and best-candidate selection |
//! | [`reconcile`] | Orchestrator |
//! | [`cancel`] | Run-level cancellation |
//! | [`input`] | NDJSON tag record reader |
//! | [`sink`] | Decision sinks and run ledger |
//! | [`diagnostics`] | Near-miss dumps |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cancel;
pub mod catalog;
pub mod catalog_http;
pub mod catalog_offline;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod input;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod probe;
pub mod progress;
pub mod rate_limit;
pub mod reconcile;
pub mod run_cmd;
pub mod score;
pub mod sink;
pub mod stats;
