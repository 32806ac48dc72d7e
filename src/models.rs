//! Core data models used throughout Catalog Reconcile.
//!
//! These types represent the local tag records, remote candidates, and match
//! decisions that flow through the reconciliation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One locally extracted track, as read from tag export files.
///
/// Immutable once extracted. All tag strings are nullable because library
/// managers write whatever subset of fields they support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTagRecord {
    /// File-derived metadata id. Unique per source file.
    pub id: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub composer: Option<String>,
    #[serde(default)]
    pub conductor: Option<String>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub year: Option<String>,
    /// When the tags were extracted from the file. Part of the sink key.
    pub extracted_at: DateTime<Utc>,
}

/// The kind of catalog entity a run resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artist,
    Album,
    Track,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Track => "track",
        }
    }

    /// Key of the result container in a search response (`"artists"`, ...).
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artists",
            EntityKind::Album => "albums",
            EntityKind::Track => "tracks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist" => Ok(EntityKind::Artist),
            "album" => Ok(EntityKind::Album),
            "track" => Ok(EntityKind::Track),
            other => anyhow::bail!(
                "Unknown entity kind: '{}'. Must be artist, album, or track.",
                other
            ),
        }
    }
}

/// One remote search result, validated at the catalog client boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCandidate {
    /// Remote entity id.
    pub id: String,
    pub kind: EntityKind,
    /// Display name of the entity itself.
    pub name: String,
    /// Credited artist names (albums and tracks). Empty for artists.
    #[serde(default)]
    pub artist_names: Vec<String>,
    /// Parent album name (tracks only).
    #[serde(default)]
    pub album_name: Option<String>,
    /// Position in the remote result sequence, starting at 0. Lower is better.
    pub rank: u32,
    /// Every payload field not listed above, preserved but never scored.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The verdict for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Verdict {
    Matched { candidate: CatalogCandidate },
    Unmatched,
    Failed { reason: String },
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Matched { .. } => "matched",
            Verdict::Unmatched => "unmatched",
            Verdict::Failed { .. } => "failed",
        }
    }
}

/// The engine's decision for one [`LocalTagRecord`]. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub record_id: String,
    pub extracted_at: DateTime<Utc>,
    pub kind: EntityKind,
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Best similarity score seen, in `[0, 100]`. `0` when nothing was scored.
    pub confidence: f64,
}

impl MatchDecision {
    pub fn failed(record: &LocalTagRecord, kind: EntityKind, reason: impl Into<String>) -> Self {
        Self {
            record_id: record.id.clone(),
            extracted_at: record.extracted_at,
            kind,
            verdict: Verdict::Failed {
                reason: reason.into(),
            },
            confidence: 0.0,
        }
    }

    /// Remote id of the matched candidate, if any.
    pub fn matched_id(&self) -> Option<&str> {
        match &self.verdict {
            Verdict::Matched { candidate } => Some(&candidate.id),
            _ => None,
        }
    }
}

/// Outcome counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub matched: u64,
    pub unmatched: u64,
    pub failed: u64,
}

impl RunSummary {
    pub fn record(&mut self, verdict: &Verdict) {
        match verdict {
            Verdict::Matched { .. } => self.matched += 1,
            Verdict::Unmatched => self.unmatched += 1,
            Verdict::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.matched + self.unmatched + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_parses_and_displays() {
        for kind in [EntityKind::Artist, EntityKind::Album, EntityKind::Track] {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("playlist".parse::<EntityKind>().is_err());
        assert_eq!(EntityKind::Track.plural(), "tracks");
    }

    #[test]
    fn decision_serializes_with_outcome_tag() {
        let record = LocalTagRecord {
            id: "f-1".into(),
            artist: Some("Interpol".into()),
            album: None,
            track: None,
            composer: None,
            conductor: None,
            track_number: None,
            year: None,
            extracted_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let decision = MatchDecision::failed(&record, EntityKind::Artist, "boom");
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "boom");
        assert_eq!(json["record_id"], "f-1");
        assert_eq!(decision.matched_id(), None);
    }

    #[test]
    fn summary_counts_each_verdict() {
        let mut summary = RunSummary::default();
        summary.record(&Verdict::Unmatched);
        summary.record(&Verdict::Failed {
            reason: "x".into(),
        });
        summary.record(&Verdict::Unmatched);
        assert_eq!(summary.unmatched, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
    }
}
