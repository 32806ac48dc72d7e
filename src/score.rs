//! Candidate scoring and selection.
//!
//! Similarity is a token-set ratio in `[0, 100]`: both strings are lowercased
//! and split into word sets, then the shared words are compared against each
//! side's remainder with [`strsim::normalized_levenshtein`]. Word order and
//! duplicated words do not matter. Only equal word sets score 100; a string
//! whose words are a strict subset of the other's is charged for the words it
//! lacks.
//!
//! Albums and tracks are compared as composites built from the fields the
//! local record actually carries:
//!
//! | Kind   | Local side               | Candidate side                      |
//! |--------|--------------------------|-------------------------------------|
//! | artist | artist                   | name                                |
//! | album  | artist + album           | first artist + name                 |
//! | track  | artist + track + album   | first artist + name + album name    |
//!
//! The best candidate is the one with the highest score; ties go to the lower
//! remote rank, then to the one seen first.

use serde::Serialize;
use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

use crate::models::{CatalogCandidate, EntityKind, Verdict};
use crate::normalize::{NormalizedKey, Normalizer};

/// Score at which no later candidate can win.
pub const EXACT_MATCH: f64 = 100.0;

/// Token-set similarity of two strings, in `[0, 100]`.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let sect: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    if diff_ab.is_empty() && diff_ba.is_empty() {
        return EXACT_MATCH;
    }

    let sect = sect.join(" ");
    let combined_ab = join_nonempty(&[&sect, &diff_ab.join(" ")]);
    let combined_ba = join_nonempty(&[&sect, &diff_ba.join(" ")]);

    // With one remainder empty, `sect` equals that side; only the comparison
    // against the longer side counts.
    let mut best = normalized_levenshtein(&combined_ab, &combined_ba);
    if !sect.is_empty() && !diff_ab.is_empty() && !diff_ba.is_empty() {
        best = best
            .max(normalized_levenshtein(&sect, &combined_ab))
            .max(normalized_levenshtein(&sect, &combined_ba));
    }
    best * 100.0
}

fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comparison string for the local side.
pub fn local_key(kind: EntityKind, key: &NormalizedKey) -> String {
    let artist = key.primary_artist();
    match kind {
        EntityKind::Artist => artist.to_string(),
        EntityKind::Album => join_nonempty(&[artist, &key.album]),
        EntityKind::Track => join_nonempty(&[artist, &key.track, &key.album]),
    }
}

/// Comparison string for a candidate, mirroring the fields present in `key`.
///
/// A candidate that credits no artist contributes none, so the local artist
/// words stay unmatched and count against it.
pub fn candidate_key(
    kind: EntityKind,
    key: &NormalizedKey,
    candidate: &CatalogCandidate,
    normalizer: &Normalizer,
) -> String {
    let name = normalizer.normalize(&candidate.name);
    let artist = if key.primary_artist().is_empty() {
        String::new()
    } else {
        normalizer.normalize_opt(candidate.artist_names.first().map(String::as_str))
    };

    match kind {
        EntityKind::Artist => name,
        EntityKind::Album => join_nonempty(&[&artist, &name]),
        EntityKind::Track => {
            let album = if key.album.is_empty() {
                String::new()
            } else {
                normalizer.normalize_opt(candidate.album_name.as_deref())
            };
            join_nonempty(&[&artist, &name, &album])
        }
    }
}

/// A candidate with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: CatalogCandidate,
    pub score: f64,
}

/// Scores candidates for one record against a fixed local key.
#[derive(Debug, Clone)]
pub struct Scorer<'a> {
    kind: EntityKind,
    local: String,
    key: &'a NormalizedKey,
    normalizer: &'a Normalizer,
}

impl<'a> Scorer<'a> {
    pub fn new(kind: EntityKind, key: &'a NormalizedKey, normalizer: &'a Normalizer) -> Self {
        Self {
            kind,
            local: local_key(kind, key),
            key,
            normalizer,
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn score(&self, candidate: &CatalogCandidate) -> f64 {
        let remote = candidate_key(self.kind, self.key, candidate, self.normalizer);
        token_set_ratio(&self.local, &remote)
    }
}

/// Incremental best-candidate selection.
#[derive(Debug, Default, Clone)]
pub struct BestMatch {
    best: Option<ScoredCandidate>,
    scored: Vec<ScoredCandidate>,
}

impl BestMatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consider one more candidate.
    pub fn offer(&mut self, candidate: CatalogCandidate, score: f64) {
        let scored = ScoredCandidate { candidate, score };
        let replace = match &self.best {
            None => true,
            Some(current) => {
                score > current.score
                    || (score == current.score && scored.candidate.rank < current.candidate.rank)
            }
        };
        if replace {
            self.best = Some(scored.clone());
        }
        self.scored.push(scored);
    }

    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.best.as_ref()
    }

    /// Every candidate offered so far, in offer order.
    pub fn scored(&self) -> &[ScoredCandidate] {
        &self.scored
    }

    /// True once a candidate scored [`EXACT_MATCH`].
    pub fn is_exact(&self) -> bool {
        self.best
            .as_ref()
            .is_some_and(|b| b.score >= EXACT_MATCH)
    }

    /// Best score seen, `0` when nothing was offered.
    pub fn confidence(&self) -> f64 {
        self.best.as_ref().map(|b| b.score).unwrap_or(0.0)
    }

    /// Apply the acceptance threshold.
    pub fn verdict(&self, threshold: f64) -> Verdict {
        match &self.best {
            Some(best) if best.score >= threshold => Verdict::Matched {
                candidate: best.candidate.clone(),
            },
            _ => Verdict::Unmatched,
        }
    }
}
