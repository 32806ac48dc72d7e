//! Tag string normalization.
//!
//! Local tags and remote display names are folded into a comparable form
//! before searching and scoring:
//!
//! 1. Unicode NFD decomposition with combining marks removed (`Björk` → `Bjork`),
//!    plus a small table for letters that do not decompose (`ø`, `ß`, `æ`, ...).
//! 2. Configured punctuation characters replaced with a space.
//! 3. Whitespace runs collapsed to a single space and trimmed.
//!
//! Case is preserved; the scorer compares case-insensitively. The transform
//! is deterministic and idempotent.

use std::collections::BTreeSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::MatchingConfig;
use crate::models::LocalTagRecord;

/// Letters NFD leaves intact, mapped to their usual ASCII spelling.
/// Typographic quotes and dashes map to their ASCII counterparts so the
/// configured strip set applies to them too.
const FOLD_TABLE: &[(char, &str)] = &[
    ('Æ', "AE"),
    ('æ', "ae"),
    ('Ø', "O"),
    ('ø', "o"),
    ('Œ', "OE"),
    ('œ', "oe"),
    ('ß', "ss"),
    ('Đ', "D"),
    ('đ', "d"),
    ('Ð', "D"),
    ('ð', "d"),
    ('Ł', "L"),
    ('ł', "l"),
    ('Þ', "Th"),
    ('þ', "th"),
    ('ı', "i"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2013}', "-"),
    ('\u{2014}', "-"),
    ('\u{2026}', "..."),
];

/// Tag string normalizer with a configurable punctuation strip set.
#[derive(Debug, Clone)]
pub struct Normalizer {
    strip: BTreeSet<char>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&MatchingConfig::default().strip_chars)
    }
}

impl Normalizer {
    pub fn new(strip_chars: &str) -> Self {
        Self {
            strip: strip_chars.chars().collect(),
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(&config.strip_chars)
    }

    /// Normalize one tag string. Never fails; empty input yields `""`.
    pub fn normalize(&self, raw: &str) -> String {
        let folded = fold_to_ascii(raw);
        let replaced: String = folded
            .chars()
            .map(|c| if self.strip.contains(&c) { ' ' } else { c })
            .collect();
        replaced.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn normalize_opt(&self, raw: Option<&str>) -> String {
        raw.map(|s| self.normalize(s)).unwrap_or_default()
    }
}

/// Strip diacritics and transliterate common non-decomposing letters.
pub fn fold_to_ascii(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        match FOLD_TABLE.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }
    out
}

/// Cleaned, comparison-only view of a [`LocalTagRecord`]. Never persisted.
///
/// Absent tags are represented as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedKey {
    pub artist: String,
    pub album: String,
    pub track: String,
    pub composer: String,
    pub conductor: String,
    /// Four-digit release year, when the record carries one.
    pub year: Option<String>,
}

impl NormalizedKey {
    pub fn from_record(normalizer: &Normalizer, record: &LocalTagRecord) -> Self {
        let year = record
            .year
            .as_deref()
            .map(str::trim)
            .filter(|y| y.len() == 4 && y.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string);

        Self {
            artist: normalizer.normalize_opt(record.artist.as_deref()),
            album: normalizer.normalize_opt(record.album.as_deref()),
            track: normalizer.normalize_opt(record.track.as_deref()),
            composer: normalizer.normalize_opt(record.composer.as_deref()),
            conductor: normalizer.normalize_opt(record.conductor.as_deref()),
            year,
        }
    }

    /// The credited artist used for search and scoring: artist, then
    /// composer, then conductor.
    pub fn primary_artist(&self) -> &str {
        [&self.artist, &self.composer, &self.conductor]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn strips_ampersand_and_collapses() {
        let n = Normalizer::default();
        assert_eq!(
            n.normalize("Sallie Ford & The Sound Outside"),
            "Sallie Ford The Sound Outside"
        );
        assert_eq!(n.normalize("  Massive   Attack\t"), "Massive Attack");
    }

    #[test]
    fn folds_diacritics() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("Björk"), "Bjork");
        assert_eq!(n.normalize("Sigur Rós"), "Sigur Ros");
        assert_eq!(n.normalize("Mötley Crüe"), "Motley Crue");
        assert_eq!(n.normalize("Røyksopp"), "Royksopp");
        assert_eq!(n.normalize("Straße"), "Strasse");
        assert!(n.normalize("Dvořák Antonín").is_ascii());
    }

    #[test]
    fn idempotent() {
        let n = Normalizer::default();
        for raw in [
            "Björk",
            "Symphony No.8 in F-major, Op.93",
            "  AC/DC  ",
            "Guns N’ Roses",
            "Sallie Ford & The Sound Outside",
            "Æon — Flux…",
            "",
        ] {
            let once = n.normalize(raw);
            assert_eq!(n.normalize(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn empty_and_punctuation_only() {
        let n = Normalizer::default();
        assert_eq!(n.normalize(""), "");
        assert_eq!(n.normalize(" & , . "), "");
        assert_eq!(n.normalize_opt(None), "");
    }

    #[test]
    fn custom_strip_set() {
        let n = Normalizer::new("&");
        assert_eq!(n.normalize("M. Ward & Co."), "M. Ward Co.");
    }

    #[test]
    fn typographic_quotes_are_stripped() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("Guns N’ Roses"), "Guns N Roses");
    }

    #[test]
    fn key_prefers_artist_then_composer() {
        let n = Normalizer::default();
        let mut record = LocalTagRecord {
            id: "1".into(),
            artist: None,
            album: Some("Capriccio Espagnol".into()),
            track: None,
            composer: Some("Rimsky-Korsakov".into()),
            conductor: Some("Lorin Maazel".into()),
            track_number: Some(1),
            year: Some("1987".into()),
            extracted_at: Utc::now(),
        };
        let key = NormalizedKey::from_record(&n, &record);
        assert_eq!(key.primary_artist(), "Rimsky-Korsakov");
        assert_eq!(key.year.as_deref(), Some("1987"));

        record.artist = Some("Berliner Philharmoniker".into());
        record.year = Some("n/a".into());
        let key = NormalizedKey::from_record(&n, &record);
        assert_eq!(key.primary_artist(), "Berliner Philharmoniker");
        assert_eq!(key.year, None);
    }
}
