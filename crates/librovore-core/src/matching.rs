//! Name matching for inventory filtering.
//!
//! Three modes: exact (substring containment by default, strict equality via
//! configuration), regex (compiled once per query), and fuzzy (a
//! Levenshtein-based partial-ratio score in `[0, 100]` against a threshold).
//!
//! The partial-ratio scorer slides the term over same-length windows of the
//! candidate and normalizes the best edit distance by the longer of the two
//! strings. It returns 100 exactly when the term occurs verbatim in the
//! candidate, which keeps `fuzzy_threshold = 100` equivalent to the default
//! exact mode.

use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a query term is matched against inventory object names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Substring containment (strict equality when configured).
    Exact,
    /// Regular-expression match against the name.
    Regex,
    /// Partial-ratio score at or above the threshold.
    #[default]
    Fuzzy,
}

impl FromStr for MatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "regex" => Ok(Self::Regex),
            "fuzzy" => Ok(Self::Fuzzy),
            other => Err(Error::MatchModeInvalid(format!(
                "unknown match mode '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Regex => write!(f, "regex"),
            Self::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// A compiled matcher for one query.
///
/// Construction validates the mode up front (regex compilation, threshold
/// range) so matching itself is infallible.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    term: String,
    mode: MatchMode,
    regex: Option<Regex>,
    threshold: u8,
    exact_strict: bool,
}

impl NameMatcher {
    /// Compile a matcher for `term` under the given mode.
    ///
    /// An empty term matches everything in every mode, which lets callers
    /// enumerate a whole inventory bounded only by `results_max`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MatchModeInvalid`] for an uncompilable regex or a
    /// threshold above 100.
    pub fn new(term: &str, mode: MatchMode, threshold: u8, exact_strict: bool) -> Result<Self> {
        if threshold > 100 {
            return Err(Error::MatchModeInvalid(format!(
                "fuzzy threshold must be in 0..=100, got {threshold}"
            )));
        }
        let regex = match mode {
            MatchMode::Regex if !term.is_empty() => Some(Regex::new(term).map_err(|e| {
                Error::MatchModeInvalid(format!("invalid regex '{term}': {e}"))
            })?),
            _ => None,
        };
        Ok(Self {
            term: term.to_string(),
            mode,
            regex,
            threshold,
            exact_strict,
        })
    }

    /// The mode this matcher was compiled for.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Score `name` against the term.
    ///
    /// Returns `None` for a non-match, `Some(score)` in `[0, 100]` otherwise.
    /// The score orders candidates; exact and regex matches all score 100 and
    /// are ordered by name downstream.
    #[must_use]
    pub fn score(&self, name: &str) -> Option<u8> {
        if self.term.is_empty() {
            return Some(100);
        }
        match self.mode {
            MatchMode::Exact => {
                let hit = if self.exact_strict {
                    name == self.term
                } else {
                    name.contains(&self.term)
                };
                hit.then_some(100)
            },
            MatchMode::Regex => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(name))
                .then_some(100),
            MatchMode::Fuzzy => {
                let score = partial_ratio(&self.term, name);
                (score >= self.threshold).then_some(score)
            },
        }
    }
}

/// Partial-ratio similarity of `term` against `candidate`, in `[0, 100]`.
///
/// Tolerant of the term being a substring of the candidate: the best
/// same-length window of the candidate is located by edit distance, and the
/// distance is normalized by the longer string so that near-misses inside
/// long qualified names still rank usefully. Scores 100 iff the term occurs
/// verbatim.
#[must_use]
pub fn partial_ratio(term: &str, candidate: &str) -> u8 {
    if term.is_empty() || term == candidate {
        return 100;
    }
    if candidate.is_empty() {
        return 0;
    }
    if candidate.contains(term) {
        return 100;
    }

    let term_chars: Vec<char> = term.chars().collect();
    let cand_chars: Vec<char> = candidate.chars().collect();
    let longer = term_chars.len().max(cand_chars.len());

    let best = if cand_chars.len() <= term_chars.len() {
        strsim::levenshtein(term, candidate)
    } else {
        let window = term_chars.len();
        let mut best = usize::MAX;
        for start in 0..=(cand_chars.len() - window) {
            let slice: String = cand_chars[start..start + window].iter().collect();
            let dist = strsim::levenshtein(term, &slice);
            if dist < best {
                best = dist;
            }
            if best == 0 {
                break;
            }
        }
        best
    };

    if best >= longer {
        return 0;
    }
    let similarity = 1.0 - (best as f64 / longer as f64);
    // A non-substring can round up to 100 on long candidates; cap below it so
    // 100 remains reserved for verbatim occurrence.
    ((similarity * 100.0).round() as u8).min(99)
}
