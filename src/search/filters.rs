//! Post-retrieval filters. Each stage only removes candidates, so the
//! similarity order established by the index is preserved.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::CatalogItem;
use crate::semantic::dot;

static WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("Failed to compile word regex"));

/// How many words before a mention a negation cue may appear.
const NEGATION_WINDOW: usize = 2;

#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub item: &'a CatalogItem,
    pub similarity: f32,
    pub plain_score: Option<f32>,
    pub decoration_score: Option<f32>,
}

impl<'a> Candidate<'a> {
    /// Starts with the scores recorded in the catalog, if any.
    pub fn new(item: &'a CatalogItem, similarity: f32) -> Self {
        Self {
            item,
            similarity,
            plain_score: item.plain_score,
            decoration_score: item.decoration_score,
        }
    }
}

pub fn by_category<'a>(candidates: Vec<Candidate<'a>>, allowed: &[String]) -> Vec<Candidate<'a>> {
    if allowed.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| allowed.contains(&c.item.category))
        .collect()
}

/// Drop candidates whose description affirmatively mentions a negated term.
/// Candidates without a description pass.
pub fn by_negation<'a>(
    candidates: Vec<Candidate<'a>>,
    negations: &[String],
    cues: &[String],
) -> Vec<Candidate<'a>> {
    if negations.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| match &c.item.description {
            Some(description) => !negations.iter().any(|term| affirms(description, term, cues)),
            None => true,
        })
        .collect()
}

/// Singular form used for matching: "diamonds" and "diamond" are the same term.
fn fold(word: &str) -> &str {
    if word.len() > 3 && !word.ends_with("ss") {
        word.strip_suffix('s').unwrap_or(word)
    } else {
        word
    }
}

/// True when `text` mentions `term` without a negation cue shortly before it.
///
/// "gold ring set with diamonds" affirms "diamond"; "no diamonds" does not.
pub fn affirms(text: &str, term: &str, cues: &[String]) -> bool {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = WORD_REGEX.find_iter(&lowered).map(|m| m.as_str()).collect();
    let term = term.to_lowercase();
    let target = fold(&term);

    words.iter().enumerate().any(|(i, word)| {
        if fold(word) != target {
            return false;
        }
        let start = i.saturating_sub(NEGATION_WINDOW);
        !words[start..i]
            .iter()
            .any(|prev| cues.iter().any(|cue| cue == prev))
    })
}

/// Thresholds on the style scores. `None` disables a bound.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StyleThresholds {
    pub max_decoration: Option<f32>,
    pub min_plain: Option<f32>,
}

impl StyleThresholds {
    pub fn is_unbounded(&self) -> bool {
        self.max_decoration.is_none() && self.min_plain.is_none()
    }

    /// Missing scores pass their bound.
    pub fn admits(&self, candidate: &Candidate) -> bool {
        let decoration_ok = match (self.max_decoration, candidate.decoration_score) {
            (Some(max), Some(score)) => score <= max,
            _ => true,
        };
        let plain_ok = match (self.min_plain, candidate.plain_score) {
            (Some(min), Some(score)) => score >= min,
            _ => true,
        };
        decoration_ok && plain_ok
    }
}

pub fn by_style<'a>(candidates: Vec<Candidate<'a>>, thresholds: &StyleThresholds) -> Vec<Candidate<'a>> {
    if thresholds.is_unbounded() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| thresholds.admits(c))
        .collect()
}

/// Highest cosine between a unit vector and a set of unit prompt vectors,
/// clamped to [0, 1].
pub fn max_similarity(vector: &[f32], prompts: &[Vec<f32>]) -> Option<f32> {
    prompts
        .iter()
        .map(|p| dot(vector, p))
        .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))
        .map(|s| s.clamp(0.0, 1.0))
}
