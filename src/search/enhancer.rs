//! Turns a free-text query into embedding-ready text plus the category and
//! negation hints used by the filters.

use serde::Serialize;

use crate::config::VocabularyConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedQuery {
    /// Lowercased, trimmed, whitespace collapsed
    pub normalized: String,
    /// Text handed to the embedding model
    pub text: String,
    pub categories: Vec<String>,
    pub negations: Vec<String>,
    pub wants_plain: bool,
}

impl EnhancedQuery {
    /// Style scoring runs when the query asks for something to be absent.
    pub fn needs_style_scoring(&self) -> bool {
        self.wants_plain || !self.negations.is_empty()
    }
}

pub struct QueryEnhancer {
    vocabulary: VocabularyConfig,
}

/// Token with surrounding punctuation removed.
fn bare(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

impl QueryEnhancer {
    pub fn new(vocabulary: VocabularyConfig) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &VocabularyConfig {
        &self.vocabulary
    }

    pub fn categories(&self) -> &[String] {
        &self.vocabulary.categories
    }

    pub fn is_category(&self, value: &str) -> bool {
        self.vocabulary.categories.iter().any(|c| c == value)
    }

    pub fn is_negation_cue(&self, token: &str) -> bool {
        self.vocabulary.negation_cues.iter().any(|cue| cue == token)
    }

    pub fn normalize(query: &str) -> String {
        query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Vocabulary categories occurring as substrings, in vocabulary order.
    pub fn detect_categories(&self, normalized: &str) -> Vec<String> {
        self.vocabulary
            .categories
            .iter()
            .filter(|c| normalized.contains(c.as_str()))
            .cloned()
            .collect()
    }

    /// Terms following a negation cue, first-seen order, no duplicates.
    pub fn detect_negations(&self, normalized: &str) -> Vec<String> {
        let tokens: Vec<&str> = normalized.split_whitespace().map(bare).collect();

        let mut negations = Vec::new();
        for pair in tokens.windows(2) {
            let (cue, term) = (pair[0], pair[1]);
            if !self.is_negation_cue(cue) || term.is_empty() {
                continue;
            }
            if self.is_negation_cue(term) || self.names_category(term) {
                continue;
            }
            push_unique(&mut negations, term.to_string());
        }
        negations
    }

    pub fn wants_plain(&self, normalized: &str) -> bool {
        normalized
            .split_whitespace()
            .map(bare)
            .any(|token| self.vocabulary.plain_cues.iter().any(|cue| cue == token))
    }

    /// Category name in singular or plural form.
    fn names_category(&self, term: &str) -> bool {
        self.vocabulary
            .categories
            .iter()
            .any(|c| term == c || term.strip_suffix('s') == Some(c.as_str()))
    }

    pub fn enhance(&self, query: &str) -> EnhancedQuery {
        let normalized = Self::normalize(query);
        let categories = self.detect_categories(&normalized);
        let negations = self.detect_negations(&normalized);
        let wants_plain = self.wants_plain(&normalized);
        let text = self.rewrite_negations(&normalized, &negations);

        EnhancedQuery {
            normalized,
            text,
            categories,
            negations,
            wants_plain,
        }
    }

    /// Replace each "<cue> <term>" with the cue's positive phrase.
    fn rewrite_negations(&self, normalized: &str, negations: &[String]) -> String {
        if negations.is_empty() {
            return normalized.to_string();
        }

        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        let mut out: Vec<&str> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let cue = bare(tokens[i]);
            let rewrite = tokens
                .get(i + 1)
                .filter(|next| negations.iter().any(|n| n == bare(next)))
                .and(self.vocabulary.negation_rewrites.get(cue));

            match rewrite {
                Some(phrase) if self.is_negation_cue(cue) => {
                    out.push(phrase.as_str());
                    i += 2;
                }
                _ => {
                    out.push(tokens[i]);
                    i += 1;
                }
            }
        }

        Self::normalize(&out.join(" "))
    }

    /// Phrases describing a decorated item of `category`.
    ///
    /// With no negations every term family contributes, which covers queries
    /// that only ask for something plain.
    pub fn decoration_terms(&self, category: &str, negations: &[String]) -> Vec<String> {
        let fill = |template: &str, term: &str| {
            template
                .replace("{category}", category)
                .replace("{term}", term)
        };

        let mut terms = Vec::new();
        if negations.is_empty() {
            for family in &self.vocabulary.decoration_families {
                for template in &family.templates {
                    push_unique(&mut terms, fill(template, ""));
                }
            }
            return terms;
        }

        for negation in negations {
            for template in &self.vocabulary.decoration_templates {
                push_unique(&mut terms, fill(template, negation));
            }
            for family in &self.vocabulary.decoration_families {
                if family.triggers.iter().any(|t| negation.contains(t.as_str())) {
                    for template in &family.templates {
                        push_unique(&mut terms, fill(template, negation));
                    }
                }
            }
        }
        terms
    }

    /// Phrases describing a plain item of `category`.
    pub fn plain_terms(&self, category: &str) -> Vec<String> {
        match self.vocabulary.plain_terms.get(category) {
            Some(terms) if !terms.is_empty() => terms.clone(),
            _ => vec![self.vocabulary.plain_fallback.replace("{category}", category)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enhancer() -> QueryEnhancer {
        QueryEnhancer::new(VocabularyConfig::default())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            QueryEnhancer::normalize("  Gold   RING\twithout\n diamonds "),
            "gold ring without diamonds"
        );
        assert_eq!(QueryEnhancer::normalize(" \t "), "");
    }

    #[test]
    fn test_gold_ring_without_diamonds() {
        let q = enhancer().enhance("Gold ring without diamonds");

        assert_eq!(q.normalized, "gold ring without diamonds");
        assert_eq!(q.categories, vec!["ring"]);
        assert_eq!(q.negations, vec!["diamonds"]);
        assert_eq!(q.text, "gold ring minimalist smooth");
        assert!(!q.wants_plain);
        assert!(q.needs_style_scoring());
    }

    #[test]
    fn test_no_rewrite() {
        let q = enhancer().enhance("necklace with no pendant, please");
        assert_eq!(q.negations, vec!["pendant"]);
        assert_eq!(q.text, "necklace with plain simple please");
    }

    #[test]
    fn test_category_after_cue_is_not_negated() {
        let q = enhancer().enhance("anything but no rings or without necklace");
        assert!(q.negations.is_empty());
        assert_eq!(q.text, q.normalized);
    }

    #[test]
    fn test_negations_deduplicated_in_order() {
        let q = enhancer().enhance("no stones, no gems and without stones");
        assert_eq!(q.negations, vec!["stones", "gems"]);
    }

    #[test]
    fn test_trailing_cue_ignored() {
        let q = enhancer().enhance("ring with no");
        assert!(q.negations.is_empty());
    }

    #[test]
    fn test_plain_intent() {
        let q = enhancer().enhance("Simple gold necklace");
        assert!(q.wants_plain);
        assert!(q.negations.is_empty());
        assert!(q.needs_style_scoring());
        assert_eq!(q.categories, vec!["necklace"]);
    }

    #[test]
    fn test_detects_all_categories_in_vocabulary_order() {
        let q = enhancer().enhance("necklace and ring set");
        assert_eq!(q.categories, vec!["ring", "necklace"]);
    }

    #[test]
    fn test_decoration_terms_for_diamonds() {
        let terms = enhancer().decoration_terms("ring", &["diamonds".to_string()]);

        assert!(terms.contains(&"ring with diamonds".to_string()));
        assert!(terms.contains(&"diamonds ring".to_string()));
        assert!(terms.contains(&"jeweled ring".to_string()));
        assert!(!terms.contains(&"engraved ring".to_string()));
    }

    #[test]
    fn test_decoration_terms_without_negations_cover_families() {
        let terms = enhancer().decoration_terms("necklace", &[]);
        assert!(terms.contains(&"sparkly necklace".to_string()));
        assert!(terms.contains(&"pendant necklace".to_string()));
        assert!(terms.contains(&"ornate necklace".to_string()));
    }

    #[test]
    fn test_plain_terms() {
        let e = enhancer();
        assert!(e.plain_terms("ring").contains(&"wedding band".to_string()));
        assert_eq!(e.plain_terms("bracelet"), vec!["plain simple bracelet"]);
    }
}
