//! Search, image search and recommendations over the injected index and
//! embedding provider.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::catalog::Catalog;
use crate::config::{SearchConfig, VocabularyConfig};
use crate::images;
use crate::llm::TextExtractor;
use crate::search::enhancer::{EnhancedQuery, QueryEnhancer};
use crate::search::filters::{self, Candidate, StyleThresholds};
use crate::search::types::{
    FilterStats, ImageSearchRequest, QueryResult, RecommendOutcome, RecommendRequest,
    SearchOutcome, SearchRequest,
};
use crate::semantic::{
    dot, l2_normalize, EmbeddingError, EmbeddingProvider, IndexError, VectorStore,
};

const MAX_TOP_K: usize = 100;
const MAX_RECOMMEND_TOP_K: usize = 50;
const DEFAULT_RECOMMEND_TOP_K: usize = 5;
const MAX_SEMANTIC_TOP_K: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("embedding provider failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index failed: {0}")]
    Index(#[from] IndexError),
}

fn validation(message: impl Into<String>) -> SearchError {
    SearchError::Validation(message.into())
}

/// Everything the filter pipeline needs after the query vector is known.
struct Pipeline<'a> {
    allowed: &'a [String],
    negations: &'a [String],
    score_style: bool,
    thresholds: StyleThresholds,
    top_k: usize,
    pool: usize,
}

pub struct SearchService {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    catalog: Arc<Catalog>,
    enhancer: QueryEnhancer,
    config: SearchConfig,
    extractor: Option<Arc<dyn TextExtractor>>,
}

impl SearchService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        catalog: Arc<Catalog>,
        vocabulary: VocabularyConfig,
        config: SearchConfig,
    ) -> Self {
        Self {
            provider,
            store,
            catalog,
            enhancer: QueryEnhancer::new(vocabulary),
            config,
            extractor: None,
        }
    }

    pub fn with_text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn enhancer(&self) -> &QueryEnhancer {
        &self.enhancer
    }

    pub fn model_name(&self) -> &str {
        self.provider.name()
    }

    pub fn indexed_count(&self) -> usize {
        self.store.len()
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
        if QueryEnhancer::normalize(&request.query).is_empty() {
            return Err(validation("query must not be empty"));
        }
        let top_k = self.top_k(request.top_k, MAX_TOP_K)?;
        let pool = self.pool_size(request.semantic_top_k)?;
        let requested = self.requested_categories(request.categories.as_deref())?;
        for (name, value) in [
            ("max_decoration_score", request.max_decoration_score),
            ("min_plain_score", request.min_plain_score),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(validation(format!("{name} must be in [0, 1], got {value}")));
                }
            }
        }

        let enhanced = self.enhancer.enhance(&request.query);
        log::debug!(
            "search '{}' -> '{}' categories={:?} negations={:?}",
            enhanced.normalized,
            enhanced.text,
            enhanced.categories,
            enhanced.negations
        );

        let allowed = requested.unwrap_or_else(|| enhanced.categories.clone());
        let query_vector = self.provider.embed_text(&enhanced.text)?;

        let score_style = enhanced.needs_style_scoring();
        let (results, filter_stats) = self.run_pipeline(
            &query_vector,
            Pipeline {
                allowed: &allowed,
                negations: &enhanced.negations,
                score_style,
                thresholds: self.thresholds(
                    score_style,
                    request.max_decoration_score,
                    request.min_plain_score,
                ),
                top_k,
                pool,
            },
        )?;

        Ok(SearchOutcome {
            query: request.query.clone(),
            enhanced_query: enhanced.text,
            categories: allowed,
            detected_categories: enhanced.categories,
            negations: enhanced.negations,
            total_results: results.len(),
            results,
            filter_stats,
            extracted_text: None,
            detected_type: None,
        })
    }

    pub fn search_by_image(&self, request: &ImageSearchRequest) -> Result<SearchOutcome, SearchError> {
        images::validate_upload(&request.image).map_err(|e| validation(e.to_string()))?;
        let top_k = self.top_k(request.top_k, MAX_TOP_K)?;
        let pool = self.pool_size(request.semantic_top_k)?;
        let requested = self.requested_categories(request.categories.as_deref())?;

        let user_text = request
            .query
            .as_deref()
            .map(QueryEnhancer::normalize)
            .filter(|q| !q.is_empty());

        let image_vector = self.provider.embed_image(&request.image)?;

        let extracted_text = if request.ocr {
            self.extract_text(&request.image)
        } else {
            None
        };

        // OCR text only feeds enhancement; the vector blend uses the user's text
        let hint_text = [user_text.as_deref(), extracted_text.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let enhanced: Option<EnhancedQuery> =
            (!hint_text.is_empty()).then(|| self.enhancer.enhance(&hint_text));

        let query_vector = match &user_text {
            Some(text) => {
                let text_vector = self.provider.embed_text(&self.enhancer.enhance(text).text)?;
                self.blend(&image_vector, &text_vector)
            }
            None => image_vector.clone(),
        };

        let detected_categories = enhanced
            .as_ref()
            .map(|e| e.categories.clone())
            .unwrap_or_default();
        // type detection only runs when nothing else decides the allow-list
        let (allowed, detected_type) = match requested {
            Some(categories) => (categories, None),
            None if !detected_categories.is_empty() => (detected_categories.clone(), None),
            None => {
                let detected_type = self.detect_type(&image_vector)?;
                (detected_type.iter().cloned().collect(), detected_type)
            }
        };

        let negations = enhanced
            .as_ref()
            .map(|e| e.negations.clone())
            .unwrap_or_default();
        let score_style = enhanced
            .as_ref()
            .map(EnhancedQuery::needs_style_scoring)
            .unwrap_or(false);

        let (results, filter_stats) = self.run_pipeline(
            &query_vector,
            Pipeline {
                allowed: &allowed,
                negations: &negations,
                score_style,
                thresholds: self.thresholds(score_style, None, None),
                top_k,
                pool,
            },
        )?;

        Ok(SearchOutcome {
            query: user_text.clone().unwrap_or_default(),
            enhanced_query: enhanced.map(|e| e.text).unwrap_or_default(),
            categories: allowed,
            detected_categories,
            negations,
            total_results: results.len(),
            results,
            filter_stats,
            extracted_text,
            detected_type,
        })
    }

    pub fn recommend(&self, request: &RecommendRequest) -> Result<RecommendOutcome, SearchError> {
        let top_k = match request.top_k {
            Some(k) if !(1..=MAX_RECOMMEND_TOP_K).contains(&k) => {
                return Err(validation(format!(
                    "top_k must be between 1 and {MAX_RECOMMEND_TOP_K}"
                )))
            }
            Some(k) => k,
            None => DEFAULT_RECOMMEND_TOP_K,
        };

        let item = self
            .catalog
            .get(request.item_id)
            .ok_or_else(|| SearchError::NotFound(format!("item {} not found", request.item_id)))?;
        let vector = self
            .store
            .vector(item.id)
            .ok_or_else(|| SearchError::NotFound(format!("item {} is not indexed", item.id)))?
            .to_vec();

        let pool = (top_k + 1).max(self.config.semantic_top_k);
        let same_category = [item.category.clone()];
        let allowed = request.same_category.then_some(&same_category[..]);

        let results: Vec<QueryResult> = self
            .store
            .nearest(&vector, pool, allowed)?
            .into_iter()
            .filter(|n| n.id != item.id)
            .filter_map(|n| {
                self.catalog.get(n.id).map(|neighbor| {
                    QueryResult::from_item(
                        neighbor,
                        n.score,
                        neighbor.plain_score,
                        neighbor.decoration_score,
                    )
                })
            })
            .take(top_k)
            .collect();

        Ok(RecommendOutcome {
            item_id: item.id,
            category: item.category.clone(),
            total_results: results.len(),
            results,
        })
    }

    fn top_k(&self, requested: Option<usize>, max: usize) -> Result<usize, SearchError> {
        let top_k = requested.unwrap_or(self.config.default_top_k);
        if !(1..=max).contains(&top_k) {
            return Err(validation(format!("top_k must be between 1 and {max}")));
        }
        Ok(top_k)
    }

    fn pool_size(&self, requested: Option<usize>) -> Result<usize, SearchError> {
        let pool = requested.unwrap_or(self.config.semantic_top_k);
        if !(1..=MAX_SEMANTIC_TOP_K).contains(&pool) {
            return Err(validation(format!(
                "semantic_top_k must be between 1 and {MAX_SEMANTIC_TOP_K}"
            )));
        }
        Ok(pool)
    }

    /// `None` when the request names no categories.
    fn requested_categories(&self, categories: Option<&[String]>) -> Result<Option<Vec<String>>, SearchError> {
        let Some(categories) = categories.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        let mut allowed = Vec::with_capacity(categories.len());
        for category in categories {
            let category = category.trim().to_lowercase();
            if !self.enhancer.is_category(&category) {
                return Err(validation(format!(
                    "unknown category '{}', expected one of: {}",
                    category,
                    self.enhancer.categories().join(", ")
                )));
            }
            if !allowed.contains(&category) {
                allowed.push(category);
            }
        }
        Ok(Some(allowed))
    }

    /// Configured defaults only apply while style scores are computed.
    fn thresholds(&self, score_style: bool, max_decoration: Option<f32>, min_plain: Option<f32>) -> StyleThresholds {
        StyleThresholds {
            max_decoration: max_decoration
                .or(score_style.then_some(self.config.max_decoration_score)),
            min_plain: min_plain.or(score_style.then_some(self.config.min_plain_score)),
        }
    }

    fn extract_text(&self, image: &[u8]) -> Option<String> {
        let extractor = self.extractor.as_ref()?;
        match extractor.extract_text(image) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("text extraction skipped: {}", e);
                None
            }
        }
    }

    fn blend(&self, image: &[f32], text: &[f32]) -> Vec<f32> {
        let w = self.config.image_text_weight;
        let blended: Vec<f32> = image
            .iter()
            .zip(text)
            .map(|(i, t)| (1.0 - w) * i + w * t)
            .collect();

        if blended.iter().all(|x| x.abs() < f32::EPSILON) {
            return image.to_vec();
        }
        l2_normalize(blended)
    }

    /// Zero-shot guess of the jewelry type shown in an image.
    fn detect_type(&self, image: &[f32]) -> Result<Option<String>, SearchError> {
        let categories = self.enhancer.categories();
        let prompts: Vec<String> = categories.iter().map(|c| format!("a {c}")).collect();
        let embeddings = self.provider.embed_texts(&prompts)?;

        let best = categories
            .iter()
            .zip(&embeddings)
            .map(|(category, prompt)| (category, dot(image, prompt)))
            .fold(None, |best: Option<(&String, f32)>, (c, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((c, s)),
            });

        Ok(best
            .filter(|(_, score)| *score > self.config.type_detection_threshold)
            .map(|(category, score)| {
                log::debug!("detected jewelry type '{}' ({:.3})", category, score);
                category.clone()
            }))
    }

    fn run_pipeline(&self, query: &[f32], p: Pipeline) -> Result<(Vec<QueryResult>, FilterStats), SearchError> {
        let mut stats = FilterStats::default();

        let neighbors = self.store.nearest(query, p.pool, None)?;
        let mut candidates: Vec<Candidate> = neighbors
            .iter()
            .filter_map(|n| match self.catalog.get(n.id) {
                Some(item) => Some(Candidate::new(item, n.score)),
                None => {
                    log::debug!("index entry {} has no catalog item", n.id);
                    None
                }
            })
            .collect();
        stats.semantic_matches = candidates.len();

        candidates = filters::by_category(candidates, p.allowed);
        stats.after_category = candidates.len();

        let cues = &self.enhancer.vocabulary().negation_cues;
        candidates = filters::by_negation(candidates, p.negations, cues);
        stats.after_negation = candidates.len();

        if p.score_style && !candidates.is_empty() {
            candidates = self.score_style(candidates, p.negations)?;
        }
        candidates = filters::by_style(candidates, &p.thresholds);
        stats.after_style = candidates.len();

        candidates.truncate(p.top_k);
        stats.final_results = candidates.len();

        let results = candidates
            .into_iter()
            .map(|c| QueryResult::from_item(c.item, c.similarity, c.plain_score, c.decoration_score))
            .collect();

        Ok((results, stats))
    }

    /// Replace each candidate's style scores with the best match against
    /// decoration and plain prompts for its category.
    fn score_style<'a>(
        &self,
        candidates: Vec<Candidate<'a>>,
        negations: &[String],
    ) -> Result<Vec<Candidate<'a>>, SearchError> {
        let mut prompts: HashMap<String, (Vec<Vec<f32>>, Vec<Vec<f32>>)> = HashMap::new();
        for candidate in &candidates {
            let category = candidate.item.category.as_str();
            if prompts.contains_key(category) {
                continue;
            }
            let decoration = self.enhancer.decoration_terms(category, negations);
            let plain = self.enhancer.plain_terms(category);

            let mut vectors = self.provider.embed_texts(&[decoration.clone(), plain].concat())?;
            let plain_vectors = vectors.split_off(decoration.len().min(vectors.len()));
            prompts.insert(category.to_string(), (vectors, plain_vectors));
        }

        let store = self.store.as_ref();
        Ok(candidates
            .into_par_iter()
            .map(|mut candidate| {
                let vectors = prompts.get(candidate.item.category.as_str());
                if let (Some(vector), Some((decoration, plain))) = (store.vector(candidate.item.id), vectors) {
                    candidate.decoration_score = filters::max_similarity(vector, decoration);
                    candidate.plain_score = filters::max_similarity(vector, plain);
                }
                candidate
            })
            .collect())
    }
}
