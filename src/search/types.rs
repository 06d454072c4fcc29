use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub max_decoration_score: Option<f32>,
    #[serde(default)]
    pub min_plain_score: Option<f32>,
    /// Neighbors fetched before filtering
    #[serde(default)]
    pub semantic_top_k: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageSearchRequest {
    /// Encoded image bytes
    pub image: Vec<u8>,
    /// Optional accompanying text
    pub query: Option<String>,
    pub categories: Option<Vec<String>>,
    pub top_k: Option<usize>,
    pub semantic_top_k: Option<usize>,
    /// Read text out of the image when a vision model is configured
    pub ocr: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub item_id: u64,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub same_category: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub id: u64,
    /// Path relative to the dataset directory
    pub image_path: String,
    pub image_url: String,
    pub category: String,
    /// Cosine similarity clamped to [0, 1]
    pub similarity_score: f32,
    pub plain_score: Option<f32>,
    pub decoration_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl QueryResult {
    pub fn from_item(
        item: &CatalogItem,
        similarity: f32,
        plain_score: Option<f32>,
        decoration_score: Option<f32>,
    ) -> Self {
        Self {
            id: item.id,
            image_path: item.relative_path.clone(),
            image_url: format!("/api/image/{}", item.id),
            category: item.category.clone(),
            similarity_score: similarity.clamp(0.0, 1.0),
            plain_score,
            decoration_score,
            description: item.description.clone(),
        }
    }
}

/// Candidate counts after each pipeline stage.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct FilterStats {
    pub semantic_matches: usize,
    pub after_category: usize,
    pub after_negation: usize,
    pub after_style: usize,
    pub final_results: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub enhanced_query: String,
    /// Allow-list that was applied, empty when none
    pub categories: Vec<String>,
    pub detected_categories: Vec<String>,
    pub negations: Vec<String>,
    pub results: Vec<QueryResult>,
    pub total_results: usize,
    pub filter_stats: FilterStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendOutcome {
    pub item_id: u64,
    pub category: String,
    pub results: Vec<QueryResult>,
    pub total_results: usize,
}
