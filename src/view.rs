//! Presentation state for a search page: the filters a user has set and how
//! much of an already fetched result list is on screen.

use serde::{Deserialize, Serialize};

use crate::search::{QueryResult, SearchRequest};

pub const DEFAULT_PAGE_SIZE: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub query: String,
    pub categories: Vec<String>,
    pub top_k: Option<usize>,
    pub max_decoration_score: Option<f32>,
    pub min_plain_score: Option<f32>,
    pub semantic_top_k: Option<usize>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.query.trim().is_empty()
    }
}

impl From<&FilterState> for SearchRequest {
    fn from(state: &FilterState) -> Self {
        SearchRequest {
            query: state.query.clone(),
            categories: (!state.categories.is_empty()).then(|| state.categories.clone()),
            top_k: state.top_k,
            max_decoration_score: state.max_decoration_score,
            min_plain_score: state.min_plain_score,
            semantic_top_k: state.semantic_top_k,
        }
    }
}

/// Reveals a fetched result list one page at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawResultsView")]
pub struct ResultsView {
    results: Vec<QueryResult>,
    page_size: usize,
    displayed: usize,
}

#[derive(Deserialize)]
struct RawResultsView {
    results: Vec<QueryResult>,
    page_size: usize,
    #[serde(default)]
    displayed: usize,
}

impl TryFrom<RawResultsView> for ResultsView {
    type Error = String;

    fn try_from(raw: RawResultsView) -> Result<Self, Self::Error> {
        if raw.page_size == 0 {
            return Err("page_size must be at least 1".to_string());
        }
        Ok(Self {
            displayed: raw.displayed.min(raw.results.len()),
            results: raw.results,
            page_size: raw.page_size,
        })
    }
}

impl ResultsView {
    pub fn new(results: Vec<QueryResult>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            displayed: page_size.min(results.len()),
            results,
            page_size,
        }
    }

    pub fn visible(&self) -> &[QueryResult] {
        &self.results[..self.displayed]
    }

    /// Shows the next page and returns the newly revealed slice.
    pub fn reveal_more(&mut self) -> &[QueryResult] {
        let start = self.displayed;
        self.displayed = (self.displayed + self.page_size).min(self.results.len());
        &self.results[start..self.displayed]
    }

    pub fn has_more(&self) -> bool {
        self.displayed < self.results.len()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn displayed(&self) -> usize {
        self.displayed
    }
}
