//! Query enhancement, filtering and the search orchestrator.

mod enhancer;
pub mod filters;
mod orchestrator;
mod types;

pub use orchestrator::{SearchError, SearchService};
pub use types::{
    FilterStats, ImageSearchRequest, QueryResult, RecommendOutcome, RecommendRequest,
    SearchOutcome, SearchRequest,
};
