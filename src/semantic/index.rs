//! In-memory vector index with cosine similarity search.
//!
//! Stores catalog image embeddings together with the item category and
//! answers nearest-neighbor queries.

use std::collections::HashMap;

use crate::semantic::embeddings::{dot, l2_normalize};

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

/// A neighbor returned by a vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Catalog item ID
    pub id: u64,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

/// Nearest-neighbor lookup over item vectors.
///
/// Results are ordered by score descending; ties keep the store's native
/// order so callers can rely on a stable ranking.
pub trait VectorStore: Send + Sync {
    fn dimensions(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored (unit-length) vector for an item.
    fn vector(&self, id: u64) -> Option<&[f32]>;

    /// Up to `limit` nearest items, optionally restricted to `categories`.
    fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        categories: Option<&[String]>,
    ) -> Result<Vec<Neighbor>, IndexError>;
}

/// An entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: u64,
    pub category: String,
    /// The unit-length embedding vector
    pub embedding: Vec<f32>,
}

/// In-memory vector index for semantic search.
///
/// Entries keep insertion order, which is the tie-break order of
/// [`VectorStore::nearest`].
pub struct VectorIndex {
    entries: Vec<VectorEntry>,
    /// Item ID -> position in `entries`
    positions: HashMap<u64, usize>,
    /// Expected embedding dimensions
    dimensions: usize,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    /// Insert or replace an entry. The embedding is normalized on the way in.
    ///
    /// Returns an error if the embedding has zero norm (cannot be normalized).
    pub fn insert(
        &mut self,
        id: u64,
        category: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Result<(), IndexError> {
        self.check_dimensions(&embedding)?;

        if Self::l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let entry = VectorEntry {
            id,
            category: category.into(),
            embedding: l2_normalize(embedding),
        };

        match self.positions.get(&id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(id, self.entries.len());
                self.entries.push(entry);
            }
        }

        Ok(())
    }

    /// Get an entry by item ID.
    pub fn get(&self, id: u64) -> Option<&VectorEntry> {
        self.positions.get(&id).map(|&pos| &self.entries[pos])
    }

    fn check_dimensions(&self, v: &[f32]) -> Result<(), IndexError> {
        if v.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: v.len(),
            });
        }
        Ok(())
    }

    /// Compute L2 norm of a vector.
    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

impl VectorStore for VectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn vector(&self, id: u64) -> Option<&[f32]> {
        self.get(id).map(|entry| entry.embedding.as_slice())
    }

    fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        categories: Option<&[String]>,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimensions(query)?;

        let query_norm = Self::l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<Neighbor> = self
            .entries
            .iter()
            .filter(|entry| {
                categories
                    .map(|allowed| allowed.contains(&entry.category))
                    .unwrap_or(true)
            })
            .map(|entry| Neighbor {
                id: entry.id,
                score: dot(query, &entry.embedding) / query_norm,
            })
            .collect();

        // Stable sort: equal scores keep insertion order
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        Ok(results)
    }
}
