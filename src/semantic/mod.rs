//! Embedding and vector search infrastructure.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed text and vision models sharing one space
//! - `index`: In-memory vector index with cosine similarity search
//! - `storage`: Binary file I/O for the vectors.bin embedding cache
//! - `builder`: Reconciles the cache with the catalog and builds the index

mod builder;
pub mod embeddings;
mod index;
mod storage;

pub use builder::{item_fingerprint, IndexBuilder, ReconcileResult};
pub use embeddings::{dot, l2_normalize, ClipEmbedder, EmbeddingError, EmbeddingProvider};
pub use index::{IndexError, VectorIndex, VectorStore};
pub use storage::{model_id, VectorCache, VectorStorage, VectorStorageError};

/// Default embedding model (CLIP ViT-B/32, shared text/image space)
pub const DEFAULT_MODEL: &str = "clip-vit-b32";

/// Cache file name under the base path
pub const VECTORS_FILE: &str = "vectors.bin";
