//! Builds the in-memory index from the catalog, reusing cached embeddings.

use std::collections::HashSet;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};

use crate::catalog::{Catalog, CatalogItem};
use crate::semantic::embeddings::EmbeddingProvider;
use crate::semantic::index::{VectorIndex, VectorStore};
use crate::semantic::storage::{model_id, VectorCache, VectorStorage, VectorStorageError};

/// Outcome of reconciling the cache with the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileResult {
    pub reused: usize,
    pub embedded: usize,
    pub failed: usize,
    pub removed: usize,
}

impl ReconcileResult {
    pub fn changed(&self) -> bool {
        self.embedded > 0 || self.removed > 0
    }
}

/// Cache key of a catalog item: first 8 bytes of SHA256 over the relative
/// path and the file size.
pub fn item_fingerprint(item: &CatalogItem) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(item.relative_path.as_bytes());
    hasher.update(item.file_size.to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

pub struct IndexBuilder<'a> {
    provider: &'a dyn EmbeddingProvider,
    storage: VectorStorage,
    batch_size: usize,
    show_progress: bool,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(provider: &'a dyn EmbeddingProvider, storage: VectorStorage, batch_size: usize) -> Self {
        Self {
            provider,
            storage,
            batch_size: batch_size.max(1),
            show_progress: false,
        }
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Embed whatever the cache lacks and return the index in catalog order.
    pub fn build(&self, catalog: &Catalog) -> Result<(VectorIndex, ReconcileResult), VectorStorageError> {
        let model_id = model_id(self.provider.name());
        let dimensions = self.provider.dimensions();

        let mut cache = self.load_cache(&model_id, dimensions)?;
        let mut result = ReconcileResult::default();

        let fingerprints: Vec<u64> = catalog.items().iter().map(item_fingerprint).collect();

        let live: HashSet<u64> = fingerprints.iter().copied().collect();
        result.removed = cache.retain(&live);

        let missing: Vec<(u64, PathBuf)> = catalog
            .items()
            .iter()
            .zip(&fingerprints)
            .filter(|(_, fp)| cache.get(**fp).is_none())
            .map(|(item, fp)| (*fp, item.image_path.clone()))
            .collect();
        result.reused = catalog.len() - missing.len();

        if !missing.is_empty() {
            log::info!(
                "embedding {} images ({} cached)",
                missing.len(),
                result.reused
            );
            let (embedded, failed) = self.embed_missing(&missing, &mut cache);
            result.embedded = embedded;
            result.failed = failed;
        }

        if result.changed() || !self.storage.exists() {
            self.storage.save(&cache, &model_id)?;
            log::info!("saved {} vectors to {}", cache.len(), self.storage.path().display());
        }

        let mut index = VectorIndex::with_capacity(dimensions, catalog.len());
        for (item, fp) in catalog.items().iter().zip(&fingerprints) {
            let Some(embedding) = cache.get(*fp) else {
                continue;
            };
            if let Err(e) = index.insert(item.id, item.category.clone(), embedding.clone()) {
                log::warn!("skipping {}: {}", item.relative_path, e);
            }
        }

        log::info!(
            "index ready: {} vectors (reused {}, embedded {}, failed {}, removed {})",
            index.len(),
            result.reused,
            result.embedded,
            result.failed,
            result.removed
        );

        Ok((index, result))
    }

    fn load_cache(&self, model_id: &[u8; 32], dimensions: usize) -> Result<VectorCache, VectorStorageError> {
        if !self.storage.exists() {
            log::info!("no vector cache, starting fresh");
            return Ok(VectorCache::new(dimensions));
        }

        match self.storage.load(model_id, dimensions) {
            Ok(cache) => {
                log::info!("loaded {} cached vectors", cache.len());
                Ok(cache)
            }
            Err(e) if e.is_stale() => {
                log::warn!("vector cache unusable ({}), rebuilding", e);
                Ok(VectorCache::new(dimensions))
            }
            Err(e) => Err(e),
        }
    }

    /// Returns (embedded, failed).
    fn embed_missing(&self, missing: &[(u64, PathBuf)], cache: &mut VectorCache) -> (usize, usize) {
        let progress = if self.show_progress {
            let pb = ProgressBar::new(missing.len() as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style);
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut embedded = 0;
        let mut failed = 0;

        for batch in missing.chunks(self.batch_size) {
            let paths: Vec<PathBuf> = batch.iter().map(|(_, p)| p.clone()).collect();

            match self.provider.embed_image_files(&paths) {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for ((fp, path), vector) in batch.iter().zip(vectors) {
                        if cache.insert(*fp, vector) {
                            embedded += 1;
                        } else {
                            log::warn!("wrong embedding size for {}", path.display());
                            failed += 1;
                        }
                    }
                }
                outcome => {
                    if let Err(e) = outcome {
                        log::warn!("batch embedding failed ({}), retrying one by one", e);
                    }
                    for (fp, path) in batch {
                        let single = self
                            .provider
                            .embed_image_files(std::slice::from_ref(path))
                            .ok()
                            .and_then(|mut v| v.pop());
                        match single.map(|vector| cache.insert(*fp, vector)) {
                            Some(true) => embedded += 1,
                            _ => {
                                log::warn!("failed to embed {}", path.display());
                                failed += 1;
                            }
                        }
                    }
                }
            }

            progress.inc(batch.len() as u64);
        }

        progress.finish_and_clear();
        (embedded, failed)
    }
}
