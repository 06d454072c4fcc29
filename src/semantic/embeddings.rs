//! Embedding model wrapper for fastembed.
//!
//! Provides a shared text/image embedding space:
//! - CLIP-style models with matching text and vision towers
//! - Model download with configurable cache directory
//! - Batch embedding of catalog images
//!
//! Every vector handed out is L2-normalized.

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, TextEmbedding};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Anything that maps text and images into one vector space.
///
/// Orchestrators only see this trait so tests can substitute a stub.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed an encoded image (jpeg, png, ...).
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Dot product; equals cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Wait for a model loader thread. On timeout the thread is left running.
fn wait_for_loader<T>(
    rx: &mpsc::Receiver<Result<T, EmbeddingError>>,
    timeout: Duration,
    model_name: &str,
) -> Result<T, EmbeddingError> {
    match rx.recv_timeout(timeout) {
        Ok(loaded) => loaded,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!(
                "model '{model_name}' not ready after {}s; its download keeps running in the background",
                timeout.as_secs()
            );
            Err(EmbeddingError::DownloadTimeout(timeout.as_secs()))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader thread panicked".to_string(),
        )),
    }
}

/// Paired text and vision models from fastembed.
/// Uses a Mutex per model because fastembed's embed() requires &mut self.
pub struct ClipEmbedder {
    text_model: Mutex<TextEmbedding>,
    image_model: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl ClipEmbedder {
    /// Create the embedder for the given model name.
    ///
    /// Models are downloaded on first use and cached in the `models/`
    /// subdirectory of `cache_dir`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let (text_enum, image_enum) = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        // First use downloads the weights; give up on the wait after `timeout`
        let (tx, rx) = mpsc::channel();
        let loader_name = model_name.to_string();
        std::thread::spawn(move || {
            let load = || -> Result<(TextEmbedding, ImageEmbedding), EmbeddingError> {
                let text_options = InitOptions::new(text_enum)
                    .with_cache_dir(models_dir.clone())
                    .with_show_download_progress(true);
                let text_model = TextEmbedding::try_new(text_options)
                    .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

                let image_options = ImageInitOptions::new(image_enum)
                    .with_cache_dir(models_dir)
                    .with_show_download_progress(true);
                let image_model = ImageEmbedding::try_new(image_options)
                    .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

                Ok((text_model, image_model))
            };
            if tx.send(load()).is_err() {
                log::info!("model '{loader_name}' finished loading after startup gave up on it");
            }
        });

        let (mut text_model, image_model) = wait_for_loader(&rx, timeout, model_name)?;

        let dimensions = Self::probe_dimensions(&mut text_model)?;

        Ok(Self {
            text_model: Mutex::new(text_model),
            image_model: Mutex::new(image_model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to the matching fastembed enums.
    fn parse_model_name(
        name: &str,
    ) -> Result<(fastembed::EmbeddingModel, ImageEmbeddingModel), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b32" | "clipvitb32" => Ok((
                fastembed::EmbeddingModel::ClipVitB32,
                ImageEmbeddingModel::ClipVitB32,
            )),
            "nomic-embed-v1.5" | "nomicembedv15" => Ok((
                fastembed::EmbeddingModel::NomicEmbedTextV15,
                ImageEmbeddingModel::NomicEmbedVisionV15,
            )),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b32, nomic-embed-v1.5",
                name
            ))),
        }
    }

    /// Probe the text model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }

    fn lock_failed<T>(e: std::sync::PoisonError<T>) -> EmbeddingError {
        EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
    }
}

impl EmbeddingProvider for ClipEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.text_model.lock().map_err(Self::lock_failed)?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(l2_normalize)
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.text_model.lock().map_err(Self::lock_failed)?;

        model
            .embed(texts.to_vec(), None)
            .map(|all| all.into_iter().map(l2_normalize).collect())
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.image_model.lock().map_err(Self::lock_failed)?;

        let embeddings = model
            .embed_bytes(&[bytes], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(l2_normalize)
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if paths.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.image_model.lock().map_err(Self::lock_failed)?;

        let paths: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let embeddings = model
            .embed(paths, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        Ok(embeddings.into_iter().map(l2_normalize).collect())
    }
}
