//! Deterministic stand-ins for the embedding model and the vision model.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::catalog::{Catalog, CatalogItem};
use crate::config::{SearchConfig, VocabularyConfig};
use crate::llm::{Describer, LlmError, TextExtractor};
use crate::search::SearchService;
use crate::semantic::{l2_normalize, EmbeddingError, EmbeddingProvider, VectorIndex};

/// Keyword groups, one vector dimension each. The last dimension is a
/// constant bias so no text maps to the zero vector.
const FEATURES: &[&[&str]] = &[
    &["ring"],
    &["necklace", "chain"],
    &["gold"],
    &["diamond", "jewel", "sparkl", "stone", "gem"],
    &["plain", "simple", "minimalist", "smooth", "band"],
    &["pendant", "charm"],
    &["pattern", "engrav", "ornate", "design"],
];

pub const DIMENSIONS: usize = 8;

pub fn features(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    let mut v: Vec<f32> = FEATURES
        .iter()
        .map(|keys| if keys.iter().any(|k| text.contains(k)) { 1.0 } else { 0.0 })
        .collect();
    v.push(0.5);
    l2_normalize(v)
}

/// Bag-of-keywords embedder. Images embed as a fixed phrase.
pub struct StubEmbedder {
    image_text: String,
    fail_images: bool,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            image_text: "plain gold ring".to_string(),
            fail_images: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_image_text(mut self, text: &str) -> Self {
        self.image_text = text.to_string();
        self
    }

    /// Image files whose name contains "broken" fail to embed.
    pub fn failing_images(mut self) -> Self {
        self.fail_images = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_path(&self, path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .replace(['_', '-'], " ");
        if self.fail_images && name.contains("broken") {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "cannot decode {}",
                path.display()
            )));
        }
        Ok(features(&name))
    }
}

impl EmbeddingProvider for StubEmbedder {
    fn name(&self) -> &str {
        "stub"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(features(text))
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| features(t)).collect())
    }

    fn embed_image(&self, _bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(features(&self.image_text))
    }

    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        paths.iter().map(|p| self.embed_path(p)).collect()
    }
}

pub struct StubExtractor(pub Result<Option<String>, ()>);

impl TextExtractor for StubExtractor {
    fn extract_text(&self, _image: &[u8]) -> Result<Option<String>, LlmError> {
        self.0.clone().map_err(|_| LlmError::EmptyResponse)
    }
}

pub struct StubDescriber(pub Option<String>);

impl Describer for StubDescriber {
    fn describe(&self, _image: &[u8], category: &str) -> Result<String, LlmError> {
        match &self.0 {
            Some(text) => Ok(format!("{text} ({category})")),
            None => Err(LlmError::EmptyResponse),
        }
    }
}

pub fn categories() -> Vec<String> {
    vec!["ring".to_string(), "necklace".to_string()]
}

fn item(id: u64, category: &str, name: &str, description: Option<&str>) -> CatalogItem {
    CatalogItem {
        id,
        category: category.to_string(),
        image_path: PathBuf::from(format!("/nonexistent/{category}/{name}.jpg")),
        relative_path: format!("{category}/{name}.jpg"),
        description: description.map(str::to_string),
        plain_score: None,
        decoration_score: None,
        file_size: 1024,
    }
}

/// Six items. Vectors come from the file name, so
/// 0 and 2 are identical plain gold rings and 1 carries diamonds.
pub fn catalog_items() -> Vec<CatalogItem> {
    vec![
        item(0, "ring", "plain_gold_ring", Some("A plain polished gold band.")),
        item(1, "ring", "gold_diamond_ring", Some("Gold ring set with three diamonds.")),
        item(2, "ring", "smooth_gold_ring", Some("Polished gold, no diamonds.")),
        item(3, "necklace", "gold_chain_necklace", Some("Gold chain necklace.")),
        item(4, "necklace", "gold_pendant_necklace", None),
        item(5, "ring", "engraved_silver_ring", None),
    ]
}

pub fn catalog() -> Catalog {
    Catalog::from_items(categories(), catalog_items())
}

pub fn index_for(catalog: &Catalog) -> VectorIndex {
    let mut index = VectorIndex::new(DIMENSIONS);
    for item in catalog.items() {
        let name = item
            .relative_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim_end_matches(".jpg")
            .replace('_', " ");
        index
            .insert(item.id, item.category.clone(), features(&name))
            .unwrap();
    }
    index
}

pub fn vocabulary() -> VocabularyConfig {
    VocabularyConfig {
        categories: categories(),
        ..VocabularyConfig::default()
    }
}

pub fn service_with(provider: Arc<StubEmbedder>, catalog: Catalog) -> SearchService {
    let index = index_for(&catalog);
    SearchService::new(
        provider,
        Arc::new(index),
        Arc::new(catalog),
        vocabulary(),
        SearchConfig::default(),
    )
}

pub fn service() -> (SearchService, Arc<StubEmbedder>) {
    let provider = Arc::new(StubEmbedder::new());
    (service_with(provider.clone(), catalog()), provider)
}

pub fn create_png() -> Vec<u8> {
    let img = image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([(x * 30) as u8, (y * 30) as u8, 200]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}
