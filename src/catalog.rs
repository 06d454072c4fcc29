//! Product catalog built from the image dataset on disk.
//!
//! Layout: `<data_root>/<dataset_dir>/<category>/<file>` with an optional
//! `metadata.json` sidecar in the dataset directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::DataConfig;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("dataset directory not found: {0}")]
    MissingDataset(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata file is malformed: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("{field} for {path} must be in [0, 1], got {value}")]
    InvalidScore {
        path: String,
        field: &'static str,
        value: f32,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogItem {
    pub id: u64,
    pub category: String,
    #[serde(skip)]
    pub image_path: PathBuf,
    /// `<category>/<file name>`, stable across machines
    pub relative_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoration_score: Option<f32>,
    #[serde(skip)]
    pub file_size: u64,
}

/// One entry of the metadata sidecar.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub plain_score: Option<f32>,
    #[serde(default)]
    pub decoration_score: Option<f32>,
}

impl ItemMetadata {
    fn validate(&self, path: &str) -> Result<(), CatalogError> {
        for (field, value) in [
            ("plain_score", self.plain_score),
            ("decoration_score", self.decoration_score),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(CatalogError::InvalidScore {
                        path: path.to_string(),
                        field,
                        value,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_page_limit() -> usize {
    20
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_page_limit(),
            category: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub items: Vec<CatalogItem>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

pub struct Catalog {
    categories: Vec<String>,
    items: Vec<CatalogItem>,
    by_id: HashMap<u64, usize>,
}

impl Catalog {
    /// Scan the dataset directory for every vocabulary category.
    ///
    /// Files are sorted by name within a category; ids are assigned
    /// sequentially in vocabulary order starting at 0.
    pub fn load(data: &DataConfig, categories: &[String]) -> Result<Self, CatalogError> {
        let dataset = data.dataset_path();
        if !dataset.is_dir() {
            return Err(CatalogError::MissingDataset(dataset));
        }

        let metadata = Self::load_metadata(&dataset.join(&data.metadata_file))?;

        let mut items = Vec::new();
        for category in categories {
            let dir = dataset.join(category);
            if !dir.is_dir() {
                log::warn!("category directory {} not found, skipping", dir.display());
                continue;
            }

            let mut files: Vec<(String, PathBuf, u64)> = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_file() || !has_extension(&path, &data.extensions) {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    log::warn!("skipping non utf-8 file name {}", path.display());
                    continue;
                };
                files.push((name.to_string(), path.clone(), entry.metadata()?.len()));
            }
            files.sort_by(|a, b| a.0.cmp(&b.0));

            log::debug!("{}: {} images", category, files.len());

            for (name, path, file_size) in files {
                let relative_path = format!("{category}/{name}");
                let meta = metadata.get(&relative_path).cloned().unwrap_or_default();
                items.push(CatalogItem {
                    id: items.len() as u64,
                    category: category.clone(),
                    image_path: path,
                    relative_path,
                    description: meta.description,
                    plain_score: meta.plain_score,
                    decoration_score: meta.decoration_score,
                    file_size,
                });
            }
        }

        log::info!("catalog loaded: {} images from {}", items.len(), dataset.display());

        Ok(Self::from_items(categories.to_vec(), items))
    }

    pub fn from_items(categories: Vec<String>, items: Vec<CatalogItem>) -> Self {
        let by_id = items
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id, pos))
            .collect();
        Self {
            categories,
            items,
            by_id,
        }
    }

    fn load_metadata(path: &Path) -> Result<HashMap<String, ItemMetadata>, CatalogError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let raw = std::fs::read_to_string(path)?;
        let metadata: HashMap<String, ItemMetadata> = serde_json::from_str(&raw)?;
        for (item_path, meta) in &metadata {
            meta.validate(item_path)?;
        }

        log::info!("loaded metadata for {} images", metadata.len());
        Ok(metadata)
    }

    pub fn get(&self, id: u64) -> Option<&CatalogItem> {
        self.by_id.get(&id).map(|&pos| &self.items[pos])
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Image count per vocabulary category, zero counts included.
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            self.categories.iter().map(|c| (c.clone(), 0)).collect();
        for item in &self.items {
            *counts.entry(item.category.clone()).or_default() += 1;
        }
        counts
    }

    pub fn list(&self, request: &PageRequest) -> Page {
        let matching: Vec<&CatalogItem> = self
            .items
            .iter()
            .filter(|item| {
                request
                    .category
                    .as_deref()
                    .map(|c| item.category == c)
                    .unwrap_or(true)
            })
            .collect();

        let total = matching.len();
        let items: Vec<CatalogItem> = matching
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .cloned()
            .collect();

        Page {
            has_more: request.offset + items.len() < total,
            items,
            total,
            offset: request.offset,
            limit: request.limit,
        }
    }

    /// Uniform random sample without replacement.
    pub fn sample(&self, amount: usize) -> Vec<&CatalogItem> {
        let amount = amount.min(self.items.len());
        rand::seq::index::sample(&mut rand::rng(), self.items.len(), amount)
            .into_iter()
            .map(|pos| &self.items[pos])
            .collect()
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Description used when none is stored and none can be generated.
pub fn fallback_description(category: &str) -> String {
    format!(
        "A beautiful {category} piece from our collection. \
         This item showcases elegant craftsmanship and timeless design."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn categories() -> Vec<String> {
        vec!["ring".to_string(), "necklace".to_string()]
    }

    fn data_config(root: &Path) -> DataConfig {
        DataConfig {
            data_root: root.to_path_buf(),
            ..DataConfig::default()
        }
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), b"not really an image").unwrap();
    }

    #[test]
    fn test_load_assigns_ids_in_vocabulary_order() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_config(tmp.path());
        let dataset = config.dataset_path();
        touch(&dataset.join("necklace"), "a.png");
        touch(&dataset.join("ring"), "b.jpg");
        touch(&dataset.join("ring"), "a.JPEG");
        touch(&dataset.join("ring"), "notes.txt");

        let catalog = Catalog::load(&config, &categories()).unwrap();

        let paths: Vec<&str> = catalog
            .items()
            .iter()
            .map(|i| i.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["ring/a.JPEG", "ring/b.jpg", "necklace/a.png"]);
        assert_eq!(catalog.get(2).unwrap().category, "necklace");
        assert!(catalog.get(3).is_none());
    }

    #[test]
    fn test_missing_category_dir_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_config(tmp.path());
        touch(&config.dataset_path().join("ring"), "a.jpg");

        let catalog = Catalog::load(&config, &categories()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.category_counts().get("necklace"), Some(&0));
    }

    #[test]
    fn test_missing_dataset_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Catalog::load(&data_config(tmp.path()), &categories());
        assert!(matches!(result, Err(CatalogError::MissingDataset(_))));
    }

    #[test]
    fn test_metadata_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_config(tmp.path());
        let dataset = config.dataset_path();
        touch(&dataset.join("ring"), "a.jpg");
        std::fs::write(
            dataset.join("metadata.json"),
            r#"{"ring/a.jpg": {"description": "plain band", "plain_score": 0.9}}"#,
        )
        .unwrap();

        let catalog = Catalog::load(&config, &categories()).unwrap();
        let item = catalog.get(0).unwrap();
        assert_eq!(item.description.as_deref(), Some("plain band"));
        assert_eq!(item.plain_score, Some(0.9));
        assert_eq!(item.decoration_score, None);
    }

    #[test]
    fn test_metadata_score_out_of_range() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_config(tmp.path());
        let dataset = config.dataset_path();
        touch(&dataset.join("ring"), "a.jpg");
        std::fs::write(
            dataset.join("metadata.json"),
            r#"{"ring/a.jpg": {"decoration_score": 1.5}}"#,
        )
        .unwrap();

        let result = Catalog::load(&config, &categories());
        assert!(matches!(
            result,
            Err(CatalogError::InvalidScore {
                field: "decoration_score",
                ..
            })
        ));
    }

    fn fixture(n: u64) -> Catalog {
        let items = (0..n)
            .map(|id| {
                let category = if id % 2 == 0 { "ring" } else { "necklace" };
                CatalogItem {
                    id,
                    category: category.to_string(),
                    image_path: PathBuf::from(format!("/tmp/{id}.jpg")),
                    relative_path: format!("{category}/{id}.jpg"),
                    description: None,
                    plain_score: None,
                    decoration_score: None,
                    file_size: 0,
                }
            })
            .collect();
        Catalog::from_items(categories(), items)
    }

    #[test]
    fn test_list_paginates_within_category() {
        let catalog = fixture(10);
        let page = catalog.list(&PageRequest {
            offset: 2,
            limit: 2,
            category: Some("ring".to_string()),
        });

        assert_eq!(page.total, 5);
        let ids: Vec<u64> = page.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4, 6]);
        assert!(page.has_more);

        let last = catalog.list(&PageRequest {
            offset: 4,
            limit: 2,
            category: Some("ring".to_string()),
        });
        assert_eq!(last.items.len(), 1);
        assert!(!last.has_more);
    }

    #[test]
    fn test_sample_is_without_replacement() {
        let catalog = fixture(10);
        let sample = catalog.sample(6);
        assert_eq!(sample.len(), 6);
        let unique: HashSet<u64> = sample.iter().map(|i| i.id).collect();
        assert_eq!(unique.len(), 6);

        assert_eq!(catalog.sample(50).len(), 10);
    }

    #[test]
    fn test_fallback_description_mentions_category() {
        assert!(fallback_description("ring").contains("ring"));
    }
}
