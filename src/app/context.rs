use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::app::errors::AppError;
use crate::catalog::{self, Catalog, CatalogItem, Page, PageRequest};
use crate::config::Config;
use crate::images;
use crate::llm::Describer;
use crate::search::SearchService;

const MAX_PAGE_LIMIT: usize = 100;
const MAX_FEATURED: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionSource {
    Catalog,
    Generated,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    pub id: u64,
    pub category: String,
    pub image_path: String,
    pub image_url: String,
    pub plain_score: Option<f32>,
    pub decoration_score: Option<f32>,
    pub description: String,
    pub description_source: DescriptionSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoriesInfo {
    pub categories: Vec<String>,
    pub total_images: usize,
    pub images_per_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model: String,
    pub total_images: usize,
    pub indexed_images: usize,
    pub llm_enabled: bool,
}

/// Shared state behind the HTTP handlers and CLI commands.
pub struct AppContext {
    service: Arc<SearchService>,
    config: Arc<Config>,
    describer: Option<Arc<dyn Describer>>,
}

impl AppContext {
    pub fn new(service: Arc<SearchService>, config: Arc<Config>) -> Self {
        Self {
            service,
            config,
            describer: None,
        }
    }

    pub fn with_describer(mut self, describer: Arc<dyn Describer>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn service(&self) -> &SearchService {
        &self.service
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        self.service.catalog()
    }

    fn item(&self, id: u64) -> Result<&CatalogItem, AppError> {
        self.catalog()
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("item {id} not found")))
    }

    pub fn list_products(&self, request: &PageRequest) -> Result<Page, AppError> {
        if !(1..=MAX_PAGE_LIMIT).contains(&request.limit) {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        if let Some(category) = &request.category {
            if !self.service.enhancer().is_category(category) {
                return Err(AppError::Validation(format!("unknown category '{category}'")));
            }
        }
        Ok(self.catalog().list(request))
    }

    /// Stored description, else a generated one, else a fixed sentence.
    pub fn product_detail(&self, id: u64) -> Result<ProductDetail, AppError> {
        let item = self.item(id)?;

        let (description, description_source) = match &item.description {
            Some(stored) => (stored.clone(), DescriptionSource::Catalog),
            None => match self.generate_description(item) {
                Some(generated) => (generated, DescriptionSource::Generated),
                None => (
                    catalog::fallback_description(&item.category),
                    DescriptionSource::Fallback,
                ),
            },
        };

        Ok(ProductDetail {
            id: item.id,
            category: item.category.clone(),
            image_path: item.relative_path.clone(),
            image_url: format!("/api/image/{}", item.id),
            plain_score: item.plain_score,
            decoration_score: item.decoration_score,
            description,
            description_source,
        })
    }

    fn generate_description(&self, item: &CatalogItem) -> Option<String> {
        let describer = self.describer.as_ref()?;
        let image = match std::fs::read(&item.image_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("cannot read {}: {}", item.image_path.display(), e);
                return None;
            }
        };
        match describer.describe(&image, &item.category) {
            Ok(description) => Some(description),
            Err(e) => {
                log::warn!("description generation failed for item {}: {}", item.id, e);
                None
            }
        }
    }

    /// Raw image bytes and their content type.
    pub fn image(&self, id: u64) -> Result<(Vec<u8>, &'static str), AppError> {
        let item = self.item(id)?;
        let bytes = std::fs::read(&item.image_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("image file for item {id} is missing"))
            }
            _ => AppError::IO(e),
        })?;
        let mime = images::sniff_mime(&bytes).unwrap_or("application/octet-stream");
        Ok((bytes, mime))
    }

    pub fn featured(&self, limit: usize) -> Result<Vec<CatalogItem>, AppError> {
        if !(1..=MAX_FEATURED).contains(&limit) {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_FEATURED}"
            )));
        }
        Ok(self.catalog().sample(limit).into_iter().cloned().collect())
    }

    pub fn categories(&self) -> CategoriesInfo {
        CategoriesInfo {
            categories: self.catalog().categories().to_vec(),
            total_images: self.catalog().len(),
            images_per_category: self.catalog().category_counts(),
        }
    }

    pub fn health(&self) -> Health {
        let indexed = self.service.indexed_count();
        Health {
            status: "healthy",
            model_loaded: indexed > 0,
            model: self.service.model_name().to_string(),
            total_images: self.catalog().len(),
            indexed_images: indexed,
            llm_enabled: self.describer.is_some(),
        }
    }
}
