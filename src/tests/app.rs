use std::sync::Arc;

use crate::app::context::DescriptionSource;
use crate::app::{AppContext, AppError};
use crate::catalog::{Catalog, PageRequest};
use crate::config::Config;

use super::support::{self, create_png, StubDescriber, StubEmbedder};

pub fn context_with(catalog: Catalog) -> AppContext {
    let service = support::service_with(Arc::new(StubEmbedder::new()), catalog);
    AppContext::new(Arc::new(service), Arc::new(Config::default()))
}

pub fn context() -> AppContext {
    context_with(support::catalog())
}

/// Catalog whose first item points at a real png in `dir`.
fn catalog_with_image(dir: &tempfile::TempDir) -> Catalog {
    let path = dir.path().join("plain_gold_ring.png");
    std::fs::write(&path, create_png()).unwrap();

    let mut items = support::catalog_items();
    items[0].image_path = path;
    items[0].description = None;
    Catalog::from_items(support::categories(), items)
}

#[test]
fn test_list_products_pages() {
    let ctx = context();

    let page = ctx
        .list_products(&PageRequest {
            offset: 2,
            limit: 3,
            category: None,
        })
        .unwrap();
    let ids: Vec<u64> = page.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![2, 3, 4]);
    assert_eq!(page.total, 6);
    assert!(page.has_more);

    let rings = ctx
        .list_products(&PageRequest {
            category: Some("ring".to_string()),
            ..PageRequest::default()
        })
        .unwrap();
    assert_eq!(rings.total, 4);
    assert!(!rings.has_more);
}

#[test]
fn test_list_products_validation() {
    let ctx = context();

    for request in [
        PageRequest {
            limit: 0,
            ..PageRequest::default()
        },
        PageRequest {
            limit: 101,
            ..PageRequest::default()
        },
        PageRequest {
            category: Some("tiara".to_string()),
            ..PageRequest::default()
        },
    ] {
        assert!(matches!(
            ctx.list_products(&request),
            Err(AppError::Validation(_))
        ));
    }
}

#[test]
fn test_product_detail_stored_description() {
    let detail = context().product_detail(1).unwrap();

    assert_eq!(detail.description, "Gold ring set with three diamonds.");
    assert_eq!(detail.description_source, DescriptionSource::Catalog);
    assert_eq!(detail.image_url, "/api/image/1");
    assert_eq!(detail.image_path, "ring/gold_diamond_ring.jpg");
}

#[test]
fn test_product_detail_fallback_without_describer() {
    let detail = context().product_detail(4).unwrap();

    assert_eq!(detail.description_source, DescriptionSource::Fallback);
    assert!(detail.description.starts_with("A beautiful necklace piece"));
}

#[test]
fn test_product_detail_generated() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_with(catalog_with_image(&dir))
        .with_describer(Arc::new(StubDescriber(Some("A smooth band".to_string()))));

    let detail = ctx.product_detail(0).unwrap();

    assert_eq!(detail.description_source, DescriptionSource::Generated);
    assert_eq!(detail.description, "A smooth band (ring)");
}

#[test]
fn test_product_detail_describer_failure_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_with(catalog_with_image(&dir)).with_describer(Arc::new(StubDescriber(None)));

    let detail = ctx.product_detail(0).unwrap();

    assert_eq!(detail.description_source, DescriptionSource::Fallback);
}

#[test]
fn test_product_detail_unknown_id() {
    assert!(matches!(
        context().product_detail(77),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn test_image_bytes_and_mime() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_with(catalog_with_image(&dir));

    let (bytes, mime) = ctx.image(0).unwrap();
    assert_eq!(mime, "image/png");
    assert_eq!(bytes, create_png());

    // the fixture paths of the other items do not exist
    assert!(matches!(ctx.image(1), Err(AppError::NotFound(_))));
}

#[test]
fn test_featured_sample() {
    let ctx = context();

    let featured = ctx.featured(4).unwrap();
    assert_eq!(featured.len(), 4);
    let mut ids: Vec<u64> = featured.iter().map(|i| i.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    assert_eq!(ctx.featured(50).unwrap().len(), 6);
    assert!(matches!(ctx.featured(0), Err(AppError::Validation(_))));
    assert!(matches!(ctx.featured(51), Err(AppError::Validation(_))));
}

#[test]
fn test_categories_and_health() {
    let ctx = context();

    let info = ctx.categories();
    assert_eq!(info.total_images, 6);
    assert_eq!(info.images_per_category["ring"], 4);
    assert_eq!(info.images_per_category["necklace"], 2);

    let health = ctx.health();
    assert_eq!(health.status, "healthy");
    assert!(health.model_loaded);
    assert_eq!(health.indexed_images, 6);
    assert_eq!(health.model, "stub");
    assert!(!health.llm_enabled);
}
