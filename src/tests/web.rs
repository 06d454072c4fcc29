use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::config::ServerConfig;
use crate::web;

use super::app::context;
use super::support::create_png;

const BOUNDARY: &str = "jewel-test-boundary";

fn app() -> Router {
    web::router(Arc::new(context()), &ServerConfig::default())
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn multipart(fields: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        if *name == "file" {
            body.extend_from_slice(
                b"Content-Disposition: form-data; name=\"file\"; filename=\"upload.png\"\r\n\
                  Content-Type: image/png\r\n\r\n",
            );
        } else {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
        }
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/api/upload-with-text")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn result_ids(body: &Value) -> Vec<u64> {
    body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_u64().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_endpoint() {
    let (status, body) = send(post_json(
        "/api/search",
        json!({"query": "gold ring without diamonds", "top_k": 5}),
    ))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result_ids(&body), vec![0, 2, 5]);
    assert_eq!(body["total_results"], 3);
    assert_eq!(body["negations"], json!(["diamonds"]));
    assert_eq!(body["results"][0]["image_url"], "/api/image/0");
    assert_eq!(body["filter_stats"]["after_negation"], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_validation_error_body() {
    let (status, body) = send(post_json("/api/search", json!({"query": "  "}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("query"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recommend_endpoint() {
    let (status, body) = send(post_json(
        "/api/recommend",
        json!({"item_id": 0, "top_k": 2, "same_category": true}),
    ))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item_id"], 0);
    assert_eq!(result_ids(&body), vec![2, 1]);

    let (status, body) = send(post_json("/api/recommend", json!({"item_id": 404}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_with_text() {
    let png = create_png();
    let (status, body) = send(multipart(&[
        ("file", png.as_slice()),
        ("query", b"without diamonds".as_slice()),
        ("top_k", b"2".as_slice()),
    ]))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result_ids(&body), vec![0, 2]);
    assert_eq!(body["detected_type"], "ring");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_categories_field() {
    let png = create_png();
    let (status, body) = send(multipart(&[
        ("file", png.as_slice()),
        ("categories", b"necklace, ".as_slice()),
    ]))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result_ids(&body), vec![3, 4]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_rejects_bad_input() {
    let (status, body) = send(multipart(&[("query", b"gold ring".as_slice())])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, _) = send(multipart(&[("file", b"not an image at all".as_slice())])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let png = create_png();
    let (status, _) = send(multipart(&[
        ("file", png.as_slice()),
        ("top_k", b"many".as_slice()),
    ]))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_products_and_product() {
    let (status, body) = send(get("/api/products?offset=4&limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 6);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], false);

    let (status, body) = send(get("/api/product/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["category"], "necklace");
    assert_eq!(body["description_source"], "catalog");

    let (status, _) = send(get("/api/product/100")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_featured_and_categories() {
    let (status, body) = send(get("/api/featured?limit=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, _) = send(get("/api/featured?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(get("/api/categories")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["categories"], json!(["ring", "necklace"]));
    assert_eq!(body["images_per_category"]["ring"], 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_and_info() {
    let (status, body) = send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["indexed_images"], 6);

    let (status, body) = send(get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "jewel-search");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_image_file() {
    let (status, body) = send(get("/api/image/0")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_json_is_validation_error() {
    let request = Request::post("/api/search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"query": "ring""#))
        .unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = send(post_json(
        "/api/search",
        json!({"query": "ring", "top_k": -1}),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = send(post_json("/api/recommend", json!({"top_k": 2}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_path_and_query_are_validation_errors() {
    for uri in ["/api/product/abc", "/api/image/-1", "/api/products?limit=abc", "/api/featured?limit=x"] {
        let (status, body) = send(get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "validation_error", "{uri}");
        assert!(body["error"]["message"].is_string(), "{uri}");
    }
}
