//! Contract tests for the HTTP collaborators against a wiremock server.

#![forbid(unsafe_code)]

use piazza_api::{
    BusinessDirectory, DiscoveryError, Geocoder, IndexQuery, SearchIndex,
};
use piazza_core::{GeoPoint, SearchQuery, ViewportBounds};
use piazza_remote::{HttpDirectory, HttpGeocoder, HttpSearchIndex};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn geocode_parses_point_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/geocode"))
        .and(query_param("address", "Austin, TX"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lat": 30.2672,
                "lng": -97.7431
            })),
        )
        .mount(&server)
        .await;

    let geo = HttpGeocoder::new(&server.uri()).unwrap();
    let p = geo.geocode("Austin, TX").await.unwrap();
    assert!((p.lat - 30.2672).abs() < 1e-9);
    assert!((p.lng + 97.7431).abs() < 1e-9);
}

#[tokio::test]
async fn geocode_maps_error_body_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/geocode"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(serde_json::json!({ "error": "Location not found" })),
        )
        .mount(&server)
        .await;

    let geo = HttpGeocoder::new(&server.uri()).unwrap();
    let err = geo.geocode("atlantis").await.unwrap_err();
    assert_eq!(err, DiscoveryError::NotFound("Location not found".into()));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn geocode_maps_server_errors_to_retryable_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/geocode"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let geo = HttpGeocoder::new(&server.uri()).unwrap();
    let err = geo.geocode("Austin, TX").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn reverse_geocode_builds_city_region_label() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/reverse-geocode"))
        .and(query_param("lat", "30.267200"))
        .and(query_param("lng", "-97.743100"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "city": "Austin", "state": "TX" })),
        )
        .mount(&server)
        .await;

    let geo = HttpGeocoder::new(&server.uri()).unwrap();
    let label = geo.reverse_geocode(GeoPoint::new(30.2672, -97.7431)).await.unwrap();
    assert_eq!(label.to_string(), "Austin, TX");
}

#[tokio::test]
async fn directory_sends_bounds_zoom_and_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/businesses/search"))
        .and(query_param("query", "coffee"))
        .and(query_param("category", "Coffee"))
        .and(query_param("north", "40.720000"))
        .and(query_param("south", "40.700000"))
        .and(query_param("east", "-73.990000"))
        .and(query_param("west", "-74.020000"))
        .and(query_param("zoom", "13"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "b1",
                "name": "Joe's Espresso",
                "category": "Coffee",
                "location": { "lat": 40.71, "lng": -74.0 },
                "rating": 4.5,
                "address": "1 Main St"
            }
        ])))
        .mount(&server)
        .await;

    let dir = HttpDirectory::new(&server.uri()).unwrap();
    let bounds = ViewportBounds::new(40.72, 40.70, -73.99, -74.02);
    let hits = dir
        .fetch_in_bounds(&SearchQuery::with_category("coffee", "Coffee"), bounds, 13)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "b1");
    assert_eq!(hits[0].rating, Some(4.5));
}

#[tokio::test]
async fn directory_query_only_mode_omits_bounds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/businesses/search"))
        .and(query_param("query", "tacos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let dir = HttpDirectory::new(&server.uri()).unwrap();
    let hits = dir.fetch_by_query(&SearchQuery::text("tacos")).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn index_query_parses_hits_with_optional_categories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/index/query"))
        .and(query_param("q", "pizza"))
        .and(query_param("hitsPerPage", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "hits": [
                { "name": "Pizza Palace", "category": "Restaurants" },
                { "name": "Pizza Supply Co" }
            ]
        })))
        .mount(&server)
        .await;

    let index = HttpSearchIndex::new(&server.uri()).unwrap();
    let hits = index.search(IndexQuery::new("pizza", 20)).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].category.as_deref(), Some("Restaurants"));
    assert!(hits[1].category.is_none());
}

#[tokio::test]
async fn directory_transport_failure_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/businesses/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = HttpDirectory::new(&server.uri()).unwrap();
    let err = dir.fetch_by_query(&SearchQuery::text("coffee")).await.unwrap_err();
    assert!(err.is_retryable());
}
