//! Piazza HTTP collaborators: reqwest-backed implementations of the
//! `piazza_api` traits, speaking to the marketplace backend's thin API
//! routes.
//!
//! Each client takes its base URL at construction so tests can point it at a
//! mock server. Client-level timeouts are transport hygiene only; retry
//! policy belongs to the caller, which sees every transport failure as a
//! retryable `DiscoveryError::Network`.

#![forbid(unsafe_code)]

use std::time::Duration;

use metrics::histogram;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use piazza_api::{
    BusinessDirectory, DiscoveryError, DiscoveryResult, Geocoder, IndexHit, IndexQuery,
    SearchIndex,
};
use piazza_core::{BusinessSummary, GeoPoint, PlaceLabel, SearchQuery, ViewportBounds, ZoomLevel};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Base URL for every client, `PIAZZA_API_URL` or localhost.
pub fn base_url_from_env() -> String {
    std::env::var("PIAZZA_API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

fn build_client() -> DiscoveryResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(10))
        .user_agent("piazza/0.1 (map-search core)")
        .build()
        .map_err(|e| DiscoveryError::Internal(format!("building http client: {e}")))
}

// Normalize to exactly one trailing slash so join/query building works on
// the root path instead of replacing the last segment.
fn parse_base(base_url: &str) -> DiscoveryResult<Url> {
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    Url::parse(&normalized)
        .map_err(|e| DiscoveryError::Internal(format!("invalid base URL '{base_url}': {e}")))
}

fn build_url(base: &Url, path: &str, params: &[(&str, &str)]) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }
    url
}

fn transport(e: reqwest::Error) -> DiscoveryError {
    DiscoveryError::Network(e.to_string())
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Forward/reverse geocoding over `/api/geocode` and `/api/reverse-geocode`.
pub struct HttpGeocoder {
    client: Client,
    base: Url,
}

impl HttpGeocoder {
    pub fn from_env() -> DiscoveryResult<Self> {
        Self::new(&base_url_from_env())
    }

    pub fn new(base_url: &str) -> DiscoveryResult<Self> {
        Ok(Self { client: build_client()?, base: parse_base(base_url)? })
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeBody {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct ReverseBody {
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
}

#[async_trait::async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> DiscoveryResult<GeoPoint> {
        let t0 = std::time::Instant::now();
        let url = build_url(&self.base, "/api/geocode", &[("address", address)]);
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        histogram!("remote_geocode_ms", t0.elapsed().as_secs_f64() * 1000.0);

        if status.is_success() {
            let parsed: GeocodeBody = serde_json::from_str(&body)
                .map_err(|e| DiscoveryError::Internal(format!("geocode response: {e}")))?;
            debug!(address, lat = parsed.lat, lng = parsed.lng, "geocoded");
            return Ok(GeoPoint::new(parsed.lat, parsed.lng));
        }
        // The backend reports "no match" as a 404 with an error body; any
        // other status is a transport-level failure worth retrying.
        if status == StatusCode::NOT_FOUND {
            let msg = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| format!("no match for '{address}'"));
            return Err(DiscoveryError::NotFound(msg));
        }
        Err(DiscoveryError::Network(format!("geocode returned {status}")))
    }

    async fn reverse_geocode(&self, point: GeoPoint) -> DiscoveryResult<PlaceLabel> {
        let lat = format!("{:.6}", point.lat);
        let lng = format!("{:.6}", point.lng);
        let url =
            build_url(&self.base, "/api/reverse-geocode", &[("lat", &lat), ("lng", &lng)]);
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let resp = resp.error_for_status().map_err(transport)?;
        let parsed: ReverseBody = resp.json().await.map_err(transport)?;
        Ok(PlaceLabel::new(parsed.city, parsed.state))
    }
}

/// Bounding-box and query-only business fetches over `/api/businesses/search`.
pub struct HttpDirectory {
    client: Client,
    base: Url,
}

impl HttpDirectory {
    pub fn from_env() -> DiscoveryResult<Self> {
        Self::new(&base_url_from_env())
    }

    pub fn new(base_url: &str) -> DiscoveryResult<Self> {
        Ok(Self { client: build_client()?, base: parse_base(base_url)? })
    }

    async fn get_businesses(&self, url: Url) -> DiscoveryResult<Vec<BusinessSummary>> {
        let t0 = std::time::Instant::now();
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let resp = resp.error_for_status().map_err(transport)?;
        let businesses: Vec<BusinessSummary> = resp.json().await.map_err(transport)?;
        histogram!("remote_directory_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(count = businesses.len(), "directory responded");
        Ok(businesses)
    }
}

fn query_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("query", query.text.trim().to_string())];
    if let Some(cat) = &query.category {
        params.push(("category", cat.clone()));
    }
    params
}

#[async_trait::async_trait]
impl BusinessDirectory for HttpDirectory {
    async fn fetch_in_bounds(
        &self,
        query: &SearchQuery,
        bounds: ViewportBounds,
        zoom: ZoomLevel,
    ) -> DiscoveryResult<Vec<BusinessSummary>> {
        let mut params = query_params(query);
        params.push(("north", format!("{:.6}", bounds.north)));
        params.push(("south", format!("{:.6}", bounds.south)));
        params.push(("east", format!("{:.6}", bounds.east)));
        params.push(("west", format!("{:.6}", bounds.west)));
        params.push(("zoom", zoom.to_string()));
        let borrowed: Vec<(&str, &str)> =
            params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let url = build_url(&self.base, "/api/businesses/search", &borrowed);
        self.get_businesses(url).await
    }

    async fn fetch_by_query(&self, query: &SearchQuery) -> DiscoveryResult<Vec<BusinessSummary>> {
        let params = query_params(query);
        let borrowed: Vec<(&str, &str)> =
            params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let url = build_url(&self.base, "/api/businesses/search", &borrowed);
        self.get_businesses(url).await
    }
}

/// Autocomplete index over `/api/index/query`.
pub struct HttpSearchIndex {
    client: Client,
    base: Url,
}

impl HttpSearchIndex {
    pub fn from_env() -> DiscoveryResult<Self> {
        Self::new(&base_url_from_env())
    }

    pub fn new(base_url: &str) -> DiscoveryResult<Self> {
        Ok(Self { client: build_client()?, base: parse_base(base_url)? })
    }
}

#[derive(Debug, Deserialize)]
struct IndexBody {
    hits: Vec<IndexHitBody>,
}

#[derive(Debug, Deserialize)]
struct IndexHitBody {
    name: String,
    #[serde(default)]
    category: Option<String>,
}

#[async_trait::async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn search(&self, query: IndexQuery) -> DiscoveryResult<Vec<IndexHit>> {
        let per_page = query.hits_per_page.to_string();
        let url = build_url(
            &self.base,
            "/api/index/query",
            &[("q", query.text.as_str()), ("hitsPerPage", &per_page)],
        );
        let t0 = std::time::Instant::now();
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let resp = resp.error_for_status().map_err(transport)?;
        let parsed: IndexBody = resp.json().await.map_err(transport)?;
        histogram!("remote_index_ms", t0.elapsed().as_secs_f64() * 1000.0);
        Ok(parsed
            .hits
            .into_iter()
            .map(|h| IndexHit { name: h.name, category: h.category })
            .collect())
    }
}
