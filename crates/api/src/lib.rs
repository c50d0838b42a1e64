//! Piazza collaborator façade.
//!
//! This crate defines the stable traits the coordination core depends on:
//! the remote search index, the geocoding endpoints, the bounding-box
//! business directory, and the device location capability. Implementations
//! can be in-process doubles (this crate) or HTTP clients (`piazza-remote`).

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};

use piazza_core::{BusinessSummary, GeoPoint, PlaceLabel, SearchQuery, ViewportBounds, ZoomLevel};

/// Failure taxonomy shared by every collaborator, suitable for transport
/// over RPC later. Staleness is deliberately absent: a superseded response
/// is an expected outcome, not an error (see `piazza-results`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum DiscoveryError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network: {0}")]
    Network(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl DiscoveryError {
    /// Transport failures are worth retrying; everything else is a final
    /// answer for the given input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// One query against the remote text index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexQuery {
    pub text: String,
    pub hits_per_page: usize,
}

impl IndexQuery {
    pub fn new(text: impl Into<String>, hits_per_page: usize) -> Self {
        Self { text: text.into(), hits_per_page }
    }
}

/// One hit from the remote text index: the business name plus the category
/// it is filed under (when the index carries one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHit {
    pub name: String,
    pub category: Option<String>,
}

/// Remote text index (autocomplete and query-only browsing).
#[async_trait::async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(&self, query: IndexQuery) -> DiscoveryResult<Vec<IndexHit>>;
}

/// Forward/reverse geocoding endpoints.
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve free text to a point. `NotFound` on zero results.
    async fn geocode(&self, address: &str) -> DiscoveryResult<GeoPoint>;

    /// Resolve a point to a "City, Region" label.
    async fn reverse_geocode(&self, point: GeoPoint) -> DiscoveryResult<PlaceLabel>;
}

/// Bounding-box business fetch, plus the query-only mode used before any
/// viewport exists ("browse without location").
#[async_trait::async_trait]
pub trait BusinessDirectory: Send + Sync {
    async fn fetch_in_bounds(
        &self,
        query: &SearchQuery,
        bounds: ViewportBounds,
        zoom: ZoomLevel,
    ) -> DiscoveryResult<Vec<BusinessSummary>>;

    async fn fetch_by_query(&self, query: &SearchQuery) -> DiscoveryResult<Vec<BusinessSummary>>;
}

/// Device location capability. The real implementation lives in whatever
/// shell embeds the core; tests and the CLI use [`FixedLocationSource`].
#[async_trait::async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> DiscoveryResult<GeoPoint>;
}

// ----------------- In-memory doubles -----------------

fn query_matches(query: &SearchQuery, b: &BusinessSummary) -> bool {
    if let Some(cat) = &query.category {
        if !b.category.eq_ignore_ascii_case(cat) {
            return false;
        }
    }
    let text = query.text.trim().to_lowercase();
    if text.is_empty() {
        return true;
    }
    b.name.to_lowercase().contains(&text) || b.category.to_lowercase().contains(&text)
}

/// Fixture-backed index double. Ranks with the same fuzzy matcher the rest
/// of the stack uses, counts calls, and can fail on demand so callers can
/// exercise the degraded paths.
pub struct MemoryIndex {
    businesses: Vec<BusinessSummary>,
    calls: AtomicU64,
    delays: Mutex<VecDeque<Duration>>,
    fail_next: AtomicBool,
}

impl MemoryIndex {
    pub fn new(businesses: Vec<BusinessSummary>) -> Self {
        Self {
            businesses,
            calls: AtomicU64::new(0),
            delays: Mutex::new(VecDeque::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queue a latency for the next not-yet-started call.
    pub fn push_delay(&self, d: Duration) {
        self.delays.lock().unwrap().push_back(d);
    }

    /// Make the next `search` return a retryable network error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SearchIndex for MemoryIndex {
    async fn search(&self, query: IndexQuery) -> DiscoveryResult<Vec<IndexHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DiscoveryError::Network("index unreachable".into()));
        }
        let matcher = fuzzy_matcher::skim::SkimMatcherV2::default();
        let needle = query.text.to_lowercase();
        let mut scored: Vec<(i64, &BusinessSummary)> = self
            .businesses
            .iter()
            .filter_map(|b| {
                matcher
                    .fuzzy_match(&b.name.to_lowercase(), &needle)
                    .or_else(|| matcher.fuzzy_match(&b.category.to_lowercase(), &needle))
                    .map(|score| (score, b))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        Ok(scored
            .into_iter()
            .take(query.hits_per_page)
            .map(|(_, b)| IndexHit { name: b.name.clone(), category: Some(b.category.clone()) })
            .collect())
    }
}

/// Fixture-backed directory double. Bounds filtering is real; latency is
/// scripted per call (FIFO) so out-of-order arrival can be simulated under
/// a paused clock.
pub struct MemoryDirectory {
    businesses: Vec<BusinessSummary>,
    calls: AtomicU64,
    delays: Mutex<VecDeque<Duration>>,
    fail_next: AtomicBool,
}

impl MemoryDirectory {
    pub fn new(businesses: Vec<BusinessSummary>) -> Self {
        Self {
            businesses,
            calls: AtomicU64::new(0),
            delays: Mutex::new(VecDeque::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queue a latency for the next not-yet-started call. Calls beyond the
    /// queue complete immediately.
    pub fn push_delay(&self, d: Duration) {
        self.delays.lock().unwrap().push_back(d);
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    async fn respond(&self, out: Vec<BusinessSummary>) -> DiscoveryResult<Vec<BusinessSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DiscoveryError::Network("directory unreachable".into()));
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl BusinessDirectory for MemoryDirectory {
    async fn fetch_in_bounds(
        &self,
        query: &SearchQuery,
        bounds: ViewportBounds,
        _zoom: ZoomLevel,
    ) -> DiscoveryResult<Vec<BusinessSummary>> {
        let out = self
            .businesses
            .iter()
            .filter(|b| bounds.contains(b.location) && query_matches(query, b))
            .cloned()
            .collect();
        self.respond(out).await
    }

    async fn fetch_by_query(&self, query: &SearchQuery) -> DiscoveryResult<Vec<BusinessSummary>> {
        let out = self.businesses.iter().filter(|b| query_matches(query, b)).cloned().collect();
        self.respond(out).await
    }
}

/// Table-backed geocoder double. Forward lookups are case-insensitive exact
/// matches; reverse lookups return one configured label.
pub struct MemoryGeocoder {
    forward: HashMap<String, GeoPoint>,
    reverse: Option<PlaceLabel>,
    fail_next: AtomicBool,
    reverse_calls: AtomicU64,
}

impl MemoryGeocoder {
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: None,
            fail_next: AtomicBool::new(false),
            reverse_calls: AtomicU64::new(0),
        }
    }

    pub fn with_place(mut self, address: &str, point: GeoPoint) -> Self {
        self.forward.insert(address.trim().to_lowercase(), point);
        self
    }

    pub fn with_reverse_label(mut self, label: PlaceLabel) -> Self {
        self.reverse = Some(label);
        self
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn reverse_calls(&self) -> u64 {
        self.reverse_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Geocoder for MemoryGeocoder {
    async fn geocode(&self, address: &str) -> DiscoveryResult<GeoPoint> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DiscoveryError::Network("geocoder unreachable".into()));
        }
        self.forward
            .get(&address.trim().to_lowercase())
            .copied()
            .ok_or_else(|| DiscoveryError::NotFound(format!("no match for '{address}'")))
    }

    async fn reverse_geocode(&self, _point: GeoPoint) -> DiscoveryResult<PlaceLabel> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DiscoveryError::Network("geocoder unreachable".into()));
        }
        self.reverse
            .clone()
            .ok_or_else(|| DiscoveryError::NotFound("no label for point".into()))
    }
}

/// Scripted device location. One outcome, optional acquisition latency,
/// call counting for single-flight assertions.
pub struct FixedLocationSource {
    outcome: DiscoveryResult<GeoPoint>,
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl FixedLocationSource {
    pub fn at(point: GeoPoint) -> Self {
        Self { outcome: Ok(point), delay: None, calls: AtomicU64::new(0) }
    }

    pub fn failing(err: DiscoveryError) -> Self {
        Self { outcome: Err(err), delay: None, calls: AtomicU64::new(0) }
    }

    pub fn denied() -> Self {
        Self::failing(DiscoveryError::PermissionDenied("user declined the location prompt".into()))
    }

    pub fn unavailable() -> Self {
        Self::failing(DiscoveryError::PositionUnavailable("no position fix".into()))
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LocationSource for FixedLocationSource {
    async fn current_position(&self) -> DiscoveryResult<GeoPoint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn biz(id: &str, name: &str, category: &str, lat: f64, lng: f64) -> BusinessSummary {
        BusinessSummary {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            location: GeoPoint::new(lat, lng),
            rating: None,
            address: None,
        }
    }

    #[tokio::test]
    async fn memory_index_ranks_and_caps() {
        let idx = MemoryIndex::new(vec![
            biz("1", "Pizza Palace", "Restaurants", 0.0, 0.0),
            biz("2", "Pizzeria Uno", "Restaurants", 0.0, 0.0),
            biz("3", "Hardware Hank", "Hardware", 0.0, 0.0),
        ]);
        let hits = idx.search(IndexQuery::new("pizza", 1)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Pizza Palace");
        assert_eq!(idx.calls(), 1);
    }

    #[tokio::test]
    async fn memory_directory_filters_by_bounds_and_query() {
        let dir = MemoryDirectory::new(vec![
            biz("1", "Joe's Espresso", "Coffee", 40.5, -73.5),
            biz("2", "Far Away Coffee", "Coffee", 10.0, 10.0),
            biz("3", "Nearby Tacos", "Restaurants", 40.6, -73.6),
        ]);
        let bounds = ViewportBounds::new(41.0, 40.0, -73.0, -74.0);
        let hits = dir
            .fetch_in_bounds(&SearchQuery::text("coffee"), bounds, 12)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");

        let all = dir.fetch_in_bounds(&SearchQuery::default(), bounds, 12).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn geocoder_not_found_and_retryable_split() {
        let geo = MemoryGeocoder::new().with_place("Austin, TX", GeoPoint::new(30.27, -97.74));
        let p = geo.geocode("austin, tx").await.unwrap();
        assert!((p.lat - 30.27).abs() < 1e-9);

        let missing = geo.geocode("atlantis").await.unwrap_err();
        assert!(matches!(missing, DiscoveryError::NotFound(_)));
        assert!(!missing.is_retryable());

        geo.fail_next();
        let down = geo.geocode("austin, tx").await.unwrap_err();
        assert!(down.is_retryable());
    }
}
