//! Piazza result cache: remembers recent viewport fetches and collapses
//! concurrent identical ones into a single directory call.
//!
//! Responses are applied to the [`SearchStore`] from here, through its fence,
//! so callers never have to reason about arrival order. A response that lost
//! the race is reported as [`FetchOutcome::Stale`], not as an error: it is an
//! expected outcome of panning a map faster than the network answers.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, gauge, histogram};
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::debug;

use piazza_api::{BusinessDirectory, DiscoveryError, DiscoveryResult};
use piazza_core::{BusinessSummary, FetchRequest, SearchQuery, ViewportBounds, ZoomLevel};
use piazza_store::SearchStore;

const DEFAULT_TTL_SECS: u64 = 300;

/// Bounds are keyed at four decimal places (about 11 m at the equator), so
/// a viewport that settles back on the same spot reuses the cached answer
/// even when the float arithmetic differs in the last bits.
const KEY_SCALE: f64 = 10_000.0;

/// Canonical identity of one fetch. `bounds` is `None` for query-only
/// fetches made before any viewport exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    bounds: Option<[i64; 4]>,
    zoom: Option<ZoomLevel>,
    text: String,
    category: Option<String>,
}

impl CacheKey {
    pub fn bounded(bounds: ViewportBounds, zoom: ZoomLevel, query: &SearchQuery) -> Self {
        Self {
            bounds: Some([
                scale(bounds.north),
                scale(bounds.south),
                scale(bounds.east),
                scale(bounds.west),
            ]),
            zoom: Some(zoom),
            text: query.text.trim().to_lowercase(),
            category: query.category.as_ref().map(|c| c.to_lowercase()),
        }
    }

    pub fn query_only(query: &SearchQuery) -> Self {
        Self {
            bounds: None,
            zoom: None,
            text: query.text.trim().to_lowercase(),
            category: query.category.as_ref().map(|c| c.to_lowercase()),
        }
    }
}

fn scale(v: f64) -> i64 {
    (v * KEY_SCALE).round() as i64
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.bounds, self.zoom) {
            (Some(b), Some(z)) => write!(f, "[{},{},{},{}]@z{}", b[0], b[1], b[2], b[3], z)?,
            _ => write!(f, "[anywhere]")?,
        }
        write!(f, " q='{}'", self.text)?;
        if let Some(cat) = &self.category {
            write!(f, " cat='{cat}'")?;
        }
        Ok(())
    }
}

/// What became of a fetch once its response landed.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The response passed the fence and is now on screen.
    Applied { businesses: Vec<BusinessSummary>, from_cache: bool },
    /// A newer request was issued while this one was in flight; the
    /// response was dropped without touching the store.
    Stale,
}

impl FetchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

struct CacheEntry {
    businesses: Vec<BusinessSummary>,
    inserted_at: Instant,
}

type Flight = Shared<BoxFuture<'static, DiscoveryResult<Vec<BusinessSummary>>>>;

struct Inner {
    directory: Arc<dyn BusinessDirectory>,
    store: Arc<SearchStore>,
    entries: Mutex<FxHashMap<CacheKey, CacheEntry>>,
    inflight: Mutex<FxHashMap<CacheKey, Flight>>,
    ttl: Duration,
}

impl Inner {
    fn lookup(&self, key: &CacheKey) -> Option<Vec<BusinessSummary>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|e| e.inserted_at.elapsed() <= self.ttl)
            .map(|e| e.businesses.clone())
    }

    fn insert(&self, key: CacheKey, businesses: Vec<BusinessSummary>) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| e.inserted_at.elapsed() <= self.ttl);
        entries.insert(key, CacheEntry { businesses, inserted_at: Instant::now() });
        gauge!("results_cache_entries", entries.len() as f64);
    }
}

/// The cache itself. Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Inner>,
}

impl ResultCache {
    pub fn new(directory: Arc<dyn BusinessDirectory>, store: Arc<SearchStore>) -> Self {
        let ttl = std::env::var("PIAZZA_RESULT_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECS);
        Self::with_ttl(directory, store, Duration::from_secs(ttl))
    }

    pub fn with_ttl(
        directory: Arc<dyn BusinessDirectory>,
        store: Arc<SearchStore>,
        ttl: Duration,
    ) -> Self {
        let inner = Inner {
            directory,
            store,
            entries: Mutex::new(FxHashMap::default()),
            inflight: Mutex::new(FxHashMap::default()),
            ttl,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Fetch businesses for a settled viewport. Served from cache when the
    /// same bounds and query were fetched within the TTL, joined onto an
    /// in-flight call for the same key otherwise.
    pub async fn fetch(&self, req: FetchRequest) -> DiscoveryResult<FetchOutcome> {
        let key = CacheKey::bounded(req.bounds, req.zoom, &req.query);
        let dir = Arc::clone(&self.inner.directory);
        let query = req.query.clone();
        let load = async move { dir.fetch_in_bounds(&query, req.bounds, req.zoom).await }.boxed();
        self.fetch_keyed(key, req.request_id, load).await
    }

    /// Fetch businesses by query alone, for sessions with no viewport yet.
    pub async fn fetch_by_query(
        &self,
        query: SearchQuery,
        request_id: u64,
    ) -> DiscoveryResult<FetchOutcome> {
        let key = CacheKey::query_only(&query);
        let dir = Arc::clone(&self.inner.directory);
        let q = query.clone();
        let load = async move { dir.fetch_by_query(&q).await }.boxed();
        self.fetch_keyed(key, request_id, load).await
    }

    /// Drop every cached entry. The next fetch for any key hits the network.
    pub fn invalidate_all(&self) {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.clear();
        gauge!("results_cache_entries", 0.0);
    }

    async fn fetch_keyed(
        &self,
        key: CacheKey,
        request_id: u64,
        load: BoxFuture<'static, DiscoveryResult<Vec<BusinessSummary>>>,
    ) -> DiscoveryResult<FetchOutcome> {
        let started = Instant::now();

        if let Some(businesses) = self.inner.lookup(&key) {
            counter!("results_cache_hits_total", 1u64);
            debug!(request_id, key = %key, "cache hit");
            return Ok(self.apply(request_id, businesses, true));
        }

        let flight = {
            let mut inflight = self.inner.inflight.lock().unwrap();
            if let Some(f) = inflight.get(&key) {
                counter!("results_coalesced_total", 1u64);
                debug!(request_id, key = %key, "joining in-flight fetch");
                f.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let k = key.clone();
                // The flight runs as its own task so it finishes and cleans
                // up even when every waiting caller has been aborted.
                let task = tokio::spawn(async move {
                    let res = load.await;
                    inner.inflight.lock().unwrap().remove(&k);
                    res
                });
                let f: Flight = async move {
                    match task.await {
                        Ok(res) => res,
                        Err(e) => Err(DiscoveryError::Internal(format!("fetch task: {e}"))),
                    }
                }
                .boxed()
                .shared();
                inflight.insert(key.clone(), f.clone());
                f
            }
        };

        let businesses = flight.await?;
        histogram!("results_fetch_ms", started.elapsed().as_secs_f64() * 1000.0);
        let outcome = self.apply(request_id, businesses, false);
        // Only a response that passed the fence becomes a cache baseline; a
        // stale one is dropped whole.
        if let FetchOutcome::Applied { businesses, .. } = &outcome {
            self.inner.insert(key, businesses.clone());
        }
        Ok(outcome)
    }

    fn apply(&self, request_id: u64, businesses: Vec<BusinessSummary>, from_cache: bool) -> FetchOutcome {
        if self.inner.store.try_apply_results(request_id, businesses.clone()) {
            FetchOutcome::Applied { businesses, from_cache }
        } else {
            counter!("results_stale_dropped_total", 1u64);
            FetchOutcome::Stale
        }
    }
}
