//! Piazza viewport tracker: collapses the map's move-event firehose into one
//! fetch per settled viewport.
//!
//! Move events re-arm a trailing-edge timer; only a viewport that holds
//! still for the debounce window reaches the directory. Zoomed-out-too-far
//! viewports never fetch at all, they just flip the gate in the store so
//! the shell can render its "zoom in to see results" hint.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use piazza_core::{FetchRequest, ViewportBounds, ZoomLevel, MIN_FETCH_ZOOM};
use piazza_results::ResultCache;
use piazza_store::{FetchGate, SearchStore};

const DEFAULT_DEBOUNCE_MS: u64 = 400;

#[derive(Debug, Clone, Copy)]
pub struct ViewportConfig {
    pub debounce: Duration,
    pub min_fetch_zoom: ZoomLevel,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS), min_fetch_zoom: MIN_FETCH_ZOOM }
    }
}

impl ViewportConfig {
    pub fn from_env() -> Self {
        let debounce_ms = std::env::var("PIAZZA_VIEWPORT_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        let min_fetch_zoom = std::env::var("PIAZZA_MIN_FETCH_ZOOM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(MIN_FETCH_ZOOM);
        Self { debounce: Duration::from_millis(debounce_ms), min_fetch_zoom }
    }
}

pub struct ViewportTracker {
    cache: ResultCache,
    store: Arc<SearchStore>,
    cfg: ViewportConfig,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
    last_seen: Mutex<Option<(ViewportBounds, ZoomLevel)>>,
}

impl ViewportTracker {
    pub fn new(cache: ResultCache, store: Arc<SearchStore>) -> Self {
        Self::with_config(cache, store, ViewportConfig::from_env())
    }

    pub fn with_config(cache: ResultCache, store: Arc<SearchStore>, cfg: ViewportConfig) -> Self {
        Self {
            cache,
            store,
            cfg,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
            last_seen: Mutex::new(None),
        }
    }

    /// One raw move event from the map. Safe to call at animation-frame
    /// rate; only the position the map rests on triggers a fetch.
    pub fn on_viewport_change(&self, bounds: ViewportBounds, zoom: ZoomLevel) {
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.pending.lock().unwrap().take() {
            task.abort();
        }
        *self.last_seen.lock().unwrap() = Some((bounds, zoom));

        if zoom < self.cfg.min_fetch_zoom {
            counter!("viewport_gated_total", 1u64);
            self.store.set_gate(FetchGate::ZoomTooLow);
            return;
        }
        self.store.set_gate(FetchGate::Ready);

        let cache = self.cache.clone();
        let store = Arc::clone(&self.store);
        let generation = Arc::clone(&self.generation);
        let debounce = self.cfg.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if generation.load(Ordering::SeqCst) != gen {
                return;
            }
            fetch_settled(&cache, &store, bounds, zoom).await;
        });
        *self.pending.lock().unwrap() = Some(task);
    }

    /// The viewport a bounded fetch may use right now: the last settled
    /// position, provided it is zoomed in far enough.
    pub fn fetchable_viewport(&self) -> Option<(ViewportBounds, ZoomLevel)> {
        let seen = *self.last_seen.lock().unwrap();
        seen.filter(|(_, zoom)| *zoom >= self.cfg.min_fetch_zoom)
    }

    /// Bypass cache and debounce for the current viewport. Returns `false`
    /// when there is no fetchable viewport to refresh.
    pub async fn refetch_now(&self) -> bool {
        let Some((bounds, zoom)) = self.fetchable_viewport() else {
            return false;
        };
        self.cache.invalidate_all();
        fetch_settled(&self.cache, &self.store, bounds, zoom).await;
        true
    }
}

async fn fetch_settled(
    cache: &ResultCache,
    store: &Arc<SearchStore>,
    bounds: ViewportBounds,
    zoom: ZoomLevel,
) {
    let query = store.current().query.clone();
    let request_id = store.begin_fetch();
    counter!("viewport_fetches_total", 1u64);
    debug!(request_id, zoom, center = %bounds.center(), "viewport settled, fetching");
    let req = FetchRequest { bounds, zoom, query, request_id };
    if let Err(e) = cache.fetch(req).await {
        warn!(request_id, error = %e, "viewport fetch failed");
        store.fail_fetch(request_id, &format!("results failed to load: {e}"));
    }
}
