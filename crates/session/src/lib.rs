//! Piazza session facade: one object an embedding shell talks to.
//!
//! `DiscoverySession` owns the store and wires the suggestion engine, the
//! viewport tracker, the result cache, the location resolver, and the
//! recent-search ledger together the way a map-first frontend would. The
//! shell forwards raw UI events in and renders store snapshots out; all
//! coordination policy (debounce, gating, fencing, fallbacks) lives below.

#![forbid(unsafe_code)]

use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use piazza_api::{
    BusinessDirectory, DiscoveryError, DiscoveryResult, Geocoder, LocationSource, SearchIndex,
};
use piazza_core::{Dropdown, SearchQuery, Suggestion, SuggestionKind, ViewportBounds, ZoomLevel};
use piazza_persist::{RecentSearches, RecentStore};
use piazza_resolver::{LocationResolver, ResolverConfig};
use piazza_results::ResultCache;
use piazza_store::{SearchSnapshot, SearchStore};
use piazza_suggest::{SuggestConfig, SuggestEngine};
use piazza_viewport::{ViewportConfig, ViewportTracker};

/// Everything a session needs from the outside world.
pub struct Collaborators {
    pub index: Arc<dyn SearchIndex>,
    pub geocoder: Arc<dyn Geocoder>,
    pub directory: Arc<dyn BusinessDirectory>,
    pub location: Arc<dyn LocationSource>,
    pub recent: Arc<dyn RecentStore>,
}

/// Per-component tuning knobs, bundled so tests can pin every window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub suggest: SuggestConfig,
    pub viewport: ViewportConfig,
    pub resolver: ResolverConfig,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            suggest: SuggestConfig::from_env(),
            viewport: ViewportConfig::from_env(),
            resolver: ResolverConfig::from_env(),
        }
    }
}

pub struct DiscoverySession {
    store: Arc<SearchStore>,
    cache: ResultCache,
    suggest: SuggestEngine,
    tracker: ViewportTracker,
    resolver: LocationResolver,
    recent: RecentSearches,
}

impl DiscoverySession {
    pub fn new(c: Collaborators) -> Self {
        Self::with_config(c, SessionConfig::from_env())
    }

    pub fn with_config(c: Collaborators, cfg: SessionConfig) -> Self {
        let store = Arc::new(SearchStore::new());
        let cache = ResultCache::new(c.directory, Arc::clone(&store));
        let suggest =
            SuggestEngine::with_config(c.index, Arc::clone(&store), cfg.suggest);
        let tracker =
            ViewportTracker::with_config(cache.clone(), Arc::clone(&store), cfg.viewport);
        let resolver =
            LocationResolver::with_config(c.location, c.geocoder, cfg.resolver);
        let recent = RecentSearches::new(c.recent);
        Self { store, cache, suggest, tracker, resolver, recent }
    }

    // ----------------- reads -----------------

    pub fn snapshot(&self) -> Arc<SearchSnapshot> {
        self.store.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe_epoch()
    }

    pub fn store(&self) -> &Arc<SearchStore> {
        &self.store
    }

    // ----------------- text + suggestions -----------------

    /// A keystroke in the search field. Updates the query immediately and
    /// lets the engine decide (after its debounce) whether to hit the index.
    pub fn on_query_change(&self, text: &str) {
        self.store.set_query_text(text);
        self.suggest.on_query_change(text);
    }

    /// A row in the dropdown was picked. Category picks filter by category;
    /// business picks search for the name. Either way the pick submits.
    pub async fn select_suggestion(&self, suggestion: &Suggestion) -> DiscoveryResult<()> {
        match suggestion.kind {
            SuggestionKind::Category => {
                self.store.set_category(&suggestion.text);
                self.suggest.cancel();
                self.store.suggest_clear();
                self.record_recent(&suggestion.text);
                self.fetch_current_query().await
            }
            SuggestionKind::Business => self.submit(&suggestion.text).await,
        }
    }

    /// Explicit submit (enter key / search button). The only user-visible
    /// validation failure in the system: submitting blank text.
    pub async fn submit(&self, text: &str) -> DiscoveryResult<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DiscoveryError::Validation("enter something to search for".into()));
        }
        counter!("session_submits_total", 1u64);
        self.store.set_query_text(trimmed);
        self.suggest.cancel();
        self.store.suggest_clear();
        self.store.set_dropdown(Dropdown::None);
        self.record_recent(trimmed);
        self.fetch_current_query().await
    }

    // The ledger is a convenience surface; failing to persist it must not
    // fail the search that triggered the write.
    fn record_recent(&self, text: &str) {
        if let Err(e) = self.recent.add(text) {
            warn!(error = %e, "failed to record recent search");
        }
    }

    async fn fetch_current_query(&self) -> DiscoveryResult<()> {
        let query = self.store.current().query.clone();
        let request_id = self.store.begin_fetch();
        let result = match self.tracker.fetchable_viewport() {
            Some((bounds, zoom)) => {
                debug!(request_id, "submit: fetching within current viewport");
                self.cache
                    .fetch(piazza_core::FetchRequest { bounds, zoom, query, request_id })
                    .await
            }
            None => {
                debug!(request_id, "submit: no viewport yet, query-only fetch");
                self.cache.fetch_by_query(query, request_id).await
            }
        };
        if let Err(e) = &result {
            self.store.fail_fetch(request_id, &format!("search failed: {e}"));
        }
        result.map(|_| ())
    }

    // ----------------- viewport -----------------

    /// A raw settle event from the map surface.
    pub fn on_viewport_settle(&self, bounds: ViewportBounds, zoom: ZoomLevel) {
        self.tracker.on_viewport_change(bounds, zoom);
    }

    /// Manual refresh: drop the cache and refetch whatever is current.
    pub async fn refresh(&self) -> DiscoveryResult<()> {
        if self.tracker.refetch_now().await {
            return Ok(());
        }
        // No fetchable viewport: refresh the query-only results instead.
        self.cache.invalidate_all();
        self.fetch_current_query().await
    }

    // ----------------- location -----------------

    /// "Use my location". Denial, timeout, and no-fix all land in the
    /// fallback state with remediation guidance; none of them fetch.
    pub async fn use_current_location(&self) -> DiscoveryResult<()> {
        self.store.location_resolving();
        match self.resolver.current_location().await {
            Ok(located) => {
                info!(point = %located.point, "device location resolved");
                self.store.location_resolved(located);
                Ok(())
            }
            Err(e) => {
                let notice = match &e {
                    DiscoveryError::PermissionDenied(_) => {
                        "location permission denied; enter a location manually or browse all areas"
                    }
                    DiscoveryError::Timeout(_) => {
                        "finding your location took too long; enter it manually or browse all areas"
                    }
                    _ => "your location is unavailable; enter it manually or browse all areas",
                };
                self.store.location_fallback(&e.to_string(), notice);
                Err(e)
            }
        }
    }

    /// Typed location entry, the remediation path for denied permission.
    /// A lookup that fails leaves whatever location was already established
    /// in place and surfaces only a notice.
    pub async fn use_manual_location(&self, address: &str) -> DiscoveryResult<()> {
        match self.resolver.geocode_address(address).await {
            Ok(located) => {
                self.store.location_resolved(located);
                self.store.set_dropdown(Dropdown::None);
                Ok(())
            }
            Err(e) => {
                let notice = match &e {
                    DiscoveryError::NotFound(_) => "location not found, try another search",
                    DiscoveryError::Validation(_) => "enter a location to search near",
                    _ => "could not look up that location right now, try again",
                };
                self.store.set_notice(notice);
                Err(e)
            }
        }
    }

    // ----------------- dropdowns + ledger -----------------

    pub fn set_dropdown(&self, dropdown: Dropdown) {
        self.store.set_dropdown(dropdown);
    }

    pub fn recent_searches(&self) -> anyhow::Result<Vec<String>> {
        self.recent.all()
    }

    pub fn clear_recent(&self) -> anyhow::Result<()> {
        self.recent.clear()
    }

    /// The query as the store sees it right now.
    pub fn current_query(&self) -> SearchQuery {
        self.store.current().query.clone()
    }
}
