//! Piazza suggestion engine: turns a stream of keystrokes into at most one
//! index query per pause, and keeps the dropdown honest about which text its
//! rows answer.
//!
//! Every text change bumps a generation counter and re-arms a trailing-edge
//! timer. The flight checks its generation twice: when the timer fires
//! (maybe the user kept typing) and when the response lands (maybe a newer
//! flight already answered). Either mismatch drops the work on the floor.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use piazza_api::{IndexHit, IndexQuery, SearchIndex};
use piazza_core::Suggestion;
use piazza_store::SearchStore;

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct SuggestConfig {
    pub debounce: Duration,
    /// Cap per suggestion kind: up to this many businesses and this many
    /// categories per dropdown.
    pub limit: usize,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS), limit: DEFAULT_LIMIT }
    }
}

impl SuggestConfig {
    pub fn from_env() -> Self {
        let debounce_ms = std::env::var("PIAZZA_SUGGEST_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        let limit = std::env::var("PIAZZA_SUGGEST_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LIMIT);
        Self { debounce: Duration::from_millis(debounce_ms), limit }
    }
}

pub struct SuggestEngine {
    index: Arc<dyn SearchIndex>,
    store: Arc<SearchStore>,
    cfg: SuggestConfig,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SuggestEngine {
    pub fn new(index: Arc<dyn SearchIndex>, store: Arc<SearchStore>) -> Self {
        Self::with_config(index, store, SuggestConfig::from_env())
    }

    pub fn with_config(
        index: Arc<dyn SearchIndex>,
        store: Arc<SearchStore>,
        cfg: SuggestConfig,
    ) -> Self {
        Self {
            index,
            store,
            cfg,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    /// The search field changed. Blank text clears the dropdown on the spot;
    /// anything else schedules a flight for after the typing pause.
    pub fn on_query_change(&self, text: &str) {
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.pending.lock().unwrap().take() {
            task.abort();
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.store.suggest_clear();
            return;
        }

        let index = Arc::clone(&self.index);
        let store = Arc::clone(&self.store);
        let generation = Arc::clone(&self.generation);
        let debounce = self.cfg.debounce;
        let limit = self.cfg.limit;
        let text = trimmed.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if generation.load(Ordering::SeqCst) != gen {
                return;
            }
            store.suggest_loading();
            let t0 = tokio::time::Instant::now();
            // Over-fetch so both suggestion groups can fill after dedup.
            let res = index.search(IndexQuery::new(text.clone(), limit * 4)).await;
            if generation.load(Ordering::SeqCst) != gen {
                counter!("suggest_stale_dropped_total", 1u64);
                debug!(query = %text, "dropped suggestions for superseded text");
                return;
            }
            match res {
                Ok(hits) => {
                    let rows = build_suggestions(&hits, limit);
                    histogram!("suggest_ms", t0.elapsed().as_secs_f64() * 1000.0);
                    debug!(query = %text, rows = rows.len(), "suggestions ready");
                    store.suggest_ready(rows);
                }
                Err(e) => {
                    warn!(query = %text, error = %e, "suggestion fetch failed");
                    store.suggest_failed("suggestions unavailable right now");
                }
            }
        });
        *self.pending.lock().unwrap() = Some(task);
    }

    /// Abandon any scheduled or in-flight work without touching the store.
    /// Late responses for earlier text are dropped by the generation bump.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.pending.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Fold raw index hits into dropdown rows: business names first, then the
/// distinct categories those hits belong to, each group capped at `limit`.
pub fn build_suggestions(hits: &[IndexHit], limit: usize) -> Vec<Suggestion> {
    let mut rows = Vec::with_capacity(limit * 2);
    let mut seen_names: Vec<String> = Vec::new();
    for hit in hits {
        if seen_names.len() >= limit {
            break;
        }
        let folded = hit.name.to_lowercase();
        if seen_names.contains(&folded) {
            continue;
        }
        seen_names.push(folded);
        rows.push(Suggestion::business(hit.name.clone()));
    }

    let mut seen_cats: Vec<String> = Vec::new();
    for hit in hits {
        if seen_cats.len() >= limit {
            break;
        }
        let Some(cat) = &hit.category else { continue };
        if cat.is_empty() {
            continue;
        }
        let folded = cat.to_lowercase();
        if seen_cats.contains(&folded) {
            continue;
        }
        seen_cats.push(folded);
        rows.push(Suggestion::category(cat.clone()));
    }
    rows
}
