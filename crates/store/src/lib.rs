//! Piazza search-state store: one writer surface, lock-free snapshot reads.
//!
//! Every piece of UI-facing search state lives in a single [`SearchSnapshot`]
//! published through an `ArcSwap`. Mutations go through named methods that
//! rebuild and swap the snapshot, then bump a `watch` epoch so renderers can
//! sleep until something actually changed. Response fencing is decided here,
//! under the same lock that applies results, so a response older than what
//! is already on screen can never be applied, even transiently.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use piazza_core::{BusinessSummary, Dropdown, Located, RequestFence, SearchQuery, Suggestion};

/// Autocomplete surface state. While a newer flight is pending the previous
/// list stays visible instead of flashing empty between keystrokes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestState {
    #[default]
    Idle,
    Loading {
        previous: Vec<Suggestion>,
    },
    Ready(Vec<Suggestion>),
}

impl SuggestState {
    /// Rows a renderer should draw right now.
    pub fn visible(&self) -> &[Suggestion] {
        match self {
            Self::Idle => &[],
            Self::Loading { previous } => previous,
            Self::Ready(list) => list,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    fn into_visible(self) -> Vec<Suggestion> {
        match self {
            Self::Idle => Vec::new(),
            Self::Loading { previous } => previous,
            Self::Ready(list) => list,
        }
    }
}

/// Where "near me" stands. `Fallback` is a degraded but fully working state:
/// search and browsing continue on manual location entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum LocationState {
    #[default]
    Unset,
    Resolving,
    Resolved(Located),
    Fallback {
        reason: String,
    },
}

/// Whether viewport movement may hit the directory at the current zoom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchGate {
    #[default]
    Ready,
    ZoomTooLow,
}

/// Immutable view of the whole search surface at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSnapshot {
    pub epoch: u64,
    pub query: SearchQuery,
    pub suggestions: SuggestState,
    pub dropdown: Dropdown,
    pub location: LocationState,
    pub businesses: Vec<BusinessSummary>,
    pub loading: bool,
    pub gate: FetchGate,
    pub notice: Option<String>,
    /// Newest fetch id handed out by [`SearchStore::begin_fetch`].
    pub current_request: u64,
    /// Id of the fetch whose results are on screen. 0 before any apply.
    pub last_applied_request: u64,
}

/// The store. Cheap to share (`Arc<SearchStore>`); all methods take `&self`.
pub struct SearchStore {
    state: Mutex<SearchSnapshot>,
    snap: Arc<ArcSwap<SearchSnapshot>>,
    fence: RequestFence,
    epoch_tx: watch::Sender<u64>,
    epoch_rx: watch::Receiver<u64>,
}

impl Default for SearchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStore {
    pub fn new() -> Self {
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        Self {
            state: Mutex::new(SearchSnapshot::default()),
            snap: Arc::new(ArcSwap::from_pointee(SearchSnapshot::default())),
            fence: RequestFence::new(),
            epoch_tx,
            epoch_rx,
        }
    }

    pub fn current(&self) -> Arc<SearchSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut SearchSnapshot) -> R) -> R {
        let mut s = self.state.lock().unwrap();
        let out = f(&mut s);
        s.epoch = s.epoch.saturating_add(1);
        let epoch = s.epoch;
        self.snap.store(Arc::new(s.clone()));
        let _ = self.epoch_tx.send(epoch);
        counter!("store_mutations_total", 1u64);
        out
    }

    /// Like `mutate`, but publishes nothing when `f` declines the change.
    fn mutate_opt<R>(&self, f: impl FnOnce(&mut SearchSnapshot) -> Option<R>) -> Option<R> {
        let mut s = self.state.lock().unwrap();
        let out = f(&mut s)?;
        s.epoch = s.epoch.saturating_add(1);
        let epoch = s.epoch;
        self.snap.store(Arc::new(s.clone()));
        let _ = self.epoch_tx.send(epoch);
        counter!("store_mutations_total", 1u64);
        Some(out)
    }

    // ----------------- query + dropdown -----------------

    /// Typed text replaces any picked category: the text is the query now.
    pub fn set_query_text(&self, text: &str) {
        self.mutate(|s| {
            s.query.text = text.to_string();
            s.query.category = None;
        });
    }

    /// A category pick fills the field with the category name and filters by it.
    pub fn set_category(&self, name: &str) {
        self.mutate(|s| s.query = SearchQuery::with_category(name, name));
    }

    pub fn set_dropdown(&self, dropdown: Dropdown) {
        self.mutate_opt(|s| {
            if s.dropdown == dropdown {
                return None;
            }
            s.dropdown = dropdown;
            Some(())
        });
    }

    // ----------------- suggestions -----------------

    pub fn suggest_loading(&self) {
        self.mutate(|s| {
            let previous = std::mem::take(&mut s.suggestions).into_visible();
            s.suggestions = SuggestState::Loading { previous };
        });
    }

    /// Fresh suggestions arrived. A non-empty list opens the search dropdown;
    /// an empty one closes it rather than showing a blank panel.
    pub fn suggest_ready(&self, list: Vec<Suggestion>) {
        self.mutate(|s| {
            if list.is_empty() {
                if s.dropdown == Dropdown::Search {
                    s.dropdown = Dropdown::None;
                }
            } else {
                s.dropdown = Dropdown::Search;
            }
            s.suggestions = SuggestState::Ready(list);
        });
    }

    /// The flight failed: keep whatever was visible and surface a notice.
    pub fn suggest_failed(&self, notice: &str) {
        self.mutate(|s| {
            let kept = std::mem::take(&mut s.suggestions).into_visible();
            s.suggestions = SuggestState::Ready(kept);
            s.notice = Some(notice.to_string());
        });
    }

    pub fn suggest_clear(&self) {
        self.mutate(|s| {
            s.suggestions = SuggestState::Idle;
            if s.dropdown == Dropdown::Search {
                s.dropdown = Dropdown::None;
            }
        });
    }

    // ----------------- location -----------------

    pub fn location_resolving(&self) {
        self.mutate(|s| s.location = LocationState::Resolving);
    }

    pub fn location_resolved(&self, located: Located) {
        self.mutate(|s| {
            s.location = LocationState::Resolved(located);
            s.notice = None;
        });
    }

    pub fn location_fallback(&self, reason: &str, notice: &str) {
        self.mutate(|s| {
            s.location = LocationState::Fallback { reason: reason.to_string() };
            s.notice = Some(notice.to_string());
        });
    }

    // ----------------- results -----------------

    pub fn set_gate(&self, gate: FetchGate) {
        self.mutate_opt(|s| {
            if s.gate == gate {
                return None;
            }
            s.gate = gate;
            Some(())
        });
    }

    pub fn set_notice(&self, notice: &str) {
        self.mutate(|s| s.notice = Some(notice.to_string()));
    }

    pub fn clear_notice(&self) {
        self.mutate_opt(|s| s.notice.take().map(|_| ()));
    }

    /// Issue the next fetch id and flag the surface as loading.
    pub fn begin_fetch(&self) -> u64 {
        let id = self.fence.issue();
        self.mutate(|s| {
            s.current_request = s.current_request.max(id);
            s.loading = true;
        });
        id
    }

    /// Apply a fetch response unless something newer has already been
    /// applied. An older request whose response arrives while the newer one
    /// is still in flight may land; once the newer one has landed, the
    /// older response is refused. Returns `false` on refusal.
    pub fn try_apply_results(&self, request_id: u64, businesses: Vec<BusinessSummary>) -> bool {
        let applied = self.mutate_opt(|s| {
            if request_id < s.last_applied_request {
                return None;
            }
            s.last_applied_request = request_id;
            gauge!("store_businesses", businesses.len() as f64);
            s.businesses = businesses;
            s.loading = false;
            s.notice = None;
            Some(())
        });
        if applied.is_none() {
            counter!("store_stale_refused_total", 1u64);
            debug!(request_id, "refused superseded fetch response");
        }
        applied.is_some()
    }

    /// Surface a fetch failure, fenced the same way results are: a failure
    /// older than the applied baseline cannot clobber it. Previous results
    /// stay on screen alongside the notice.
    pub fn fail_fetch(&self, request_id: u64, notice: &str) -> bool {
        let failed = self.mutate_opt(|s| {
            if request_id < s.last_applied_request {
                return None;
            }
            s.loading = false;
            s.notice = Some(notice.to_string());
            Some(())
        });
        if failed.is_none() {
            counter!("store_stale_refused_total", 1u64);
            debug!(request_id, "ignored failure of superseded fetch");
        }
        failed.is_some()
    }
}
