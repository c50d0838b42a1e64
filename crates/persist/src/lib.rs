//! Piazza persistence: minimal JSON file store for recent searches.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use tracing::warn;

/// Storage backend for the recent-search list. Synchronous on purpose: the
/// list is ten short strings and callers are not latency sensitive here.
pub trait RecentStore: Send + Sync {
    fn load(&self) -> Result<Vec<String>>;
    fn store(&self, entries: &[String]) -> Result<()>;
}

/// File-backed store. The on-disk format is a bare JSON array of strings.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open_default() -> Self {
        let path = std::env::var("PIAZZA_RECENT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_recent_path());
        Self::open(path)
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecentStore for JsonFileStore {
    fn load(&self) -> Result<Vec<String>> {
        let started = std::time::Instant::now();
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading recent searches at {}", self.path.display()))
            }
        };
        // A corrupt file is worth a warning, never a crash: start over empty.
        let entries = match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt recent-search file; starting empty");
                Vec::new()
            }
        };
        histogram!("persist_load_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(entries)
    }

    fn store(&self, entries: &[String]) -> Result<()> {
        let started = std::time::Instant::now();
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let raw = serde_json::to_string(entries).context("encoding recent searches")?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing recent searches at {}", self.path.display()))?;
        histogram!("persist_store_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_store_total", 1u64);
        Ok(())
    }
}

/// In-RAM store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecentStore for MemoryStore {
    fn load(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    fn store(&self, entries: &[String]) -> Result<()> {
        *self.entries.lock().unwrap() = entries.to_vec();
        Ok(())
    }
}

/// The recent-search ledger: most recent first, exact duplicates move to the
/// front instead of repeating, capped length.
pub struct RecentSearches {
    store: Arc<dyn RecentStore>,
    cap: usize,
}

impl RecentSearches {
    pub fn new(store: Arc<dyn RecentStore>) -> Self {
        let cap = std::env::var("PIAZZA_RECENT_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        Self { store, cap }
    }

    pub fn with_cap(store: Arc<dyn RecentStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    /// Record a submitted query. Whitespace-only input is ignored. Returns
    /// the list as it stands after the write.
    pub fn add(&self, raw: &str) -> Result<Vec<String>> {
        let entry = raw.trim();
        if entry.is_empty() {
            return self.all();
        }
        let mut entries = self.store.load()?;
        entries.retain(|e| e != entry);
        entries.insert(0, entry.to_string());
        entries.truncate(self.cap);
        self.store.store(&entries)?;
        counter!("recent_added_total", 1u64);
        Ok(entries)
    }

    pub fn all(&self) -> Result<Vec<String>> {
        self.store.load()
    }

    pub fn clear(&self) -> Result<()> {
        self.store.store(&[])
    }
}

fn default_recent_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".piazza");
        p.push("recent_searches.json");
        return p;
    }
    // Fallback to current directory
    PathBuf::from("recent_searches.json")
}
