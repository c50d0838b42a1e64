//! Piazza location resolver: one device-position request at a time, a hard
//! timeout, and a display label that degrades instead of failing.
//!
//! Denial is not an error path to retry: callers translate it into the
//! manual-entry fallback and the rest of the app keeps working.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, histogram};
use tracing::{debug, warn};

use piazza_api::{DiscoveryError, DiscoveryResult, Geocoder, LocationSource};
use piazza_core::{GeoPoint, Located, PlaceLabel};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS) }
    }
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        let secs = std::env::var("PIAZZA_GEO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self { timeout: Duration::from_secs(secs) }
    }
}

type Flight = Shared<BoxFuture<'static, DiscoveryResult<Located>>>;

pub struct LocationResolver {
    source: Arc<dyn LocationSource>,
    geocoder: Arc<dyn Geocoder>,
    cfg: ResolverConfig,
    inflight: Mutex<Option<Flight>>,
}

impl LocationResolver {
    pub fn new(source: Arc<dyn LocationSource>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self::with_config(source, geocoder, ResolverConfig::from_env())
    }

    pub fn with_config(
        source: Arc<dyn LocationSource>,
        geocoder: Arc<dyn Geocoder>,
        cfg: ResolverConfig,
    ) -> Self {
        Self { source, geocoder, cfg, inflight: Mutex::new(None) }
    }

    /// Resolve the device position. Concurrent callers share one request;
    /// a finished one is never reused, the next caller asks the device
    /// again.
    pub async fn current_location(&self) -> DiscoveryResult<Located> {
        counter!("resolver_requests_total", 1u64);
        let flight = {
            let mut slot = self.inflight.lock().unwrap();
            match slot.as_ref() {
                Some(f) if f.peek().is_none() => {
                    counter!("resolver_joined_total", 1u64);
                    debug!("joining in-flight location request");
                    f.clone()
                }
                _ => {
                    let f = self.spawn_flight();
                    *slot = Some(f.clone());
                    f
                }
            }
        };
        flight.await
    }

    fn spawn_flight(&self) -> Flight {
        let source = Arc::clone(&self.source);
        let geocoder = Arc::clone(&self.geocoder);
        let timeout = self.cfg.timeout;
        let task = tokio::spawn(async move {
            let t0 = tokio::time::Instant::now();
            let point = match tokio::time::timeout(timeout, source.current_position()).await {
                Ok(Ok(point)) => point,
                Ok(Err(e)) => {
                    debug!(error = %e, "device location failed");
                    return Err(e);
                }
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "device location timed out");
                    return Err(DiscoveryError::Timeout("device location timed out".into()));
                }
            };
            // The label is decoration; losing it must not lose the point.
            let label = match geocoder.reverse_geocode(point).await {
                Ok(label) => label,
                Err(e) => {
                    warn!(error = %e, "reverse geocode failed; showing coordinates only");
                    PlaceLabel::default()
                }
            };
            histogram!("resolver_ms", t0.elapsed().as_secs_f64() * 1000.0);
            debug!(point = %point, label = %label, "location resolved");
            Ok(Located { point, label })
        });
        async move {
            match task.await {
                Ok(res) => res,
                Err(e) => Err(DiscoveryError::Internal(format!("resolver task: {e}"))),
            }
        }
        .boxed()
        .shared()
    }

    /// Resolve a typed location. The label falls back to the typed text
    /// when the reverse lookup cannot improve on it.
    pub async fn geocode_address(&self, address: &str) -> DiscoveryResult<Located> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(DiscoveryError::Validation("enter a location to search near".into()));
        }
        let point = self.geocoder.geocode(trimmed).await?;
        let label = match self.reverse_label(point).await {
            label if !label.is_empty() => label,
            _ => PlaceLabel::new(trimmed, ""),
        };
        Ok(Located { point, label })
    }

    /// Best-effort label for a point. Failure degrades to the empty label
    /// instead of propagating.
    pub async fn reverse_label(&self, point: GeoPoint) -> PlaceLabel {
        match self.geocoder.reverse_geocode(point).await {
            Ok(label) => label,
            Err(e) => {
                warn!(error = %e, "reverse geocode failed");
                PlaceLabel::default()
            }
        }
    }
}
