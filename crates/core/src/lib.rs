//! Piazza core types: the shared data model of the map-search flow.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Map zoom level as reported by the tile surface (0 = whole world).
pub type ZoomLevel = u8;

/// Default minimum zoom at which bounded business fetches are allowed.
/// Below this the viewport covers too much ground for a useful query.
pub const MIN_FETCH_ZOOM: ZoomLevel = 10;

/// A WGS84 point. Produced by the location resolver, consumed everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Axis-aligned viewport box in degrees. Regenerated whole on every settle
/// event; never patched field by field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl ViewportBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self { north, south, east, west }
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat <= self.north && p.lat >= self.south && p.lng <= self.east && p.lng >= self.west
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }
}

/// Free text plus optional category filter. Empty text is a valid
/// "browse everything in view" query, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub category: Option<String>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), category: None }
    }

    pub fn with_category(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self { text: text.into(), category: Some(category.into()) }
    }

    pub fn is_browse_all(&self) -> bool {
        self.text.trim().is_empty() && self.category.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionKind {
    Business,
    Category,
}

/// One autocomplete row. Ephemeral: regenerated on every settled keystroke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub kind: SuggestionKind,
}

impl Suggestion {
    pub fn business(text: impl Into<String>) -> Self {
        Self { text: text.into(), kind: SuggestionKind::Business }
    }

    pub fn category(text: impl Into<String>) -> Self {
        Self { text: text.into(), kind: SuggestionKind::Category }
    }
}

/// Listing row as rendered on the map and in the result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessSummary {
    pub id: String,
    pub name: String,
    pub category: String,
    pub location: GeoPoint,
    pub rating: Option<f32>,
    pub address: Option<String>,
}

/// A bounded fetch as emitted by the viewport tracker. `request_id` is the
/// only ordering authority for applying the response; arrival order is
/// meaningless under concurrent network calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub bounds: ViewportBounds,
    pub zoom: ZoomLevel,
    pub query: SearchQuery,
    pub request_id: u64,
}

/// Human-readable reverse-geocode label. Best-effort: both fields may be
/// empty when the reverse lookup failed or returned nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceLabel {
    pub city: String,
    pub region: String,
}

impl PlaceLabel {
    pub fn new(city: impl Into<String>, region: impl Into<String>) -> Self {
        Self { city: city.into(), region: region.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.city.is_empty() && self.region.is_empty()
    }
}

impl fmt::Display for PlaceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.city.is_empty(), self.region.is_empty()) {
            (false, false) => write!(f, "{}, {}", self.city, self.region),
            (false, true) => write!(f, "{}", self.city),
            (true, false) => write!(f, "{}", self.region),
            (true, true) => Ok(()),
        }
    }
}

/// A resolved location: the point plus its display label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Located {
    pub point: GeoPoint,
    pub label: PlaceLabel,
}

/// Which (if either) suggestion surface is open. The two surfaces are
/// mutually exclusive by construction: there is one field, not two flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dropdown {
    #[default]
    None,
    Search,
    Location,
}

/// Issues strictly increasing request ids, starting at 1. Id 0 is the
/// "nothing applied yet" baseline kept by the state store.
#[derive(Debug, Default)]
pub struct RequestFence {
    next: AtomicU64,
}

impl RequestFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next id. Never reused, monotonic across the process.
    pub fn issue(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn last_issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_contains_edges_and_interior() {
        let b = ViewportBounds::new(41.0, 40.0, -73.0, -74.0);
        assert!(b.contains(GeoPoint::new(40.5, -73.5)));
        assert!(b.contains(GeoPoint::new(41.0, -74.0)));
        assert!(!b.contains(GeoPoint::new(41.1, -73.5)));
        assert!(!b.contains(GeoPoint::new(40.5, -72.9)));
    }

    #[test]
    fn fence_issues_strictly_increasing_ids() {
        let fence = RequestFence::new();
        let a = fence.issue();
        let b = fence.issue();
        let c = fence.issue();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(fence.last_issued(), 3);
    }

    #[test]
    fn browse_all_means_blank_text_and_no_category() {
        assert!(SearchQuery::default().is_browse_all());
        assert!(SearchQuery::text("   ").is_browse_all());
        assert!(!SearchQuery::text("pizza").is_browse_all());
        assert!(!SearchQuery::with_category("", "restaurants").is_browse_all());
    }

    #[test]
    fn place_label_renders_city_comma_region() {
        assert_eq!(PlaceLabel::new("Austin", "TX").to_string(), "Austin, TX");
        assert_eq!(PlaceLabel::new("Austin", "").to_string(), "Austin");
        assert_eq!(PlaceLabel::default().to_string(), "");
        assert!(PlaceLabel::default().is_empty());
    }
}
