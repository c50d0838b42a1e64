#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use piazza_api::{
    DiscoveryError, FixedLocationSource, Geocoder, LocationSource, MemoryGeocoder,
};
use piazza_core::{GeoPoint, PlaceLabel};
use piazza_resolver::{LocationResolver, ResolverConfig};

fn nyc() -> GeoPoint {
    GeoPoint::new(40.7128, -74.006)
}

fn resolver(
    source: FixedLocationSource,
    geocoder: MemoryGeocoder,
) -> (Arc<FixedLocationSource>, Arc<MemoryGeocoder>, LocationResolver) {
    let source = Arc::new(source);
    let geocoder = Arc::new(geocoder);
    let r = LocationResolver::with_config(
        source.clone() as Arc<dyn LocationSource>,
        geocoder.clone() as Arc<dyn Geocoder>,
        ResolverConfig { timeout: Duration::from_secs(10) },
    );
    (source, geocoder, r)
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_device_request() {
    let (source, _geo, resolver) = resolver(
        FixedLocationSource::at(nyc()).with_delay(Duration::from_millis(200)),
        MemoryGeocoder::new().with_reverse_label(PlaceLabel::new("New York", "NY")),
    );
    let resolver = Arc::new(resolver);

    let r1 = resolver.clone();
    let r2 = resolver.clone();
    let t1 = tokio::spawn(async move { r1.current_location().await });
    let t2 = tokio::spawn(async move { r2.current_location().await });

    let a = t1.await.unwrap().unwrap();
    let b = t2.await.unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.label.to_string(), "New York, NY");
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn finished_request_is_not_reused() {
    let (source, _geo, resolver) = resolver(
        FixedLocationSource::at(nyc()),
        MemoryGeocoder::new().with_reverse_label(PlaceLabel::new("New York", "NY")),
    );

    resolver.current_location().await.unwrap();
    resolver.current_location().await.unwrap();
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_device_times_out() {
    let (source, _geo, resolver) = resolver(
        FixedLocationSource::at(nyc()).with_delay(Duration::from_secs(30)),
        MemoryGeocoder::new(),
    );

    let err = resolver.current_location().await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Timeout(_)));
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn denial_passes_through_untranslated() {
    let (_source, _geo, resolver) =
        resolver(FixedLocationSource::denied(), MemoryGeocoder::new());

    let err = resolver.current_location().await.unwrap_err();
    assert!(matches!(err, DiscoveryError::PermissionDenied(_)));
}

#[tokio::test(start_paused = true)]
async fn reverse_geocode_failure_degrades_to_empty_label() {
    let (_source, geo, resolver) =
        resolver(FixedLocationSource::at(nyc()), MemoryGeocoder::new());
    geo.fail_next();

    let located = resolver.current_location().await.unwrap();
    assert_eq!(located.point, nyc());
    assert!(located.label.is_empty());
}

#[tokio::test(start_paused = true)]
async fn geocode_address_validates_input_and_reports_missing_places() {
    let (_source, _geo, resolver) = resolver(
        FixedLocationSource::at(nyc()),
        MemoryGeocoder::new().with_place("Austin, TX", GeoPoint::new(30.27, -97.74)),
    );

    let err = resolver.geocode_address("   ").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Validation(_)));

    let err = resolver.geocode_address("Atlantis").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::NotFound(_)));

    let located = resolver.geocode_address("Austin, TX").await.unwrap();
    assert!((located.point.lat - 30.27).abs() < 1e-9);
    // No reverse label configured: the typed text is the label.
    assert_eq!(located.label.to_string(), "Austin, TX");
}
