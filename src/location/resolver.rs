//! Location resolver: the built-in table first, then the geocoder chain.
//!
//! Flow:  built-in table → geocoder → time-zone lookup → NotFound
//!
//! Every collaborator failure folds into `NotFound`: the caller's only
//! recovery is asking for a different place name.

use std::sync::Arc;

use tracing::{debug, warn};

use super::providers::{self, Geocoder, TimezoneLookup};
use super::types::{GeoCoordinate, LocationError, LocationSource};

/// Resolves free-text birth places into coordinates and zones.
pub struct GeoResolver {
    geocoder: Arc<dyn Geocoder>,
    timezones: Arc<dyn TimezoneLookup>,
    offline: bool,
}

impl GeoResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, timezones: Arc<dyn TimezoneLookup>) -> Self {
        Self { geocoder, timezones, offline: false }
    }

    /// In offline mode only the built-in table is consulted.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn resolve(&self, place: &str) -> Result<GeoCoordinate, LocationError> {
        let not_found = || LocationError::NotFound(place.trim().to_string());

        if providers::normalize_place(place).is_empty() {
            return Err(not_found());
        }

        // 1. Built-in table, no network
        if let Some(coord) = providers::builtin_lookup(place) {
            debug!(place, tz = %coord.time_zone_id, "resolved from built-in table");
            return Ok(coord);
        }

        if self.offline {
            debug!(place, "offline mode, skipping geocoder");
            return Err(not_found());
        }

        // 2. Geocoder with the raw place string
        let hit = match self.geocoder.geocode(place) {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                debug!(place, "geocoder returned no result");
                return Err(not_found());
            }
            Err(e) => {
                warn!(place, error = %e, "geocoder failed, treating as not found");
                return Err(not_found());
            }
        };

        if !providers::coords_in_range(hit.latitude, hit.longitude) {
            warn!(place, lat = hit.latitude, lon = hit.longitude, "geocoder returned out-of-range coordinates");
            return Err(not_found());
        }

        // 3. Zone from the returned coordinate
        let tz = match self.timezones.timezone_at(hit.latitude, hit.longitude) {
            Ok(Some(tz)) => tz,
            Ok(None) => {
                debug!(place, "time-zone lookup returned no zone");
                return Err(not_found());
            }
            Err(e) => {
                warn!(place, error = %e, "time-zone lookup failed, treating as not found");
                return Err(not_found());
            }
        };

        if tz.parse::<chrono_tz::Tz>().is_err() {
            warn!(place, tz = %tz, "time-zone lookup returned an unknown zone");
            return Err(not_found());
        }

        debug!(
            place,
            display_name = hit.display_name.as_deref().unwrap_or(""),
            tz = %tz,
            "resolved via geocoder"
        );

        Ok(GeoCoordinate {
            latitude: hit.latitude,
            longitude: hit.longitude,
            time_zone_id: tz,
            source: LocationSource::Geocoder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::types::{GeocodeError, GeocodeHit};
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubGeocoder {
        hit: Option<GeocodeHit>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubGeocoder {
        fn returning(hit: Option<GeocodeHit>) -> Arc<Self> {
            Arc::new(Self { hit, fail: false, calls: AtomicUsize::new(0) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { hit: None, fail: true, calls: AtomicUsize::new(0) })
        }
    }

    impl Geocoder for StubGeocoder {
        fn geocode(&self, _place: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GeocodeError::Network("rate limited".into()));
            }
            Ok(self.hit.clone())
        }
    }

    struct StubZones {
        tz: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl TimezoneLookup for StubZones {
        fn timezone_at(&self, _lat: f64, _lon: f64) -> Result<Option<String>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tz.map(String::from))
        }
    }

    fn zones(tz: Option<&'static str>) -> Arc<StubZones> {
        Arc::new(StubZones { tz, calls: AtomicUsize::new(0) })
    }

    fn reykjavik() -> GeocodeHit {
        GeocodeHit { latitude: 64.1466, longitude: -21.9426, display_name: Some("Reykjavík, Iceland".into()) }
    }

    #[test]
    fn test_builtin_hit_skips_collaborators() {
        let geo = StubGeocoder::returning(Some(reykjavik()));
        let tz = zones(Some("Atlantic/Reykjavik"));
        let resolver = GeoResolver::new(geo.clone(), tz.clone());

        let loc = resolver.resolve("  bEIJING ").unwrap();
        assert_relative_eq!(loc.latitude, 39.9042);
        assert_relative_eq!(loc.longitude, 116.4074);
        assert_eq!(loc.time_zone_id, "Asia/Shanghai");
        assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tz.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_geocoder_fallback() {
        let geo = StubGeocoder::returning(Some(reykjavik()));
        let resolver = GeoResolver::new(geo.clone(), zones(Some("Atlantic/Reykjavik")));

        let loc = resolver.resolve("Reykjavik").unwrap();
        assert_eq!(loc.source, LocationSource::Geocoder);
        assert_eq!(loc.time_zone_id, "Atlantic/Reykjavik");
        assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_place_not_found() {
        let tz = zones(Some("UTC"));
        let resolver = GeoResolver::new(StubGeocoder::returning(None), tz.clone());
        assert_eq!(
            resolver.resolve("Zzyzxtown9999"),
            Err(LocationError::NotFound("Zzyzxtown9999".into()))
        );
        assert_eq!(tz.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_geocoder_error_folds_into_not_found() {
        let geo = StubGeocoder::failing();
        let resolver = GeoResolver::new(geo.clone(), zones(Some("UTC")));
        assert!(matches!(resolver.resolve("Atlantis"), Err(LocationError::NotFound(_))));
        assert_eq!(geo.calls.load(Ordering::SeqCst), 1, "no retry");
    }

    #[test]
    fn test_missing_or_invalid_zone_not_found() {
        let resolver = GeoResolver::new(StubGeocoder::returning(Some(reykjavik())), zones(None));
        assert!(resolver.resolve("Reykjavik").is_err());

        let resolver = GeoResolver::new(StubGeocoder::returning(Some(reykjavik())), zones(Some("Mars/Olympus")));
        assert!(resolver.resolve("Reykjavik").is_err());
    }

    #[test]
    fn test_out_of_range_hit_rejected() {
        let hit = GeocodeHit { latitude: 123.0, longitude: 0.0, display_name: None };
        let resolver = GeoResolver::new(StubGeocoder::returning(Some(hit)), zones(Some("UTC")));
        assert!(resolver.resolve("Nowhere").is_err());
    }

    #[test]
    fn test_blank_place_never_calls_geocoder() {
        let geo = StubGeocoder::returning(Some(reykjavik()));
        let resolver = GeoResolver::new(geo.clone(), zones(Some("UTC")));
        assert!(resolver.resolve("   ").is_err());
        assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_offline_skips_geocoder() {
        let geo = StubGeocoder::returning(Some(reykjavik()));
        let mut resolver = GeoResolver::new(geo.clone(), zones(Some("UTC")));
        resolver.set_offline(true);
        assert!(resolver.resolve("Reykjavik").is_err());
        assert!(resolver.resolve("London").is_ok());
        assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
    }
}
