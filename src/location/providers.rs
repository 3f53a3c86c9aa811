//! Location providers: built-in table, Nominatim geocoder, and time-zone lookup.

use super::types::{GeoCoordinate, GeocodeError, GeocodeHit, LocationSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ─── Collaborator seams ─────────────────────────────────────────

/// Maps free text to a coordinate. `Ok(None)` means "no such place".
pub trait Geocoder: Send + Sync {
    fn geocode(&self, place: &str) -> Result<Option<GeocodeHit>, GeocodeError>;
}

/// Maps a coordinate to an IANA zone identifier.
pub trait TimezoneLookup: Send + Sync {
    fn timezone_at(&self, latitude: f64, longitude: f64) -> Result<Option<String>, GeocodeError>;
}

// ─── Built-in dataset ───────────────────────────────────────────

struct BuiltinCity {
    names: &'static [&'static str], // canonical + aliases, already lowercase
    lat: f64,
    lon: f64,
    tz: &'static str,
}

const BUILTIN_CITIES: &[BuiltinCity] = &[
    BuiltinCity {
        names: &["beijing", "北京", "peking"],
        lat: 39.9042, lon: 116.4074, tz: "Asia/Shanghai",
    },
    BuiltinCity {
        names: &["shanghai", "上海"],
        lat: 31.2304, lon: 121.4737, tz: "Asia/Shanghai",
    },
    BuiltinCity {
        names: &["guangzhou", "广州", "canton"],
        lat: 23.1291, lon: 113.2644, tz: "Asia/Shanghai",
    },
    BuiltinCity {
        names: &["shenzhen", "深圳"],
        lat: 22.5431, lon: 114.0579, tz: "Asia/Shanghai",
    },
    BuiltinCity {
        names: &["chengdu", "成都"],
        lat: 30.5728, lon: 104.0668, tz: "Asia/Shanghai",
    },
    BuiltinCity {
        names: &["hong kong", "hongkong", "香港"],
        lat: 22.3193, lon: 114.1694, tz: "Asia/Hong_Kong",
    },
    BuiltinCity {
        names: &["new york", "newyork", "nyc"],
        lat: 40.7128, lon: -74.0060, tz: "America/New_York",
    },
    BuiltinCity {
        names: &["london"],
        lat: 51.5074, lon: -0.1278, tz: "Europe/London",
    },
    BuiltinCity {
        names: &["tokyo", "東京", "东京"],
        lat: 35.6762, lon: 139.6503, tz: "Asia/Tokyo",
    },
    BuiltinCity {
        names: &["paris"],
        lat: 48.8566, lon: 2.3522, tz: "Europe/Paris",
    },
    BuiltinCity {
        names: &["berlin"],
        lat: 52.5200, lon: 13.4050, tz: "Europe/Berlin",
    },
    BuiltinCity {
        names: &["los angeles"],
        lat: 34.0522, lon: -118.2437, tz: "America/Los_Angeles",
    },
    BuiltinCity {
        names: &["sydney"],
        lat: -33.8688, lon: 151.2093, tz: "Australia/Sydney",
    },
    BuiltinCity {
        names: &["singapore"],
        lat: 1.3521, lon: 103.8198, tz: "Asia/Singapore",
    },
    BuiltinCity {
        names: &["taipei", "台北"],
        lat: 25.0330, lon: 121.5654, tz: "Asia/Taipei",
    },
];

/// Normalize a place name for table lookup: trim and case-fold.
pub fn normalize_place(place: &str) -> String {
    place.trim().to_lowercase()
}

/// Exact (normalized) match against the built-in table.
pub fn builtin_lookup(place: &str) -> Option<GeoCoordinate> {
    let key = normalize_place(place);
    if key.is_empty() {
        return None;
    }
    BUILTIN_CITIES
        .iter()
        .find(|city| city.names.iter().any(|name| *name == key))
        .map(|city| GeoCoordinate {
            latitude: city.lat,
            longitude: city.lon,
            time_zone_id: city.tz.to_string(),
            source: LocationSource::Builtin,
        })
}

/// A city entry for the public city list API.
#[derive(Debug, Clone, Serialize)]
pub struct CityInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub lat: f64,
    pub lon: f64,
    pub tz: String,
}

/// Return the full built-in city list (for autocomplete / API).
pub fn builtin_city_list() -> Vec<CityInfo> {
    BUILTIN_CITIES
        .iter()
        .map(|c| CityInfo {
            name: c.names[0].to_string(),
            aliases: c.names[1..].iter().map(|s| s.to_string()).collect(),
            lat: c.lat,
            lon: c.lon,
            tz: c.tz.to_string(),
        })
        .collect()
}

/// "39.9042°N, 116.4074°E"
pub fn format_coords(lat: f64, lon: f64) -> String {
    let ns = if lat >= 0.0 { 'N' } else { 'S' };
    let ew = if lon >= 0.0 { 'E' } else { 'W' };
    format!("{:.4}\u{00B0}{}, {:.4}\u{00B0}{}", lat.abs(), ns, lon.abs(), ew)
}

pub(crate) fn coords_in_range(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

// ─── Nominatim provider ─────────────────────────────────────────

#[derive(Deserialize, Debug, Clone)]
struct NominatimResult {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// OpenStreetMap Nominatim search, first result wins.
pub struct NominatimGeocoder {
    agent: ureq::Agent,
    search_url: String,
    user_agent: String,
}

impl NominatimGeocoder {
    pub fn new(search_url: impl Into<String>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            search_url: search_url.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, place: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
        let response = self
            .agent
            .get(&self.search_url)
            .query("q", place)
            .query("format", "json")
            .query("limit", "1")
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        let results: Vec<NominatimResult> = response
            .into_json()
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;

        let Some(top) = results.into_iter().next() else {
            return Ok(None);
        };

        let latitude: f64 = top
            .lat
            .parse()
            .map_err(|_| GeocodeError::InvalidResponse(format!("bad latitude '{}'", top.lat)))?;
        let longitude: f64 = top
            .lon
            .parse()
            .map_err(|_| GeocodeError::InvalidResponse(format!("bad longitude '{}'", top.lon)))?;

        Ok(Some(GeocodeHit {
            latitude,
            longitude,
            display_name: top.display_name,
        }))
    }
}

// ─── Timezone lookup ────────────────────────────────────────────

/// timeapi.io coordinate lookup.
pub struct TimeApiLookup {
    agent: ureq::Agent,
    endpoint: String,
    user_agent: String,
}

impl TimeApiLookup {
    pub fn new(endpoint: impl Into<String>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            endpoint: endpoint.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl TimezoneLookup for TimeApiLookup {
    fn timezone_at(&self, latitude: f64, longitude: f64) -> Result<Option<String>, GeocodeError> {
        let response = self
            .agent
            .get(&self.endpoint)
            .query("latitude", &latitude.to_string())
            .query("longitude", &longitude.to_string())
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        let val: serde_json::Value = response
            .into_json()
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;

        Ok(val
            .get("timeZone")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_builtin_exact() {
        let loc = builtin_lookup("Beijing").unwrap();
        assert_relative_eq!(loc.latitude, 39.9042);
        assert_relative_eq!(loc.longitude, 116.4074);
        assert_eq!(loc.time_zone_id, "Asia/Shanghai");
        assert_eq!(loc.source, LocationSource::Builtin);
    }

    #[test]
    fn test_builtin_trim_and_case() {
        let loc = builtin_lookup("  HONG KONG \n").unwrap();
        assert_eq!(loc.time_zone_id, "Asia/Hong_Kong");
    }

    #[test]
    fn test_builtin_cjk_alias() {
        let loc = builtin_lookup("上海").unwrap();
        assert_relative_eq!(loc.latitude, 31.2304);
    }

    #[test]
    fn test_builtin_no_fuzzy_or_substring() {
        assert!(builtin_lookup("beijin").is_none());
        assert!(builtin_lookup("new").is_none());
        assert!(builtin_lookup("   ").is_none());
    }

    #[test]
    fn test_builtin_table_zones_are_valid() {
        for city in builtin_city_list() {
            assert!(city.tz.parse::<chrono_tz::Tz>().is_ok(), "bad zone for {}", city.name);
            assert!(coords_in_range(city.lat, city.lon));
        }
    }

    #[test]
    fn test_format_coords() {
        assert_eq!(format_coords(40.7128, -74.006), "40.7128°N, 74.0060°W");
        assert_eq!(format_coords(-33.8688, 151.2093), "33.8688°S, 151.2093°E");
    }

    #[test]
    fn test_coords_in_range() {
        assert!(coords_in_range(0.0, 0.0));
        assert!(!coords_in_range(91.0, 0.0));
        assert!(!coords_in_range(0.0, f64::NAN));
    }
}
