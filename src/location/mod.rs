//! Location subsystem: turns a free-text birth place into a coordinate
//! and IANA time zone.
//!
//! A small built-in table answers frequent cities without network access;
//! everything else goes through the geocoder and a time-zone lookup.

pub mod providers;
pub mod resolver;
pub mod types;

pub use providers::{builtin_city_list, format_coords, CityInfo, Geocoder, NominatimGeocoder, TimeApiLookup, TimezoneLookup};
pub use resolver::GeoResolver;
pub use types::{GeoCoordinate, GeocodeError, GeocodeHit, LocationError, LocationSource};
