//! Core types for the location subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a coordinate was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationSource {
    Builtin,
    Geocoder,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => write!(f, "Built-in"),
            Self::Geocoder => write!(f, "Geocoder"),
        }
    }
}

/// A resolved birth place. Produced once per request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    /// IANA zone identifier, e.g. "Asia/Shanghai".
    pub time_zone_id: String,
    pub source: LocationSource,
}

impl GeoCoordinate {
    pub fn display_line(&self) -> String {
        format!(
            "{} ({})  [{}]",
            super::providers::format_coords(self.latitude, self.longitude),
            self.time_zone_id,
            self.source,
        )
    }
}

/// A raw hit from the external geocoding service.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: Option<String>,
}

/// Failures raised by external location collaborators.
///
/// These never leave the resolver: every variant folds into
/// [`LocationError::NotFound`].
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Location resolution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("could not resolve coordinates for '{0}'")]
    NotFound(String),
}
