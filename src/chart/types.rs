//! Core types for chart rendering: birth input, chart facts, artifacts.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

// ─── Birth input ────────────────────────────────────────────────

/// Birth data as numeric form widgets send it: possibly fractional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBirthInput {
    #[serde(default)]
    pub name: String,
    pub year: f64,
    pub month: f64,
    pub day: f64,
    pub hour: f64,
    pub minute: f64,
    pub place: String,
}

impl RawBirthInput {
    /// Truncate every numeric field toward zero.
    pub fn coerce(&self) -> Result<BirthQuery, RenderFailure> {
        fn int(field: &str, v: f64) -> Result<i64, RenderFailure> {
            if !v.is_finite() || v.abs() > i32::MAX as f64 {
                return Err(RenderFailure::InvalidBirthData(format!("{} is not a number: {}", field, v)));
            }
            Ok(v.trunc() as i64)
        }
        fn unsigned(field: &str, v: f64) -> Result<u32, RenderFailure> {
            u32::try_from(int(field, v)?)
                .map_err(|_| RenderFailure::InvalidBirthData(format!("{} must not be negative: {}", field, v)))
        }

        Ok(BirthQuery {
            display_name: self.name.clone(),
            year: int("year", self.year)? as i32,
            month: unsigned("month", self.month)?,
            day: unsigned("day", self.day)?,
            hour: unsigned("hour", self.hour)?,
            minute: unsigned("minute", self.minute)?,
            place: self.place.clone(),
        })
    }
}

/// A birth moment and place, all numeric fields already integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthQuery {
    pub display_name: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub place: String,
}

impl BirthQuery {
    /// Local wall-clock birth time, or why it is not a valid calendar moment.
    pub fn timestamp(&self) -> Result<NaiveDateTime, RenderFailure> {
        if !(1..=3000).contains(&self.year) {
            return Err(RenderFailure::InvalidBirthData(format!("year {} out of range 1..=3000", self.year)));
        }
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .ok_or_else(|| {
                RenderFailure::InvalidBirthData(format!(
                    "{:04}-{:02}-{:02} is not a calendar date",
                    self.year, self.month, self.day
                ))
            })?
            .and_hms_opt(self.hour, self.minute, 0)
            .ok_or_else(|| {
                RenderFailure::InvalidBirthData(format!("{:02}:{:02} is not a valid time", self.hour, self.minute))
            })
    }

    pub fn name_or_default(&self) -> &str {
        let name = self.display_name.trim();
        if name.is_empty() { "Anonymous" } else { name }
    }
}

// ─── Chart facts ────────────────────────────────────────────────

/// The bodies whose signs ground an interpretation, in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Body {
    Sun,
    Moon,
    Ascendant,
    Mercury,
    Venus,
    Mars,
    Jupiter,
    Saturn,
}

impl Body {
    pub const ALL: [Body; 8] = [
        Body::Sun,
        Body::Moon,
        Body::Ascendant,
        Body::Mercury,
        Body::Venus,
        Body::Mars,
        Body::Jupiter,
        Body::Saturn,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Body::Sun => "Sun",
            Body::Moon => "Moon",
            Body::Ascendant => "Ascendant",
            Body::Mercury => "Mercury",
            Body::Venus => "Venus",
            Body::Mars => "Mars",
            Body::Jupiter => "Jupiter",
            Body::Saturn => "Saturn",
        }
    }

    /// Accepts the engine's key spellings, e.g. "first_house" for the Ascendant.
    pub fn from_key(key: &str) -> Option<Body> {
        match key.trim().to_lowercase().as_str() {
            "sun" => Some(Body::Sun),
            "moon" => Some(Body::Moon),
            "ascendant" | "asc" | "rising" | "first_house" => Some(Body::Ascendant),
            "mercury" => Some(Body::Mercury),
            "venus" => Some(Body::Venus),
            "mars" => Some(Body::Mars),
            "jupiter" => Some(Body::Jupiter),
            "saturn" => Some(Body::Saturn),
            _ => None,
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZodiacSign {
    Aries,
    Taurus,
    Gemini,
    Cancer,
    Leo,
    Virgo,
    Libra,
    Scorpio,
    Sagittarius,
    Capricorn,
    Aquarius,
    Pisces,
}

impl ZodiacSign {
    const ALL: [ZodiacSign; 12] = [
        ZodiacSign::Aries,
        ZodiacSign::Taurus,
        ZodiacSign::Gemini,
        ZodiacSign::Cancer,
        ZodiacSign::Leo,
        ZodiacSign::Virgo,
        ZodiacSign::Libra,
        ZodiacSign::Scorpio,
        ZodiacSign::Sagittarius,
        ZodiacSign::Capricorn,
        ZodiacSign::Aquarius,
        ZodiacSign::Pisces,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ZodiacSign::Aries => "Aries",
            ZodiacSign::Taurus => "Taurus",
            ZodiacSign::Gemini => "Gemini",
            ZodiacSign::Cancer => "Cancer",
            ZodiacSign::Leo => "Leo",
            ZodiacSign::Virgo => "Virgo",
            ZodiacSign::Libra => "Libra",
            ZodiacSign::Scorpio => "Scorpio",
            ZodiacSign::Sagittarius => "Sagittarius",
            ZodiacSign::Capricorn => "Capricorn",
            ZodiacSign::Aquarius => "Aquarius",
            ZodiacSign::Pisces => "Pisces",
        }
    }
}

impl FromStr for ZodiacSign {
    type Err = String;

    /// Full names or three-letter abbreviations ("Sco"), any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        ZodiacSign::ALL
            .into_iter()
            .find(|sign| {
                let name = sign.name().to_lowercase();
                name == needle || (needle.len() == 3 && name.starts_with(&needle))
            })
            .ok_or_else(|| format!("unknown zodiac sign '{}'", s))
    }
}

impl fmt::Display for ZodiacSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sign placements for the eight interpreted bodies. Always complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartFacts(BTreeMap<Body, ZodiacSign>);

impl ChartFacts {
    /// Extract facts from the engine's computed subject. Every body must be
    /// present with a recognizable sign; nothing is filled in.
    pub fn from_subject(subject: &ChartSubject) -> Result<Self, RenderFailure> {
        let mut facts = BTreeMap::new();
        for (key, label) in &subject.placements {
            let Some(body) = Body::from_key(key) else { continue };
            let sign = label
                .parse::<ZodiacSign>()
                .map_err(|e| RenderFailure::IncompleteFacts(format!("{}: {}", body, e)))?;
            if let Some(previous) = facts.insert(body, sign) {
                if previous != sign {
                    return Err(RenderFailure::IncompleteFacts(format!(
                        "conflicting placements for {}: {} and {}",
                        body, previous, sign
                    )));
                }
            }
        }

        let missing: Vec<&str> = Body::ALL
            .iter()
            .filter(|b| !facts.contains_key(b))
            .map(|b| b.label())
            .collect();
        if !missing.is_empty() {
            return Err(RenderFailure::IncompleteFacts(format!("missing {}", missing.join(", "))));
        }

        Ok(Self(facts))
    }

    pub fn get(&self, body: Body) -> Option<ZodiacSign> {
        self.0.get(&body).copied()
    }

    /// Placements in reading order: Sun, Moon, Ascendant, then the planets.
    pub fn iter(&self) -> impl Iterator<Item = (Body, ZodiacSign)> + '_ {
        self.0.iter().map(|(b, s)| (*b, *s))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─── Engine exchange ────────────────────────────────────────────

/// Parameters for the chart engine. `online` is always false: the
/// coordinate is supplied, the engine must not geocode on its own.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectRequest {
    pub name: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub city: String,
    pub lat: f64,
    pub lng: f64,
    pub tz_str: String,
    pub online: bool,
}

/// The engine's computed subject: body key → sign label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartSubject {
    pub name: String,
    pub placements: BTreeMap<String, String>,
}

/// Where the engine should write, and the tag its file name must carry.
#[derive(Debug, Clone, Serialize)]
pub struct RenderTarget {
    pub dir: PathBuf,
    pub tag: String,
    pub theme: String,
}

// ─── Artifacts ──────────────────────────────────────────────────

/// Per-request token that marks this request's artifact in a shared area.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A retrieved chart. Its backing file is already gone.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    pub correlation_id: CorrelationId,
    pub content: Vec<u8>,
    pub mime_type: &'static str,
}

impl ArtifactHandle {
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ─── Errors ─────────────────────────────────────────────────────

/// Failures raised by a chart engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start chart engine '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("chart engine timed out after {0}s")]
    Timeout(u64),
    #[error("chart engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("chart engine produced invalid output: {0}")]
    InvalidOutput(String),
    #[error("chart engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error("invalid birth data: {0}")]
    InvalidBirthData(String),
    #[error("chart calculation failed: {0}")]
    Computation(#[source] EngineError),
    #[error("chart rendering failed: {0}")]
    Rendering(#[source] EngineError),
    #[error("chart facts incomplete: {0}")]
    IncompleteFacts(String),
    #[error("no chart artifact found for request {0}")]
    ArtifactNotFound(CorrelationId),
    #[error("chart artifact for request {0} is empty")]
    EmptyArtifact(CorrelationId),
    #[error("artifact storage error: {0}")]
    Storage(#[from] std::io::Error),
}
