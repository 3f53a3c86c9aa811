//! The reading pipeline: place → coordinate → chart → streamed interpretation.
//!
//! Each stage is synchronous and the first failure stops the request; a
//! failed render never reaches the interpretation stage.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, info_span};

use crate::chart::{ArtifactHandle, BirthQuery, ChartArtifactManager, ChartFacts, CommandChartEngine, RenderFailure};
use crate::config::{Config, ConfigError, GeoConfig};
use crate::interpret::{Interpretation, InterpretationFailure, InterpretationRelay, InterpretationRequest, OpenAiChatClient};
use crate::location::{GeoCoordinate, GeoResolver, LocationError, NominatimGeocoder, TimeApiLookup};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Location failed: could not calculate coordinates for '{place}'. Try a major city name, e.g. 'Beijing'.")]
    LocationNotFound { place: String },
    #[error("Chart failed: {0}")]
    Render(#[from] RenderFailure),
    #[error("Interpretation failed: {0}")]
    Interpretation(#[from] InterpretationFailure),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::LocationNotFound { .. } => "location",
            Self::Render(_) => "chart",
            Self::Interpretation(_) => "interpretation",
        }
    }
}

impl From<LocationError> for PipelineError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::NotFound(place) => Self::LocationNotFound { place },
        }
    }
}

/// A successful request: the chart is complete, the text is still arriving.
pub struct Reading {
    pub coordinate: GeoCoordinate,
    pub artifact: ArtifactHandle,
    pub facts: ChartFacts,
    pub interpretation: Interpretation,
}

pub struct ReadingPipeline {
    resolver: GeoResolver,
    charts: ChartArtifactManager,
    relay: InterpretationRelay,
}

impl ReadingPipeline {
    pub fn new(resolver: GeoResolver, charts: ChartArtifactManager, relay: InterpretationRelay) -> Self {
        Self { resolver, charts, relay }
    }

    /// Wire the production collaborators from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config.api_key()?;
        let (program, args) = config.chart_command()?;

        let resolver = resolver_from_config(&config.geo);
        let charts = ChartArtifactManager::new(
            Arc::new(CommandChartEngine::new(program, args.to_vec(), config.chart.timeout())),
            &config.chart.artifact_dir,
        )
        .with_layout(config.chart.layout)
        .with_theme(&config.chart.theme)
        .with_extension(&config.chart.extension);

        let llm = &config.llm;
        let mut relay = InterpretationRelay::new(Arc::new(OpenAiChatClient::new(
            &llm.base_url,
            api_key,
            &llm.model,
            llm.connect_timeout(),
            llm.read_timeout(),
        )));
        if let Some(persona) = &config.prompt.persona {
            relay = relay.with_persona(persona);
        }

        Ok(Self::new(resolver, charts, relay))
    }

    pub fn resolver(&self) -> &GeoResolver {
        &self.resolver
    }

    pub fn run(&self, query: &BirthQuery, question: &str) -> Result<Reading, PipelineError> {
        let span = info_span!("reading", place = %query.place.trim());
        let _enter = span.enter();

        let started = Instant::now();
        query.timestamp()?;
        let coordinate = self.resolver.resolve(&query.place)?;
        info!(tz = %coordinate.time_zone_id, source = %coordinate.source, elapsed_ms = started.elapsed().as_millis() as u64, "location resolved");

        let (artifact, facts) = self.charts.render(query, &coordinate)?;

        let request = InterpretationRequest::new(facts.clone(), question, audience_hint(query, &coordinate));
        let interpretation = self.relay.stream(&request)?;
        info!(
            correlation_id = %artifact.correlation_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "interpretation streaming"
        );

        Ok(Reading { coordinate, artifact, facts, interpretation })
    }
}

/// The resolver alone; it needs no credentials.
pub fn resolver_from_config(geo: &GeoConfig) -> GeoResolver {
    let mut resolver = GeoResolver::new(
        Arc::new(NominatimGeocoder::new(&geo.nominatim_url, &geo.user_agent, geo.timeout())),
        Arc::new(TimeApiLookup::new(&geo.timezone_url, &geo.user_agent, geo.timeout())),
    );
    resolver.set_offline(geo.offline);
    resolver
}

fn audience_hint(query: &BirthQuery, coord: &GeoCoordinate) -> String {
    let when = query
        .timestamp()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    format!(
        "{}, born {} ({}) in {}",
        query.name_or_default(),
        when,
        coord.time_zone_id,
        query.place.trim(),
    )
}
