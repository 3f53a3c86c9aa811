//! Chart subsystem: validated birth data in, rendered chart and sign facts out.

pub mod artifact;
pub mod engine;
pub mod types;

pub use artifact::{discover_artifact, ChartArtifactManager, StorageLayout};
pub use engine::{ChartEngine, CommandChartEngine};
pub use types::{
    ArtifactHandle, BirthQuery, Body, ChartFacts, ChartSubject, CorrelationId, EngineError, RawBirthInput,
    RenderFailure, RenderTarget, SubjectRequest, ZodiacSign,
};
