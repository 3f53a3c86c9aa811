use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chart::{ChartFacts, RawBirthInput};
use crate::location::{builtin_city_list, format_coords, CityInfo, GeoCoordinate, LocationError};
use crate::pipeline::{PipelineError, Reading};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    stage: &'static str,
    code: u16,
}

pub struct ApiError {
    status: StatusCode,
    stage: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
            stage: self.stage,
            code: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::LocationNotFound { .. } => StatusCode::NOT_FOUND,
            PipelineError::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Interpretation(_) => StatusCode::BAD_GATEWAY,
        };
        Self { status, stage: e.stage(), message: e.to_string() }
    }
}

fn api_error(status: StatusCode, stage: &'static str, msg: impl Into<String>) -> ApiError {
    ApiError { status, stage, message: msg.into() }
}

// ─── POST /api/reading ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReadingRequest {
    #[serde(flatten)]
    pub birth: RawBirthInput,
    #[serde(default)]
    pub question: String,
}

/// One NDJSON line of a reading response.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ReadingEvent {
    Chart {
        correlation_id: String,
        mime_type: &'static str,
        coordinate: GeoCoordinate,
        facts: ChartFacts,
        svg: String,
    },
    Delta {
        text: String,
    },
    Done,
    Error {
        stage: &'static str,
        message: String,
    },
}

impl ReadingEvent {
    fn chart(reading: &Reading) -> Self {
        Self::Chart {
            correlation_id: reading.artifact.correlation_id.to_string(),
            mime_type: reading.artifact.mime_type,
            coordinate: reading.coordinate.clone(),
            facts: reading.facts.clone(),
            svg: reading.artifact.as_text().into_owned(),
        }
    }

    fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "stage": "encode", "message": e.to_string() }).to_string()
        });
        line.push('\n');
        line
    }
}

/// Run the pipeline on a blocking thread. The chart event (or the pipeline
/// error) comes back on `ready`; text fragments follow on `events` until the
/// stream ends or the receiver is dropped.
fn drive_reading(
    state: Arc<AppState>,
    birth: crate::chart::BirthQuery,
    question: String,
    ready: oneshot::Sender<Result<ReadingEvent, PipelineError>>,
    events: mpsc::Sender<ReadingEvent>,
) {
    let reading = match state.pipeline.run(&birth, &question) {
        Ok(r) => r,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let head = ReadingEvent::chart(&reading);
    if ready.send(Ok(head)).is_err() {
        return;
    }

    for fragment in reading.interpretation {
        let event = match fragment {
            Ok(text) if text.is_empty() => continue,
            Ok(text) => ReadingEvent::Delta { text },
            Err(e) => {
                let _ = events.blocking_send(ReadingEvent::Error { stage: "interpretation", message: e.to_string() });
                return;
            }
        };
        if events.blocking_send(event).is_err() {
            debug!("client disconnected, abandoning interpretation stream");
            return;
        }
    }
    let _ = events.blocking_send(ReadingEvent::Done);
}

pub async fn reading(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReadingRequest>,
) -> Result<Response, ApiError> {
    let birth = req
        .birth
        .coerce()
        .map_err(|e| ApiError::from(PipelineError::from(e)))?;

    let (ready_tx, ready_rx) = oneshot::channel();
    let (events_tx, events_rx) = mpsc::channel::<ReadingEvent>(32);
    tokio::task::spawn_blocking(move || drive_reading(state, birth, req.question, ready_tx, events_tx));

    let head = match ready_rx.await {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => {
            warn!(stage = e.stage(), error = %e, "reading failed before streaming");
            return Err(e.into());
        }
        Err(_) => {
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "pipeline", "reading task aborted"));
        }
    };

    let first = futures::stream::once(async move { Ok::<_, Infallible>(head.to_line()) });
    let rest = futures::stream::unfold(events_rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event.to_line()), rx))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(first.chain(rest)),
    )
        .into_response())
}

// ─── GET /api/resolve ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub place: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub place: String,
    pub lat: f64,
    pub lon: f64,
    pub tz: String,
    pub formatted_coords: String,
    pub source: String,
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let start = Instant::now();

    let place = params.place.unwrap_or_default().trim().to_string();
    if place.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "location", "Missing 'place' parameter"));
    }

    let lookup = place.clone();
    let resolved = tokio::task::spawn_blocking(move || state.pipeline.resolver().resolve(&lookup))
        .await
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "location", "resolver task aborted"))?;

    let coord = match resolved {
        Ok(c) => c,
        Err(LocationError::NotFound(p)) => {
            return Err(PipelineError::LocationNotFound { place: p }.into());
        }
    };

    info!(
        %place,
        tz = %coord.time_zone_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "GET /api/resolve"
    );

    Ok(Json(ResolveResponse {
        formatted_coords: format_coords(coord.latitude, coord.longitude),
        source: coord.source.to_string(),
        lat: coord.latitude,
        lon: coord.longitude,
        tz: coord.time_zone_id,
        place,
    }))
}

// ─── GET /api/cities ─────────────────────────────────────────────

pub async fn city_list() -> Json<Vec<CityInfo>> {
    Json(builtin_city_list())
}
