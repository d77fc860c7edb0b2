use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Json, State},
    http::{header, StatusCode},
    response::{Json as JsonResponse, Response},
    routing::{get, post},
    serve, Router,
};
use chrono::{DateTime, Utc};
use futures::{channel::mpsc, SinkExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};

use crate::{
    context_cache::ContextCache,
    extraction::{ExtractionError, ReferenceExtractor},
    scripture::{
        expand_verse_range, Resolution, TranslationStore, INVALID_VERSION_MESSAGE,
        NOT_FOUND_MESSAGE,
    },
};

/// Merged transcript text shorter than this never reaches the oracle.
pub const DEFAULT_MIN_CHUNK_LENGTH: usize = 10;

/// Pause between successive verse emissions, so the client renders a
/// gradual reveal instead of one burst.
pub const DEFAULT_EMIT_DELAY: Duration = Duration::from_millis(100);

/// Fixed messages carried by `error` stream events.
pub const PARSE_FAILURE_MESSAGE: &str = "Failed to parse matches";
pub const PROCESSING_FAILURE_MESSAGE: &str = "Processing failed";

pub struct AppState {
    pub store: Arc<TranslationStore>,
    pub context_cache: Arc<ContextCache>,
    pub extractor: Arc<dyn ReferenceExtractor>,
    pub app_start_time: DateTime<Utc>,
    pub min_chunk_length: usize,
    pub emit_delay: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub text: String,
    pub session_id: String,
    pub version: String,
}

/// One typed streaming event, serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Quote {
        reference: String,
        text: String,
        version: String,
    },
    Error {
        message: &'static str,
    },
    NoMatch,
}

impl StreamEvent {
    pub fn to_json(&self) -> Value {
        match self {
            StreamEvent::Quote {
                reference,
                text,
                version,
            } => json!({
                "type": "quote",
                "data": { "reference": reference, "text": text, "version": version },
            }),
            StreamEvent::Error { message } => json!({
                "type": "error",
                "data": { "message": message },
            }),
            StreamEvent::NoMatch => json!({ "type": "no-match", "data": null }),
        }
    }

    fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_json().to_string())
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> JsonResponse<Value> {
    JsonResponse(json!({
        "status": "healthy",
        "uptime_secs": (Utc::now() - state.app_start_time).num_seconds(),
        "translations": state.store.translations(),
        "context_entries": state.context_cache.len(),
    }))
}

/// `POST /stream`: merges the rolling context with the new fragment and
/// streams one JSON event per resolved verse as each becomes ready.
async fn stream_quotes(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Response, (StatusCode, JsonResponse<Value>)> {
    let Json(request) = payload.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            JsonResponse(json!({ "error": format!("invalid request body: {}", e) })),
        )
    })?;

    // Snapshot the recent window before recording the new fragment so the
    // merged text contains the fragment exactly once.
    let recent_context = state.context_cache.recent_text();
    state
        .context_cache
        .record(&request.session_id, &request.text);

    let analyzable = format!("{} {}", recent_context, request.text)
        .trim()
        .to_string();

    if analyzable.chars().count() < state.min_chunk_length {
        debug!(
            "merged transcript too short ({} chars), skipping extraction",
            analyzable.chars().count()
        );
        return Ok(event_response(Body::from(StreamEvent::NoMatch.to_bytes())));
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    tokio::spawn(run_quote_stream(state, request, tx));

    Ok(event_response(Body::from_stream(rx)))
}

fn event_response(body: Body) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap()
}

/// Per-request emission task. Failures local to one candidate never abort
/// the remaining work; a failed send means the client went away.
async fn run_quote_stream(
    state: Arc<AppState>,
    request: StreamRequest,
    mut tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    let candidates = match state.extractor.extract(&request.text).await {
        Ok(candidates) => candidates,
        Err(ExtractionError::MalformedReply { raw }) => {
            error!("oracle reply is not a candidate list: {}", raw);
            let _ = tx
                .send(Ok(StreamEvent::Error {
                    message: PARSE_FAILURE_MESSAGE,
                }
                .to_bytes()))
                .await;
            return;
        }
        Err(ExtractionError::Oracle(e)) => {
            error!("oracle call failed: {:#}", e);
            let _ = tx
                .send(Ok(StreamEvent::Error {
                    message: PROCESSING_FAILURE_MESSAGE,
                }
                .to_bytes()))
                .await;
            return;
        }
    };

    debug!("oracle proposed {} candidate reference(s)", candidates.len());

    for candidate in candidates {
        for reference in expand_verse_range(&candidate.reference) {
            let text = match state.store.resolve(&reference, &request.version) {
                Resolution::Found(text) => text,
                // Absence of a verse is itself meaningful feedback.
                Resolution::NotFound => NOT_FOUND_MESSAGE.to_string(),
                Resolution::InvalidVersion => INVALID_VERSION_MESSAGE.to_string(),
                Resolution::Unparseable => {
                    debug!("skipping unparseable reference {:?}", reference);
                    continue;
                }
            };

            let event = StreamEvent::Quote {
                reference,
                text,
                version: request.version.clone(),
            };
            if tx.send(Ok(event.to_bytes())).await.is_err() {
                debug!("client disconnected, aborting quote stream");
                return;
            }

            tokio::time::sleep(state.emit_delay).await;
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", post(stream_quotes))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct Server {
    state: Arc<AppState>,
    addr: SocketAddr,
}

impl Server {
    pub fn new(state: Arc<AppState>, addr: SocketAddr) -> Self {
        Server { state, addr }
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let app = create_router(self.state);

        info!("starting server on {}", self.addr);

        serve(TcpListener::bind(self.addr).await?, app.into_make_service()).await
    }
}
