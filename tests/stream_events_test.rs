use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use versecatch_server::{
    create_router, AppState, BibleData, CandidateMatch, ContextCache, ExtractionError,
    ReferenceExtractor, Translation, TranslationStore,
};

/// Deterministic stand-in for the hosted oracle.
enum Script {
    Candidates(Vec<&'static str>),
    MalformedReply,
    OracleFailure,
}

struct ScriptedExtractor {
    script: Script,
    calls: AtomicUsize,
}

#[async_trait]
impl ReferenceExtractor for ScriptedExtractor {
    async fn extract(&self, _transcript: &str) -> Result<Vec<CandidateMatch>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Candidates(references) => Ok(references
                .iter()
                .map(|reference| CandidateMatch {
                    reference: reference.to_string(),
                })
                .collect()),
            Script::MalformedReply => Err(ExtractionError::MalformedReply {
                raw: "I did not find any Bible references.".to_string(),
            }),
            Script::OracleFailure => {
                Err(ExtractionError::Oracle(anyhow::anyhow!("connection refused")))
            }
        }
    }
}

fn test_store() -> TranslationStore {
    let kjv: BibleData = serde_json::from_value(json!({
        "John": {
            "3": { "16": "For God so loved the world, that he gave his only begotten Son" }
        },
        "1 John": {
            "3": { "16": "Hereby perceive we the love of God" }
        },
        "Genesis": {
            "4": {
                "5": "But unto Cain and to his offering he had not respect",
                "6": "And the LORD said unto Cain, Why art thou wroth",
                "7": "If thou doest well, shalt thou not be accepted",
                "8": "And Cain talked with Abel his brother"
            }
        }
    }))
    .unwrap();
    TranslationStore::from_datasets(vec![(Translation::Kjv, kjv)])
}

fn test_state(script: Script) -> (Arc<AppState>, Arc<ScriptedExtractor>) {
    let extractor = Arc::new(ScriptedExtractor {
        script,
        calls: AtomicUsize::new(0),
    });
    let state = Arc::new(AppState {
        store: Arc::new(test_store()),
        context_cache: Arc::new(ContextCache::new(Duration::from_secs(20))),
        extractor: extractor.clone(),
        app_start_time: chrono::Utc::now(),
        min_chunk_length: 10,
        emit_delay: Duration::ZERO,
    });
    (state, extractor)
}

async fn post_stream(app: Router, body: Value) -> (StatusCode, Vec<Value>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/stream")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    // The body is a sequence of concatenated JSON values, one per event.
    let events = serde_json::Deserializer::from_slice(&bytes)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    (status, events)
}

fn stream_body(text: &str, version: &str) -> Value {
    json!({ "text": text, "sessionId": "test-session", "version": version })
}

#[tokio::test]
async fn single_verse_reference_streams_one_quote() {
    let (state, _) = test_state(Script::Candidates(vec!["John 3:16"]));
    let (status, events) = post_stream(
        create_router(state),
        stream_body("in John chapter 3 verse 16", "KJV"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        events,
        vec![json!({
            "type": "quote",
            "data": {
                "reference": "John 3:16",
                "text": "For God so loved the world, that he gave his only begotten Son",
                "version": "KJV"
            }
        })]
    );
}

#[tokio::test]
async fn range_reference_streams_ascending_verses() {
    let (state, _) = test_state(Script::Candidates(vec!["Genesis 4:5-8"]));
    let (status, events) = post_stream(
        create_router(state),
        stream_body("Genesis chapter 4 verse 5 to verse 8", "KJV"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(events.len(), 4);
    let references: Vec<&str> = events
        .iter()
        .map(|event| event["data"]["reference"].as_str().unwrap())
        .collect();
    assert_eq!(
        references,
        vec!["Genesis 4:5", "Genesis 4:6", "Genesis 4:7", "Genesis 4:8"]
    );
    assert_eq!(
        events[3]["data"]["text"],
        "And Cain talked with Abel his brother"
    );
}

#[tokio::test]
async fn candidates_stream_in_oracle_reply_order() {
    let (state, _) = test_state(Script::Candidates(vec!["John 3:16", "Genesis 4:5-6"]));
    let (_, events) = post_stream(
        create_router(state),
        stream_body("John three sixteen then Genesis four five and six", "KJV"),
    )
    .await;

    let references: Vec<&str> = events
        .iter()
        .map(|event| event["data"]["reference"].as_str().unwrap())
        .collect();
    assert_eq!(references, vec!["John 3:16", "Genesis 4:5", "Genesis 4:6"]);
}

#[tokio::test]
async fn short_input_short_circuits_without_oracle_call() {
    let (state, extractor) = test_state(Script::Candidates(vec!["John 3:16"]));
    let (status, events) = post_stream(create_router(state), stream_body("amen", "KJV")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(events, vec![json!({ "type": "no-match", "data": null })]);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_oracle_reply_yields_single_parse_error() {
    let (state, _) = test_state(Script::MalformedReply);
    let (status, events) = post_stream(
        create_router(state),
        stream_body("for God so loved the world", "KJV"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        events,
        vec![json!({ "type": "error", "data": { "message": "Failed to parse matches" } })]
    );
}

#[tokio::test]
async fn oracle_failure_yields_processing_failed() {
    let (state, _) = test_state(Script::OracleFailure);
    let (_, events) = post_stream(
        create_router(state),
        stream_body("for God so loved the world", "KJV"),
    )
    .await;

    assert_eq!(
        events,
        vec![json!({ "type": "error", "data": { "message": "Processing failed" } })]
    );
}

#[tokio::test]
async fn unparseable_candidate_is_skipped() {
    let (state, _) = test_state(Script::Candidates(vec!["hallelujah", "John 3:16"]));
    let (_, events) = post_stream(
        create_router(state),
        stream_body("hallelujah John chapter 3 verse 16", "KJV"),
    )
    .await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["data"]["reference"], "John 3:16");
}

#[tokio::test]
async fn missing_verse_still_emits_not_found() {
    let (state, _) = test_state(Script::Candidates(vec!["John 99:9"]));
    let (_, events) = post_stream(
        create_router(state),
        stream_body("somewhere near the end of John", "KJV"),
    )
    .await;

    assert_eq!(
        events,
        vec![json!({
            "type": "quote",
            "data": { "reference": "John 99:9", "text": "Text not found", "version": "KJV" }
        })]
    );
}

#[tokio::test]
async fn unknown_version_emits_invalid_version_sentinel() {
    let (state, _) = test_state(Script::Candidates(vec!["John 3:16"]));
    let (_, events) = post_stream(
        create_router(state),
        stream_body("in John chapter 3 verse 16", "NASB"),
    )
    .await;

    assert_eq!(
        events,
        vec![json!({
            "type": "quote",
            "data": { "reference": "John 3:16", "text": "Invalid Bible version", "version": "NASB" }
        })]
    );
}

#[tokio::test]
async fn malformed_body_is_rejected_without_streaming() {
    let (state, extractor) = test_state(Script::Candidates(vec!["John 3:16"]));
    let response = create_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/stream")
                .header("content-type", "application/json")
                .body(Body::from(r#"{ "text": "missing the other fields" }"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid request body"));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cached_context_carries_a_short_fragment_over_the_threshold() {
    let (state, extractor) = test_state(Script::Candidates(vec![]));
    let app = create_router(state);

    let (_, events) = post_stream(
        app.clone(),
        stream_body("Paul wrote that love is patient", "KJV"),
    )
    .await;
    assert_eq!(events, Vec::<Value>::new());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

    // Three characters on its own, but the merged window is long enough.
    let (_, events) = post_stream(app, stream_body("yes", "KJV")).await;
    assert_eq!(events, Vec::<Value>::new());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn health_reports_store_and_cache() {
    let (state, _) = test_state(Script::Candidates(vec![]));
    let response = create_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["translations"], json!(["KJV"]));
    assert_eq!(body["context_entries"], 0);
}
