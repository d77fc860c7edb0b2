pub mod cli;
mod context_cache;
mod extraction;
mod scripture;
mod server;

pub use context_cache::{
    start_sweep_task, ContextCache, ContextEntry, DEFAULT_CONTEXT_WINDOW, SWEEP_INTERVAL,
};
pub use extraction::{
    build_extraction_prompt, parse_candidates, strip_code_fences, CandidateMatch, ExtractionError,
    GeminiExtractor, ReferenceExtractor,
};
pub use scripture::{
    expand_verse_range, BibleData, Resolution, Translation, TranslationStore,
    INVALID_VERSION_MESSAGE, NOT_FOUND_MESSAGE,
};
pub use server::{
    create_router, AppState, Server, StreamEvent, StreamRequest, DEFAULT_EMIT_DELAY,
    DEFAULT_MIN_CHUNK_LENGTH, PARSE_FAILURE_MESSAGE, PROCESSING_FAILURE_MESSAGE,
};
