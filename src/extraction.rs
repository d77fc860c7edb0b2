//! Boundary adapter to the reference-extraction oracle.
//!
//! The oracle is consumed as an opaque service: one free-text prompt in,
//! one free-text reply out, expected to contain a JSON array of
//! `{ "reference": ... }` objects. Everything it returns is treated as
//! untrusted and parsed defensively.

use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// A reference proposed by the oracle, not yet validated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandidateMatch {
    pub reference: String,
}

#[derive(Debug)]
pub enum ExtractionError {
    /// The oracle round-trip itself failed (network, HTTP, reply shape).
    Oracle(anyhow::Error),
    /// The oracle answered, but the reply text is not a candidate list.
    MalformedReply { raw: String },
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::Oracle(e) => write!(f, "oracle call failed: {}", e),
            ExtractionError::MalformedReply { .. } => {
                write!(f, "oracle reply is not a candidate list")
            }
        }
    }
}

impl std::error::Error for ExtractionError {}

/// The extraction boundary. One operation, so the backing implementation
/// (hosted model, rule engine, test fake) is swappable without touching
/// the stream pipeline.
#[async_trait]
pub trait ReferenceExtractor: Send + Sync {
    async fn extract(&self, transcript: &str) -> Result<Vec<CandidateMatch>, ExtractionError>;
}

/// Gemini-backed extractor. Issues exactly one `generateContent` call per
/// inbound request.
pub struct GeminiExtractor {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiExtractor {
    pub fn new(api_key: String, model: String) -> Self {
        GeminiExtractor {
            client: Client::new(),
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }

    /// Raw oracle round-trip: prompt text in, reply text out.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response: Value = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.get("error").is_some() {
            let message = response["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(anyhow::anyhow!(message));
        }

        let text = response["candidates"]
            .get(0)
            .and_then(|candidate| candidate["content"]["parts"].get(0))
            .and_then(|part| part["text"].as_str())
            .context("failed to extract text from oracle response")?;

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl ReferenceExtractor for GeminiExtractor {
    async fn extract(&self, transcript: &str) -> Result<Vec<CandidateMatch>, ExtractionError> {
        let prompt = build_extraction_prompt(transcript);
        let reply = self
            .complete(&prompt)
            .await
            .map_err(ExtractionError::Oracle)?;
        debug!("oracle reply: {}", reply);
        parse_candidates(&reply)
    }
}

/// Builds the single extraction prompt: explicit guidance plus the fresh
/// transcript fragment. The rolling context window is kept server-side and
/// not forwarded to the oracle.
pub fn build_extraction_prompt(transcript: &str) -> String {
    format!(
        r#"Analyze this spoken text for Bible references: "{transcript}"
Consider:
1. Common speech recognition errors
2. Key biblical phrases
3. Context and meaning
4. Verse ranges (e.g., "Genesis 4:5-8" should be identified as a range)

For each match, provide:
{{ "reference": "Book Chapter:Verse" }} or {{ "reference": "Book Chapter:StartVerse-EndVerse" }}

Pay special attention to phrases like:
- "in the book of [book] chapter [X] verse [Y] to verse [Z]"
- "from [book] [chapter]:[verse] to [verse]"
- "[book] [chapter]:[verse]-[verse]"

Only return matches with high confidence. Format as JSON array."#
    )
}

/// Oracle replies often arrive wrapped in Markdown code fences.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parses a raw oracle reply into candidates, stripping fences first.
pub fn parse_candidates(raw: &str) -> Result<Vec<CandidateMatch>, ExtractionError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).map_err(|_| ExtractionError::MalformedReply {
        raw: raw.to_string(),
    })
}
