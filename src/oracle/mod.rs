//! Extraction oracle — turns message text into candidate events.
//!
//! The shipped implementation sends one structured-JSON chat-completion
//! request per message. The prompt pins a response schema; anything the
//! model wraps around the JSON object (markdown fences, prose) is
//! stripped before decoding. Transport failures are retried a few times
//! with jittered backoff, then surface as transient errors so the
//! message is picked up again next run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::pipeline::types::{CandidateEvent, RejectionLevel};

/// Version of the extraction prompt/schema. Bumping this invalidates
/// event chains extracted under earlier versions.
pub const EXTRACTOR_VERSION: u32 = 1;

/// Outcome of a successful oracle call.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Zero or more candidate events found in the text.
    Events(Vec<CandidateEvent>),
    /// The text describes no extractable event.
    Rejected(RejectionLevel),
}

/// Opaque semantic extraction call.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Extractor version recorded on processed messages.
    fn version(&self) -> u32;

    /// Extract candidate events from one message.
    async fn extract(
        &self,
        subject: &str,
        body: &str,
        reference_time: DateTime<Utc>,
    ) -> Result<Extraction, OracleError>;
}

// ── LLM-backed oracle ───────────────────────────────────────────────

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Max transport attempts per extraction call.
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff between attempts, in milliseconds.
const BACKOFF_BASE_MS: u64 = 500;

/// Temperature for extraction (deterministic-ish).
const EXTRACT_TEMPERATURE: f32 = 0.1;

/// Oracle backed by the OpenAI chat-completions API.
pub struct LlmOracle {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl LlmOracle {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.into(),
        }
    }

    /// One transport round-trip, no retry.
    async fn request_once(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": EXTRACT_TEMPERATURE,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .http
            .post(OPENAI_CHAT_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::MalformedResponse("no choices in response".into()))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl ExtractionOracle for LlmOracle {
    fn version(&self) -> u32 {
        EXTRACTOR_VERSION
    }

    async fn extract(
        &self,
        subject: &str,
        body: &str,
        reference_time: DateTime<Utc>,
    ) -> Result<Extraction, OracleError> {
        let system = build_system_prompt();
        let user = build_user_prompt(subject, body, reference_time);

        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.request_once(&system, &user).await {
                Ok(raw) => {
                    debug!(attempt, "Oracle responded");
                    return parse_extraction(&raw);
                }
                Err(OracleError::Network(reason)) => {
                    warn!(attempt, %reason, "Oracle request failed");
                    last_err = Some(OracleError::Network(reason));
                    if attempt < MAX_ATTEMPTS {
                        let jitter = rand::thread_rng().gen_range(0..BACKOFF_BASE_MS / 2);
                        let delay = BACKOFF_BASE_MS * u64::from(attempt) + jitter;
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| OracleError::Network("no attempts made".into())))
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You extract campus events from broadcast emails.\n\n\
     Respond with ONLY a JSON object, one of:\n\
     {\"events\": [{\"title\": \"...\", \"starts_at\": \"RFC 3339 UTC\", \
     \"location\": \"...\", \"organizer\": \"...\", \"duration_minutes\": 0, \
     \"notes\": \"...\"}]}\n\
     {\"rejected\": \"no_event\"} — the text clearly describes no event\n\
     {\"rejected\": \"uncertain\"} — an event may be present but cannot be \
     extracted reliably\n\n\
     Rules:\n\
     - Use the reference time to resolve relative dates (\"next Thursday\")\n\
     - An event without a stated time of day starts at midnight\n\
     - Use \"unknown\" for a missing location\n\
     - Omit organizer/duration_minutes/notes when not stated"
        .to_string()
}

fn build_user_prompt(subject: &str, body: &str, reference_time: DateTime<Utc>) -> String {
    let body_preview: String = body.chars().take(4000).collect();
    format!(
        "Reference time: {}\nSubject: {}\n\nBody:\n{}",
        reference_time.to_rfc3339(),
        subject,
        body_preview
    )
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireExtraction {
    #[serde(default)]
    events: Option<Vec<WireEvent>>,
    #[serde(default)]
    rejected: Option<String>,
}

#[derive(Deserialize)]
struct WireEvent {
    title: String,
    starts_at: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    organizer: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
    #[serde(default)]
    notes: Option<String>,
}

/// Parse the model's output into an `Extraction`.
fn parse_extraction(raw: &str) -> Result<Extraction, OracleError> {
    let json = extract_json_object(raw);
    let wire: WireExtraction = serde_json::from_str(&json)
        .map_err(|e| OracleError::MalformedResponse(format!("JSON decode failed: {e}")))?;

    if let Some(level) = wire.rejected {
        return match level.as_str() {
            "no_event" => Ok(Extraction::Rejected(RejectionLevel::Definite)),
            "uncertain" => Ok(Extraction::Rejected(RejectionLevel::Uncertain)),
            other => Err(OracleError::MalformedResponse(format!(
                "unknown rejection level '{other}'"
            ))),
        };
    }

    let Some(events) = wire.events else {
        return Err(OracleError::MalformedResponse(
            "neither 'events' nor 'rejected' present".into(),
        ));
    };

    events
        .into_iter()
        .map(|e| {
            let starts_at = parse_wire_datetime(&e.starts_at).ok_or_else(|| {
                OracleError::MalformedResponse(format!("bad starts_at '{}'", e.starts_at))
            })?;
            Ok(CandidateEvent {
                title: e.title,
                starts_at,
                location: e.location.unwrap_or_else(|| "unknown".to_string()),
                organizer: e.organizer,
                duration_minutes: e.duration_minutes,
                notes: e.notes,
            })
        })
        .collect::<Result<Vec<_>, OracleError>>()
        .map(Extraction::Events)
}

/// Parse an RFC 3339 timestamp, tolerating a missing offset.
fn parse_wire_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|ndt| ndt.and_utc())
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_events_response() {
        let raw = r#"{"events": [{"title": "Guest lecture", "starts_at": "2024-03-07T18:00:00Z", "location": "Building 10", "duration_minutes": 90}]}"#;
        let Extraction::Events(events) = parse_extraction(raw).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Guest lecture");
        assert_eq!(
            events[0].starts_at,
            Utc.with_ymd_and_hms(2024, 3, 7, 18, 0, 0).unwrap()
        );
        assert_eq!(events[0].duration_minutes, Some(90));
        assert!(events[0].organizer.is_none());
    }

    #[test]
    fn parse_empty_events_list() {
        let raw = r#"{"events": []}"#;
        assert_eq!(parse_extraction(raw).unwrap(), Extraction::Events(vec![]));
    }

    #[test]
    fn parse_missing_location_defaults_to_wildcard() {
        let raw = r#"{"events": [{"title": "Picnic", "starts_at": "2024-03-09T00:00:00Z"}]}"#;
        let Extraction::Events(events) = parse_extraction(raw).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(events[0].location, "unknown");
    }

    #[test]
    fn parse_rejection_levels() {
        assert_eq!(
            parse_extraction(r#"{"rejected": "no_event"}"#).unwrap(),
            Extraction::Rejected(RejectionLevel::Definite)
        );
        assert_eq!(
            parse_extraction(r#"{"rejected": "uncertain"}"#).unwrap(),
            Extraction::Rejected(RejectionLevel::Uncertain)
        );
    }

    #[test]
    fn parse_unknown_rejection_level_is_malformed() {
        assert!(parse_extraction(r#"{"rejected": "maybe"}"#).is_err());
    }

    #[test]
    fn parse_response_wrapped_in_markdown() {
        let raw = "Sure!\n```json\n{\"rejected\": \"no_event\"}\n```";
        assert_eq!(
            parse_extraction(raw).unwrap(),
            Extraction::Rejected(RejectionLevel::Definite)
        );
    }

    #[test]
    fn parse_response_with_surrounding_text() {
        let raw = "Here is my analysis: {\"events\": []} done.";
        assert_eq!(parse_extraction(raw).unwrap(), Extraction::Events(vec![]));
    }

    #[test]
    fn parse_garbage_is_malformed() {
        assert!(parse_extraction("no json here").is_err());
        assert!(parse_extraction(r#"{"something": "else"}"#).is_err());
    }

    #[test]
    fn parse_bad_timestamp_is_malformed() {
        let raw = r#"{"events": [{"title": "x", "starts_at": "next Thursday"}]}"#;
        assert!(parse_extraction(raw).is_err());
    }

    #[test]
    fn parse_offsetless_timestamp_is_tolerated() {
        let raw = r#"{"events": [{"title": "x", "starts_at": "2024-03-07T18:00:00"}]}"#;
        let Extraction::Events(events) = parse_extraction(raw).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(
            events[0].starts_at,
            Utc.with_ymd_and_hms(2024, 3, 7, 18, 0, 0).unwrap()
        );
    }

    #[test]
    fn user_prompt_includes_reference_time_and_subject() {
        let prompt = build_user_prompt(
            "Concert",
            "Friday at the quad",
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        );
        assert!(prompt.contains("2024-03-01T09:00:00+00:00"));
        assert!(prompt.contains("Concert"));
        assert!(prompt.contains("Friday at the quad"));
    }

    #[test]
    fn user_prompt_truncates_long_bodies() {
        let body = "x".repeat(10_000);
        let prompt = build_user_prompt("s", &body, Utc::now());
        assert!(prompt.len() < 5000);
    }
}
