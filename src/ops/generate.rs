// ============================================================================
// GENERATION SERVICE - the remote model that repaints the masked region
// ============================================================================
//
// The editor only relies on the `GenerationService` contract: original PNG,
// mask PNG and prompt in; edited image bytes or a `ServiceError` out.
// `GeminiService` is the shipped implementation (generateContent with
// inline image parts).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::settings::AppSettings;

/// Prepended to the user's prompt so the model treats the second image as
/// an edit mask rather than a reference picture.
const EDIT_INSTRUCTION: &str = "Edit the first image. The second image is a mask of the same size: \
change only the regions that are white in the mask and keep every black region identical to \
the original. Requested change: ";

/// Finish reasons that mean the service refused on policy grounds.
const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
    "IMAGE_PROHIBITED_CONTENT",
];

#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Original image, lossless PNG at native resolution
    pub image_png: Vec<u8>,
    /// Binary mask, alpha-free PNG with the original's dimensions
    pub mask_png: Vec<u8>,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Failures reported by a generation service.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceError {
    MissingCredentials,
    Transport(String),
    /// The call succeeded but no image came back; carries any text the
    /// model returned instead.
    NoImage(String),
    /// Refused for policy reasons. `details` holds the safety
    /// classification exactly as the service reported it.
    SafetyBlocked { reason: String, details: Vec<String> },
    InvalidImage(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::MissingCredentials => write!(
                f,
                "No API key configured. Set GEMINI_API_KEY or add one in Settings."
            ),
            ServiceError::Transport(e) => write!(f, "Generation request failed: {}", e),
            ServiceError::NoImage(note) if note.is_empty() => {
                write!(f, "The service returned no image.")
            }
            ServiceError::NoImage(note) => {
                write!(f, "The service returned no image. It said: {}", note)
            }
            ServiceError::SafetyBlocked { reason, details } => {
                write!(f, "Blocked by the service's safety filter ({})", reason)?;
                if !details.is_empty() {
                    write!(f, ": {}", details.join("; "))?;
                }
                Ok(())
            }
            ServiceError::InvalidImage(e) => {
                write!(f, "The service returned an unreadable image: {}", e)
            }
        }
    }
}

impl std::error::Error for ServiceError {}

pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ServiceError>;
}

// ============================================================================
// GEMINI
// ============================================================================

pub struct GeminiService {
    api_base: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiService {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: resolve_api_key(&settings.api_key),
            timeout: Duration::from_secs(settings.request_timeout_secs),
            http: HttpClient::new(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{}", trimmed)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl GenerationService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, ServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ServiceError::MissingCredentials);
        };
        let endpoint = self.endpoint();
        crate::log_info!(
            "POST {} (image {} bytes, mask {} bytes)",
            endpoint,
            request.image_png.len(),
            request.mask_png.len()
        );

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(&build_payload(request))
            .send()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ServiceError::Transport(describe_http_error(status.as_u16(), &body)));
        }
        parse_response(&body)
    }
}

/// Settings key, unless the environment provides one.
pub fn resolve_api_key(configured: &str) -> Option<String> {
    non_empty_env("GEMINI_API_KEY")
        .or_else(|| non_empty_env("GOOGLE_API_KEY"))
        .or_else(|| {
            let key = configured.trim();
            (!key.is_empty()).then(|| key.to_string())
        })
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn build_payload(request: &GenerationRequest) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(&request.image_png) } },
                { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(&request.mask_png) } },
                { "text": format!("{}{}", EDIT_INSTRUCTION, request.prompt) },
            ],
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
        },
    })
}

// -- Response parsing ---------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
    finish_message: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
    block_reason_message: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
struct SafetyRating {
    category: String,
    probability: Option<String>,
    #[serde(default)]
    blocked: bool,
}

impl SafetyRating {
    fn is_flagged(&self) -> bool {
        self.blocked
            || !matches!(
                self.probability.as_deref(),
                None | Some("NEGLIGIBLE") | Some("LOW")
            )
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "{}: {}",
            self.category,
            self.probability.as_deref().unwrap_or("UNSPECIFIED")
        );
        if self.blocked {
            out.push_str(" (blocked)");
        }
        out
    }
}

/// Flagged ratings when there are any, otherwise every rating reported.
fn safety_details(message: Option<&str>, ratings: &[SafetyRating]) -> Vec<String> {
    let mut details: Vec<String> = message
        .filter(|m| !m.trim().is_empty())
        .map(|m| m.trim().to_string())
        .into_iter()
        .collect();
    let flagged: Vec<&SafetyRating> = ratings.iter().filter(|r| r.is_flagged()).collect();
    if flagged.is_empty() {
        details.extend(ratings.iter().map(SafetyRating::describe));
    } else {
        details.extend(flagged.into_iter().map(SafetyRating::describe));
    }
    details
}

/// Interpret a successful (2xx) response body.
pub fn parse_response(body: &str) -> Result<GeneratedImage, ServiceError> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::Transport(format!("unexpected response body: {}", e)))?;

    if let Some(feedback) = &response.prompt_feedback
        && let Some(reason) = &feedback.block_reason
    {
        return Err(ServiceError::SafetyBlocked {
            reason: reason.clone(),
            details: safety_details(
                feedback.block_reason_message.as_deref(),
                &feedback.safety_ratings,
            ),
        });
    }

    let mut texts = Vec::new();
    for candidate in &response.candidates {
        let parts = candidate.content.iter().flat_map(|c| c.parts.iter());
        for part in parts {
            if let Some(inline) = &part.inline_data
                && !inline.data.is_empty()
            {
                let bytes = BASE64
                    .decode(inline.data.as_bytes())
                    .map_err(|e| ServiceError::InvalidImage(format!("base64: {}", e)))?;
                return Ok(GeneratedImage {
                    bytes,
                    mime_type: inline.mime_type.clone(),
                });
            }
            if let Some(text) = &part.text
                && !text.trim().is_empty()
            {
                texts.push(text.trim().to_string());
            }
        }
    }

    for candidate in &response.candidates {
        if let Some(reason) = &candidate.finish_reason
            && SAFETY_FINISH_REASONS.contains(&reason.as_str())
        {
            return Err(ServiceError::SafetyBlocked {
                reason: reason.clone(),
                details: safety_details(
                    candidate.finish_message.as_deref(),
                    &candidate.safety_ratings,
                ),
            });
        }
    }

    Err(ServiceError::NoImage(texts.join(" ")))
}

/// Human-readable summary of a non-2xx response, preferring the service's
/// own `error.message`.
pub fn describe_http_error(status: u16, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match message {
        Some(m) => format!("HTTP {}: {}", status, m),
        None => {
            let snippet: String = body.trim().chars().take(200).collect();
            if snippet.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {}: {}", status, snippet)
            }
        }
    }
}
