use std::time::Duration;

use base64::Engine;
use serde_json::json;

use crate::request::JsonPost;

/// A whole turn is uploaded inline, so allow for a slow link.
pub const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, PartialEq, Eq)]
pub struct GeminiTranscribeConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,
}

impl std::fmt::Debug for GeminiTranscribeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTranscribeConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

/// Build a `generateContent` call carrying one inline audio file and the prompt.
pub fn build_transcription_request(
    cfg: &GeminiTranscribeConfig,
    audio: &[u8],
    mime_type: &str,
) -> JsonPost {
    let model = cfg.model.trim_start_matches("models/");
    let url = join_url(&cfg.base_url, &format!("/models/{model}:generateContent"));

    let data = base64::engine::general_purpose::STANDARD.encode(audio);
    let payload = json!({
        "contents": [{
            "parts": [
                { "inline_data": { "mime_type": mime_type, "data": data } },
                { "text": cfg.prompt },
            ],
        }],
    });

    JsonPost::new(url, payload.to_string(), TRANSCRIBE_TIMEOUT)
        .with_header("x-goog-api-key", cfg.api_key.clone())
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}
