use voxlive_core::config::SessionConfig;
use voxlive_engine::traits::{TranscriptionError, TranscriptionProvider};
use voxlive_providers::gemini_transcribe::{GeminiTranscribeConfig, build_transcription_request};
use voxlive_providers::parse::{GenerateContentError, parse_generate_content_text};

/// Transcribes a finished turn with a single `generateContent` call.
#[derive(Clone)]
pub struct GeminiTranscriptionProvider {
    cfg: GeminiTranscribeConfig,
}

impl std::fmt::Debug for GeminiTranscriptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTranscriptionProvider")
            .field("base_url", &self.cfg.base_url)
            .field("model", &self.cfg.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl GeminiTranscriptionProvider {
    pub fn new(cfg: GeminiTranscribeConfig) -> Self {
        Self { cfg }
    }

    pub fn from_session_config(cfg: &SessionConfig, api_key: impl Into<String>) -> Self {
        Self::new(GeminiTranscribeConfig {
            base_url: cfg.transcription_base_url.clone(),
            api_key: api_key.into(),
            model: cfg.transcription_model.clone(),
            prompt: cfg.transcription_prompt.clone(),
        })
    }
}

#[async_trait::async_trait]
impl TranscriptionProvider for GeminiTranscriptionProvider {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, TranscriptionError> {
        if self.cfg.api_key.trim().is_empty() {
            return Err(TranscriptionError::MissingApiKey);
        }

        let req = build_transcription_request(&self.cfg, audio, mime_type);
        let resp = voxlive_providers::runtime::execute(&req)
            .await
            .map_err(|e| TranscriptionError::Request(format!("{e:#}")))?;
        if !resp.is_success() {
            return Err(TranscriptionError::Status {
                status: resp.status,
                body: resp.body_snippet(512),
            });
        }

        let text = parse_generate_content_text(&resp.body).map_err(|e| match e {
            GenerateContentError::NoText => TranscriptionError::EmptyResponse,
            other => TranscriptionError::Decode(other.to_string()),
        })?;
        log::debug!("transcription: {} chars", text.len());
        Ok(text.trim().to_string())
    }
}
