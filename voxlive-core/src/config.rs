use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";
pub const DEFAULT_TRANSCRIPTION_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gemini-2.5-flash-8b";
pub const DEFAULT_TRANSCRIPTION_PROMPT: &str = "Please transcribe the spoken language in this audio accurately. Ignore any background noise or non-speech sounds.";

pub const OUTPUT_SAMPLE_RATE_HZ: u32 = 24_000;
pub const INPUT_SAMPLE_RATE_HZ: u32 = 16_000;
pub const INPUT_MIME_TYPE: &str = "audio/pcm";
pub const CONTAINER_MIME_TYPE: &str = "audio/wav";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ws_url: String,
    pub model: String,
    pub response_modality: String,

    pub output_sample_rate_hz: u32,
    pub input_sample_rate_hz: u32,
    pub input_mime_type: String,

    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,

    pub transcription_base_url: String,
    pub transcription_model: String,
    pub transcription_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.into(),
            model: DEFAULT_MODEL.into(),
            response_modality: "AUDIO".into(),
            output_sample_rate_hz: OUTPUT_SAMPLE_RATE_HZ,
            input_sample_rate_hz: INPUT_SAMPLE_RATE_HZ,
            input_mime_type: INPUT_MIME_TYPE.into(),
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
            transcription_base_url: DEFAULT_TRANSCRIPTION_BASE_URL.into(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.into(),
            transcription_prompt: DEFAULT_TRANSCRIPTION_PROMPT.into(),
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
