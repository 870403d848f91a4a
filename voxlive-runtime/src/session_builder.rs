use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use voxlive_core::config::SessionConfig;
use voxlive_core::event::SessionEvent;
use voxlive_engine::connection::WebSocketConnector;
use voxlive_engine::session::{SessionHandle, StreamingSession};
use voxlive_engine::traits::AudioSink;
use voxlive_providers::gemini_live::{build_live_ws_url, redact_url};

use crate::config_store::ConfigStore;
use crate::defaults::apply_env_overrides;
use crate::secrets::{SecretKey, get_secret, resolve_api_key};
use crate::transcription::GeminiTranscriptionProvider;

/// Stored config (or defaults) with environment overrides applied.
pub fn load_session_config(store: &ConfigStore) -> anyhow::Result<SessionConfig> {
    let mut cfg = store.load_or_default()?;
    apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
    Ok(cfg)
}

/// `GEMINI_API_KEY`, then the OS keyring.
pub fn load_api_key() -> anyhow::Result<String> {
    resolve_api_key(|k| std::env::var(k).ok(), || get_secret(SecretKey::GeminiApiKey)).ok_or_else(
        || anyhow!("missing Gemini API key: set GEMINI_API_KEY or store it in the keyring"),
    )
}

/// Wire a live session to the real websocket transport and transcription service.
///
/// Must be called from within a tokio runtime. The session is idle until `connect`.
pub async fn build_live_session(
    cfg: &SessionConfig,
    api_key: &str,
    sink: Box<dyn AudioSink>,
) -> anyhow::Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)> {
    let url = build_live_ws_url(&cfg.ws_url, api_key)?;
    log::info!("live endpoint: {}", redact_url(&url));
    log::info!(
        "model={} transcription_model={}",
        cfg.model,
        cfg.transcription_model
    );

    let connector = Arc::new(WebSocketConnector::new(cfg.connect_timeout()));
    let transcriber = Arc::new(GeminiTranscriptionProvider::from_session_config(cfg, api_key));

    Ok(StreamingSession::spawn(
        cfg,
        url.as_str(),
        connector,
        sink,
        transcriber,
    ))
}
