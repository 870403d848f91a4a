use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use voxlive_core::event::SessionEvent;
use voxlive_core::types::PlaybackUnit;
use voxlive_providers::websocket::TransportLink;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Resolves when the device has finished playing a unit.
pub type PlaybackCompletion = BoxFuture<'static, ()>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("outbound queue full; message dropped")]
    Backpressure,

    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptionError {
    #[error("transcription request failed: {0}")]
    Request(String),

    #[error("transcription failed: status={status} body={body}")]
    Status { status: u16, body: String },

    #[error("transcription response had no text")]
    EmptyResponse,

    #[error("decode transcription response: {0}")]
    Decode(String),

    #[error("missing API key")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("playback unit has no samples")]
    EmptyUnit,

    #[error("audio device error: {0}")]
    Device(String),
}

/// Opens transports to the service.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}

/// Turns a complete audio container into text.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, TranscriptionError>;
}

/// Audio output owned by one session's playback scheduler.
pub trait AudioSink: Send {
    /// Begin playing `unit`. At most one unit is active at a time.
    fn start(&mut self, unit: &PlaybackUnit) -> Result<PlaybackCompletion, PlaybackError>;

    /// The scheduler has nothing left to play. Sinks that hold audio back flush it here.
    fn idle(&mut self) {}
}
