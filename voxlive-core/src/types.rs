use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::level::audio_level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    AwaitingSetup,
    Ready,
    Closing,
    Closed,
}

impl ConnectionState {
    /// A stable label for logs and UI display.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::AwaitingSetup => "awaiting_setup",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }

    /// States in which a transport is held (open or opening).
    pub fn has_transport(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::AwaitingSetup
                | ConnectionState::Ready
        )
    }
}

/// One captured chunk for upload. Consumed by a single send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChunk {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// One inline-audio payload from the service, still in wire (base64) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAudioFragment {
    pub base64_payload: String,
    pub mime_type: String,
}

/// One decoded fragment, the scheduler's atomic unit of playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
    pub level: f32,
}

impl PlaybackUnit {
    pub fn new(samples: Vec<f32>, sample_rate_hz: u32) -> Self {
        let level = audio_level(&samples);
        Self {
            samples,
            sample_rate_hz,
            level,
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate_hz == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate_hz as f64)
    }
}

/// Coarse classification of an inbound message, for the message-received notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    SetupComplete,
    ServerContent,
    Unknown,
}
