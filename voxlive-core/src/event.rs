use std::time::Duration;

use crate::types::{ConnectionState, MessageKind};

/// Everything a session reports to its owner.
///
/// Failures inside audio processing are contained; the only failure that is
/// surfaced is a transcription that did not produce text.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    SetupComplete,
    MessageReceived(MessageKind),
    AudioFragment { mime_type: String, len: usize },
    TextReceived(String),
    PlayingStateChanged(bool),
    AudioLevel(f32),
    TranscriptionReady(String),
    TranscriptionFailed(String),
    Reconnecting { attempt: u32, delay: Duration },
}
