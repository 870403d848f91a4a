use std::sync::Arc;

use tokio::sync::mpsc;
use voxlive_core::codec::{build_container, decode_base64, pcm16_bytes_to_samples};
use voxlive_core::config::CONTAINER_MIME_TYPE;
use voxlive_core::event::SessionEvent;
use voxlive_core::types::SessionId;

use crate::traits::{EventSender, TranscriptionProvider};

/// Collects one turn's raw fragments and hands the whole turn to transcription.
///
/// Finished turns are transcribed one at a time by a worker task, so results
/// are reported in turn order even when an earlier call is slower.
pub struct TurnAccumulator {
    id: SessionId,
    sample_rate_hz: u32,
    fragments: Vec<String>,
    jobs: mpsc::UnboundedSender<Vec<u8>>,
}

impl TurnAccumulator {
    /// Spawns the transcription worker; must be called inside a tokio runtime.
    pub fn new(
        id: SessionId,
        sample_rate_hz: u32,
        transcriber: Arc<dyn TranscriptionProvider>,
        events: EventSender,
    ) -> Self {
        let (jobs, job_rx) = mpsc::unbounded_channel();
        tokio::spawn(transcription_worker(id, transcriber, job_rx, events));
        Self {
            id,
            sample_rate_hz,
            fragments: Vec::new(),
            jobs,
        }
    }

    pub fn append(&mut self, base64_payload: &str) {
        self.fragments.push(base64_payload.to_string());
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Drop the open turn without transcribing it.
    pub fn discard(&mut self) {
        if !self.fragments.is_empty() {
            log::debug!(
                "[{}] discarding open turn ({} fragments)",
                self.id,
                self.fragments.len()
            );
        }
        self.fragments.clear();
    }

    /// Close the turn and queue it for transcription. The buffer is empty on
    /// return. Returns false when there was nothing to transcribe.
    pub fn on_turn_complete(&mut self) -> bool {
        if self.fragments.is_empty() {
            return false;
        }

        let fragments = std::mem::take(&mut self.fragments);
        let container = assemble_turn(self.id, &fragments, self.sample_rate_hz);
        log::info!(
            "[{}] turn complete: {} fragments, {} bytes",
            self.id,
            fragments.len(),
            container.len()
        );

        if self.jobs.send(container).is_err() {
            log::error!("[{}] transcription worker is gone; turn dropped", self.id);
            return false;
        }
        true
    }
}

async fn transcription_worker(
    id: SessionId,
    transcriber: Arc<dyn TranscriptionProvider>,
    mut jobs: mpsc::UnboundedReceiver<Vec<u8>>,
    events: EventSender,
) {
    while let Some(container) = jobs.recv().await {
        match transcriber.transcribe(&container, CONTAINER_MIME_TYPE).await {
            Ok(text) => {
                let _ = events.send(SessionEvent::TranscriptionReady(text));
            }
            Err(e) => {
                log::warn!("[{id}] transcription failed: {e}");
                let _ = events.send(SessionEvent::TranscriptionFailed(e.to_string()));
            }
        }
    }
    log::debug!("[{id}] transcription worker stopped");
}

/// Concatenate fragment bytes in arrival order and wrap them in one container.
fn assemble_turn(id: SessionId, fragments: &[String], sample_rate_hz: u32) -> Vec<u8> {
    let mut pcm = Vec::new();
    for (i, f) in fragments.iter().enumerate() {
        match decode_base64(f) {
            Ok(bytes) => pcm.extend_from_slice(&bytes),
            Err(e) => log::warn!("[{id}] dropping fragment {i} from turn: {e}"),
        }
    }
    if pcm.len() % 2 != 0 {
        log::warn!("[{id}] turn audio has a trailing odd byte; truncating");
    }
    build_container(&pcm16_bytes_to_samples(&pcm), sample_rate_hz)
}
