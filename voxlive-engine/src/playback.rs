use std::collections::VecDeque;

use futures_util::future;
use voxlive_core::codec::{DecodeError, decode_base64_pcm16};
use voxlive_core::event::SessionEvent;
use voxlive_core::types::{InboundAudioFragment, PlaybackUnit, SessionId};

use crate::traits::{AudioSink, EventSender, PlaybackCompletion};

/// Strictly sequential playback of decoded fragments.
///
/// At most one unit is handed to the sink at a time. The playing-state
/// notification is per burst: `true` when the first unit of a burst starts,
/// `false` once the last one finishes with nothing left queued.
pub struct PlaybackScheduler {
    id: SessionId,
    sample_rate_hz: u32,
    sink: Box<dyn AudioSink>,
    queue: VecDeque<PlaybackUnit>,
    current: Option<PlaybackCompletion>,
    playing: bool,
    events: EventSender,
}

impl PlaybackScheduler {
    pub fn new(
        id: SessionId,
        sample_rate_hz: u32,
        sink: Box<dyn AudioSink>,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            sample_rate_hz,
            sink,
            queue: VecDeque::new(),
            current: None,
            playing: false,
            events,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Decode and append a fragment, then start it if the sink is idle.
    pub fn enqueue(&mut self, fragment: &InboundAudioFragment) -> Result<(), DecodeError> {
        let samples = decode_base64_pcm16(&fragment.base64_payload)?;
        self.queue
            .push_back(PlaybackUnit::new(samples, self.sample_rate_hz));
        self.pump();
        Ok(())
    }

    /// Resolves when the active unit finishes. Pending forever when idle.
    pub async fn wait_current(&mut self) {
        match self.current.as_mut() {
            Some(f) => f.await,
            None => future::pending::<()>().await,
        }
        self.current = None;
    }

    pub fn on_unit_finished(&mut self) {
        self.pump();
    }

    fn pump(&mut self) {
        while self.current.is_none() {
            let Some(unit) = self.queue.pop_front() else {
                break;
            };

            let _ = self.events.send(SessionEvent::AudioLevel(unit.level));
            match self.sink.start(&unit) {
                Ok(done) => {
                    self.current = Some(done);
                    if !self.playing {
                        self.playing = true;
                        let _ = self.events.send(SessionEvent::PlayingStateChanged(true));
                    }
                }
                Err(e) => {
                    log::warn!("[{}] skipping playback unit: {e}", self.id);
                }
            }
        }

        if self.current.is_none() && self.playing {
            self.playing = false;
            self.sink.idle();
            let _ = self.events.send(SessionEvent::PlayingStateChanged(false));
        }
    }
}
