use futures_util::FutureExt;
use voxlive_core::types::PlaybackUnit;
use voxlive_engine::traits::{AudioSink, PlaybackCompletion, PlaybackError};

/// Device-less sink: a unit "plays" for exactly its real-time duration.
///
/// Keeps the playback scheduler's pacing and burst notifications meaningful on
/// machines without an output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockSink;

impl AudioSink for ClockSink {
    fn start(&mut self, unit: &PlaybackUnit) -> Result<PlaybackCompletion, PlaybackError> {
        if unit.samples.is_empty() {
            return Err(PlaybackError::EmptyUnit);
        }
        Ok(tokio::time::sleep(unit.duration()).boxed())
    }
}
