/// Re-blocks a sample stream into fixed-length upload frames.
#[derive(Debug, Clone)]
pub struct FrameChunker {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(sample_rate_hz: u32, frame_ms: u32) -> Self {
        let frame_len = (sample_rate_hz as u64 * frame_ms as u64 / 1000).max(1) as usize;
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Append samples and return every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Take whatever partial frame is left.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
