use anyhow::Context;
use rubato::Resampler;

fn sinc_params() -> rubato::SincInterpolationParameters {
    rubato::SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: rubato::WindowFunction::BlackmanHarris2,
    }
}

/// Incremental resampler for audio that arrives in arbitrary block sizes.
///
/// One instance carries filter state across blocks, so consecutive blocks join
/// without a seam. Input is buffered until a full resampler chunk is available;
/// `flush` emits the remainder and the filter tail and starts a new stream.
/// The filter delay is trimmed, so a stream of `n` input samples yields
/// `round(n * ratio)` output samples in total.
pub struct StreamResampler {
    inner: Option<rubato::SincFixedIn<f32>>,
    ratio: f64,
    pending: Vec<f32>,
    skip: usize,
    consumed: usize,
    produced: usize,
}

impl StreamResampler {
    pub fn new(
        input_sample_rate_hz: u32,
        target_sample_rate_hz: u32,
        chunk_frames: usize,
    ) -> anyhow::Result<Self> {
        if input_sample_rate_hz == target_sample_rate_hz {
            return Ok(Self {
                inner: None,
                ratio: 1.0,
                pending: Vec::new(),
                skip: 0,
                consumed: 0,
                produced: 0,
            });
        }
        if input_sample_rate_hz == 0 || target_sample_rate_hz == 0 || chunk_frames == 0 {
            anyhow::bail!("invalid resampler parameters");
        }

        let ratio = target_sample_rate_hz as f64 / input_sample_rate_hz as f64;
        let inner = rubato::SincFixedIn::<f32>::new(ratio, 2.0, sinc_params(), chunk_frames, 1)
            .context("create stream resampler")?;

        Ok(Self {
            skip: inner.output_delay(),
            inner: Some(inner),
            ratio,
            pending: Vec::with_capacity(chunk_frames * 2),
            consumed: 0,
            produced: 0,
        })
    }

    pub fn push(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.consumed += samples.len();
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let need = resampler.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..need).collect();
            let res = resampler.process(&[chunk], None).context("resample")?;
            if let Some(ch) = res.into_iter().next() {
                out.extend(ch);
            }
        }
        Ok(self.trim_delay(out))
    }

    /// Emit everything still held back and reset for an unrelated stream.
    pub fn flush(&mut self) -> anyhow::Result<Vec<f32>> {
        if self.inner.is_none() || self.consumed == 0 {
            return Ok(Vec::new());
        }

        let expected = (self.consumed as f64 * self.ratio).round() as usize;
        let mut out = Vec::new();
        if let Some(resampler) = self.inner.as_mut() {
            let rest = [std::mem::take(&mut self.pending)];
            let mut res = resampler
                .process_partial(Some(&rest[..]), None)
                .context("resample remainder")?;
            out.extend(res.pop().unwrap_or_default());
        }
        let mut out = self.trim_delay(out);

        // Zero-fed rounds push the filter tail out.
        let mut rounds = 0;
        while self.produced < expected && rounds < 16 {
            let Some(resampler) = self.inner.as_mut() else {
                break;
            };
            let mut res = resampler
                .process_partial::<Vec<f32>>(None, None)
                .context("resample tail")?;
            let tail = self.trim_delay(res.pop().unwrap_or_default());
            out.extend(tail);
            rounds += 1;
        }

        // `produced` counts what was emitted, so cut the overshoot.
        let over = self.produced.saturating_sub(expected);
        out.truncate(out.len().saturating_sub(over));

        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
            self.skip = resampler.output_delay();
        }
        self.consumed = 0;
        self.produced = 0;
        Ok(out)
    }

    fn trim_delay(&mut self, mut out: Vec<f32>) -> Vec<f32> {
        let cut = self.skip.min(out.len());
        out.drain(..cut);
        self.skip -= cut;
        self.produced += out.len();
        out
    }
}
