/// Loudness level for UI metering, in [0, 100].
///
/// Mean absolute sample value scaled by 500 and capped. An empty buffer is silent.
pub fn audio_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    let mean = sum / samples.len() as f32;
    (mean * 500.0).min(100.0)
}
