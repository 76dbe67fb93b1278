//! # Mel Scale Module
//!
//! Conversions between linear frequency (Hz) and the perceptual mel scale.
//! The mel scale spaces pitches the way listeners perceive them, which is
//! why the filter bank places its band edges evenly in mel space.
//!
//! Uses the O'Shaughnessy formulation:
//! - `mel(f) = 2595 * log10(1 + f / 700)`
//! - `f(mel) = 700 * (10^(mel / 2595) - 1)`

const MEL_SCALE: f32 = 2595.0;
const MEL_BREAK_HZ: f32 = 700.0;

/// Converts a frequency in Hz to mels.
///
/// # Arguments
/// * `freq` - Frequency in Hz
///
/// # Returns
/// * Pitch on the mel scale (`hz_to_mel(0.0) == 0.0`)
pub fn hz_to_mel(freq: f32) -> f32 {
    MEL_SCALE * (1.0 + freq / MEL_BREAK_HZ).log10()
}

/// Converts a pitch in mels back to a frequency in Hz.
///
/// This is the exact inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f32) -> f32 {
    MEL_BREAK_HZ * (10.0_f32.powf(mel / MEL_SCALE) - 1.0)
}

/// Returns `count` points evenly spaced in mel space between two frequencies,
/// converted back to Hz. Both end points are included.
pub fn mel_spaced_frequencies(min_freq: f32, max_freq: f32, count: usize) -> Vec<f32> {
    if count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![min_freq];
    }
    let min_mel = hz_to_mel(min_freq);
    let max_mel = hz_to_mel(max_freq);
    let step = (max_mel - min_mel) / (count - 1) as f32;
    (0..count)
        .map(|i| mel_to_hz(min_mel + step * i as f32))
        .collect()
}
