//! # Fast Fourier Transform (FFT) Module
//!
//! This module provides the fixed-size FFT used by the spectrogram pipeline.
//! It handles the forward transform, Hann windowing, and power spectrum
//! calculation for real-valued audio frames.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per engine
//! - Hann windowing for reduced spectral leakage
//! - Power spectrum normalised by the frame length
//! - Allocation-free hot path for real-time processing

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{Result, SpectroError};

/// Generates the symmetric Hann window coefficients for `n` samples.
///
/// `w[i] = 0.5 * (1 - cos(2*pi*i / (n - 1)))`, so both end points are zero.
/// A single-sample window is the identity.
pub fn hann_coefficients(n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let n_minus_1 = (n - 1) as f32;
            (0..n)
                .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
                .collect()
        }
    }
}

/// Fixed-size forward FFT over real input.
///
/// The transform plan, the Hann window and the complex scratch buffers are all
/// created once at construction, so the `_into` methods never allocate.
pub struct FftEngine {
    size: usize,
    plan: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FftEngine {
    /// Creates an engine for frames of `size` samples.
    ///
    /// # Errors
    /// * `Configuration` - if `size` is zero or not a power of two
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(SpectroError::config(format!(
                "FFT size must be a positive power of two, got {size}"
            )));
        }

        let mut planner = FftPlanner::new();
        let plan = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); plan.get_inplace_scratch_len()];

        Ok(Self {
            size,
            plan,
            window: hann_coefficients(size),
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
        })
    }

    /// Frame length in samples.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of bins in a power spectrum (`size / 2 + 1`).
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// The precomputed Hann window.
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual != self.size {
            return Err(SpectroError::SizeMismatch {
                expected: self.size,
                actual,
            });
        }
        Ok(())
    }

    /// Performs a forward FFT on a real signal and returns the full complex spectrum.
    ///
    /// # Arguments
    /// * `input` - Real samples, exactly `size` long
    ///
    /// # Returns
    /// * `Ok(spectrum)` - `size` complex bins
    /// * `Err(SizeMismatch)` - if the input length differs from the engine size
    pub fn forward_transform(&mut self, input: &[f32]) -> Result<Vec<Complex<f32>>> {
        self.check_len(input.len())?;
        self.transform_in_place(input, false);
        Ok(self.buffer.clone())
    }

    /// Computes `|FFT(x)|^2 / N` for bins `0..=N/2`.
    ///
    /// Bin 0 is DC and bin `N/2` is Nyquist. Every value is non-negative.
    pub fn power_spectrum(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.check_len(input.len())?;
        let mut out = vec![0.0; self.num_bins()];
        self.transform_in_place(input, false);
        self.write_power(&mut out);
        Ok(out)
    }

    /// Multiplies the input by the Hann window.
    pub fn hann_window(&self, input: &[f32]) -> Result<Vec<f32>> {
        self.check_len(input.len())?;
        Ok(input
            .iter()
            .zip(self.window.iter())
            .map(|(x, w)| x * w)
            .collect())
    }

    /// `power_spectrum(hann_window(x))`.
    pub fn windowed_power_spectrum(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let mut out = vec![0.0; self.num_bins()];
        self.windowed_power_spectrum_into(input, &mut out)?;
        Ok(out)
    }

    /// Allocation-free variant of [`windowed_power_spectrum`](Self::windowed_power_spectrum).
    ///
    /// # Arguments
    /// * `input` - Real samples, exactly `size` long
    /// * `out` - Destination, exactly `size / 2 + 1` long
    pub fn windowed_power_spectrum_into(&mut self, input: &[f32], out: &mut [f32]) -> Result<()> {
        self.check_len(input.len())?;
        if out.len() != self.num_bins() {
            return Err(SpectroError::SizeMismatch {
                expected: self.num_bins(),
                actual: out.len(),
            });
        }
        self.transform_in_place(input, true);
        self.write_power(out);
        Ok(())
    }

    fn transform_in_place(&mut self, input: &[f32], windowed: bool) {
        if windowed {
            for ((slot, &x), &w) in self.buffer.iter_mut().zip(input).zip(self.window.iter()) {
                *slot = Complex::new(x * w, 0.0);
            }
        } else {
            for (slot, &x) in self.buffer.iter_mut().zip(input) {
                *slot = Complex::new(x, 0.0);
            }
        }
        self.plan
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
    }

    fn write_power(&self, out: &mut [f32]) {
        let n = self.size as f32;
        for (dst, c) in out.iter_mut().zip(self.buffer.iter()) {
            *dst = c.norm_sqr() / n;
        }
    }
}

impl std::fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftEngine").field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_sizes() {
        for size in [0, 3, 100, 1000] {
            assert!(matches!(
                FftEngine::new(size),
                Err(SpectroError::Configuration(_))
            ));
        }
        assert!(FftEngine::new(1).is_ok());
        assert!(FftEngine::new(1024).is_ok());
    }

    #[test]
    fn forward_transform_checks_length() {
        let mut fft = FftEngine::new(8).unwrap();
        let err = fft.forward_transform(&[0.0; 7]).unwrap_err();
        assert!(matches!(
            err,
            SpectroError::SizeMismatch {
                expected: 8,
                actual: 7
            }
        ));
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut fft = FftEngine::new(16).unwrap();
        let mut impulse = vec![0.0; 16];
        impulse[0] = 1.0;
        let spectrum = fft.forward_transform(&impulse).unwrap();
        assert_eq!(spectrum.len(), 16);
        for bin in spectrum {
            assert!((bin.re - 1.0).abs() < 1e-6);
            assert!(bin.im.abs() < 1e-6);
        }
    }

    #[test]
    fn power_spectrum_shape_and_sign() {
        let mut fft = FftEngine::new(256).unwrap();
        let signal: Vec<f32> = (0..256)
            .map(|i| (i as f32 * 0.37).sin() - 0.3 * (i as f32 * 1.91).cos())
            .collect();
        let power = fft.power_spectrum(&signal).unwrap();
        assert_eq!(power.len(), 129);
        assert!(power.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn dc_signal_lands_in_bin_zero() {
        let mut fft = FftEngine::new(64).unwrap();
        let power = fft.power_spectrum(&[1.0; 64]).unwrap();
        // |64|^2 / 64
        assert!((power[0] - 64.0).abs() < 1e-3);
        assert!(power[1..].iter().all(|&p| p < 1e-6));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let n = 1024;
        let sample_rate = 32000.0;
        let freq = 1000.0; // exactly bin 32
        let signal: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();
        let mut fft = FftEngine::new(n).unwrap();
        let power = fft.windowed_power_spectrum(&signal).unwrap();
        let peak = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 32);
    }

    #[test]
    fn hann_window_has_zero_ends() {
        let window = hann_coefficients(1024);
        assert_eq!(window[0], 0.0);
        assert!(window[1023].abs() < 1e-6);
        assert!(window.iter().all(|&w| (0.0..=1.0).contains(&w)));
        assert_eq!(hann_coefficients(1), vec![1.0]);
    }

    #[test]
    fn windowed_path_matches_composition() {
        let mut fft = FftEngine::new(32).unwrap();
        let signal: Vec<f32> = (0..32).map(|i| ((i * 7) % 5) as f32 - 2.0).collect();
        let windowed = fft.hann_window(&signal).unwrap();
        let composed = fft.power_spectrum(&windowed).unwrap();
        let direct = fft.windowed_power_spectrum(&signal).unwrap();
        for (a, b) in composed.iter().zip(direct.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn into_variant_checks_output_length() {
        let mut fft = FftEngine::new(16).unwrap();
        let mut out = vec![0.0; 8];
        assert!(fft.windowed_power_spectrum_into(&[0.0; 16], &mut out).is_err());
    }
}
