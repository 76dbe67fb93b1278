//! # Mel Filter Bank Module
//!
//! Builds a bank of overlapping triangular filters spaced evenly on the mel
//! scale and applies it to a power spectrum.
//!
//! ## Features
//! - `num_filters + 2` edge points evenly spaced in mel space
//! - Triangles ramp linearly in FFT bin space
//! - Minimum edge width of 1.5 bins so neighbouring filters always share bins
//! - Sparse application over each filter's non-zero support

use std::ops::Range;

use crate::error::{Result, SpectroError};
use crate::mel::mel_spaced_frequencies;

/// Narrowest allowed distance, in bins, between a triangle's center and either edge.
const MIN_EDGE_BINS: f32 = 1.5;

#[derive(Debug, Clone)]
struct TriangleFilter {
    weights: Vec<f32>,
    support: Range<usize>,
}

/// Immutable set of triangular mel filters for one FFT configuration.
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    sample_rate: u32,
    fft_size: usize,
    filters: Vec<TriangleFilter>,
    center_frequencies: Vec<f32>,
}

impl MelFilterBank {
    /// Builds the filter bank.
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate of the analysed audio in Hz
    /// * `fft_size` - FFT length; the bank consumes `fft_size / 2 + 1` bins
    /// * `num_filters` - Number of mel bands
    /// * `min_freq` / `max_freq` - Frequency range covered by the bank in Hz
    ///
    /// # Errors
    /// * `Configuration` - if any parameter is out of range
    pub fn new(
        sample_rate: u32,
        fft_size: usize,
        num_filters: usize,
        min_freq: f32,
        max_freq: f32,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(SpectroError::config("sample rate must be positive"));
        }
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(SpectroError::config(format!(
                "filter bank FFT size must be a power of two >= 2, got {fft_size}"
            )));
        }
        if num_filters == 0 {
            return Err(SpectroError::config("filter bank needs at least one filter"));
        }
        let nyquist = sample_rate as f32 / 2.0;
        if !(min_freq >= 0.0 && min_freq < max_freq && max_freq <= nyquist) {
            return Err(SpectroError::config(format!(
                "frequency range [{min_freq}, {max_freq}] must satisfy 0 <= min < max <= {nyquist}"
            )));
        }

        let num_bins = fft_size / 2 + 1;
        let hz_per_bin = sample_rate as f32 / fft_size as f32;
        let edges = mel_spaced_frequencies(min_freq, max_freq, num_filters + 2);
        let edge_bins: Vec<f32> = edges.iter().map(|f| f / hz_per_bin).collect();

        let filters = edge_bins
            .windows(3)
            .map(|w| build_triangle(w[0], w[1], w[2], num_bins))
            .collect();

        Ok(Self {
            sample_rate,
            fft_size,
            filters,
            center_frequencies: edges[1..=num_filters].to_vec(),
        })
    }

    /// Applies every filter to a power spectrum.
    ///
    /// # Arguments
    /// * `power` - Power spectrum with `fft_size / 2 + 1` bins
    ///
    /// # Returns
    /// * `Ok(energies)` - One weighted sum per filter
    /// * `Err(SizeMismatch)` - if the spectrum has the wrong length
    pub fn apply(&self, power: &[f32]) -> Result<Vec<f32>> {
        let mut out = vec![0.0; self.filters.len()];
        self.apply_into(power, &mut out)?;
        Ok(out)
    }

    /// Allocation-free variant of [`apply`](Self::apply).
    pub fn apply_into(&self, power: &[f32], out: &mut [f32]) -> Result<()> {
        if power.len() != self.num_bins() {
            return Err(SpectroError::SizeMismatch {
                expected: self.num_bins(),
                actual: power.len(),
            });
        }
        if out.len() != self.filters.len() {
            return Err(SpectroError::SizeMismatch {
                expected: self.filters.len(),
                actual: out.len(),
            });
        }

        for (energy, filter) in out.iter_mut().zip(self.filters.iter()) {
            let range = filter.support.clone();
            *energy = filter.weights[range.clone()]
                .iter()
                .zip(&power[range])
                .map(|(w, p)| w * p)
                .sum();
        }
        Ok(())
    }

    /// Weights of filter `index` over all `fft_size / 2 + 1` bins.
    pub fn filter(&self, index: usize) -> Option<&[f32]> {
        self.filters.get(index).map(|f| f.weights.as_slice())
    }

    pub fn num_filters(&self) -> usize {
        self.filters.len()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of spectrum bins the bank expects.
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Center frequency of each filter in Hz, lowest first.
    pub fn center_frequencies(&self) -> &[f32] {
        &self.center_frequencies
    }
}

fn build_triangle(left: f32, center: f32, right: f32, num_bins: usize) -> TriangleFilter {
    let left = left.min(center - MIN_EDGE_BINS);
    let right = right.max(center + MIN_EDGE_BINS);

    let mut weights = vec![0.0; num_bins];
    let mut first = None;
    let mut last = 0;
    for (bin, weight) in weights.iter_mut().enumerate() {
        let k = bin as f32;
        let w = if k > left && k <= center {
            (k - left) / (center - left)
        } else if k > center && k < right {
            (right - k) / (right - center)
        } else {
            0.0
        };
        if w > 0.0 {
            *weight = w;
            first.get_or_insert(bin);
            last = bin;
        }
    }

    let support = match first {
        Some(first) => first..last + 1,
        None => 0..0,
    };
    TriangleFilter { weights, support }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares_nonzero_bin(a: &[f32], b: &[f32]) -> bool {
        a.iter().zip(b.iter()).any(|(x, y)| *x > 0.0 && *y > 0.0)
    }

    #[test]
    fn adjacent_filters_overlap_for_many_configs() {
        let configs = [
            (32000, 1024, 64, 20.0, 8000.0),
            (16000, 512, 40, 0.0, 8000.0),
            (44100, 2048, 128, 20.0, 22050.0),
            (8000, 256, 80, 50.0, 4000.0),
            (48000, 64, 32, 100.0, 1000.0),
            (22050, 4, 3, 0.0, 11025.0),
        ];
        for (sr, fft, n, lo, hi) in configs {
            let bank = MelFilterBank::new(sr, fft, n, lo, hi).unwrap();
            assert_eq!(bank.num_filters(), n);
            for i in 0..n - 1 {
                let a = bank.filter(i).unwrap();
                let b = bank.filter(i + 1).unwrap();
                assert!(
                    shares_nonzero_bin(a, b),
                    "filters {i} and {} do not overlap for {sr}/{fft}/{n}",
                    i + 1
                );
            }
        }
    }

    #[test]
    fn filters_have_expected_shape() {
        let bank = MelFilterBank::new(32000, 1024, 64, 20.0, 8000.0).unwrap();
        for i in 0..bank.num_filters() {
            let weights = bank.filter(i).unwrap();
            assert_eq!(weights.len(), 513);
            assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
            assert!(weights.iter().any(|&w| w > 0.0), "filter {i} is empty");
        }
        assert!(bank.filter(64).is_none());
    }

    #[test]
    fn center_frequencies_increase_within_range() {
        let bank = MelFilterBank::new(32000, 1024, 64, 20.0, 8000.0).unwrap();
        let centers = bank.center_frequencies();
        assert_eq!(centers.len(), 64);
        assert!(centers.windows(2).all(|w| w[1] > w[0]));
        assert!(centers[0] > 20.0);
        assert!(centers[63] < 8000.0);
    }

    #[test]
    fn covers_every_bin_between_first_and_last_center() {
        let bank = MelFilterBank::new(32000, 1024, 64, 20.0, 8000.0).unwrap();
        let hz_per_bin = 32000.0 / 1024.0;
        let first = (bank.center_frequencies()[0] / hz_per_bin).ceil() as usize;
        let last = (bank.center_frequencies()[63] / hz_per_bin).floor() as usize;
        for bin in first..=last {
            let covered = (0..64).any(|i| bank.filter(i).unwrap()[bin] > 0.0);
            assert!(covered, "bin {bin} not covered");
        }
    }

    #[test]
    fn apply_rejects_wrong_length() {
        let bank = MelFilterBank::new(32000, 1024, 64, 20.0, 8000.0).unwrap();
        let err = bank.apply(&vec![1.0; 512]).unwrap_err();
        assert!(matches!(
            err,
            SpectroError::SizeMismatch {
                expected: 513,
                actual: 512
            }
        ));
    }

    #[test]
    fn apply_matches_dense_dot_product() {
        let bank = MelFilterBank::new(16000, 256, 20, 0.0, 8000.0).unwrap();
        let power: Vec<f32> = (0..129).map(|i| (i % 7) as f32 + 0.5).collect();
        let energies = bank.apply(&power).unwrap();
        for (i, energy) in energies.iter().enumerate() {
            let dense: f32 = bank
                .filter(i)
                .unwrap()
                .iter()
                .zip(power.iter())
                .map(|(w, p)| w * p)
                .sum();
            assert!((energy - dense).abs() < 1e-3);
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(MelFilterBank::new(0, 1024, 64, 20.0, 8000.0).is_err());
        assert!(MelFilterBank::new(32000, 1000, 64, 20.0, 8000.0).is_err());
        assert!(MelFilterBank::new(32000, 1, 64, 20.0, 8000.0).is_err());
        assert!(MelFilterBank::new(32000, 1024, 0, 20.0, 8000.0).is_err());
        assert!(MelFilterBank::new(32000, 1024, 64, 8000.0, 20.0).is_err());
        assert!(MelFilterBank::new(32000, 1024, 64, -1.0, 8000.0).is_err());
        assert!(MelFilterBank::new(32000, 1024, 64, 20.0, 16001.0).is_err());
    }
}
