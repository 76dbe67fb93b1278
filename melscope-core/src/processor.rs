//! # Spectrogram Processor Module
//!
//! Turns one fixed-size audio frame into one normalised mel spectrum.
//!
//! ## Processing chain
//! 1. Length validation
//! 2. Sample normalisation to `[-1, 1]`
//! 3. Hann window + FFT power spectrum
//! 4. Mel filter bank
//! 5. `10 * log10` compression with a `1e-10` floor
//! 6. Per-frame min-max normalisation to `[0, 1]`
//!
//! All scratch buffers are allocated at construction; a processed frame only
//! allocates its returned spectrum.

use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::color::ColorMap;
use crate::error::{Result, SpectroError};
use crate::fft::FftEngine;
use crate::filter_bank::MelFilterBank;

const LOG_FLOOR: f32 = 1e-10;
const FPS_WINDOW_FRAMES: u64 = 30;

/// Parameters of the DSP chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub num_mel_bands: usize,
    pub min_freq: f32,
    pub max_freq: f32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 32000,
            frame_size: 1024,
            hop_size: 512,
            num_mel_bands: 64,
            min_freq: 20.0,
            max_freq: 8000.0,
        }
    }
}

impl ProcessorConfig {
    /// Real-time budget for one frame: the duration of one hop, in microseconds.
    pub fn hop_budget_us(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.hop_size as f64 * 1_000_000.0 / self.sample_rate as f64
    }
}

/// Counters describing the processor's recent work.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Exponentially smoothed processing time per frame.
    pub avg_processing_time_us: f64,
    /// Frames per second the processor could sustain at the smoothed cost.
    pub throughput_fps: f64,
    /// Frames per second actually observed, refreshed every 30 frames.
    pub wall_clock_fps: f64,
}

struct DspChain {
    fft: FftEngine,
    filter_bank: MelFilterBank,
    samples: Vec<f32>,
    power: Vec<f32>,
    mel: Vec<f32>,
}

impl DspChain {
    fn build(config: &ProcessorConfig) -> Result<Self> {
        if config.hop_size == 0 || config.hop_size > config.frame_size {
            return Err(SpectroError::config(format!(
                "hop size {} must be in 1..={}",
                config.hop_size, config.frame_size
            )));
        }
        let fft = FftEngine::new(config.frame_size)?;
        let filter_bank = MelFilterBank::new(
            config.sample_rate,
            config.frame_size,
            config.num_mel_bands,
            config.min_freq,
            config.max_freq,
        )?;
        Ok(Self {
            samples: vec![0.0; config.frame_size],
            power: vec![0.0; fft.num_bins()],
            mel: vec![0.0; config.num_mel_bands],
            fft,
            filter_bank,
        })
    }
}

/// Mel spectrogram processor.
///
/// Not internally synchronised; `&mut self` serialises access.
pub struct SpectrogramProcessor {
    config: ProcessorConfig,
    chain: DspChain,
    color_map: ColorMap,
    stats: ProcessingStats,
    fps_window_start: Option<Instant>,
}

impl SpectrogramProcessor {
    /// Creates a processor, precomputing the window and the filter bank.
    ///
    /// # Errors
    /// * `Configuration` - if the frame size is not a power of two, the hop is
    ///   outside `1..=frame_size`, or the filter bank parameters are invalid
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        let chain = DspChain::build(&config)?;
        info!(
            "Mel processor ready: {} Hz, frame {}, hop {}, {} bands over {}-{} Hz",
            config.sample_rate,
            config.frame_size,
            config.hop_size,
            config.num_mel_bands,
            config.min_freq,
            config.max_freq
        );
        Ok(Self {
            config,
            chain,
            color_map: ColorMap::default(),
            stats: ProcessingStats::default(),
            fps_window_start: None,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn filter_bank(&self) -> &MelFilterBank {
        &self.chain.filter_bank
    }

    /// Processes one frame of 16-bit PCM samples.
    ///
    /// # Arguments
    /// * `samples` - Exactly `frame_size` samples
    ///
    /// # Returns
    /// * `Ok(spectrum)` - `num_mel_bands` values in `[0, 1]`
    /// * `Err(SizeMismatch)` - wrong frame length; the frame is counted as dropped
    pub fn process_frame(&mut self, samples: &[i16]) -> Result<Vec<f32>> {
        let started = Instant::now();
        self.check_frame_len(samples.len())?;
        for (dst, &s) in self.chain.samples.iter_mut().zip(samples) {
            *dst = s as f32 / 32768.0;
        }
        self.run_chain(started)
    }

    /// Processes one frame of floating point samples, clamped to `[-1, 1]`.
    ///
    /// Non-finite samples reject the whole frame with `InputValidation`.
    pub fn process_frame_f32(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let started = Instant::now();
        self.check_frame_len(samples.len())?;
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            self.stats.frames_dropped += 1;
            debug!("Rejected frame: non-finite sample at index {pos}");
            return Err(SpectroError::InputValidation(format!(
                "non-finite sample at index {pos}"
            )));
        }
        for (dst, &s) in self.chain.samples.iter_mut().zip(samples) {
            *dst = s.clamp(-1.0, 1.0);
        }
        self.run_chain(started)
    }

    fn check_frame_len(&mut self, actual: usize) -> Result<()> {
        if actual != self.config.frame_size {
            self.stats.frames_dropped += 1;
            debug!(
                "Rejected frame: {} samples, expected {}",
                actual, self.config.frame_size
            );
            return Err(SpectroError::SizeMismatch {
                expected: self.config.frame_size,
                actual,
            });
        }
        Ok(())
    }

    fn run_chain(&mut self, started: Instant) -> Result<Vec<f32>> {
        let chain = &mut self.chain;
        chain
            .fft
            .windowed_power_spectrum_into(&chain.samples, &mut chain.power)?;
        chain.filter_bank.apply_into(&chain.power, &mut chain.mel)?;

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for v in chain.mel.iter_mut() {
            *v = 10.0 * v.max(LOG_FLOOR).log10();
            min = min.min(*v);
            max = max.max(*v);
        }
        let range = max - min;
        if range > 0.0 {
            for v in chain.mel.iter_mut() {
                *v = ((*v - min) / range).clamp(0.0, 1.0);
            }
        } else {
            chain.mel.fill(0.0);
        }

        let spectrum = chain.mel.clone();
        self.record_timing(started);
        Ok(spectrum)
    }

    fn record_timing(&mut self, started: Instant) {
        let now = Instant::now();
        let elapsed_us = now.duration_since(started).as_secs_f64() * 1_000_000.0;
        let stats = &mut self.stats;

        stats.avg_processing_time_us = if stats.frames_processed == 0 {
            elapsed_us
        } else {
            0.9 * stats.avg_processing_time_us + 0.1 * elapsed_us
        };
        stats.throughput_fps = if stats.avg_processing_time_us > 0.0 {
            1_000_000.0 / stats.avg_processing_time_us
        } else {
            0.0
        };
        stats.frames_processed += 1;

        // The first window opens when frame 1 starts so it spans 30 frames.
        let window_start = *self.fps_window_start.get_or_insert(started);
        if stats.frames_processed % FPS_WINDOW_FRAMES == 0 {
            let secs = now.duration_since(window_start).as_secs_f64();
            if secs > 0.0 {
                stats.wall_clock_fps = FPS_WINDOW_FRAMES as f64 / secs;
            }
            self.fps_window_start = Some(now);
        }
    }

    /// Maps a normalised spectrum through the active palette.
    pub fn colorize(&self, spectrum: &[f32]) -> Vec<[u8; 4]> {
        spectrum.iter().map(|&v| self.color_map.color(v)).collect()
    }

    pub fn set_color_map(&mut self, color_map: ColorMap) {
        self.color_map = color_map;
    }

    pub fn color_map(&self) -> ColorMap {
        self.color_map
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// Counts a frame the caller rejected before it reached the processor.
    pub fn record_dropped(&mut self) {
        self.stats.frames_dropped += 1;
    }

    pub fn reset_stats(&mut self) {
        self.stats = ProcessingStats::default();
        self.fps_window_start = None;
    }

    /// Whether the smoothed processing time exceeds the duration of one hop.
    pub fn is_overloaded(&self) -> bool {
        self.stats.frames_processed > 0
            && self.stats.avg_processing_time_us > self.config.hop_budget_us()
    }

    /// Replaces the configuration and rebuilds every buffer.
    ///
    /// An invalid configuration is rejected and the current one stays active.
    /// Statistics are reset because the real-time budget changes with the hop.
    pub fn update_config(&mut self, config: ProcessorConfig) -> Result<()> {
        let chain = match DspChain::build(&config) {
            Ok(chain) => chain,
            Err(e) => {
                warn!("Processor config rejected, keeping previous: {e}");
                return Err(e);
            }
        };
        info!(
            "Mel processor reconfigured: frame {}, hop {}, {} bands",
            config.frame_size, config.hop_size, config.num_mel_bands
        );
        self.chain = chain;
        self.config = config;
        self.reset_stats();
        Ok(())
    }
}
