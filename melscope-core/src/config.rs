//! # Configuration Module
//!
//! Serde-backed configuration for the whole pipeline. Every record has
//! defaults, so a JSON file only needs the fields it changes:
//!
//! ```json
//! { "source": "mock", "processor": { "num_mel_bands": 80 }, "renderer": { "color_map": "inferno" } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capture::{CaptureConfig, SampleFormat, SourceKind};
use crate::color::ColorMap;
use crate::error::{Result, SpectroError};
use crate::processor::ProcessorConfig;

/// Waterfall texture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub width: usize,
    pub height: usize,
    pub color_map: ColorMap,
    pub min_value: f32,
    pub max_value: f32,
    /// Try a GPU texture before falling back to software.
    pub hardware: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 256,
            color_map: ColorMap::Viridis,
            min_value: 0.0,
            max_value: 1.0,
            hardware: true,
        }
    }
}

/// Everything needed to build a [`SpectrogramPipeline`](crate::pipeline::SpectrogramPipeline).
///
/// The capture runs at the processor's sample rate and delivers one hop per callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceKind,
    pub num_channels: u16,
    pub format: SampleFormat,
    pub processor: ProcessorConfig,
    pub renderer: RendererConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Mock,
            num_channels: 1,
            format: SampleFormat::S16Le,
            processor: ProcessorConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SpectroError::config(format!("invalid pipeline config: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            SpectroError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SpectroError::config(format!("cannot serialize config: {e}")))
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.processor.sample_rate,
            buffer_size: self.processor.hop_size,
            num_channels: self.num_channels,
            format: self.format,
            source: self.source,
        }
    }
}
