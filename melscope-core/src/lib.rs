// melscope-core/src/lib.rs

//! The core of the live mel spectrogram.
//! This crate captures audio, turns each frame into a normalised mel
//! spectrum and renders the spectra as a scrolling color waterfall.
//! It is headless: the C-callable surface lives in `melscope-ffi`.

pub mod capture;
pub mod color;
pub mod config;
pub mod error;
pub mod fft;
pub mod filter_bank;
pub mod mel;
pub mod pipeline;
pub mod processor;
pub mod waterfall;

pub use capture::{
    AudioCapture, CaptureBackend, CaptureConfig, CaptureState, CaptureStats, SampleFormat,
    SampleSink, SourceKind,
};
pub use color::{ColorMap, interpolate_color};
pub use config::{PipelineConfig, RendererConfig};
pub use error::{Result, SpectroError};
pub use fft::FftEngine;
pub use filter_bank::MelFilterBank;
pub use pipeline::{ColumnUpdate, PipelineStats, SpectrogramPipeline};
pub use processor::{ProcessingStats, ProcessorConfig, SpectrogramProcessor};
pub use waterfall::{RenderMode, RendererStats, TextureSurface, WaterfallRenderer};
