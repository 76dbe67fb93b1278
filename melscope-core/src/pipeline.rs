//! # Spectrogram Pipeline Module
//!
//! Wires capture, DSP and rendering together:
//!
//! ```text
//! AudioCapture --(hop chunks)--> worker thread --(ColumnUpdate)--> consumer
//!                                 |  frame assembly (frame/hop overlap)
//!                                 |  SpectrogramProcessor::process_frame
//!                                 |  WaterfallRenderer::update_column
//! ```
//!
//! The worker thread owns the processor and the renderer. Everything else
//! talks to it over crossbeam channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::Serialize;

use crate::capture::{AudioCapture, CaptureBackend, CaptureStats};
use crate::color::ColorMap;
use crate::config::{PipelineConfig, RendererConfig};
use crate::error::{Result, SpectroError};
use crate::processor::{ProcessingStats, ProcessorConfig, SpectrogramProcessor};
use crate::waterfall::{RenderMode, RendererStats, WaterfallRenderer};

/// Hop chunks that may wait for the worker before new ones are dropped.
const CHUNK_QUEUE: usize = 32;
const COLUMN_QUEUE: usize = 256;

/// One processed frame as it landed in the waterfall.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnUpdate {
    /// Normalised mel spectrum, lowest band first.
    pub spectrum: Vec<f32>,
    /// Palette colors for `spectrum`.
    pub colors: Vec<[u8; 4]>,
    /// Ring column the spectrum was written to.
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub processor: ProcessingStats,
    pub renderer: RendererStats,
    pub capture: CaptureStats,
    pub render_mode: RenderMode,
    /// Capture chunks discarded because the worker fell behind.
    pub chunks_dropped: u64,
    pub overloaded: bool,
}

enum Command {
    Snapshot(Sender<Vec<u8>>),
    SetColorMap(ColorMap),
    SetMinMax(f32, f32),
    UpdateProcessorConfig(ProcessorConfig, Sender<Result<()>>),
    Stats(Sender<WorkerStats>),
}

struct WorkerStats {
    processor: ProcessingStats,
    renderer: RendererStats,
    render_mode: RenderMode,
    overloaded: bool,
}

/// Slides a `frame_size` window over incoming samples, advancing by `hop_size`.
struct FrameAssembler {
    pending: Vec<i16>,
    frame_size: usize,
    hop_size: usize,
}

impl FrameAssembler {
    fn new(config: &ProcessorConfig) -> Self {
        Self {
            pending: Vec::with_capacity(config.frame_size * 2),
            frame_size: config.frame_size,
            hop_size: config.hop_size.max(1),
        }
    }

    fn push(&mut self, chunk: &[i16], mut on_frame: impl FnMut(&[i16])) {
        self.pending.extend_from_slice(chunk);
        while self.pending.len() >= self.frame_size {
            on_frame(&self.pending[..self.frame_size]);
            self.pending.drain(..self.hop_size);
        }
    }
}

/// Audio worker thread handle.
struct PipelineWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Live spectrogram: capture on one thread, DSP and rendering on another.
pub struct SpectrogramPipeline {
    capture: Arc<AudioCapture>,
    commands: Sender<Command>,
    columns: Receiver<ColumnUpdate>,
    chunks_dropped: Arc<AtomicU64>,
    worker: Option<PipelineWorker>,
}

impl SpectrogramPipeline {
    /// Builds the pipeline with the default backend for `config.source`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let capture = AudioCapture::new(config.capture_config());
        Self::assemble(config, capture)
    }

    /// Builds the pipeline on a caller-supplied capture backend.
    pub fn with_backend(config: PipelineConfig, backend: Box<dyn CaptureBackend>) -> Result<Self> {
        let capture = AudioCapture::with_backend(config.capture_config(), backend);
        Self::assemble(config, capture)
    }

    fn assemble(config: PipelineConfig, capture: AudioCapture) -> Result<Self> {
        let processor = SpectrogramProcessor::new(config.processor.clone())?;
        let renderer = build_renderer(&config.renderer, config.processor.num_mel_bands)?;
        capture.initialize()?;

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<Vec<i16>>(CHUNK_QUEUE);
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (column_tx, column_rx) = crossbeam_channel::bounded(COLUMN_QUEUE);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let chunks_dropped = Arc::new(AtomicU64::new(0));

        let dropped = Arc::clone(&chunks_dropped);
        capture.set_callback(move |chunk: &[i16]| {
            if chunk_tx.try_send(chunk.to_vec()).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        })?;

        let mut worker = Worker {
            assembler: FrameAssembler::new(&config.processor),
            processor,
            renderer,
            renderer_config: config.renderer.clone(),
            columns: column_tx,
        };
        let thread_handle = thread::Builder::new()
            .name("melscope-worker".into())
            .spawn(move || worker.run(chunk_rx, command_rx, shutdown_rx))
            .map_err(|e| SpectroError::ResourceUnavailable(format!("worker thread: {e}")))?;

        info!("Spectrogram pipeline ready");
        Ok(Self {
            capture: Arc::new(capture),
            commands: command_tx,
            columns: column_rx,
            chunks_dropped,
            worker: Some(PipelineWorker {
                shutdown_tx,
                thread_handle: Some(thread_handle),
            }),
        })
    }

    pub fn start(&self) -> Result<()> {
        self.capture.start_recording()
    }

    pub fn stop(&self) -> Result<()> {
        self.capture.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    pub fn capture(&self) -> &AudioCapture {
        &self.capture
    }

    /// Queues synthetic samples when running on the mock source.
    pub fn inject_mock_data(&self, samples: &[i16]) -> Result<()> {
        self.capture.inject_mock_data(samples)
    }

    /// Receiver for processed columns, in processing order.
    pub fn columns(&self) -> &Receiver<ColumnUpdate> {
        &self.columns
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SpectroError::ResourceUnavailable("pipeline worker has exited".into()))
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.send(make(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| SpectroError::ResourceUnavailable("pipeline worker has exited".into()))
    }

    /// Current unrotated waterfall image.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        self.request(Command::Snapshot)
    }

    pub fn set_color_map(&self, color_map: ColorMap) -> Result<()> {
        self.send(Command::SetColorMap(color_map))
    }

    pub fn set_min_max(&self, min_value: f32, max_value: f32) -> Result<()> {
        self.send(Command::SetMinMax(min_value, max_value))
    }

    /// Reconfigures the DSP chain.
    ///
    /// # Errors
    /// * `ConcurrencyMisuse` - while recording
    /// * `Configuration` - invalid config, or a sample rate other than the
    ///   capture's; the previous config stays active
    pub fn update_processor_config(&self, config: ProcessorConfig) -> Result<()> {
        if self.capture.is_recording() {
            warn!("Processor config update rejected while recording");
            return Err(SpectroError::misuse(
                "processor config cannot change while recording",
            ));
        }
        let capture_rate = self.capture.config().sample_rate;
        if config.sample_rate != capture_rate {
            warn!(
                "Processor config update rejected: {} Hz does not match the {} Hz capture",
                config.sample_rate, capture_rate
            );
            return Err(SpectroError::config(format!(
                "sample rate {} Hz differs from the capture rate {} Hz",
                config.sample_rate, capture_rate
            )));
        }
        self.request(|reply| Command::UpdateProcessorConfig(config, reply))?
    }

    pub fn stats(&self) -> Result<PipelineStats> {
        let worker = self.request(Command::Stats)?;
        Ok(PipelineStats {
            processor: worker.processor,
            renderer: worker.renderer,
            capture: self.capture.stats(),
            render_mode: worker.render_mode,
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            overloaded: worker.overloaded,
        })
    }

    /// Stops recording and joins the worker thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        let stopped = self.capture.stop_recording();
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
            if let Some(handle) = worker.thread_handle.take() {
                if handle.join().is_err() {
                    warn!("Pipeline worker panicked");
                }
            }
            info!("Spectrogram pipeline shut down");
        }
        stopped
    }
}

impl Drop for SpectrogramPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            warn!("Pipeline dropped without a clean shutdown: {e}");
        }
    }
}

fn build_renderer(config: &RendererConfig, num_mel_bands: usize) -> Result<WaterfallRenderer> {
    let mut renderer = if config.hardware {
        WaterfallRenderer::new(config.width, config.height, num_mel_bands)?
    } else {
        WaterfallRenderer::software(config.width, config.height, num_mel_bands)?
    };
    renderer.set_color_map(config.color_map);
    renderer.set_min_max(config.min_value, config.max_value);
    Ok(renderer)
}

struct Worker {
    assembler: FrameAssembler,
    processor: SpectrogramProcessor,
    renderer: WaterfallRenderer,
    renderer_config: RendererConfig,
    columns: Sender<ColumnUpdate>,
}

impl Worker {
    fn run(
        &mut self,
        chunks: Receiver<Vec<i16>>,
        commands: Receiver<Command>,
        shutdown: Receiver<()>,
    ) {
        debug!("Pipeline worker started");
        loop {
            crossbeam_channel::select! {
                recv(chunks) -> msg => match msg {
                    Ok(chunk) => self.on_chunk(&chunk),
                    Err(_) => {
                        debug!("Capture channel closed");
                        break;
                    }
                },
                recv(commands) -> msg => match msg {
                    Ok(command) => self.on_command(command),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => {
                    debug!("Pipeline worker received shutdown signal");
                    break;
                },
            }
        }
        debug!("Pipeline worker finished");
    }

    fn on_chunk(&mut self, chunk: &[i16]) {
        let Self {
            assembler,
            processor,
            renderer,
            columns,
            ..
        } = self;
        assembler.push(chunk, |frame| {
            let spectrum = match processor.process_frame(frame) {
                Ok(spectrum) => spectrum,
                Err(e) => {
                    debug!("Frame skipped: {e}");
                    return;
                }
            };
            let column = renderer.current_column();
            if let Err(e) = renderer.update_column(&spectrum) {
                debug!("Column skipped: {e}");
                return;
            }
            let colors = processor.colorize(&spectrum);
            let _ = columns.try_send(ColumnUpdate {
                spectrum,
                colors,
                column,
            });
        });
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Snapshot(reply) => {
                let _ = reply.send(self.renderer.texture_data());
            }
            Command::SetColorMap(color_map) => {
                self.processor.set_color_map(color_map);
                self.renderer.set_color_map(color_map);
                self.renderer_config.color_map = color_map;
            }
            Command::SetMinMax(min_value, max_value) => {
                self.renderer.set_min_max(min_value, max_value);
                self.renderer_config.min_value = min_value;
                self.renderer_config.max_value = max_value;
            }
            Command::UpdateProcessorConfig(config, reply) => {
                let _ = reply.send(self.reconfigure(config));
            }
            Command::Stats(reply) => {
                let _ = reply.send(WorkerStats {
                    processor: self.processor.stats().clone(),
                    renderer: self.renderer.stats().clone(),
                    render_mode: self.renderer.mode(),
                    overloaded: self.processor.is_overloaded(),
                });
            }
        }
    }

    fn reconfigure(&mut self, config: ProcessorConfig) -> Result<()> {
        let bands_changed = config.num_mel_bands != self.renderer.num_mel_bands();
        let renderer = if bands_changed {
            Some(build_renderer(&self.renderer_config, config.num_mel_bands)?)
        } else {
            None
        };
        self.processor.update_config(config.clone())?;
        if let Some(renderer) = renderer {
            self.renderer = renderer;
        }
        self.assembler = FrameAssembler::new(&config);
        Ok(())
    }
}
