//! # Audio Capture Module
//!
//! Platform-abstracted audio source that delivers fixed-size frames of
//! 16-bit mono samples to a single registered callback.
//!
//! ## Features
//! - Lifecycle state machine: uninitialized, ready, recording, closed
//! - Bounded sample queue (8 frames) guarded by a mutex and condition variable
//! - Dedicated capture thread that only runs while recording
//! - Paced mock source for tests and a cpal-backed platform source
//! - Permission gate with a simulatable denial
//!
//! The callback runs on the capture thread. [`AudioCapture::stop_recording`]
//! joins that thread, so it is rejected when called from inside the callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpectroError};

mod mock;
#[cfg(feature = "platform-capture")]
mod platform;

#[cfg(feature = "platform-capture")]
pub use self::platform::CpalBackend;
pub use self::mock::MockBackend;

/// Queue capacity expressed in frames.
const QUEUE_FRAMES: usize = 8;
const MAX_CHANNELS: u16 = 8;

/// Encoding of the samples the source is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    #[default]
    S16Le,
    S24Le,
    S32Le,
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le => 3,
            SampleFormat::S32Le | SampleFormat::F32Le => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SampleFormat::S16Le),
            1 => Some(SampleFormat::S24Le),
            2 => Some(SampleFormat::S32Le),
            3 => Some(SampleFormat::F32Le),
            _ => None,
        }
    }
}

/// Where samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Ios,
    Android,
    #[default]
    Mock,
}

impl SourceKind {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SourceKind::Ios),
            1 => Some(SourceKind::Android),
            2 => Some(SourceKind::Mock),
            _ => None,
        }
    }

    pub fn is_platform(self) -> bool {
        !matches!(self, SourceKind::Mock)
    }
}

/// Capture parameters. `buffer_size` is the number of samples per delivered frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub num_channels: u16,
    pub format: SampleFormat,
    pub source: SourceKind,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 32000,
            buffer_size: 512,
            num_channels: 1,
            format: SampleFormat::S16Le,
            source: SourceKind::Mock,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SpectroError::config("capture sample rate must be positive"));
        }
        if self.buffer_size == 0 {
            return Err(SpectroError::config("capture buffer size must be positive"));
        }
        if self.num_channels == 0 || self.num_channels > MAX_CHANNELS {
            return Err(SpectroError::config(format!(
                "channel count {} outside 1..={MAX_CHANNELS}",
                self.num_channels
            )));
        }
        Ok(())
    }

    /// Time between two delivered frames.
    pub fn hop_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.buffer_size as u64 * 1_000_000_000 / self.sample_rate as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Uninitialized,
    Ready,
    Recording,
    Closed,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CaptureState::Ready,
            2 => CaptureState::Recording,
            3 => CaptureState::Closed,
            _ => CaptureState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CaptureState::Uninitialized => 0,
            CaptureState::Ready => 1,
            CaptureState::Recording => 2,
            CaptureState::Closed => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureStats {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Smoothed time spent inside the frame callback.
    pub avg_processing_time_us: f64,
    /// Instantaneous delivery rate from the last two callbacks.
    pub fps: f64,
}

/// Frame callback, invoked on the capture thread.
pub type FrameCallback = Box<dyn FnMut(&[i16]) + Send>;

/// A driver-level audio source.
///
/// Backends push mono samples into the [`SampleSink`] they are handed on
/// `start`. Paced backends let the capture thread deliver one frame per hop
/// whether or not samples arrived; unpaced ones deliver as soon as a full
/// frame is queued.
pub trait CaptureBackend: Send {
    fn kind(&self) -> SourceKind;

    /// Checks that the device can honour `config`.
    fn open(&mut self, config: &CaptureConfig) -> anyhow::Result<()>;

    fn start(&mut self, sink: SampleSink) -> anyhow::Result<()>;

    fn stop(&mut self);

    fn paced(&self) -> bool {
        false
    }

    fn request_permission(&mut self) -> bool {
        true
    }
}

struct QueueState {
    samples: VecDeque<i16>,
    capacity: usize,
    frame_len: usize,
    stop: bool,
    stats: CaptureStats,
}

impl QueueState {
    fn push(&mut self, data: &[i16]) {
        let overflow = (self.samples.len() + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            let from_queue = overflow.min(self.samples.len());
            self.samples.drain(..from_queue);
            self.stats.frames_dropped += overflow.div_ceil(self.frame_len.max(1)) as u64;
        }
        let data = &data[data.len().saturating_sub(self.capacity)..];
        self.samples.extend(data.iter().copied());
    }
}

struct Shared {
    queue: Mutex<QueueState>,
    ready: Condvar,
    state: AtomicU8,
    recording: AtomicBool,
    capture_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CaptureState) {
        self.state.store(state.as_u8(), Ordering::Release);
        self.recording
            .store(state == CaptureState::Recording, Ordering::Release);
    }

    fn on_capture_thread(&self) -> bool {
        *lock(&self.capture_thread) == Some(thread::current().id())
    }
}

/// Handle used by backends to feed samples into the capture queue.
#[derive(Clone)]
pub struct SampleSink {
    shared: Arc<Shared>,
}

impl SampleSink {
    /// Queues mono samples, dropping the oldest ones when the queue is full.
    pub fn push(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        lock(&self.shared.queue).push(samples);
        self.shared.ready.notify_all();
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono<T: Copy>(
    interleaved: &[T],
    channels: usize,
    to_f32: impl Fn(T) -> f32,
    out: &mut Vec<i16>,
) {
    out.clear();
    let channels = channels.max(1);
    for frame in interleaved.chunks_exact(channels) {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        let mono = (sum / channels as f32).clamp(-1.0, 1.0);
        out.push((mono * i16::MAX as f32) as i16);
    }
}

struct Control {
    backend: Option<Box<dyn CaptureBackend>>,
    worker: Option<JoinHandle<()>>,
    permission: Option<bool>,
    deny_permission: bool,
}

/// Ring-buffered audio source with a dedicated capture thread.
pub struct AudioCapture {
    config: CaptureConfig,
    shared: Arc<Shared>,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    control: Mutex<Control>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioCapture {
    /// Creates a capture for `config.source`. Nothing is opened until
    /// [`initialize`](Self::initialize).
    pub fn new(config: CaptureConfig) -> Self {
        let backend = default_backend(config.source);
        Self::build(config, backend)
    }

    /// Creates a capture driven by a caller-supplied backend.
    pub fn with_backend(config: CaptureConfig, backend: Box<dyn CaptureBackend>) -> Self {
        Self::build(config, Some(backend))
    }

    fn build(config: CaptureConfig, backend: Option<Box<dyn CaptureBackend>>) -> Self {
        let frame_len = config.buffer_size;
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    samples: VecDeque::with_capacity(frame_len.saturating_mul(QUEUE_FRAMES)),
                    capacity: frame_len.saturating_mul(QUEUE_FRAMES),
                    frame_len,
                    stop: false,
                    stats: CaptureStats::default(),
                }),
                ready: Condvar::new(),
                state: AtomicU8::new(CaptureState::Uninitialized.as_u8()),
                recording: AtomicBool::new(false),
                capture_thread: Mutex::new(None),
            }),
            callback: Arc::new(Mutex::new(None)),
            control: Mutex::new(Control {
                backend,
                worker: None,
                permission: None,
                deny_permission: false,
            }),
            config,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.state(),
            CaptureState::Ready | CaptureState::Recording
        )
    }

    /// Lock-free, so it is safe to call from inside the frame callback.
    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    fn reject_on_capture_thread(&self, op: &str) -> Result<()> {
        if self.shared.on_capture_thread() {
            warn!("{op} called from the capture thread, rejected");
            return Err(SpectroError::misuse(format!(
                "{op} cannot be called from the capture callback"
            )));
        }
        Ok(())
    }

    /// Validates the configuration and opens the backend.
    ///
    /// Calling it again on an initialized capture is a no-op success.
    pub fn initialize(&self) -> Result<()> {
        self.reject_on_capture_thread("initialize")?;
        let mut control = lock(&self.control);
        match self.state() {
            CaptureState::Ready | CaptureState::Recording => return Ok(()),
            CaptureState::Closed => {
                return Err(SpectroError::misuse("capture has been closed"));
            }
            CaptureState::Uninitialized => {}
        }

        if let Err(e) = self.config.validate() {
            warn!("Audio capture initialization failed: {e}");
            return Err(e);
        }

        let backend = control.backend.as_mut().ok_or_else(|| {
            SpectroError::ResourceUnavailable(format!(
                "no capture backend available for {:?} (platform-capture disabled)",
                self.config.source
            ))
        })?;
        backend.open(&self.config)?;

        self.shared.set_state(CaptureState::Ready);
        info!(
            "Audio capture initialized: {:?} source, {} Hz, {} samples per frame, {} channel(s)",
            self.config.source,
            self.config.sample_rate,
            self.config.buffer_size,
            self.config.num_channels
        );
        Ok(())
    }

    /// Asks the backend for capture permission and remembers the answer.
    pub fn request_permission(&self) -> bool {
        if self.reject_on_capture_thread("request_permission").is_err() {
            return false;
        }
        let mut control = lock(&self.control);
        let granted = if control.deny_permission {
            false
        } else {
            control
                .backend
                .as_mut()
                .map(|b| b.request_permission())
                .unwrap_or(false)
        };
        control.permission = Some(granted);
        if !granted {
            warn!("Audio capture permission denied");
        }
        granted
    }

    /// Forces every following permission request to be denied (or not).
    pub fn simulate_permission_denied(&self, denied: bool) {
        let mut control = lock(&self.control);
        control.deny_permission = denied;
        control.permission = None;
    }

    /// Starts the backend and the capture thread.
    ///
    /// # Errors
    /// * `ConcurrencyMisuse` - not initialized, closed, or called from the callback
    /// * `PermissionDenied` - permission was not granted
    /// * `Backend` / `ResourceUnavailable` - the stream or thread could not start
    pub fn start_recording(&self) -> Result<()> {
        self.reject_on_capture_thread("start_recording")?;
        match self.state() {
            CaptureState::Recording => return Ok(()),
            CaptureState::Ready => {}
            other => {
                warn!("start_recording rejected in state {other:?}");
                return Err(SpectroError::misuse(format!(
                    "cannot start recording in state {other:?}"
                )));
            }
        }

        let needs_request = lock(&self.control).permission.is_none();
        if needs_request {
            self.request_permission();
        }

        let mut control = lock(&self.control);
        if control.permission != Some(true) {
            return Err(SpectroError::PermissionDenied);
        }

        lock(&self.shared.queue).stop = false;

        let backend = control
            .backend
            .as_mut()
            .ok_or_else(|| SpectroError::ResourceUnavailable("no capture backend".into()))?;
        let paced = backend.paced();
        backend.start(SampleSink {
            shared: Arc::clone(&self.shared),
        })?;

        let shared = Arc::clone(&self.shared);
        let callback = Arc::clone(&self.callback);
        let frame_len = self.config.buffer_size;
        let hop = self.config.hop_duration();
        let spawned = thread::Builder::new()
            .name("melscope-capture".into())
            .spawn(move || capture_loop(shared, callback, frame_len, hop, paced));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(backend) = control.backend.as_mut() {
                    backend.stop();
                }
                error!("Failed to spawn capture thread: {e}");
                return Err(SpectroError::ResourceUnavailable(format!(
                    "capture thread: {e}"
                )));
            }
        };

        *lock(&self.shared.capture_thread) = Some(handle.thread().id());
        control.worker = Some(handle);
        self.shared.set_state(CaptureState::Recording);
        info!("Audio capture started");
        Ok(())
    }

    /// Stops the backend and joins the capture thread.
    ///
    /// No callback fires after this returns. Stopping a capture that is not
    /// recording is a no-op success.
    pub fn stop_recording(&self) -> Result<()> {
        self.reject_on_capture_thread("stop_recording")?;
        let mut control = lock(&self.control);
        if self.state() != CaptureState::Recording {
            return Ok(());
        }

        if let Some(backend) = control.backend.as_mut() {
            backend.stop();
        }
        {
            let mut queue = lock(&self.shared.queue);
            queue.stop = true;
            queue.samples.clear();
        }
        self.shared.ready.notify_all();

        if let Some(handle) = control.worker.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
        *lock(&self.shared.capture_thread) = None;
        self.shared.set_state(CaptureState::Ready);
        info!("Audio capture stopped");
        Ok(())
    }

    /// Registers the frame callback, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        self.reject_on_capture_thread("set_callback")?;
        *lock(&self.callback) = Some(Box::new(callback));
        Ok(())
    }

    pub fn clear_callback(&self) -> Result<()> {
        self.reject_on_capture_thread("clear_callback")?;
        *lock(&self.callback) = None;
        Ok(())
    }

    /// Queues synthetic samples on a mock source.
    ///
    /// # Errors
    /// * `InputValidation` - the source is not a mock
    /// * `ConcurrencyMisuse` - the capture is not initialized
    pub fn inject_mock_data(&self, samples: &[i16]) -> Result<()> {
        if self.config.source != SourceKind::Mock {
            return Err(SpectroError::InputValidation(
                "mock data can only be injected into a mock source".into(),
            ));
        }
        if !self.is_initialized() {
            return Err(SpectroError::misuse("capture is not initialized"));
        }
        SampleSink {
            shared: Arc::clone(&self.shared),
        }
        .push(samples);
        Ok(())
    }

    /// Samples currently waiting in the queue.
    pub fn queued_samples(&self) -> usize {
        lock(&self.shared.queue).samples.len()
    }

    pub fn stats(&self) -> CaptureStats {
        lock(&self.shared.queue).stats.clone()
    }

    pub fn reset_stats(&self) {
        lock(&self.shared.queue).stats = CaptureStats::default();
    }

    /// Stops recording and releases the backend. The capture cannot be reused.
    pub fn close(&self) -> Result<()> {
        self.stop_recording()?;
        let mut control = lock(&self.control);
        if self.state() == CaptureState::Closed {
            return Ok(());
        }
        control.backend = None;
        lock(&self.shared.queue).samples.clear();
        self.shared.set_state(CaptureState::Closed);
        info!("Audio capture closed");
        Ok(())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Audio capture dropped without a clean shutdown: {e}");
        }
    }
}

fn default_backend(source: SourceKind) -> Option<Box<dyn CaptureBackend>> {
    match source {
        SourceKind::Mock => Some(Box::new(MockBackend::new())),
        #[cfg(feature = "platform-capture")]
        SourceKind::Ios | SourceKind::Android => Some(Box::new(CpalBackend::new(source))),
        #[cfg(not(feature = "platform-capture"))]
        SourceKind::Ios | SourceKind::Android => None,
    }
}

fn capture_loop(
    shared: Arc<Shared>,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    frame_len: usize,
    hop: Duration,
    paced: bool,
) {
    *lock(&shared.capture_thread) = Some(thread::current().id());
    let mut frame = vec![0i16; frame_len];
    let mut next_tick = Instant::now() + hop;
    let mut last_delivery: Option<Instant> = None;

    loop {
        {
            let guard = lock(&shared.queue);
            let mut guard = if paced {
                let wait = next_tick.saturating_duration_since(Instant::now());
                let (guard, _) = shared
                    .ready
                    .wait_timeout_while(guard, wait, |q| !q.stop)
                    .unwrap_or_else(PoisonError::into_inner);
                next_tick = (next_tick + hop).max(Instant::now());
                guard
            } else {
                shared
                    .ready
                    .wait_while(guard, |q| !q.stop && q.samples.len() < frame_len)
                    .unwrap_or_else(PoisonError::into_inner)
            };
            if guard.stop {
                break;
            }

            let available = guard.samples.len().min(frame_len);
            for (dst, s) in frame.iter_mut().zip(guard.samples.drain(..available)) {
                *dst = s;
            }
            frame[available..].fill(0);
        }

        let started = Instant::now();
        if let Some(cb) = lock(&callback).as_mut() {
            cb(&frame);
        }
        let finished = Instant::now();

        let mut queue = lock(&shared.queue);
        let stats = &mut queue.stats;
        let elapsed_us = finished.duration_since(started).as_secs_f64() * 1_000_000.0;
        stats.avg_processing_time_us = if stats.frames_processed == 0 {
            elapsed_us
        } else {
            0.9 * stats.avg_processing_time_us + 0.1 * elapsed_us
        };
        if let Some(previous) = last_delivery {
            let secs = started.duration_since(previous).as_secs_f64();
            if secs > 0.0 {
                stats.fps = 1.0 / secs;
            }
        }
        stats.frames_processed += 1;
        last_delivery = Some(started);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn mock_config() -> CaptureConfig {
        CaptureConfig {
            sample_rate: 16000,
            buffer_size: 160,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn zero_buffer_size_fails_initialize() {
        let capture = AudioCapture::new(CaptureConfig {
            buffer_size: 0,
            ..CaptureConfig::default()
        });
        assert!(matches!(
            capture.initialize(),
            Err(SpectroError::Configuration(_))
        ));
        assert!(!capture.is_initialized());
        assert_eq!(capture.state(), CaptureState::Uninitialized);
    }

    #[test]
    fn rejects_bad_channel_counts() {
        for channels in [0, 9] {
            let capture = AudioCapture::new(CaptureConfig {
                num_channels: channels,
                ..CaptureConfig::default()
            });
            assert!(capture.initialize().is_err());
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let capture = AudioCapture::new(mock_config());
        assert!(capture.start_recording().is_err());
        capture.initialize().unwrap();
        capture.initialize().unwrap();
        assert_eq!(capture.state(), CaptureState::Ready);

        capture.stop_recording().unwrap();
        capture.start_recording().unwrap();
        capture.start_recording().unwrap();
        assert!(capture.is_recording());

        capture.stop_recording().unwrap();
        assert_eq!(capture.state(), CaptureState::Ready);
        capture.close().unwrap();
        assert_eq!(capture.state(), CaptureState::Closed);
        assert!(capture.initialize().is_err());
    }

    #[test]
    fn denied_permission_blocks_start() {
        let capture = AudioCapture::new(mock_config());
        capture.initialize().unwrap();
        capture.simulate_permission_denied(true);
        assert!(!capture.request_permission());
        assert!(matches!(
            capture.start_recording(),
            Err(SpectroError::PermissionDenied)
        ));
        assert_eq!(capture.state(), CaptureState::Ready);

        capture.simulate_permission_denied(false);
        assert!(capture.request_permission());
        capture.start_recording().unwrap();
        capture.stop_recording().unwrap();
    }

    #[test]
    fn mock_delivers_injected_frames_then_silence() {
        let capture = AudioCapture::new(mock_config());
        capture.initialize().unwrap();
        let (tx, rx) = mpsc::channel();
        capture
            .set_callback(move |frame: &[i16]| {
                let _ = tx.send(frame.to_vec());
            })
            .unwrap();

        // One and a half frames: the second is zero-padded.
        let data: Vec<i16> = (1..=240).collect();
        capture.inject_mock_data(&data).unwrap();
        capture.start_recording().unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let third = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        capture.stop_recording().unwrap();

        assert_eq!(first.len(), 160);
        assert_eq!(first[0], 1);
        assert_eq!(first[159], 160);
        assert_eq!(second[0], 161);
        assert_eq!(second[79], 240);
        assert!(second[80..].iter().all(|&s| s == 0));
        assert!(third.iter().all(|&s| s == 0));
        assert!(capture.stats().frames_processed >= 3);
    }

    #[test]
    fn overflow_drops_oldest_samples() {
        let capture = AudioCapture::new(mock_config());
        capture.initialize().unwrap();
        let capacity = 160 * QUEUE_FRAMES;
        let data: Vec<i16> = (0..(capacity + 160) as i32).map(|i| i as i16).collect();
        capture.inject_mock_data(&data).unwrap();
        assert_eq!(capture.queued_samples(), capacity);
        assert_eq!(capture.stats().frames_dropped, 1);
    }

    #[test]
    fn inject_requires_mock_source() {
        let capture = AudioCapture::with_backend(
            CaptureConfig {
                source: SourceKind::Android,
                ..mock_config()
            },
            Box::new(MockBackend::new()),
        );
        capture.initialize().unwrap();
        assert!(matches!(
            capture.inject_mock_data(&[1, 2, 3]),
            Err(SpectroError::InputValidation(_))
        ));
    }

    #[test]
    fn stop_from_callback_is_rejected() {
        let capture = Arc::new(AudioCapture::new(mock_config()));
        capture.initialize().unwrap();
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&capture);
        capture
            .set_callback(move |_frame: &[i16]| {
                let result = inner.stop_recording();
                let _ = tx.send((result.is_err(), inner.is_recording()));
            })
            .unwrap();
        capture.start_recording().unwrap();
        let (rejected, still_recording) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        capture.clear_callback().unwrap();
        capture.stop_recording().unwrap();
        assert!(rejected);
        assert!(still_recording);
    }

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_to_mono(&[1.0_f32, 0.0, -0.5, -0.5], 2, |s| s, &mut out);
        assert_eq!(out, vec![i16::MAX / 2, -i16::MAX / 2]);
    }

    #[test]
    fn config_codes_and_sizes() {
        assert_eq!(SampleFormat::S24Le.bytes_per_sample(), 3);
        assert_eq!(SampleFormat::from_code(3), Some(SampleFormat::F32Le));
        assert_eq!(SourceKind::from_code(2), Some(SourceKind::Mock));
        assert!(SourceKind::from_code(7).is_none());
        assert_eq!(mock_config().hop_duration(), Duration::from_millis(10));
    }
}
