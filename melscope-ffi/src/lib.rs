//! # melscope C Surface
//!
//! Flat C-callable API over `melscope-core`. All state lives in an opaque
//! [`SpectroContext`] created with [`melscope_context_create`] and released
//! with [`melscope_context_destroy`].
//!
//! Every call returns a status code: `0` (or a non-negative count) on
//! success, a negative `MELSCOPE_ERR_*` value on failure. The message for
//! the last failure is available from [`get_error_message`]. Panics never
//! cross the boundary; they are reported as [`MELSCOPE_ERR_PANIC`].

use std::ffi::{CString, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::slice;
use std::sync::Arc;

use log::{info, warn};
use melscope_core::{
    AudioCapture, CaptureConfig, ColorMap, ProcessorConfig, SampleFormat, SourceKind,
    SpectroError, SpectrogramProcessor, WaterfallRenderer,
};
use thiserror::Error;

pub const MELSCOPE_OK: i32 = 0;
pub const MELSCOPE_ERR_INVALID_ARGUMENT: i32 = -1;
pub const MELSCOPE_ERR_NOT_INITIALIZED: i32 = -2;
pub const MELSCOPE_ERR_CONFIGURATION: i32 = -3;
pub const MELSCOPE_ERR_INPUT: i32 = -4;
pub const MELSCOPE_ERR_INVALID_STATE: i32 = -5;
pub const MELSCOPE_ERR_RESOURCE: i32 = -6;
pub const MELSCOPE_ERR_PERMISSION: i32 = -7;
pub const MELSCOPE_ERR_PANIC: i32 = -99;

/// Capture settings. `format`: 0 = S16LE, 1 = S24LE, 2 = S32LE, 3 = F32LE.
/// `platform`: 0 = iOS, 1 = Android, 2 = mock.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MelscopeCaptureConfig {
    pub sample_rate: i32,
    pub buffer_size: i32,
    pub num_channels: i32,
    pub format: i32,
    pub platform: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MelscopeProcessorConfig {
    pub sample_rate: i32,
    pub frame_size: i32,
    pub hop_size: i32,
    pub num_mel_bands: i32,
    pub min_freq: f32,
    pub max_freq: f32,
}

/// Receives each captured frame on the capture thread.
pub type MelscopeAudioCallback =
    Option<unsafe extern "C" fn(user_data: *mut c_void, samples: *const i16, len: i32)>;

#[derive(Debug, Error)]
enum FfiError {
    #[error("null pointer: {0}")]
    Null(&'static str),
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),
    #[error(transparent)]
    Core(#[from] SpectroError),
}

impl FfiError {
    fn code(&self) -> i32 {
        match self {
            FfiError::Null(_) => MELSCOPE_ERR_INVALID_ARGUMENT,
            FfiError::NotInitialized(_) => MELSCOPE_ERR_NOT_INITIALIZED,
            FfiError::Core(e) => match e {
                SpectroError::Configuration(_) => MELSCOPE_ERR_CONFIGURATION,
                SpectroError::SizeMismatch { .. } | SpectroError::InputValidation(_) => {
                    MELSCOPE_ERR_INPUT
                }
                SpectroError::ConcurrencyMisuse(_) => MELSCOPE_ERR_INVALID_STATE,
                SpectroError::ResourceUnavailable(_) | SpectroError::Backend(_) => {
                    MELSCOPE_ERR_RESOURCE
                }
                SpectroError::PermissionDenied => MELSCOPE_ERR_PERMISSION,
            },
        }
    }
}

type FfiResult<T> = std::result::Result<T, FfiError>;

/// Raw `user_data` pointer handed back to the C callback.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);
unsafe impl Send for UserData {}

impl UserData {
    fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

#[derive(Clone, Copy)]
struct RegisteredCallback {
    func: unsafe extern "C" fn(*mut c_void, *const i16, i32),
    user_data: UserData,
}

/// Opaque handle owning every component behind the C surface.
#[derive(Default)]
pub struct SpectroContext {
    capture: Option<Arc<AudioCapture>>,
    processor: Option<SpectrogramProcessor>,
    renderer: Option<WaterfallRenderer>,
    callback: Option<RegisteredCallback>,
    last_error: CString,
}

impl SpectroContext {
    fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into().replace('\0', " ");
        self.last_error = CString::new(message).unwrap_or_default();
    }

    fn capture(&self) -> FfiResult<&Arc<AudioCapture>> {
        self.capture
            .as_ref()
            .ok_or(FfiError::NotInitialized("audio input"))
    }

    fn processor(&mut self) -> FfiResult<&mut SpectrogramProcessor> {
        self.processor
            .as_mut()
            .ok_or(FfiError::NotInitialized("mel processor"))
    }

    fn renderer(&self) -> FfiResult<&WaterfallRenderer> {
        self.renderer
            .as_ref()
            .ok_or(FfiError::NotInitialized("texture renderer"))
    }

    fn renderer_mut(&mut self) -> FfiResult<&mut WaterfallRenderer> {
        self.renderer
            .as_mut()
            .ok_or(FfiError::NotInitialized("texture renderer"))
    }

    fn install_callback(&self) -> FfiResult<()> {
        let Some(capture) = self.capture.as_ref() else {
            return Ok(());
        };
        match self.callback {
            Some(registered) => capture.set_callback(move |frame: &[i16]| {
                let len = i32::try_from(frame.len()).unwrap_or(i32::MAX);
                // The caller promised `func` stays valid for the context's lifetime.
                unsafe { (registered.func)(registered.user_data.as_ptr(), frame.as_ptr(), len) };
            })?,
            None => capture.clear_callback()?,
        }
        Ok(())
    }
}

/// Runs `op` on the context behind `ctx`, turning errors and panics into status codes.
///
/// # Safety
/// `ctx` must be null or a live pointer returned by [`melscope_context_create`].
unsafe fn guarded(
    ctx: *mut SpectroContext,
    op: impl FnOnce(&mut SpectroContext) -> FfiResult<i32>,
) -> i32 {
    let Some(context) = (unsafe { ctx.as_mut() }) else {
        return MELSCOPE_ERR_INVALID_ARGUMENT;
    };
    match catch_unwind(AssertUnwindSafe(|| op(context))) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            let code = e.code();
            context.set_error(e.to_string());
            code
        }
        Err(_) => {
            context.set_error("internal panic");
            MELSCOPE_ERR_PANIC
        }
    }
}

/// Reads a value through `ctx` without touching its error slot.
///
/// Returns `fallback` for a null context, a missing component or a panic.
///
/// # Safety
/// `ctx` must be null or a live pointer returned by [`melscope_context_create`].
unsafe fn query<T>(
    ctx: *const SpectroContext,
    fallback: T,
    op: impl FnOnce(&SpectroContext) -> Option<T>,
) -> T {
    let Some(context) = (unsafe { ctx.as_ref() }) else {
        return fallback;
    };
    catch_unwind(AssertUnwindSafe(|| op(context)))
        .ok()
        .flatten()
        .unwrap_or(fallback)
}

fn non_negative(value: i32, what: &str) -> FfiResult<usize> {
    usize::try_from(value).map_err(|_| {
        SpectroError::Configuration(format!("{what} must not be negative, got {value}")).into()
    })
}

fn to_capture_config(raw: &MelscopeCaptureConfig) -> FfiResult<CaptureConfig> {
    let format = SampleFormat::from_code(raw.format).ok_or_else(|| {
        SpectroError::Configuration(format!("unknown sample format code {}", raw.format))
    })?;
    let source = SourceKind::from_code(raw.platform).ok_or_else(|| {
        SpectroError::Configuration(format!("unknown platform code {}", raw.platform))
    })?;
    let num_channels = u16::try_from(raw.num_channels).map_err(|_| {
        SpectroError::Configuration(format!("invalid channel count {}", raw.num_channels))
    })?;
    Ok(CaptureConfig {
        sample_rate: non_negative(raw.sample_rate, "sample rate")? as u32,
        buffer_size: non_negative(raw.buffer_size, "buffer size")?,
        num_channels,
        format,
        source,
    })
}

fn to_processor_config(raw: &MelscopeProcessorConfig) -> FfiResult<ProcessorConfig> {
    Ok(ProcessorConfig {
        sample_rate: non_negative(raw.sample_rate, "sample rate")? as u32,
        frame_size: non_negative(raw.frame_size, "frame size")?,
        hop_size: non_negative(raw.hop_size, "hop size")?,
        num_mel_bands: non_negative(raw.num_mel_bands, "mel band count")?,
        min_freq: raw.min_freq,
        max_freq: raw.max_freq,
    })
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Installs `env_logger` (honours `RUST_LOG`, defaults to `info`). Safe to call repeatedly.
#[unsafe(no_mangle)]
pub extern "C" fn melscope_init_logging() -> i32 {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    MELSCOPE_OK
}

/// Allocates an empty context. Never returns null.
#[unsafe(no_mangle)]
pub extern "C" fn melscope_context_create() -> *mut SpectroContext {
    Box::into_raw(Box::new(SpectroContext::default()))
}

/// Stops every component and frees the context.
///
/// # Safety
/// `ctx` must be null or a pointer from [`melscope_context_create`] that was
/// not destroyed yet. It must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn melscope_context_destroy(ctx: *mut SpectroContext) {
    if ctx.is_null() {
        return;
    }
    let context = unsafe { Box::from_raw(ctx) };
    if catch_unwind(AssertUnwindSafe(move || drop(context))).is_err() {
        warn!("Panic while destroying melscope context");
    }
}

/// Drops the capture, processor and renderer but keeps the context usable.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cleanup(ctx: *mut SpectroContext) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            if let Some(capture) = c.capture.take() {
                capture.close()?;
            }
            c.processor = None;
            c.renderer = None;
            c.callback = None;
            info!("melscope context cleaned up");
            Ok(MELSCOPE_OK)
        })
    }
}

/// Message of the last failed call on `ctx`; empty when none failed yet.
///
/// The string stays valid until the next call on the same context.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_error_message(ctx: *const SpectroContext) -> *const c_char {
    match unsafe { ctx.as_ref() } {
        Some(context) => context.last_error.as_ptr(),
        None => c"null context".as_ptr(),
    }
}

// --- Audio input ---

/// Creates and initializes the audio capture, replacing any previous one.
///
/// # Safety
/// `ctx` must be a live context pointer; `config` must be null or point to a valid struct.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn init_audio_input(
    ctx: *mut SpectroContext,
    config: *const MelscopeCaptureConfig,
) -> i32 {
    let raw = unsafe { config.as_ref() }.copied();
    unsafe {
        guarded(ctx, |c| {
            let raw = raw.ok_or(FfiError::Null("config"))?;
            let config = to_capture_config(&raw)?;
            if let Some(previous) = c.capture.take() {
                previous.close()?;
            }
            let capture = AudioCapture::new(config);
            capture.initialize()?;
            c.capture = Some(Arc::new(capture));
            c.install_callback()?;
            Ok(MELSCOPE_OK)
        })
    }
}

/// Registers (or with a null `callback`, removes) the frame callback.
///
/// # Safety
/// `ctx` must be a live context pointer. `callback` runs on the capture
/// thread and must stay callable, with `user_data`, until it is replaced or
/// the context is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn set_audio_callback(
    ctx: *mut SpectroContext,
    callback: MelscopeAudioCallback,
    user_data: *mut c_void,
) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            c.callback = callback.map(|func| RegisteredCallback {
                func,
                user_data: UserData(user_data),
            });
            c.install_callback()?;
            Ok(MELSCOPE_OK)
        })
    }
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn start_recording(ctx: *mut SpectroContext) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            c.capture()?.start_recording()?;
            Ok(MELSCOPE_OK)
        })
    }
}

/// Returns after the capture thread has been joined.
///
/// # Safety
/// `ctx` must be null or a live context pointer. Must not be called from the audio callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn stop_recording(ctx: *mut SpectroContext) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            c.capture()?.stop_recording()?;
            Ok(MELSCOPE_OK)
        })
    }
}

// --- Mel processor ---

/// # Safety
/// `ctx` must be a live context pointer; `config` must be null or point to a valid struct.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn init_mel_processor(
    ctx: *mut SpectroContext,
    config: *const MelscopeProcessorConfig,
) -> i32 {
    let raw = unsafe { config.as_ref() }.copied();
    unsafe {
        guarded(ctx, |c| {
            let raw = raw.ok_or(FfiError::Null("config"))?;
            let config = to_processor_config(&raw)?;
            c.processor = Some(SpectrogramProcessor::new(config)?);
            Ok(MELSCOPE_OK)
        })
    }
}

/// Processes one frame and writes the mel spectrum to `out`.
///
/// Returns the number of values written. Rejected buffers count as dropped frames.
///
/// # Safety
/// `samples` must point to `size` readable values and `out` to `out_size` writable ones.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn process_audio_frame(
    ctx: *mut SpectroContext,
    samples: *const i16,
    size: i32,
    out: *mut f32,
    out_size: i32,
) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            let processor = c.processor()?;
            let size = match frame_args(samples, size, out, out_size, processor) {
                Ok(size) => size,
                Err(e) => {
                    processor.record_dropped();
                    return Err(e);
                }
            };

            let input = slice::from_raw_parts(samples, size);
            let spectrum = processor.process_frame(input)?;
            let output = slice::from_raw_parts_mut(out, spectrum.len());
            output.copy_from_slice(&spectrum);
            Ok(count(spectrum.len()))
        })
    }
}

/// Validates the raw buffers of [`process_audio_frame`] and returns the frame length.
fn frame_args(
    samples: *const i16,
    size: i32,
    out: *mut f32,
    out_size: i32,
    processor: &SpectrogramProcessor,
) -> FfiResult<usize> {
    if samples.is_null() {
        return Err(FfiError::Null("samples"));
    }
    if out.is_null() {
        return Err(FfiError::Null("output buffer"));
    }
    let size = usize::try_from(size)
        .map_err(|_| SpectroError::InputValidation(format!("negative frame size {size}")))?;
    let bands = processor.config().num_mel_bands;
    let out_size = usize::try_from(out_size).unwrap_or(0);
    if out_size < bands {
        return Err(SpectroError::SizeMismatch {
            expected: bands,
            actual: out_size,
        }
        .into());
    }
    Ok(size)
}

/// Frames rejected by the processor so far, or `-2` without a processor.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_processor_dropped_frames(ctx: *const SpectroContext) -> i64 {
    unsafe {
        query(ctx, MELSCOPE_ERR_NOT_INITIALIZED as i64, |c| {
            c.processor
                .as_ref()
                .map(|p| i64::try_from(p.stats().frames_dropped).unwrap_or(i64::MAX))
        })
    }
}

// --- Texture renderer ---

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn init_texture_renderer(
    ctx: *mut SpectroContext,
    width: i32,
    height: i32,
    num_mel_bands: i32,
) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            let renderer = WaterfallRenderer::new(
                non_negative(width, "width")?,
                non_negative(height, "height")?,
                non_negative(num_mel_bands, "mel band count")?,
            )?;
            c.renderer = Some(renderer);
            Ok(MELSCOPE_OK)
        })
    }
}

/// # Safety
/// `data` must point to `size` readable values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn update_texture_column(
    ctx: *mut SpectroContext,
    data: *const f32,
    size: i32,
) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            if data.is_null() {
                return Err(FfiError::Null("data"));
            }
            let size = usize::try_from(size).map_err(|_| {
                SpectroError::InputValidation(format!("negative column size {size}"))
            })?;
            let column = slice::from_raw_parts(data, size);
            c.renderer_mut()?.update_column(column)?;
            Ok(MELSCOPE_OK)
        })
    }
}

/// GPU texture handle; `0` in software mode or without a renderer.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_texture_id(ctx: *const SpectroContext) -> u32 {
    unsafe { query(ctx, 0, |c| c.renderer.as_ref().map(|r| r.texture_id())) }
}

/// Copies the unrotated RGBA image into `buffer`; returns the bytes written.
///
/// `size` must be at least `width * height * 4`.
///
/// # Safety
/// `buffer` must point to `size` writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_texture_data(
    ctx: *mut SpectroContext,
    buffer: *mut u8,
    size: i32,
) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            if buffer.is_null() {
                return Err(FfiError::Null("buffer"));
            }
            let renderer = c.renderer()?;
            let needed = renderer.width() * renderer.height() * 4;
            let size = usize::try_from(size).unwrap_or(0);
            if size < needed {
                return Err(SpectroError::SizeMismatch {
                    expected: needed,
                    actual: size,
                }
                .into());
            }
            let out = slice::from_raw_parts_mut(buffer, needed);
            Ok(count(renderer.copy_texture_data(out)))
        })
    }
}

/// `color_map`: 0 = viridis, 1 = inferno, 2 = plasma.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn set_texture_color_map(ctx: *mut SpectroContext, color_map: i32) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            let map = ColorMap::from_code(color_map).ok_or_else(|| {
                SpectroError::InputValidation(format!("unknown color map {color_map}"))
            })?;
            c.renderer_mut()?.set_color_map(map);
            Ok(MELSCOPE_OK)
        })
    }
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn set_texture_min_max(
    ctx: *mut SpectroContext,
    min_value: f32,
    max_value: f32,
) -> i32 {
    unsafe {
        guarded(ctx, |c| {
            c.renderer_mut()?.set_min_max(min_value, max_value);
            Ok(MELSCOPE_OK)
        })
    }
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_texture_width(ctx: *const SpectroContext) -> i32 {
    unsafe {
        query(ctx, MELSCOPE_ERR_NOT_INITIALIZED, |c| {
            c.renderer.as_ref().map(|r| count(r.width()))
        })
    }
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_texture_height(ctx: *const SpectroContext) -> i32 {
    unsafe {
        query(ctx, MELSCOPE_ERR_NOT_INITIALIZED, |c| {
            c.renderer.as_ref().map(|r| count(r.height()))
        })
    }
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_texture_num_mel_bands(ctx: *const SpectroContext) -> i32 {
    unsafe {
        query(ctx, MELSCOPE_ERR_NOT_INITIALIZED, |c| {
            c.renderer.as_ref().map(|r| count(r.num_mel_bands()))
        })
    }
}

/// Ring column the next update writes to.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_texture_current_column(ctx: *const SpectroContext) -> i32 {
    unsafe {
        query(ctx, MELSCOPE_ERR_NOT_INITIALIZED, |c| {
            c.renderer.as_ref().map(|r| count(r.current_column()))
        })
    }
}

/// Duration of the last column update in milliseconds; `0` before the first update.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_texture_last_update_time_ms(ctx: *const SpectroContext) -> f64 {
    unsafe { query(ctx, 0.0, |c| c.renderer.as_ref().map(|r| r.stats().last_update_ms)) }
}
