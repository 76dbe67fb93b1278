use std::ffi::{CStr, c_void};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use melscope_ffi::*;

struct Context(*mut SpectroContext);

impl Context {
    fn new() -> Self {
        Self(melscope_context_create())
    }

    fn error(&self) -> String {
        unsafe { CStr::from_ptr(get_error_message(self.0)) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { melscope_context_destroy(self.0) };
    }
}

fn mock_capture(buffer_size: i32) -> MelscopeCaptureConfig {
    MelscopeCaptureConfig {
        sample_rate: 32000,
        buffer_size,
        num_channels: 1,
        format: 0,
        platform: 2,
    }
}

fn default_processor() -> MelscopeProcessorConfig {
    MelscopeProcessorConfig {
        sample_rate: 32000,
        frame_size: 1024,
        hop_size: 512,
        num_mel_bands: 64,
        min_freq: 20.0,
        max_freq: 8000.0,
    }
}

fn tone(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / 32000.0;
            (0.8 * (2.0 * std::f32::consts::PI * 1000.0 * t).sin() * i16::MAX as f32) as i16
        })
        .collect()
}

unsafe extern "C" fn count_frames(user_data: *mut c_void, samples: *const i16, len: i32) {
    assert!(!samples.is_null());
    assert_eq!(len, 256);
    let counter = unsafe { &*(user_data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn null_context_is_rejected() {
    unsafe {
        assert_eq!(start_recording(ptr::null_mut()), MELSCOPE_ERR_INVALID_ARGUMENT);
        assert_eq!(get_texture_width(ptr::null()), MELSCOPE_ERR_NOT_INITIALIZED);
        assert_eq!(get_texture_id(ptr::null()), 0);
        melscope_context_destroy(ptr::null_mut());
    }
}

#[test]
fn calls_before_init_report_not_initialized() {
    let ctx = Context::new();
    unsafe {
        assert_eq!(start_recording(ctx.0), MELSCOPE_ERR_NOT_INITIALIZED);
        assert!(ctx.error().contains("audio input"));

        let column = [0.5f32; 8];
        assert_eq!(
            update_texture_column(ctx.0, column.as_ptr(), 8),
            MELSCOPE_ERR_NOT_INITIALIZED
        );
        assert_eq!(get_processor_dropped_frames(ctx.0), MELSCOPE_ERR_NOT_INITIALIZED as i64);
    }
}

#[test]
fn invalid_configs_map_to_configuration_error() {
    let ctx = Context::new();
    unsafe {
        let mut capture = mock_capture(512);
        capture.format = 9;
        assert_eq!(init_audio_input(ctx.0, &capture), MELSCOPE_ERR_CONFIGURATION);

        let mut processor = default_processor();
        processor.frame_size = 1000;
        assert_eq!(init_mel_processor(ctx.0, &processor), MELSCOPE_ERR_CONFIGURATION);
        assert!(!ctx.error().is_empty());

        assert_eq!(init_texture_renderer(ctx.0, 0, 256, 64), MELSCOPE_ERR_CONFIGURATION);
        assert_eq!(init_audio_input(ctx.0, ptr::null()), MELSCOPE_ERR_INVALID_ARGUMENT);
    }
}

#[test]
fn processes_frame_into_caller_buffer() {
    let ctx = Context::new();
    unsafe {
        assert_eq!(init_mel_processor(ctx.0, &default_processor()), MELSCOPE_OK);
        let frame = tone(1024);
        let mut out = vec![-1.0f32; 64];
        let written = process_audio_frame(ctx.0, frame.as_ptr(), 1024, out.as_mut_ptr(), 64);
        assert_eq!(written, 64);
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(out.iter().any(|&v| v == 1.0));

        let short = tone(100);
        assert_eq!(
            process_audio_frame(ctx.0, short.as_ptr(), 100, out.as_mut_ptr(), 64),
            MELSCOPE_ERR_INPUT
        );
        assert_eq!(get_processor_dropped_frames(ctx.0), 1);

        assert_eq!(
            process_audio_frame(ctx.0, frame.as_ptr(), 1024, out.as_mut_ptr(), 10),
            MELSCOPE_ERR_INPUT
        );
    }
}

#[test]
fn rejected_buffers_count_as_dropped_frames() {
    let ctx = Context::new();
    unsafe {
        assert_eq!(init_mel_processor(ctx.0, &default_processor()), MELSCOPE_OK);
        let mut out = vec![0.0f32; 64];
        assert_eq!(
            process_audio_frame(ctx.0, ptr::null(), 1024, out.as_mut_ptr(), 64),
            MELSCOPE_ERR_INVALID_ARGUMENT
        );
        assert_eq!(get_processor_dropped_frames(ctx.0), 1);

        let frame = tone(1024);
        assert_eq!(
            process_audio_frame(ctx.0, frame.as_ptr(), 1024, out.as_mut_ptr(), 32),
            MELSCOPE_ERR_INPUT
        );
        assert_eq!(
            process_audio_frame(ctx.0, frame.as_ptr(), 1024, ptr::null_mut(), 64),
            MELSCOPE_ERR_INVALID_ARGUMENT
        );
        assert_eq!(get_processor_dropped_frames(ctx.0), 3);

        assert_eq!(
            process_audio_frame(ctx.0, frame.as_ptr(), 1024, out.as_mut_ptr(), 64),
            64
        );
        assert_eq!(get_processor_dropped_frames(ctx.0), 3);
    }
}

#[test]
fn texture_round_trip() {
    let ctx = Context::new();
    unsafe {
        assert_eq!(init_texture_renderer(ctx.0, 16, 8, 4), MELSCOPE_OK);
        assert_eq!(get_texture_width(ctx.0), 16);
        assert_eq!(get_texture_height(ctx.0), 8);
        assert_eq!(get_texture_num_mel_bands(ctx.0), 4);
        assert_eq!(get_texture_current_column(ctx.0), 0);

        let column = [0.0f32, 0.25, 0.5, 1.0];
        assert_eq!(update_texture_column(ctx.0, column.as_ptr(), 4), MELSCOPE_OK);
        assert_eq!(get_texture_current_column(ctx.0), 1);
        assert!(get_texture_last_update_time_ms(ctx.0) >= 0.0);

        let wrong = [0.0f32; 3];
        assert_eq!(update_texture_column(ctx.0, wrong.as_ptr(), 3), MELSCOPE_ERR_INPUT);

        let mut small = vec![0u8; 10];
        assert_eq!(get_texture_data(ctx.0, small.as_mut_ptr(), 10), MELSCOPE_ERR_INPUT);

        let mut image = vec![0u8; 16 * 8 * 4];
        let written = get_texture_data(ctx.0, image.as_mut_ptr(), image.len() as i32);
        assert_eq!(written, 16 * 8 * 4);
        assert!(image.chunks_exact(4).all(|p| p[3] == 255));

        assert_eq!(set_texture_color_map(ctx.0, 1), MELSCOPE_OK);
        assert_eq!(set_texture_color_map(ctx.0, 7), MELSCOPE_ERR_INPUT);
        assert_eq!(set_texture_min_max(ctx.0, 0.2, 0.8), MELSCOPE_OK);
    }
}

#[test]
fn mock_capture_drives_c_callback() {
    let ctx = Context::new();
    let counter = Box::new(AtomicUsize::new(0));
    unsafe {
        assert_eq!(init_audio_input(ctx.0, &mock_capture(256)), MELSCOPE_OK);
        let user_data = &*counter as *const AtomicUsize as *mut c_void;
        assert_eq!(set_audio_callback(ctx.0, Some(count_frames), user_data), MELSCOPE_OK);

        assert_eq!(start_recording(ctx.0), MELSCOPE_OK);
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stop_recording(ctx.0), MELSCOPE_OK);
        assert!(counter.load(Ordering::SeqCst) >= 3);

        let after_stop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);

        assert_eq!(cleanup(ctx.0), MELSCOPE_OK);
        assert_eq!(start_recording(ctx.0), MELSCOPE_ERR_NOT_INITIALIZED);
    }
}

#[test]
fn logging_init_is_idempotent() {
    assert_eq!(melscope_init_logging(), MELSCOPE_OK);
    assert_eq!(melscope_init_logging(), MELSCOPE_OK);
}
