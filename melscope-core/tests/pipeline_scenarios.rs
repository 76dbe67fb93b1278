use std::time::Duration;

use melscope_core::{
    ColorMap, ColumnUpdate, PipelineConfig, ProcessorConfig, RenderMode, SpectroError,
    SpectrogramPipeline, SpectrogramProcessor, WaterfallRenderer,
};

const SAMPLE_RATE: f32 = 32000.0;

fn tone(freq: f32, amplitude: f32, len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE;
            (amplitude * (2.0 * std::f32::consts::PI * freq * t).sin() * i16::MAX as f32) as i16
        })
        .collect()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap()
}

fn software_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.renderer.hardware = false;
    config
}

fn next_column(pipeline: &SpectrogramPipeline) -> ColumnUpdate {
    pipeline
        .columns()
        .recv_timeout(Duration::from_secs(5))
        .expect("no column produced")
}

#[test]
fn reference_tone_through_processor() {
    let mut processor = SpectrogramProcessor::new(ProcessorConfig::default()).unwrap();
    let frame = tone(1000.0, 0.8, 1024);
    let spectrum = processor.process_frame(&frame).unwrap();
    assert_eq!(spectrum.len(), 64);
    let peak = argmax(&spectrum);
    assert!(peak > 5 && peak < 58, "peak at band {peak}");
}

#[test]
fn processor_output_feeds_renderer() {
    let mut processor = SpectrogramProcessor::new(ProcessorConfig::default()).unwrap();
    let mut renderer = WaterfallRenderer::software(512, 256, 64).unwrap();
    let signal = tone(1000.0, 0.8, 1024 + 512 * 599);
    for frame in signal.windows(1024).step_by(512) {
        let spectrum = processor.process_frame(frame).unwrap();
        renderer.update_column(&spectrum).unwrap();
    }
    assert_eq!(renderer.stats().texture_updates, 600);
    assert_eq!(renderer.texture_data().len(), 512 * 256 * 4);
}

#[test]
fn mock_tone_produces_peaked_columns() {
    let pipeline = SpectrogramPipeline::new(software_config()).unwrap();
    pipeline.inject_mock_data(&tone(1000.0, 0.8, 512 * 8)).unwrap();
    pipeline.start().unwrap();

    let first = next_column(&pipeline);
    let second = next_column(&pipeline);
    pipeline.stop().unwrap();

    for update in [&first, &second] {
        assert_eq!(update.spectrum.len(), 64);
        assert_eq!(update.colors.len(), 64);
        let peak = argmax(&update.spectrum);
        assert!(peak > 5 && peak < 58, "peak at band {peak}");
        assert_eq!(update.colors[peak], ColorMap::Viridis.color(1.0));
    }
    assert_eq!(first.column, 0);
    assert_eq!(second.column, 1);

    let stats = pipeline.stats().unwrap();
    assert!(stats.processor.frames_processed >= 2);
    assert_eq!(stats.render_mode, RenderMode::Software);
    pipeline.shutdown().unwrap();
}

#[test]
fn config_update_rejected_while_recording() {
    let pipeline = SpectrogramPipeline::new(software_config()).unwrap();
    pipeline.start().unwrap();
    let smaller = ProcessorConfig {
        frame_size: 512,
        hop_size: 256,
        num_mel_bands: 40,
        ..ProcessorConfig::default()
    };
    assert!(matches!(
        pipeline.update_processor_config(smaller.clone()),
        Err(SpectroError::ConcurrencyMisuse(_))
    ));

    pipeline.stop().unwrap();
    pipeline.update_processor_config(smaller).unwrap();
    while pipeline.columns().try_recv().is_ok() {}

    pipeline.inject_mock_data(&tone(1000.0, 0.8, 512 * 4)).unwrap();
    pipeline.start().unwrap();
    let update = next_column(&pipeline);
    pipeline.stop().unwrap();
    assert_eq!(update.spectrum.len(), 40);
}

#[test]
fn invalid_config_update_keeps_pipeline_running() {
    let pipeline = SpectrogramPipeline::new(software_config()).unwrap();
    let bad = ProcessorConfig {
        frame_size: 1000,
        ..ProcessorConfig::default()
    };
    assert!(matches!(
        pipeline.update_processor_config(bad),
        Err(SpectroError::Configuration(_))
    ));

    pipeline.inject_mock_data(&tone(1000.0, 0.8, 1024)).unwrap();
    pipeline.start().unwrap();
    assert_eq!(next_column(&pipeline).spectrum.len(), 64);
    pipeline.stop().unwrap();
}

#[test]
fn config_update_cannot_change_sample_rate() {
    let pipeline = SpectrogramPipeline::new(software_config()).unwrap();
    let resampled = ProcessorConfig {
        sample_rate: 16000,
        ..ProcessorConfig::default()
    };
    assert!(matches!(
        pipeline.update_processor_config(resampled),
        Err(SpectroError::Configuration(_))
    ));
    assert_eq!(pipeline.capture().config().sample_rate, 32000);

    // The 32 kHz chain is still active, so the tone lands where it did before.
    pipeline.inject_mock_data(&tone(1000.0, 0.8, 1024)).unwrap();
    pipeline.start().unwrap();
    let update = next_column(&pipeline);
    pipeline.stop().unwrap();
    assert_eq!(update.spectrum.len(), 64);
    let peak = argmax(&update.spectrum);
    assert!(peak > 5 && peak < 58, "peak at band {peak}");
}

#[test]
fn snapshot_has_full_texture_size() {
    let pipeline = SpectrogramPipeline::new(software_config()).unwrap();
    let image = pipeline.snapshot().unwrap();
    assert_eq!(image.len(), 512 * 256 * 4);
    assert!(image.chunks_exact(4).all(|p| p == [0u8, 0, 0, 255]));

    pipeline.set_color_map(ColorMap::Plasma).unwrap();
    pipeline.inject_mock_data(&tone(1000.0, 0.8, 1024)).unwrap();
    pipeline.start().unwrap();
    let update = next_column(&pipeline);
    pipeline.stop().unwrap();
    let peak = argmax(&update.spectrum);
    assert_eq!(update.colors[peak], ColorMap::Plasma.color(1.0));

    let image = pipeline.snapshot().unwrap();
    assert!(image.chunks_exact(4).any(|p| p != [0u8, 0, 0, 255]));
}

#[test]
fn invalid_pipeline_config_fails_fast() {
    let mut config = software_config();
    config.processor.hop_size = 0;
    assert!(matches!(
        SpectrogramPipeline::new(config),
        Err(SpectroError::Configuration(_))
    ));

    let mut config = software_config();
    config.renderer.width = 0;
    assert!(SpectrogramPipeline::new(config).is_err());
}
