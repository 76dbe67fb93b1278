use log::debug;

use super::{CaptureBackend, CaptureConfig, SampleSink, SourceKind};

/// Synthetic source fed through [`AudioCapture::inject_mock_data`](super::AudioCapture::inject_mock_data).
///
/// Paced: the capture thread emits one frame per hop, padding with silence.
#[derive(Debug, Default)]
pub struct MockBackend {
    running: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureBackend for MockBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Mock
    }

    fn open(&mut self, config: &CaptureConfig) -> anyhow::Result<()> {
        debug!(
            "Mock source opened at {} Hz, {} samples per frame",
            config.sample_rate, config.buffer_size
        );
        Ok(())
    }

    fn start(&mut self, _sink: SampleSink) -> anyhow::Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn paced(&self) -> bool {
        true
    }
}
