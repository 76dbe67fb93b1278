//! Platform audio input through CPAL (Cross-Platform Audio Library).
//!
//! Both the `ios` and `android` source kinds use the default host and its
//! default input device. Multi-channel input is down-mixed to mono and
//! converted to 16-bit before it reaches the capture queue.

use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat as DeviceFormat, StreamConfig, SupportedStreamConfigRange};
use log::{error, info, warn};

use super::{CaptureBackend, CaptureConfig, SampleFormat, SampleSink, SourceKind, downmix_to_mono};

struct SendStream(cpal::Stream);
unsafe impl Send for SendStream {}
unsafe impl Sync for SendStream {}

#[derive(Debug, Clone)]
struct Negotiated {
    config: StreamConfig,
    format: DeviceFormat,
}

pub struct CpalBackend {
    kind: SourceKind,
    negotiated: Option<Negotiated>,
    stream: Option<SendStream>,
}

impl CpalBackend {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            negotiated: None,
            stream: None,
        }
    }
}

fn default_device() -> anyhow::Result<cpal::Device> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))
}

/// Picks the device configuration closest to what was asked for.
///
/// Preference order: matching channel count, then matching sample format,
/// then the smallest distance between the requested rate and the supported range.
///
/// # Returns
/// * `Some(config)` - Best matching configuration, with the rate clamped into range
/// * `None` - The device offers no f32 or i16 input
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    requested: &CaptureConfig,
) -> Option<Negotiated> {
    let preferred = match requested.format {
        SampleFormat::S16Le => DeviceFormat::I16,
        _ => DeviceFormat::F32,
    };
    let target = requested.sample_rate;

    let best = configs
        .into_iter()
        .filter(|c| matches!(c.sample_format(), DeviceFormat::F32 | DeviceFormat::I16))
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let rate_distance = if target < min {
                min - target
            } else if target > max {
                target - max
            } else {
                0
            };
            (
                c.channels() != requested.num_channels,
                c.sample_format() != preferred,
                rate_distance,
            )
        })?;

    let rate = target.clamp(best.min_sample_rate().0, best.max_sample_rate().0);
    let format = best.sample_format();
    let config = best.with_sample_rate(cpal::SampleRate(rate)).config();
    Some(Negotiated { config, format })
}

/// Fails when the device cannot run at the requested rate.
///
/// Frames carry no rate of their own, so a device running at another rate
/// would silently shift every mel band downstream.
fn ensure_rate(negotiated: &Negotiated, requested: u32) -> anyhow::Result<()> {
    let actual = negotiated.config.sample_rate.0;
    if actual != requested {
        return Err(anyhow!(
            "input device cannot run at {requested} Hz (closest supported rate is {actual} Hz)"
        ));
    }
    Ok(())
}

impl CaptureBackend for CpalBackend {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn open(&mut self, config: &CaptureConfig) -> anyhow::Result<()> {
        let device = default_device()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio input device: {name}");

        let configs = device
            .supported_input_configs()
            .context("querying supported input configs")?
            .collect::<Vec<_>>();
        let negotiated = find_supported_config(configs, config)
            .ok_or_else(|| anyhow!("No suitable f32 or i16 input format found"))?;

        ensure_rate(&negotiated, config.sample_rate)?;
        info!(
            "Negotiated {:?} input, {} channel(s) at {} Hz",
            negotiated.format, negotiated.config.channels, negotiated.config.sample_rate.0
        );
        self.negotiated = Some(negotiated);
        Ok(())
    }

    fn start(&mut self, sink: SampleSink) -> anyhow::Result<()> {
        let negotiated = self
            .negotiated
            .clone()
            .ok_or_else(|| anyhow!("input stream started before open"))?;
        let device = default_device()?;
        let channels = negotiated.config.channels as usize;
        let err_fn = |err| error!("Audio input stream error: {err}");

        let stream = match negotiated.format {
            DeviceFormat::F32 => {
                let mut mono = Vec::new();
                device.build_input_stream(
                    &negotiated.config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        downmix_to_mono(data, channels, |s| s, &mut mono);
                        sink.push(&mono);
                    },
                    err_fn,
                    None,
                )?
            }
            DeviceFormat::I16 => {
                let mut mono = Vec::new();
                device.build_input_stream(
                    &negotiated.config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        downmix_to_mono(data, channels, |s| s as f32 / 32768.0, &mut mono);
                        sink.push(&mono);
                    },
                    err_fn,
                    None,
                )?
            }
            other => return Err(anyhow!("Unsupported input sample format {other:?}")),
        };

        stream.play()?;
        self.stream = Some(SendStream(stream));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(SendStream(stream)) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause input stream: {e}");
            }
        }
    }
}
