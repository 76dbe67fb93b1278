//! # Waterfall Renderer Module
//!
//! Keeps a scrolling history of colored spectrum columns and exposes it as
//! an RGBA image, oldest column on the left and newest on the right.
//!
//! ## Features
//! - Circular column ring: one column written per update, no shifting
//! - Band-major ring layout so each image row is two contiguous slice copies
//! - Nearest-band vertical resampling, lowest band at the bottom row
//! - Hardware texture via wgpu with silent fallback to software

use std::time::Instant;

use log::{info, warn};
use serde::Serialize;

use crate::color::ColorMap;
use crate::error::{Result, SpectroError};

#[cfg(feature = "gpu")]
mod gpu;
mod surface;

#[cfg(feature = "gpu")]
pub use self::gpu::GpuSurface;
pub use self::surface::{RenderMode, SoftwareSurface, TextureSurface};

const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RendererStats {
    pub texture_updates: u64,
    pub last_update_ms: f64,
    pub avg_update_ms: f64,
}

/// Scrolling spectrogram texture.
pub struct WaterfallRenderer {
    width: usize,
    height: usize,
    num_mel_bands: usize,
    /// `num_mel_bands` rows of `width` RGBA columns.
    ring: Vec<u8>,
    image: Vec<u8>,
    cursor: usize,
    color_map: ColorMap,
    min_value: f32,
    max_value: f32,
    surface: Box<dyn TextureSurface>,
    stats: RendererStats,
}

fn opaque_black(pixels: usize) -> Vec<u8> {
    OPAQUE_BLACK.repeat(pixels)
}

impl WaterfallRenderer {
    /// Creates a renderer, trying a GPU texture first.
    ///
    /// A missing GPU is not an error: the renderer logs a warning and runs in
    /// software mode.
    pub fn new(width: usize, height: usize, num_mel_bands: usize) -> Result<Self> {
        validate_dimensions(width, height, num_mel_bands)?;
        let surface = hardware_surface(width, height);
        Self::with_surface(width, height, num_mel_bands, surface)
    }

    /// Creates a renderer that never touches the GPU.
    pub fn software(width: usize, height: usize, num_mel_bands: usize) -> Result<Self> {
        Self::with_surface(width, height, num_mel_bands, Box::new(SoftwareSurface::new()))
    }

    /// Creates a renderer on a caller-supplied surface.
    pub fn with_surface(
        width: usize,
        height: usize,
        num_mel_bands: usize,
        surface: Box<dyn TextureSurface>,
    ) -> Result<Self> {
        validate_dimensions(width, height, num_mel_bands)?;
        info!(
            "Waterfall renderer {width}x{height}, {num_mel_bands} bands, {:?} mode",
            surface.mode()
        );
        Ok(Self {
            width,
            height,
            num_mel_bands,
            ring: opaque_black(width * num_mel_bands),
            image: opaque_black(width * height),
            cursor: 0,
            color_map: ColorMap::default(),
            min_value: 0.0,
            max_value: 1.0,
            surface,
            stats: RendererStats::default(),
        })
    }

    /// Writes one spectrum as the newest column and refreshes the texture.
    ///
    /// # Arguments
    /// * `energies` - Exactly `num_mel_bands` values, lowest band first
    ///
    /// # Errors
    /// * `SizeMismatch` - wrong length; nothing is modified
    pub fn update_column(&mut self, energies: &[f32]) -> Result<()> {
        if energies.len() != self.num_mel_bands {
            return Err(SpectroError::SizeMismatch {
                expected: self.num_mel_bands,
                actual: energies.len(),
            });
        }
        let started = Instant::now();

        let range = self.max_value - self.min_value;
        let row_bytes = self.width * 4;
        let col = self.cursor * 4;
        for (band, &energy) in energies.iter().enumerate() {
            let normalized = if range > 0.0 {
                (energy.clamp(self.min_value, self.max_value) - self.min_value) / range
            } else {
                0.0
            };
            let color = self.color_map.color(normalized);
            let offset = band * row_bytes + col;
            self.ring[offset..offset + 4].copy_from_slice(&color);
        }

        self.rebuild_image();
        self.upload();
        self.cursor = (self.cursor + 1) % self.width;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let stats = &mut self.stats;
        stats.texture_updates += 1;
        stats.last_update_ms = elapsed_ms;
        stats.avg_update_ms += (elapsed_ms - stats.avg_update_ms) / stats.texture_updates as f64;
        Ok(())
    }

    fn rebuild_image(&mut self) {
        let row_bytes = self.width * 4;
        // The column after the cursor is the oldest one.
        let split = ((self.cursor + 1) % self.width) * 4;
        let tail = row_bytes - split;

        for (y, dst) in self.image.chunks_exact_mut(row_bytes).enumerate() {
            let from_bottom = self.height - 1 - y;
            let band = (from_bottom * self.num_mel_bands / self.height).min(self.num_mel_bands - 1);
            let src = &self.ring[band * row_bytes..(band + 1) * row_bytes];
            dst[..tail].copy_from_slice(&src[split..]);
            dst[tail..].copy_from_slice(&src[..split]);
        }
    }

    fn upload(&mut self) {
        if let Err(e) = self.surface.upload(&self.image) {
            if self.surface.mode() == RenderMode::Hardware {
                warn!("Texture upload failed, switching to software mode: {e}");
                self.surface = Box::new(SoftwareSurface::new());
            } else {
                warn!("Software surface rejected upload: {e}");
            }
        }
    }

    /// The current unrotated RGBA image (`width * height * 4` bytes).
    pub fn texture_data(&self) -> Vec<u8> {
        let mut out = vec![0; self.image.len()];
        self.copy_texture_data(&mut out);
        out
    }

    /// Copies the image into `out`, returning the number of bytes written.
    ///
    /// Reads the GPU texture in hardware mode and falls back to the CPU image
    /// when the readback fails.
    pub fn copy_texture_data(&self, out: &mut [u8]) -> usize {
        let n = self.image.len().min(out.len());
        if n == self.image.len() && self.surface.supports_readback() {
            match self.surface.read_back(&mut out[..n]) {
                Ok(()) => return n,
                Err(e) => warn!("Texture readback failed, returning CPU image: {e}"),
            }
        }
        out[..n].copy_from_slice(&self.image[..n]);
        n
    }

    /// Takes effect on the next [`update_column`](Self::update_column).
    pub fn set_color_map(&mut self, color_map: ColorMap) {
        self.color_map = color_map;
    }

    /// Sets the value range mapped onto the palette; takes effect on the next update.
    pub fn set_min_max(&mut self, min_value: f32, max_value: f32) {
        self.min_value = min_value;
        self.max_value = max_value;
    }

    pub fn color_map(&self) -> ColorMap {
        self.color_map
    }

    pub fn min_max(&self) -> (f32, f32) {
        (self.min_value, self.max_value)
    }

    /// GPU texture handle, `0` in software mode.
    pub fn texture_id(&self) -> u32 {
        self.surface.texture_id()
    }

    pub fn mode(&self) -> RenderMode {
        self.surface.mode()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_mel_bands(&self) -> usize {
        self.num_mel_bands
    }

    /// Ring column the next update writes to.
    pub fn current_column(&self) -> usize {
        self.cursor
    }

    pub fn stats(&self) -> &RendererStats {
        &self.stats
    }
}

fn validate_dimensions(width: usize, height: usize, num_mel_bands: usize) -> Result<()> {
    if width == 0 || height == 0 || num_mel_bands == 0 {
        return Err(SpectroError::config(format!(
            "renderer dimensions must be positive, got {width}x{height} with {num_mel_bands} bands"
        )));
    }
    Ok(())
}

#[cfg(feature = "gpu")]
fn hardware_surface(width: usize, height: usize) -> Box<dyn TextureSurface> {
    let dims = u32::try_from(width).ok().zip(u32::try_from(height).ok());
    let created = match dims {
        Some((w, h)) => GpuSurface::create(w, h),
        None => Err(SpectroError::ResourceUnavailable(
            "texture dimensions exceed u32".into(),
        )),
    };
    match created {
        Ok(surface) => Box::new(surface),
        Err(e) => {
            warn!("Hardware texture unavailable, using software mode: {e}");
            Box::new(SoftwareSurface::new())
        }
    }
}

#[cfg(not(feature = "gpu"))]
fn hardware_surface(_width: usize, _height: usize) -> Box<dyn TextureSurface> {
    Box::new(SoftwareSurface::new())
}
