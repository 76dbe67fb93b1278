use serde::Serialize;

use crate::error::{Result, SpectroError};

/// Where the waterfall image ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// A real GPU texture receives every update.
    Hardware,
    /// Only the CPU-side image buffer exists.
    Software,
}

/// Destination for the reconstructed RGBA image.
///
/// Implementations receive the full `width * height * 4` image on every
/// upload, rows top to bottom.
pub trait TextureSurface: Send {
    fn mode(&self) -> RenderMode;

    /// Backend texture handle; `0` when there is none.
    fn texture_id(&self) -> u32 {
        0
    }

    fn upload(&mut self, rgba: &[u8]) -> Result<()>;

    /// Whether [`read_back`](Self::read_back) returns the surface's own pixels.
    fn supports_readback(&self) -> bool {
        false
    }

    /// Copies the surface pixels into `out` (`width * height * 4` bytes).
    fn read_back(&self, _out: &mut [u8]) -> Result<()> {
        Err(SpectroError::ResourceUnavailable(
            "surface has no readable texture".into(),
        ))
    }
}

/// Surface with no GPU resources; the renderer's CPU image is authoritative.
#[derive(Debug, Default)]
pub struct SoftwareSurface {
    uploads: u64,
}

impl SoftwareSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }
}

impl TextureSurface for SoftwareSurface {
    fn mode(&self) -> RenderMode {
        RenderMode::Software
    }

    fn upload(&mut self, _rgba: &[u8]) -> Result<()> {
        self.uploads += 1;
        Ok(())
    }
}
