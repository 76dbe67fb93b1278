//! Hardware waterfall texture through wgpu.
//!
//! One device and queue are shared by every renderer in the process. Adapter
//! discovery runs once; when it fails every later attempt fails fast and the
//! renderer stays in software mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{error, info, warn};
use once_cell::sync::OnceCell;

use super::surface::{RenderMode, TextureSurface};
use crate::error::{Result, SpectroError};

const BYTES_PER_PIXEL: u32 = 4;

static GPU_CONTEXT: OnceCell<Option<Arc<GpuContext>>> = OnceCell::new();
static NEXT_TEXTURE_ID: AtomicU32 = AtomicU32::new(1);

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    fn shared() -> Option<Arc<GpuContext>> {
        GPU_CONTEXT
            .get_or_init(|| match pollster::block_on(Self::request()) {
                Ok(ctx) => Some(Arc::new(ctx)),
                Err(e) => {
                    warn!("GPU unavailable, waterfall textures will use software mode: {e}");
                    None
                }
            })
            .clone()
    }

    async fn request() -> anyhow::Result<GpuContext> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("no suitable GPU adapter"))?;

        let info = adapter.get_info();
        info!("Waterfall GPU adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("melscope waterfall device"),
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|e| error!("Uncaptured wgpu error: {e}")));
        Ok(GpuContext { device, queue })
    }
}

/// An RGBA8 texture that receives the full waterfall image on every upload.
pub struct GpuSurface {
    ctx: Arc<GpuContext>,
    texture: wgpu::Texture,
    extent: wgpu::Extent3d,
    id: u32,
}

impl GpuSurface {
    /// Creates the texture on the shared device.
    ///
    /// # Errors
    /// * `ResourceUnavailable` - no adapter, or the device rejected the texture
    pub fn create(width: u32, height: u32) -> Result<Self> {
        let ctx = GpuContext::shared()
            .ok_or_else(|| SpectroError::ResourceUnavailable("no GPU device".into()))?;

        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("melscope waterfall"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let oom = pollster::block_on(ctx.device.pop_error_scope());
        let invalid = pollster::block_on(ctx.device.pop_error_scope());
        if let Some(e) = oom.or(invalid) {
            return Err(SpectroError::ResourceUnavailable(format!(
                "texture {width}x{height}: {e}"
            )));
        }

        let id = NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed);
        info!("Created waterfall texture {id} ({width}x{height})");
        Ok(Self {
            ctx,
            texture,
            extent,
            id,
        })
    }

    fn image_copy(&self) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }

    fn unpadded_row_bytes(&self) -> u32 {
        self.extent.width * BYTES_PER_PIXEL
    }
}

impl TextureSurface for GpuSurface {
    fn mode(&self) -> RenderMode {
        RenderMode::Hardware
    }

    fn texture_id(&self) -> u32 {
        self.id
    }

    fn upload(&mut self, rgba: &[u8]) -> Result<()> {
        let expected = (self.unpadded_row_bytes() * self.extent.height) as usize;
        if rgba.len() != expected {
            return Err(SpectroError::SizeMismatch {
                expected,
                actual: rgba.len(),
            });
        }

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.ctx.queue.write_texture(
            self.image_copy(),
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.unpadded_row_bytes()),
                rows_per_image: Some(self.extent.height),
            },
            self.extent,
        );
        match pollster::block_on(device.pop_error_scope()) {
            Some(e) => Err(SpectroError::ResourceUnavailable(format!(
                "texture upload: {e}"
            ))),
            None => Ok(()),
        }
    }

    fn supports_readback(&self) -> bool {
        true
    }

    fn read_back(&self, out: &mut [u8]) -> Result<()> {
        let row = self.unpadded_row_bytes() as usize;
        let height = self.extent.height as usize;
        if out.len() != row * height {
            return Err(SpectroError::SizeMismatch {
                expected: row * height,
                actual: out.len(),
            });
        }

        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_row = row.div_ceil(align) * align;
        let device = &self.ctx.device;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("melscope waterfall readback"),
            size: (padded_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("melscope waterfall readback"),
        });
        encoder.copy_texture_to_buffer(
            self.image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row as u32),
                    rows_per_image: Some(self.extent.height),
                },
            },
            self.extent,
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(SpectroError::ResourceUnavailable(format!(
                    "texture readback: {e}"
                )));
            }
            Err(_) => {
                return Err(SpectroError::ResourceUnavailable(
                    "texture readback never completed".into(),
                ));
            }
        }

        {
            let mapped = slice.get_mapped_range();
            for (dst, src) in out.chunks_exact_mut(row).zip(mapped.chunks_exact(padded_row)) {
                dst.copy_from_slice(&src[..row]);
            }
        }
        buffer.unmap();
        Ok(())
    }
}

impl Drop for GpuSurface {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}
