//! GPU capability detection
//!
//! Everything the packer and the renderer branch on is collected once here so
//! fallbacks are decided in one place and can be faked in tests.

use std::sync::Arc;

use crate::error::{VolumeError, VolumeResult};

/// Capability set the volume pipeline depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub texture_3d: bool,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    /// Rgba32Float usable as a render attachment (needed for readback passes)
    pub float_render_targets: bool,
}

/// Where per-slice precompute kernels run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceBackend {
    Cpu,
    Gpu,
}

/// Device and queue shared by every subsystem
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub caps: GpuCapabilities,
}

pub fn detect_capabilities(adapter: &wgpu::Adapter, device: &wgpu::Device) -> GpuCapabilities {
    let limits = device.limits();
    let float_features = adapter.get_texture_format_features(wgpu::TextureFormat::Rgba32Float);
    let float_render_targets = float_features
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT);

    let caps = GpuCapabilities {
        texture_3d: limits.max_texture_dimension_3d > 0,
        max_texture_dimension_2d: limits.max_texture_dimension_2d,
        max_texture_dimension_3d: limits.max_texture_dimension_3d,
        float_render_targets,
    };

    if !caps.float_render_targets {
        log::warn!(
            "[GpuCapabilities] Rgba32Float render targets unavailable, eraser and GPU precompute disabled"
        );
    }
    log::info!("[GpuCapabilities] Detected {:?}", caps);
    caps
}

/// GPU kernels read float targets back, so they need float render targets
pub fn choose_slice_backend(caps: &GpuCapabilities) -> SliceBackend {
    if caps.float_render_targets {
        SliceBackend::Gpu
    } else {
        SliceBackend::Cpu
    }
}

/// Create a device without a surface, for offscreen rendering and tests
pub fn request_headless_context() -> VolumeResult<GpuContext> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(VolumeError::AdapterNotFound)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Volume Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await?;

        let caps = detect_capabilities(&adapter, &device);
        Ok(GpuContext {
            device: Arc::new(device),
            queue: Arc::new(queue),
            caps,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_follows_float_targets() {
        let mut caps = GpuCapabilities {
            texture_3d: true,
            max_texture_dimension_2d: 4096,
            max_texture_dimension_3d: 256,
            float_render_targets: true,
        };
        assert_eq!(choose_slice_backend(&caps), SliceBackend::Gpu);
        caps.float_render_targets = false;
        assert_eq!(choose_slice_backend(&caps), SliceBackend::Cpu);
    }
}
