//! GPU state owned by the renderer
//!
//! Everything that depends on the loaded volume lives in `VolumeResources`
//! and is dropped as a unit before a reload. `generation` counts reloads;
//! pipeline results from an older generation are ignored.

use wgpu::util::DeviceExt;

use super::geometry::BoundsGeometry;
use super::pipeline_cache::{PipelineCache, RenderLayouts};
use super::readiness::ReadinessBarrier;
use super::render_data::{BoundsUniform, RenderUniform};
use super::targets::{RenderTargets, TargetBindings};
use crate::gpu::GpuContext;
use crate::transfer::TRANSFER_SIZE;
use crate::volume::{PackedVolume, VolumeTexture};

pub struct VolumeResources {
    pub packed: PackedVolume,
    pub layouts: RenderLayouts,
    pub volume: VolumeTexture,
    pub mask: VolumeTexture,
    /// Real AO volume or a 1-voxel placeholder
    pub ambient: VolumeTexture,
    pub ambient_ready: bool,
    /// Real ROI ids or a 1-voxel placeholder
    pub roi_ids: VolumeTexture,
    pub roi_lut: wgpu::Texture,
    pub roi_lut_view: wgpu::TextureView,
    pub transfer: wgpu::Texture,
    pub transfer_view: wgpu::TextureView,
    pub geometry: BoundsGeometry,
    pub bounds_buffer: wgpu::Buffer,
    pub render_buffer: wgpu::Buffer,
    pub bounds_bind_group: wgpu::BindGroup,
    pub uniform_bind_group: wgpu::BindGroup,
    pub volume_bind_group: wgpu::BindGroup,
}

pub struct RenderContext {
    pub gpu: GpuContext,
    pub output_format: wgpu::TextureFormat,
    /// Format of the entry/exit/low-res targets
    pub float_format: wgpu::TextureFormat,
    pub generation: u64,
    pub readiness: ReadinessBarrier,
    pub pipelines: PipelineCache,
    pub resources: Option<VolumeResources>,
    pub targets: Option<RenderTargets>,
    pub bindings: Option<TargetBindings>,
}

impl RenderContext {
    pub fn new(gpu: GpuContext, output_format: wgpu::TextureFormat, float_format: wgpu::TextureFormat) -> Self {
        Self {
            gpu,
            output_format,
            float_format,
            generation: 0,
            readiness: ReadinessBarrier::new(),
            pipelines: PipelineCache::new(),
            resources: None,
            targets: None,
            bindings: None,
        }
    }

    /// Drop every volume-dependent resource and start a new generation
    pub fn begin_reload(&mut self) -> u64 {
        self.bindings.take();
        self.targets.take();
        self.pipelines.clear();
        self.resources.take();
        self.generation += 1;
        self.generation
    }
}

pub fn create_transfer_texture(device: &wgpu::Device, queue: &wgpu::Queue, rgba: &[u8]) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Transfer Function"),
        size: wgpu::Extent3d {
            width: TRANSFER_SIZE as u32,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_transfer_texture(queue, &texture, rgba);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

pub fn write_transfer_texture(queue: &wgpu::Queue, texture: &wgpu::Texture, rgba: &[u8]) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(TRANSFER_SIZE as u32 * 4),
            rows_per_image: Some(1),
        },
        wgpu::Extent3d {
            width: TRANSFER_SIZE as u32,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
}

pub fn create_uniform_buffers(device: &wgpu::Device) -> (wgpu::Buffer, wgpu::Buffer) {
    let bounds = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Bounds Uniform"),
        contents: bytemuck::bytes_of(&<BoundsUniform as bytemuck::Zeroable>::zeroed()),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });
    let render = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Render Uniform"),
        contents: bytemuck::bytes_of(&<RenderUniform as bytemuck::Zeroable>::zeroed()),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });
    (bounds, render)
}

pub fn create_uniform_bind_groups(
    device: &wgpu::Device,
    layouts: &RenderLayouts,
    bounds_buffer: &wgpu::Buffer,
    render_buffer: &wgpu::Buffer,
) -> (wgpu::BindGroup, wgpu::BindGroup) {
    let bounds = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Bounds Bind Group"),
        layout: &layouts.bounds,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: bounds_buffer.as_entire_binding(),
        }],
    });
    let uniforms = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Render Uniform Bind Group"),
        layout: &layouts.uniforms,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: render_buffer.as_entire_binding(),
        }],
    });
    (bounds, uniforms)
}

/// Group 1 of the raymarch programs
pub struct VolumeBindings<'a> {
    pub volume: &'a wgpu::TextureView,
    pub mask: &'a wgpu::TextureView,
    pub ambient: &'a wgpu::TextureView,
    pub transfer: &'a wgpu::TextureView,
    pub roi_lut: &'a wgpu::TextureView,
    pub roi_ids: &'a wgpu::TextureView,
}

pub fn create_volume_bind_group(
    device: &wgpu::Device,
    layouts: &RenderLayouts,
    views: VolumeBindings<'_>,
) -> wgpu::BindGroup {
    let entries = [
        views.volume,
        views.mask,
        views.ambient,
        views.transfer,
        views.roi_lut,
        views.roi_ids,
    ];
    let entries: Vec<wgpu::BindGroupEntry> = entries
        .iter()
        .enumerate()
        .map(|(binding, view)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: wgpu::BindingResource::TextureView(view),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Volume Bind Group"),
        layout: &layouts.volume,
        entries: &entries,
    })
}

impl VolumeResources {
    /// Rebuild group 1 after a texture was replaced
    pub fn rebind_volume(&mut self, device: &wgpu::Device) {
        self.volume_bind_group = create_volume_bind_group(
            device,
            &self.layouts,
            VolumeBindings {
                volume: &self.volume.view,
                mask: &self.mask.view,
                ambient: &self.ambient.view,
                transfer: &self.transfer_view,
                roi_lut: &self.roi_lut_view,
                roi_ids: &self.roi_ids.view,
            },
        );
    }
}
