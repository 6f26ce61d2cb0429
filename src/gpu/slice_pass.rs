//! Per-slice GPU passes with batched readback
//!
//! A `SlicePass` renders a full-screen fragment kernel once per z-slice into
//! an R8Unorm target. Each slice's result is copied into a shared staging
//! buffer, so a batch of `batch` slices costs one submit and one map.

use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};

use super::readback::{create_staging_buffer, depad_rows, encode_texture_copy, map_staging_buffer, CopyLayout};
use crate::error::{VolumeError, VolumeResult};
use crate::gpu::GpuContext;
use crate::volume::AddressingMode;

/// Dynamic offsets into the slice uniform buffer must honor this alignment
const SLICE_UNIFORM_STRIDE: u64 = 256;

/// Produces the voxels of a range of z-slices, CPU or GPU
pub trait SliceKernel {
    fn label(&self) -> &'static str;

    /// Fill `out` (slice-major, `x + y*xDim` within a slice) for `z_range`
    fn process_slices(&mut self, z_range: Range<u32>, out: &mut [u8]) -> VolumeResult<()>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SliceUniform {
    pub z: u32,
    pub z_dim: u32,
    pub _padding: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<SliceUniform>(), 16);

pub struct SlicePass {
    ctx: GpuContext,
    label: &'static str,
    pipeline: wgpu::RenderPipeline,
    slice_buffer: wgpu::Buffer,
    slice_bind_group: wgpu::BindGroup,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    staging: wgpu::Buffer,
    copy: CopyLayout,
    batch: u32,
    z_dim: u32,
}

/// Build a pipeline inside a validation error scope and surface the error
pub fn build_checked<T>(
    device: &wgpu::Device,
    what: &str,
    build: impl FnOnce() -> T,
) -> VolumeResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(VolumeError::ShaderCompilation {
            variant: what.to_string(),
            error: error.to_string(),
        }),
        None => Ok(value),
    }
}

/// Group 1 of a slice kernel: the volume texture and one uniform block
pub fn kernel_bind_group_layout(device: &wgpu::Device, mode: &AddressingMode) -> wgpu::BindGroupLayout {
    let view_dimension = match mode {
        AddressingMode::Native3d => wgpu::TextureViewDimension::D3,
        AddressingMode::TiledAtlas(_) => wgpu::TextureViewDimension::D2,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Slice Kernel Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

impl SlicePass {
    /// `kernel_layout` is bound at group 1; the slice index lives at group 0
    pub fn new(
        ctx: &GpuContext,
        label: &'static str,
        shader_source: String,
        kernel_layout: &wgpu::BindGroupLayout,
        width: u32,
        height: u32,
        z_dim: u32,
        batch: u32,
    ) -> VolumeResult<Self> {
        let device: &Arc<wgpu::Device> = &ctx.device;
        let batch = batch.max(1);

        let slice_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Slice Index Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<SliceUniform>() as u64),
                },
                count: None,
            }],
        });

        let pipeline = build_checked(device, label, || {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(shader_source.into()),
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Slice Pipeline Layout"),
                bind_group_layouts: &[&slice_layout, kernel_layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_fullscreen",
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::R8Unorm,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })?;

        let slice_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Slice Index Buffer"),
            size: SLICE_UNIFORM_STRIDE * batch as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let slice_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Slice Index Bind Group"),
            layout: &slice_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &slice_buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<SliceUniform>() as u64),
                }),
            }],
        });

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Slice Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let copy = CopyLayout::new(width, height, wgpu::TextureFormat::R8Unorm)?;
        let staging = create_staging_buffer(device, "Slice Staging Buffer", copy.padded_size() * batch as u64);

        log::info!(
            "[SlicePass] {} ready: {}x{} slices, {} per readback",
            label,
            width,
            height,
            batch
        );

        Ok(Self {
            ctx: ctx.clone(),
            label,
            pipeline,
            slice_buffer,
            slice_bind_group,
            target,
            target_view,
            staging,
            copy,
            batch,
            z_dim,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Render and read back `z_range`, `batch` slices per round trip
    pub fn run(
        &self,
        kernel_bind_group: &wgpu::BindGroup,
        z_range: Range<u32>,
        out: &mut [u8],
    ) -> VolumeResult<()> {
        let slice_len = self.copy.tight_size();
        let expected = slice_len * z_range.len();
        if out.len() != expected {
            return Err(VolumeError::Internal {
                message: format!(
                    "{}: output holds {} bytes, {} slices need {}",
                    self.label,
                    out.len(),
                    z_range.len(),
                    expected
                ),
            });
        }

        let mut z = z_range.start;
        while z < z_range.end {
            let count = self.batch.min(z_range.end - z);
            let batch_start = Instant::now();

            let mut uniforms = vec![0u8; (SLICE_UNIFORM_STRIDE * count as u64) as usize];
            for i in 0..count {
                let uniform = SliceUniform {
                    z: z + i,
                    z_dim: self.z_dim,
                    _padding: [0; 2],
                };
                let offset = (SLICE_UNIFORM_STRIDE * i as u64) as usize;
                uniforms[offset..offset + std::mem::size_of::<SliceUniform>()]
                    .copy_from_slice(bytemuck::bytes_of(&uniform));
            }
            self.ctx.queue.write_buffer(&self.slice_buffer, 0, &uniforms);

            let mut encoder = self
                .ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(self.label),
                });
            for i in 0..count {
                {
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(self.label),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &self.target_view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass.set_pipeline(&self.pipeline);
                    pass.set_bind_group(
                        0,
                        &self.slice_bind_group,
                        &[(SLICE_UNIFORM_STRIDE * i as u64) as u32],
                    );
                    pass.set_bind_group(1, kernel_bind_group, &[]);
                    pass.draw(0..3, 0..1);
                }
                encode_texture_copy(
                    &mut encoder,
                    &self.target,
                    &self.copy,
                    &self.staging,
                    self.copy.padded_size() * i as u64,
                );
            }
            self.ctx.queue.submit(std::iter::once(encoder.finish()));

            let padded = map_staging_buffer(
                &self.ctx.device,
                &self.staging,
                self.copy.padded_size() * count as u64,
            )?;
            for i in 0..count as usize {
                let start = i * self.copy.padded_size() as usize;
                let end = start + self.copy.padded_size() as usize;
                let tight = depad_rows(
                    &padded[start..end],
                    self.copy.tight_bytes_per_row as usize,
                    self.copy.padded_bytes_per_row as usize,
                    self.copy.height as usize,
                );
                let dst = ((z - z_range.start) as usize + i) * slice_len;
                out[dst..dst + slice_len].copy_from_slice(&tight);
            }

            log::debug!(
                "[SlicePass] {} slices {}..{} in {:.1}ms",
                self.label,
                z,
                z + count,
                batch_start.elapsed().as_secs_f64() * 1000.0
            );
            z += count;
        }
        Ok(())
    }
}
