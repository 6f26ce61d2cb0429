//! GPU ambient occlusion kernel

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use wgpu::util::DeviceExt;

use crate::config::AmbientConfig;
use crate::error::{VolumeError, VolumeResult};
use crate::gpu::shader_source::{slice_kernel_source, AMBIENT_SLICE_WGSL};
use crate::gpu::slice_pass::kernel_bind_group_layout;
use crate::gpu::{GpuContext, SliceKernel, SlicePass};
use crate::volume::VolumeTexture;

/// Directions the uniform block can hold
pub const MAX_AMBIENT_DIRECTIONS: usize = 256;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct AmbientUniform {
    pub iso_threshold: f32,
    pub step_length: f32,
    pub ray_steps: u32,
    pub direction_count: u32,
    pub directions: [[f32; 4]; MAX_AMBIENT_DIRECTIONS],
}

static_assertions::const_assert_eq!(
    std::mem::size_of::<AmbientUniform>(),
    16 + 16 * MAX_AMBIENT_DIRECTIONS
);

pub struct GpuAmbientKernel {
    pass: SlicePass,
    bind_group: wgpu::BindGroup,
    _uniform_buffer: wgpu::Buffer,
}

impl GpuAmbientKernel {
    pub fn new(
        ctx: &GpuContext,
        volume: &VolumeTexture,
        directions: &[Vec3],
        iso_threshold: f32,
        config: &AmbientConfig,
    ) -> VolumeResult<Self> {
        if directions.len() > MAX_AMBIENT_DIRECTIONS {
            return Err(VolumeError::InvalidConfig {
                field: "ambient.subdivisions".to_string(),
                value: directions.len().to_string(),
                reason: format!("at most {} directions fit the uniform block", MAX_AMBIENT_DIRECTIONS),
            });
        }

        let mut uniform = AmbientUniform {
            iso_threshold,
            step_length: config.step_length,
            ray_steps: config.ray_steps,
            direction_count: directions.len() as u32,
            directions: [[0.0; 4]; MAX_AMBIENT_DIRECTIONS],
        };
        for (slot, dir) in uniform.directions.iter_mut().zip(directions) {
            *slot = dir.extend(0.0).to_array();
        }

        let device = &ctx.device;
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Ambient Params"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let layout = kernel_bind_group_layout(device, &volume.mode);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ambient Bind Group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&volume.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let source = slice_kernel_source(&volume.mode, volume.dims, AMBIENT_SLICE_WGSL);
        let pass = SlicePass::new(
            ctx,
            "Ambient Occlusion Slice",
            source,
            &layout,
            volume.dims.x,
            volume.dims.y,
            volume.dims.z,
            config.slices_per_readback,
        )?;

        Ok(Self {
            pass,
            bind_group,
            _uniform_buffer: uniform_buffer,
        })
    }
}

impl SliceKernel for GpuAmbientKernel {
    fn label(&self) -> &'static str {
        self.pass.label()
    }

    fn process_slices(&mut self, z_range: Range<u32>, out: &mut [u8]) -> VolumeResult<()> {
        self.pass.run(&self.bind_group, z_range, out)
    }
}
