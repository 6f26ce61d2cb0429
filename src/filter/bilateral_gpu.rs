//! GPU bilateral filter kernel

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::bilateral_cpu::filter_sigmas;
use crate::config::FilterConfig;
use crate::error::VolumeResult;
use crate::gpu::shader_source::{slice_kernel_source, BILATERAL_SLICE_WGSL};
use crate::gpu::{kernel_bind_group_layout, GpuContext, SliceKernel, SlicePass};
use crate::volume::VolumeTexture;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct BilateralUniform {
    pub kernel_radius: i32,
    pub dist_sigma: f32,
    pub val_sigma: f32,
    pub _padding: f32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<BilateralUniform>(), 16);

pub struct GpuBilateralKernel {
    pass: SlicePass,
    bind_group: wgpu::BindGroup,
    _uniform_buffer: wgpu::Buffer,
}

impl GpuBilateralKernel {
    /// `slices_per_readback` bounds one submit/map round trip
    pub fn new(
        ctx: &GpuContext,
        volume: &VolumeTexture,
        config: &FilterConfig,
        slices_per_readback: u32,
    ) -> VolumeResult<Self> {
        let (dist_sigma, val_sigma) = filter_sigmas(config);
        let uniform = BilateralUniform {
            kernel_radius: config.kernel_radius.max(1) as i32,
            dist_sigma,
            val_sigma,
            _padding: 0.0,
        };

        let device = &ctx.device;
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bilateral Params"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let layout = kernel_bind_group_layout(device, &volume.mode);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bilateral Bind Group"),
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

        let source = slice_kernel_source(&volume.mode, volume.dims, BILATERAL_SLICE_WGSL);
        let pass = SlicePass::new(
            ctx,
            "Bilateral Filter Slice",
            source,
            &layout,
            volume.dims.x,
            volume.dims.y,
            volume.dims.z,
            slices_per_readback,
        )?;

        Ok(Self {
            pass,
            bind_group,
            _uniform_buffer: uniform_buffer,
        })
    }
}

impl SliceKernel for GpuBilateralKernel {
    fn label(&self) -> &'static str {
        self.pass.label()
    }

    fn process_slices(&mut self, z_range: Range<u32>, out: &mut [u8]) -> VolumeResult<()> {
        self.pass.run(&self.bind_group, z_range, out)
    }
}
