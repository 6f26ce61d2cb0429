//! Offscreen render targets
//!
//! Entry, exit and low-res targets are float RGBA so positions and hit
//! distances survive readback. All of them are dropped and recreated on
//! resize and on volume reload.

use super::pipeline_cache::{RenderLayouts, DEPTH_FORMAT};
use super::render_operations::low_res_size;

/// One color target and its view
pub struct Target {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

pub struct RenderTargets {
    pub width: u32,
    pub height: u32,
    pub low_res_width: u32,
    pub low_res_height: u32,
    pub low_res_divisor: u32,
    pub format: wgpu::TextureFormat,
    pub backface: Target,
    pub frontface: Target,
    pub low_res: Target,
    pub depth: Target,
}

/// Bind groups that reference the targets
pub struct TargetBindings {
    pub entry_exit: wgpu::BindGroup,
    pub low_res: wgpu::BindGroup,
}

/// Float format for entry/exit/low-res targets given the device support
pub fn float_target_format(float_render_targets: bool) -> wgpu::TextureFormat {
    if float_render_targets {
        wgpu::TextureFormat::Rgba32Float
    } else {
        wgpu::TextureFormat::Rgba16Float
    }
}

fn create_target(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> Target {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Target { texture, view }
}

pub fn create_render_targets(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    low_res_divisor: u32,
    format: wgpu::TextureFormat,
) -> RenderTargets {
    let width = width.max(1);
    let height = height.max(1);
    let (low_res_width, low_res_height) = low_res_size(width, height, low_res_divisor);
    let color_usage = wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC;

    log::debug!(
        "[RenderTargets] {}x{} (low-res {}x{}, {:?})",
        width,
        height,
        low_res_width,
        low_res_height,
        format
    );

    RenderTargets {
        width,
        height,
        low_res_width,
        low_res_height,
        low_res_divisor: low_res_divisor.max(1),
        format,
        backface: create_target(device, "Backface Target", width, height, format, color_usage),
        frontface: create_target(device, "Frontface Target", width, height, format, color_usage),
        low_res: create_target(
            device,
            "Low Res Target",
            low_res_width,
            low_res_height,
            format,
            color_usage,
        ),
        depth: create_target(
            device,
            "Bounds Depth",
            width,
            height,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        ),
    }
}

pub fn create_target_bindings(
    device: &wgpu::Device,
    layouts: &RenderLayouts,
    targets: &RenderTargets,
) -> TargetBindings {
    let entry_exit = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Entry Exit Bind Group"),
        layout: &layouts.targets,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&targets.backface.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&targets.frontface.view),
            },
        ],
    });
    let low_res = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Low Res Bind Group"),
        layout: &layouts.low_res,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(&targets.low_res.view),
        }],
    });
    TargetBindings { entry_exit, low_res }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_format_fallback() {
        assert_eq!(float_target_format(true), wgpu::TextureFormat::Rgba32Float);
        assert_eq!(float_target_format(false), wgpu::TextureFormat::Rgba16Float);
    }
}
