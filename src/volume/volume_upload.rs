//! GPU upload of packed voxel data
//!
//! Intensities, ROI ids, the eraser mask and AO results all go through the
//! same two functions so every voxel texture follows the session's
//! addressing mode.

use super::volume_data::{AddressingMode, PackedVolume, VolumeTexture, ROI_TABLE_SIZE};
use super::volume_operations::{arrange_texels, roi_lut_texels, voxel_count};
use crate::error::{VolumeError, VolumeResult};
use glam::UVec3;

fn texture_extent(mode: &AddressingMode, dims: UVec3) -> (wgpu::Extent3d, wgpu::TextureDimension) {
    match mode {
        AddressingMode::Native3d => (
            wgpu::Extent3d {
                width: dims.x,
                height: dims.y,
                depth_or_array_layers: dims.z,
            },
            wgpu::TextureDimension::D3,
        ),
        AddressingMode::TiledAtlas(layout) => (
            wgpu::Extent3d {
                width: layout.atlas_width,
                height: layout.atlas_height,
                depth_or_array_layers: 1,
            },
            wgpu::TextureDimension::D2,
        ),
    }
}

/// Create a single-channel voxel texture and fill it from linear voxels
pub fn upload_voxel_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &'static str,
    mode: AddressingMode,
    dims: UVec3,
    linear: &[u8],
) -> VolumeResult<VolumeTexture> {
    let (size, dimension) = texture_extent(&mode, dims);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension,
        format: wgpu::TextureFormat::R8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let volume_texture = VolumeTexture {
        texture,
        view,
        mode,
        dims,
        label,
    };
    write_voxel_texture(queue, &volume_texture, linear)?;

    log::info!(
        "[VolumePacker] Uploaded {} ({}x{}x{} texels, {:?})",
        label,
        size.width,
        size.height,
        size.depth_or_array_layers,
        dimension
    );
    Ok(volume_texture)
}

/// Overwrite the whole texture from linear voxels
pub fn write_voxel_texture(
    queue: &wgpu::Queue,
    target: &VolumeTexture,
    linear: &[u8],
) -> VolumeResult<()> {
    let expected = voxel_count(target.dims);
    if linear.len() != expected {
        return Err(VolumeError::DataSizeMismatch {
            expected,
            found: linear.len(),
        });
    }

    let texels = arrange_texels(&target.mode, target.dims, linear);
    let (size, _) = texture_extent(&target.mode, target.dims);
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &target.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &texels,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(size.width),
            rows_per_image: Some(size.height),
        },
        size,
    );
    Ok(())
}

/// 1-voxel stand-in bound where an optional voxel texture is absent
pub fn placeholder_voxel_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &'static str,
    mode: &AddressingMode,
    value: u8,
) -> VolumeResult<VolumeTexture> {
    let dims = UVec3::ONE;
    let mode = match mode {
        AddressingMode::Native3d => AddressingMode::Native3d,
        AddressingMode::TiledAtlas(_) => {
            AddressingMode::TiledAtlas(super::volume_operations::tile_layout(dims, 1)?)
        }
    };
    upload_voxel_texture(device, queue, label, mode, dims, &[value])
}

pub fn upload_volume_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    packed: &PackedVolume,
) -> VolumeResult<VolumeTexture> {
    upload_voxel_texture(
        device,
        queue,
        "Volume Texture",
        packed.mode,
        packed.dims,
        &packed.intensities,
    )
}

/// Mask starts fully visible
pub fn upload_mask_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    packed: &PackedVolume,
    mask: &[u8],
) -> VolumeResult<VolumeTexture> {
    upload_voxel_texture(device, queue, "Mask Texture", packed.mode, packed.dims, mask)
}

pub fn write_mask_texture(
    queue: &wgpu::Queue,
    target: &VolumeTexture,
    mask: &[u8],
) -> VolumeResult<()> {
    write_voxel_texture(queue, target, mask)
}

/// 256x2 RGBA lookup: ROI palette and selection flags
pub fn upload_roi_lut(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    packed: &PackedVolume,
) -> (wgpu::Texture, wgpu::TextureView) {
    let size = wgpu::Extent3d {
        width: ROI_TABLE_SIZE as u32,
        height: 2,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("ROI Lookup"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_roi_lut(queue, &texture, packed);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

pub fn write_roi_lut(queue: &wgpu::Queue, texture: &wgpu::Texture, packed: &PackedVolume) {
    let texels = roi_lut_texels(&packed.palette, &packed.selected_rois);
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &texels,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(ROI_TABLE_SIZE as u32 * 4),
            rows_per_image: Some(2),
        },
        wgpu::Extent3d {
            width: ROI_TABLE_SIZE as u32,
            height: 2,
            depth_or_array_layers: 1,
        },
    );
}
