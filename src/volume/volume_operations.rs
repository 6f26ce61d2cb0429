//! Volume Operations - Pure DOP Functions
//!
//! Validation, slice tiling and CPU-side packing. Nothing here touches the
//! GPU, so every addressing rule can be checked without a device.

use super::volume_data::{
    AddressingMode, PackedVolume, RoiPalette, TileLayout, Volume, ROI_TABLE_SIZE,
};
use crate::error::{VolumeError, VolumeResult};
use crate::gpu::GpuCapabilities;
use glam::{UVec3, Vec3};
use std::borrow::Cow;

/// Slices are sealed only when the volume is deep enough to lose them
const SEAL_MIN_DEPTH: u32 = 5;

/// ROI ids selected by default
const DEFAULT_SELECTED_ROI_MIN: usize = 50;
const DEFAULT_SELECTED_ROI_MAX: usize = 240;

/// Validate and wrap loader output
pub fn create_volume(
    dims: UVec3,
    data: Vec<u8>,
    box_size: Vec3,
    bytes_per_voxel: u32,
) -> VolumeResult<Volume> {
    if dims.x == 0 || dims.y == 0 || dims.z == 0 {
        return Err(VolumeError::InvalidDimensions {
            x: dims.x,
            y: dims.y,
            z: dims.z,
            reason: "dimensions must be non-zero".to_string(),
        });
    }
    if bytes_per_voxel != 1 && bytes_per_voxel != 4 {
        return Err(VolumeError::UnsupportedVoxelFormat { bytes_per_voxel });
    }
    let expected = voxel_count(dims) * bytes_per_voxel as usize;
    if data.len() != expected {
        return Err(VolumeError::DataSizeMismatch {
            expected,
            found: data.len(),
        });
    }
    if box_size.min_element() <= 0.0 {
        return Err(VolumeError::InvalidDimensions {
            x: dims.x,
            y: dims.y,
            z: dims.z,
            reason: format!("box size {:?} must be positive", box_size),
        });
    }

    Ok(Volume {
        dims,
        data,
        box_size,
        bytes_per_voxel,
    })
}

#[inline]
pub fn voxel_count(dims: UVec3) -> usize {
    dims.x as usize * dims.y as usize * dims.z as usize
}

#[inline]
pub fn linear_index(dims: UVec3, x: u32, y: u32, z: u32) -> usize {
    x as usize + y as usize * dims.x as usize + z as usize * dims.x as usize * dims.y as usize
}

/// Inverse of `linear_index`
#[inline]
pub fn voxel_coords(dims: UVec3, index: usize) -> UVec3 {
    let slice = dims.x as usize * dims.y as usize;
    let z = index / slice;
    let rest = index % slice;
    UVec3::new((rest % dims.x as usize) as u32, (rest / dims.x as usize) as u32, z as u32)
}

/// Bounding box scaled so that its longest side is 1
pub fn virtual_box(box_size: Vec3) -> Vec3 {
    box_size / box_size.max_element()
}

/// Smallest power of two whose square holds `z_dim` slices
pub fn tile_cols_for(z_dim: u32) -> u32 {
    let mut cols = 1u32;
    while (cols as u64) * (cols as u64) < z_dim as u64 {
        cols *= 2;
    }
    cols
}

/// Build and validate the atlas layout for `dims`
pub fn tile_layout(dims: UVec3, max_texture_dimension_2d: u32) -> VolumeResult<TileLayout> {
    let tile_cols = tile_cols_for(dims.z);
    if (tile_cols as u64).pow(2) < dims.z as u64 {
        return Err(VolumeError::InvalidTileLayout {
            z_dim: dims.z,
            tile_cols,
        });
    }

    let atlas_width = dims.x as u64 * tile_cols as u64;
    let atlas_height = dims.y as u64 * tile_cols as u64;
    if atlas_width > max_texture_dimension_2d as u64 || atlas_height > max_texture_dimension_2d as u64
    {
        return Err(VolumeError::AtlasTooLarge {
            width: atlas_width.min(u32::MAX as u64) as u32,
            height: atlas_height.min(u32::MAX as u64) as u32,
            max_dimension: max_texture_dimension_2d,
        });
    }

    Ok(TileLayout {
        dims,
        tile_cols,
        atlas_width: atlas_width as u32,
        atlas_height: atlas_height as u32,
    })
}

/// Voxel (x, y, z) to atlas texel (u, v)
#[inline]
pub fn tile_forward(layout: &TileLayout, x: u32, y: u32, z: u32) -> (u32, u32) {
    let tile_x = z % layout.tile_cols;
    let tile_y = z / layout.tile_cols;
    (tile_x * layout.dims.x + x, tile_y * layout.dims.y + y)
}

/// Atlas texel (u, v) back to its voxel. `None` for texels of unused tiles.
#[inline]
pub fn tile_inverse(layout: &TileLayout, u: u32, v: u32) -> Option<UVec3> {
    if u >= layout.atlas_width || v >= layout.atlas_height {
        return None;
    }
    let tile_x = u / layout.dims.x;
    let tile_y = v / layout.dims.y;
    let z = tile_y * layout.tile_cols + tile_x;
    if z >= layout.dims.z {
        return None;
    }
    Some(UVec3::new(u % layout.dims.x, v % layout.dims.y, z))
}

/// Pick native 3D textures when the device can hold the volume, the atlas otherwise.
///
/// Deterministic for a given volume and capability set.
pub fn choose_addressing_mode(dims: UVec3, caps: &GpuCapabilities) -> VolumeResult<AddressingMode> {
    let fits_3d = dims.max_element() <= caps.max_texture_dimension_3d;
    if caps.texture_3d && fits_3d {
        return Ok(AddressingMode::Native3d);
    }

    if caps.texture_3d {
        log::warn!(
            "[VolumePacker] Volume {}x{}x{} exceeds 3D texture limit {}, falling back to tiled atlas",
            dims.x,
            dims.y,
            dims.z,
            caps.max_texture_dimension_3d
        );
    } else {
        log::warn!("[VolumePacker] 3D textures unavailable, falling back to tiled atlas");
    }

    let layout = tile_layout(dims, caps.max_texture_dimension_2d)?;
    log::info!(
        "[VolumePacker] Tiled atlas {}x{} ({}x{} tiles of {}x{})",
        layout.atlas_width,
        layout.atlas_height,
        layout.tile_cols,
        layout.tile_cols,
        dims.x,
        dims.y
    );
    Ok(AddressingMode::TiledAtlas(layout))
}

/// Opaque red for every id
pub fn default_palette() -> RoiPalette {
    RoiPalette {
        colors: vec![[255, 0, 0, 255]; ROI_TABLE_SIZE],
    }
}

pub fn default_selected_rois() -> Vec<u8> {
    (0..ROI_TABLE_SIZE)
        .map(|id| {
            if (DEFAULT_SELECTED_ROI_MIN..=DEFAULT_SELECTED_ROI_MAX).contains(&id) {
                255
            } else {
                0
            }
        })
        .collect()
}

/// Split the loader's voxel array into the intensity and ROI channels
pub fn pack_volume(
    volume: &Volume,
    mode: AddressingMode,
    palette: Option<RoiPalette>,
    seal_edge_slices: bool,
) -> VolumeResult<PackedVolume> {
    let count = voxel_count(volume.dims);
    let (mut intensities, roi_ids) = match volume.bytes_per_voxel {
        1 => (volume.data.clone(), None),
        4 => {
            let mut intensities = Vec::with_capacity(count);
            let mut roi_ids = Vec::with_capacity(count);
            for voxel in volume.data.chunks_exact(4) {
                intensities.push(voxel[0]);
                roi_ids.push(voxel[3]);
            }
            (intensities, Some(roi_ids))
        }
        other => {
            return Err(VolumeError::UnsupportedVoxelFormat {
                bytes_per_voxel: other,
            })
        }
    };

    if seal_edge_slices && roi_ids.is_none() && volume.dims.z > SEAL_MIN_DEPTH {
        let slice = volume.dims.x as usize * volume.dims.y as usize;
        intensities[..slice].fill(0);
        intensities[count - slice..].fill(0);
    }

    let palette = match palette {
        Some(p) if p.colors.len() == ROI_TABLE_SIZE => p,
        Some(p) => {
            log::warn!(
                "[VolumePacker] ROI palette has {} entries (expected {}), using default",
                p.colors.len(),
                ROI_TABLE_SIZE
            );
            default_palette()
        }
        None => default_palette(),
    };

    log::info!(
        "[VolumePacker] Packed {}x{}x{} volume ({} bytes/voxel, roi={})",
        volume.dims.x,
        volume.dims.y,
        volume.dims.z,
        volume.bytes_per_voxel,
        roi_ids.is_some()
    );

    Ok(PackedVolume {
        dims: volume.dims,
        mode,
        intensities,
        roi_ids,
        palette,
        selected_rois: default_selected_rois(),
    })
}

/// Rearrange linear voxels into the texel order of `mode`
pub fn arrange_texels<'a>(mode: &AddressingMode, dims: UVec3, linear: &'a [u8]) -> Cow<'a, [u8]> {
    match mode {
        AddressingMode::Native3d => Cow::Borrowed(linear),
        AddressingMode::TiledAtlas(layout) => {
            let mut atlas = vec![0u8; layout.atlas_width as usize * layout.atlas_height as usize];
            let row = dims.x as usize;
            for z in 0..dims.z {
                for y in 0..dims.y {
                    let (u, v) = tile_forward(layout, 0, y, z);
                    let dst = v as usize * layout.atlas_width as usize + u as usize;
                    let src = linear_index(dims, 0, y, z);
                    atlas[dst..dst + row].copy_from_slice(&linear[src..src + row]);
                }
            }
            Cow::Owned(atlas)
        }
    }
}

/// 256x2 RGBA table: palette in row 0, selection flag in row 1
pub fn roi_lut_texels(palette: &RoiPalette, selected: &[u8]) -> Vec<u8> {
    let mut texels = Vec::with_capacity(ROI_TABLE_SIZE * 2 * 4);
    for color in palette.colors.iter().take(ROI_TABLE_SIZE) {
        texels.extend_from_slice(color);
    }
    for id in 0..ROI_TABLE_SIZE {
        let flag = selected.get(id).copied().unwrap_or(0);
        texels.extend_from_slice(&[flag, 0, 0, 255]);
    }
    texels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(texture_3d: bool) -> GpuCapabilities {
        GpuCapabilities {
            texture_3d,
            max_texture_dimension_2d: 8192,
            max_texture_dimension_3d: 2048,
            float_render_targets: true,
        }
    }

    #[test]
    fn test_create_volume_validation() {
        let dims = UVec3::new(2, 2, 2);
        assert!(create_volume(dims, vec![0; 8], Vec3::ONE, 1).is_ok());
        assert!(matches!(
            create_volume(dims, vec![0; 7], Vec3::ONE, 1),
            Err(VolumeError::DataSizeMismatch { expected: 8, found: 7 })
        ));
        assert!(matches!(
            create_volume(dims, vec![0; 16], Vec3::ONE, 2),
            Err(VolumeError::UnsupportedVoxelFormat { .. })
        ));
        assert!(create_volume(UVec3::new(0, 2, 2), vec![], Vec3::ONE, 1).is_err());
    }

    #[test]
    fn test_tile_cols() {
        assert_eq!(tile_cols_for(1), 1);
        assert_eq!(tile_cols_for(4), 2);
        assert_eq!(tile_cols_for(8), 4);
        assert_eq!(tile_cols_for(16), 4);
        assert_eq!(tile_cols_for(17), 8);
        assert_eq!(tile_cols_for(256), 16);
    }

    #[test]
    fn test_atlas_mapping_8_cubed() {
        let layout = tile_layout(UVec3::splat(8), 8192).unwrap();
        assert_eq!(layout.tile_cols, 4);
        assert_eq!((layout.atlas_width, layout.atlas_height), (32, 32));

        // Slice 7 sits in tile (3, 1)
        let (u, v) = tile_forward(&layout, 3, 3, 7);
        assert_eq!((u / 8, v / 8), (3, 1));
        assert_eq!((u % 8, v % 8), (3, 3));
        assert_eq!((u, v), (27, 11));
    }

    #[test]
    fn test_tile_forward_inverse_roundtrip() {
        let dims = UVec3::new(5, 3, 11);
        let layout = tile_layout(dims, 8192).unwrap();
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let (u, v) = tile_forward(&layout, x, y, z);
                    assert_eq!(tile_inverse(&layout, u, v), Some(UVec3::new(x, y, z)));
                }
            }
        }
        // Tiles past the last slice are unused
        let (u, v) = (layout.atlas_width - 1, layout.atlas_height - 1);
        assert_eq!(tile_inverse(&layout, u, v), None);
    }

    #[test]
    fn test_atlas_too_large_is_error() {
        let result = tile_layout(UVec3::new(512, 512, 512), 4096);
        assert!(matches!(result, Err(VolumeError::AtlasTooLarge { .. })));
    }

    #[test]
    fn test_addressing_mode_is_deterministic() {
        let dims = UVec3::new(64, 64, 40);
        for flag in [true, false] {
            let first = choose_addressing_mode(dims, &caps(flag)).unwrap();
            let second = choose_addressing_mode(dims, &caps(flag)).unwrap();
            assert_eq!(first, second);
        }
        assert_eq!(
            choose_addressing_mode(dims, &caps(true)).unwrap(),
            AddressingMode::Native3d
        );
        assert!(matches!(
            choose_addressing_mode(dims, &caps(false)).unwrap(),
            AddressingMode::TiledAtlas(_)
        ));
    }

    #[test]
    fn test_oversized_3d_falls_back_to_atlas() {
        let mut caps = caps(true);
        caps.max_texture_dimension_3d = 32;
        let mode = choose_addressing_mode(UVec3::new(64, 16, 16), &caps).unwrap();
        assert!(matches!(mode, AddressingMode::TiledAtlas(_)));
    }

    #[test]
    fn test_pack_roi_volume_splits_channels() {
        let dims = UVec3::new(2, 1, 1);
        let volume = create_volume(dims, vec![10, 0, 0, 7, 20, 0, 0, 9], Vec3::ONE, 4).unwrap();
        let packed = pack_volume(&volume, AddressingMode::Native3d, None, true).unwrap();
        assert_eq!(packed.intensities, vec![10, 20]);
        assert_eq!(packed.roi_ids, Some(vec![7, 9]));
        assert_eq!(packed.palette.colors[42], [255, 0, 0, 255]);
        assert_eq!(packed.selected_rois[49], 0);
        assert_eq!(packed.selected_rois[50], 255);
        assert_eq!(packed.selected_rois[241], 0);
    }

    #[test]
    fn test_pack_seals_edge_slices() {
        let dims = UVec3::new(2, 2, 6);
        let volume = create_volume(dims, vec![100; 24], Vec3::ONE, 1).unwrap();
        let packed = pack_volume(&volume, AddressingMode::Native3d, None, true).unwrap();
        assert!(packed.intensities[..4].iter().all(|v| *v == 0));
        assert!(packed.intensities[20..].iter().all(|v| *v == 0));
        assert!(packed.intensities[4..20].iter().all(|v| *v == 100));

        let unsealed = pack_volume(&volume, AddressingMode::Native3d, None, false).unwrap();
        assert!(unsealed.intensities.iter().all(|v| *v == 100));
    }

    #[test]
    fn test_arrange_texels_places_slices_in_tiles() {
        let dims = UVec3::new(2, 2, 3);
        let linear: Vec<u8> = (0..12).collect();
        let layout = tile_layout(dims, 8192).unwrap();
        let mode = AddressingMode::TiledAtlas(layout);
        let atlas = arrange_texels(&mode, dims, &linear);
        assert_eq!(atlas.len(), 16);
        for index in 0..12usize {
            let p = voxel_coords(dims, index);
            let (u, v) = tile_forward(&layout, p.x, p.y, p.z);
            assert_eq!(atlas[(v * layout.atlas_width + u) as usize], index as u8);
        }
    }

    #[test]
    fn test_voxel_coords_inverts_linear_index() {
        let dims = UVec3::new(3, 4, 5);
        let index = linear_index(dims, 2, 3, 4);
        assert_eq!(voxel_coords(dims, index), UVec3::new(2, 3, 4));
    }
}
