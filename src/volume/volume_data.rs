//! Volume Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in volume_operations.rs

use glam::{UVec3, Vec3};
use wgpu::{Texture, TextureView};

/// Number of entries in the ROI lookup tables
pub const ROI_TABLE_SIZE: usize = 256;

/// Raw voxel grid as handed over by the loader. Never mutated by this crate.
#[derive(Debug, Clone)]
pub struct Volume {
    pub dims: UVec3,
    /// 1 byte per voxel, or 4 bytes (intensity, _, _, roi id) for ROI volumes
    pub data: Vec<u8>,
    /// Physical extent of the scanned box
    pub box_size: Vec3,
    pub bytes_per_voxel: u32,
}

/// Region of the volume holding data, in texture coordinates [0, 1]^3
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonEmptyBox {
    pub min: Vec3,
    pub max: Vec3,
}

/// Slice grid used when the device cannot hold the volume in a 3D texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub dims: UVec3,
    /// Tiles per atlas row (and rows per atlas)
    pub tile_cols: u32,
    pub atlas_width: u32,
    pub atlas_height: u32,
}

/// How voxels are addressed on the GPU for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// texel = x + y*xDim + z*xDim*yDim
    Native3d,
    TiledAtlas(TileLayout),
}

/// RGBA color per ROI id
#[derive(Debug, Clone, PartialEq)]
pub struct RoiPalette {
    pub colors: Vec<[u8; 4]>,
}

/// CPU side of the packed volume
#[derive(Debug, Clone)]
pub struct PackedVolume {
    pub dims: UVec3,
    pub mode: AddressingMode,
    /// One intensity byte per voxel in linear order
    pub intensities: Vec<u8>,
    /// ROI id per voxel, only for 4-byte volumes
    pub roi_ids: Option<Vec<u8>>,
    pub palette: RoiPalette,
    /// Non-zero entries mark selected ROI ids
    pub selected_rois: Vec<u8>,
}

/// Single-channel voxel texture on the GPU, addressed per `mode`
pub struct VolumeTexture {
    pub texture: Texture,
    pub view: TextureView,
    pub mode: AddressingMode,
    pub dims: UVec3,
    pub label: &'static str,
}
