//! Eraser Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in eraser_operations.rs

use glam::{UVec3, Vec3};

use crate::config::EraserConfig;

/// Mask value of a visible voxel
pub const MASK_VISIBLE: u8 = 255;
/// Mask value of an erased voxel
pub const MASK_ERASED: u8 = 0;
/// Low-res distance at or above this means the ray hit nothing
pub const NO_MATERIAL: f32 = 2.0;

/// One byte per voxel, same dimensions and linear order as the volume
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub dims: UVec3,
    pub voxels: Vec<u8>,
}

/// Undo record of one successful erase
#[derive(Debug, Clone)]
pub struct Stroke {
    pub radius: f32,
    pub depth: f32,
    /// Tool rotation as XYZ Euler angles
    pub rotation: Vec3,
    pub origin: UVec3,
    pub back_distance: f32,
    /// Linear indices this stroke erased, sorted
    pub erased: Vec<usize>,
}

/// CPU copies of the float render targets after one frame.
///
/// All buffers are RGBA f32, row-major, top row first.
#[derive(Debug, Clone, Default)]
pub struct FrameCapture {
    pub width: u32,
    pub height: u32,
    /// Exit points; w is 1 where the box was hit
    pub backface: Vec<f32>,
    /// Entry points
    pub frontface: Vec<f32>,
    /// Channel 3 holds the hit distance along the normalized ray
    pub low_res: Vec<f32>,
    pub low_res_width: u32,
    pub low_res_height: u32,
    pub low_res_divisor: u32,
}

/// Result of one `erase_start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    NoCapture,
    OutOfViewport,
    NoMaterial,
    /// Hit distance jumped; the next call starts a new stroke
    Discontinuous,
    /// Nothing left to erase under the tool
    Unchanged,
    Erased { voxels: usize },
}

/// Mask editor state
#[derive(Debug, Clone)]
pub struct VoxelMaskEditor {
    pub dims: UVec3,
    pub intensities: Vec<u8>,
    pub mask: Mask,
    pub strokes: Vec<Stroke>,
    pub radius: f32,
    pub depth: f32,
    pub prev_distance: f32,
    pub reset_flag: bool,
    pub mask_dirty: bool,
    pub config: EraserConfig,
}
