//! Render Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in render_operations.rs

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3, Vec4};

/// Upper bound on SSAO hemisphere offsets in the render uniform
pub const MAX_SSAO_SAMPLES: u32 = 64;

/// What the ray-march computes per pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    RaycastBlend,
    IsoSurface,
    MaxIntensity,
    FullVolume,
    RoiColor,
}

/// Draw throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    /// Draw every frame (a mouse button is held)
    Enabled,
    /// Draw the next frame, then stop
    Once,
    Disabled,
}

/// Mouse drag bookkeeping
#[derive(Debug, Clone, Copy, Default)]
pub struct MouseState {
    pub pressed: bool,
    pub last_x: f32,
    pub last_y: f32,
}

/// CPU copy of every value the shaders see
#[derive(Debug, Clone)]
pub struct RenderParams {
    pub mode: RenderMode,
    pub state: RenderState,
    pub rotation: Quat,
    /// Set whenever `rotation` changes, cleared once planes and light follow
    pub rotation_dirty: bool,
    pub camera_distance: f32,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub iso_threshold: f32,
    /// Already scaled by the opacity factor
    pub opacity_barrier: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub step_size: Vec4,
    pub cut_plane_center: Vec3,
    pub cut_planes: [Vec4; 3],
    pub light_dir: Vec3,
    pub bands: [Vec4; 4],
    pub box_virtual: Vec3,
    /// Drawn bounding box in object space, inside [-0.5, 0.5]^3
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    pub mask_enabled: bool,
    pub ambient_enabled: bool,
    pub ambient_iso: f32,
    pub ssao_offsets: Vec<Vec4>,
}

/// Uniform block of the box, cut-plane and frontface passes
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct BoundsUniform {
    pub mvp: [[f32; 4]; 4],
    pub plane_x: [f32; 4],
    pub plane_y: [f32; 4],
    pub plane_z: [f32; 4],
    pub box_min: [f32; 4],
    pub box_max: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<BoundsUniform>(), 144);

/// Uniform block shared by the low-res, full-res and composite programs
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RenderUniform {
    pub band1_min: [f32; 4],
    pub band1_max: [f32; 4],
    pub band2_min: [f32; 4],
    pub band2_max: [f32; 4],
    /// x: blend, y: isosurface, z: MIP and ROI, w: full volume
    pub step_size: [f32; 4],
    pub light_dir: [f32; 4],
    pub box_size: [f32; 4],
    /// Full-res width/height, low-res width/height
    pub viewport: [f32; 4],
    pub iso_threshold: f32,
    pub opacity_barrier: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub mask_flag: u32,
    pub ambient_flag: u32,
    pub low_res_divisor: u32,
    pub ssao_count: u32,
    pub ssao_offsets: [[f32; 4]; MAX_SSAO_SAMPLES as usize],
}

static_assertions::const_assert_eq!(
    std::mem::size_of::<RenderUniform>(),
    160 + 16 * MAX_SSAO_SAMPLES as usize
);

/// Box corner as uploaded to the vertex buffer
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct BoundsVertex {
    pub position: [f32; 3],
}
