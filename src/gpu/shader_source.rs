//! WGSL composition
//!
//! Shaders are assembled from a generated prelude plus a pass body loaded
//! with `include_str!`. The prelude fixes volume dimensions, the addressing
//! mode and variant switches as WGSL constants, so each pipeline variant is
//! compiled once with no runtime branching on texture layout.

use crate::volume::AddressingMode;
use glam::UVec3;
use std::fmt::Write;

pub const FULLSCREEN_WGSL: &str = include_str!("../shaders/fullscreen.wgsl");
pub const AMBIENT_SLICE_WGSL: &str = include_str!("../shaders/ambient_slice.wgsl");
pub const BILATERAL_SLICE_WGSL: &str = include_str!("../shaders/bilateral_slice.wgsl");
pub const BOUNDS_WGSL: &str = include_str!("../shaders/bounds.wgsl");
pub const RAYCAST_WGSL: &str = include_str!("../shaders/raycast.wgsl");
pub const COMPOSITE_WGSL: &str = include_str!("../shaders/composite.wgsl");
pub const RENDER_UNIFORM_WGSL: &str = include_str!("../shaders/render_uniform.wgsl");

/// WGSL texture type holding voxels in `mode`
pub fn voxel_texture_type(mode: &AddressingMode) -> &'static str {
    match mode {
        AddressingMode::Native3d => "texture_3d<f32>",
        AddressingMode::TiledAtlas(_) => "texture_2d<f32>",
    }
}

/// Constants shared by every voxel accessor
pub fn volume_constants(mode: &AddressingMode, dims: UVec3) -> String {
    let tile_cols = match mode {
        AddressingMode::Native3d => 1,
        AddressingMode::TiledAtlas(layout) => layout.tile_cols,
    };
    format!(
        "const VOLUME_DIMS: vec3<i32> = vec3<i32>({}, {}, {});\nconst TILE_COLS: i32 = {};\n",
        dims.x, dims.y, dims.z, tile_cols
    )
}

/// Texture binding plus an integer-coordinate loader named `fn_name`.
///
/// Coordinates are clamped to the volume, so callers may step past the edge.
pub fn voxel_accessor(
    mode: &AddressingMode,
    fn_name: &str,
    texture_name: &str,
    group: u32,
    binding: u32,
) -> String {
    let mut src = String::new();
    let _ = writeln!(
        src,
        "@group({}) @binding({}) var {}: {};",
        group,
        binding,
        texture_name,
        voxel_texture_type(mode)
    );
    let _ = writeln!(src, "fn {}(p: vec3<i32>) -> vec4<f32> {{", fn_name);
    let _ = writeln!(
        src,
        "    let c = clamp(p, vec3<i32>(0), VOLUME_DIMS - vec3<i32>(1));"
    );
    match mode {
        AddressingMode::Native3d => {
            let _ = writeln!(src, "    return textureLoad({}, c, 0);", texture_name);
        }
        AddressingMode::TiledAtlas(_) => {
            let _ = writeln!(
                src,
                "    let tile = vec2<i32>(c.z % TILE_COLS, c.z / TILE_COLS);"
            );
            let _ = writeln!(
                src,
                "    return textureLoad({}, tile * VOLUME_DIMS.xy + c.xy, 0);",
                texture_name
            );
        }
    }
    src.push_str("}\n");
    src
}

/// Prelude for the slice kernels: volume at group 1 binding 0 as `load_volume`
pub fn slice_kernel_source(mode: &AddressingMode, dims: UVec3, body: &str) -> String {
    let mut src = volume_constants(mode, dims);
    src.push_str(&voxel_accessor(mode, "load_volume_texel", "volume_tex", 1, 0));
    src.push_str("fn load_volume(p: vec3<i32>) -> f32 { return load_volume_texel(p).r; }\n");
    src.push_str(FULLSCREEN_WGSL);
    src.push_str(body);
    src
}
