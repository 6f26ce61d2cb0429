//! Eraser Operations - Pure DOP Functions
//!
//! Erasing maps a screen pixel to the surface voxel under it through the
//! last frame capture, orients the tool cylinder along the local surface
//! normal and flood-fills the voxels inside it. Undo replays the same fill.

use std::collections::VecDeque;

use glam::{IVec3, UVec3, Vec3};
use rustc_hash::FxHashSet;

use super::eraser_data::{
    EraseOutcome, FrameCapture, Mask, Stroke, VoxelMaskEditor, MASK_ERASED, MASK_VISIBLE,
    NO_MATERIAL,
};
use super::tool_frame::{
    back_distance, bounding_extent, euler_from_normal, inside_tool, tool_frame, ToolFrame,
};
use crate::config::EraserConfig;
use crate::error::{VolumeError, VolumeResult};
use crate::volume::{linear_index, voxel_coords, voxel_count};

/// Shift from centered object space to texture space
const COORD_SHIFT: f32 = 0.5;

const NEIGHBORS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

/// Gradients weaker than this fall back to the view ray
const MIN_GRADIENT: f32 = 1e-4;

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Fully visible mask
pub fn create_mask(dims: UVec3) -> Mask {
    Mask {
        dims,
        voxels: vec![MASK_VISIBLE; voxel_count(dims)],
    }
}

pub fn create_eraser(intensities: Vec<u8>, dims: UVec3, config: &EraserConfig) -> VolumeResult<VoxelMaskEditor> {
    if intensities.len() != voxel_count(dims) {
        return Err(VolumeError::DataSizeMismatch {
            expected: voxel_count(dims),
            found: intensities.len(),
        });
    }
    log::info!("[Eraser] Ready for {}x{}x{} volume", dims.x, dims.y, dims.z);
    Ok(VoxelMaskEditor {
        dims,
        intensities,
        mask: create_mask(dims),
        strokes: Vec::new(),
        radius: config.radius.min(max_tool_size(dims)),
        depth: config.depth.min(max_tool_size(dims)),
        prev_distance: 0.0,
        reset_flag: true,
        mask_dirty: false,
        config: config.clone(),
    })
}

// ============================================================================
// SETTINGS / HISTORY
// ============================================================================

/// Longest straight line through the volume, in voxels
pub fn max_tool_size(dims: UVec3) -> f32 {
    dims.as_vec3().length().ceil()
}

pub fn set_radius(editor: &mut VoxelMaskEditor, radius: f32) {
    if radius > 0.0 {
        editor.radius = radius.min(max_tool_size(editor.dims));
    } else {
        log::warn!("[Eraser] Ignoring non-positive radius {}", radius);
    }
}

pub fn set_depth(editor: &mut VoxelMaskEditor, depth: f32) {
    if depth > 0.0 {
        editor.depth = depth.min(max_tool_size(editor.dims));
    } else {
        log::warn!("[Eraser] Ignoring non-positive depth {}", depth);
    }
}

pub fn clear_history(editor: &mut VoxelMaskEditor) {
    editor.strokes.clear();
}

/// Make every voxel visible again and forget all strokes
pub fn reset_mask(editor: &mut VoxelMaskEditor) {
    editor.mask.voxels.fill(MASK_VISIBLE);
    editor.strokes.clear();
    editor.reset_flag = true;
    editor.mask_dirty = true;
}

/// Whether the mask changed since the last call
pub fn take_dirty(editor: &mut VoxelMaskEditor) -> bool {
    std::mem::take(&mut editor.mask_dirty)
}

/// xDim / zDim, applied to z offsets inside the tool
pub fn radius_ratio(dims: UVec3) -> f32 {
    dims.x as f32 / dims.z as f32
}

// ============================================================================
// CAPTURE LOOKUP
// ============================================================================

/// Entry point, exit point and hit distance under a screen pixel
pub fn sample_capture(capture: &FrameCapture, x: i32, y: i32) -> Result<(Vec3, Vec3, f32), EraseOutcome> {
    if x < 0 || y < 0 || x as u32 >= capture.width || y as u32 >= capture.height {
        return Err(EraseOutcome::OutOfViewport);
    }
    let (x, y) = (x as u32, y as u32);
    let divisor = capture.low_res_divisor.max(1);
    let (lx, ly) = (x / divisor, y / divisor);
    if lx >= capture.low_res_width || ly >= capture.low_res_height {
        return Err(EraseOutcome::OutOfViewport);
    }

    let cell = ((y * capture.width + x) * 4) as usize;
    let low_cell = ((ly * capture.low_res_width + lx) * 4) as usize;
    let (Some(bf), Some(ff), Some(low)) = (
        capture.backface.get(cell..cell + 4),
        capture.frontface.get(cell..cell + 4),
        capture.low_res.get(low_cell..low_cell + 4),
    ) else {
        return Err(EraseOutcome::OutOfViewport);
    };

    let distance = low[3];
    if bf[3] < 0.5 || distance >= NO_MATERIAL {
        return Err(EraseOutcome::NoMaterial);
    }
    Ok((Vec3::new(ff[0], ff[1], ff[2]), Vec3::new(bf[0], bf[1], bf[2]), distance))
}

/// floor((ff + dir*dist + 0.5) * dims), clamped into the volume
pub fn target_voxel(entry: Vec3, direction: Vec3, distance: f32, dims: UVec3) -> UVec3 {
    let texture = entry + direction * distance + Vec3::splat(COORD_SHIFT);
    let voxel = (texture * dims.as_vec3()).floor();
    voxel
        .clamp(Vec3::ZERO, (dims - UVec3::ONE).as_vec3())
        .as_uvec3()
}

/// Outward surface normal from a Gaussian-weighted gradient
pub fn estimate_normal(editor: &VoxelMaskEditor, voxel: UVec3, ray: Vec3) -> Vec3 {
    let r = editor.config.gauss_radius as i32;
    let sigma_sq = editor.config.gauss_sigma * editor.config.gauss_sigma;
    let max = editor.dims.as_ivec3() - IVec3::ONE;
    let center = voxel.as_ivec3();

    let mut gradient = Vec3::ZERO;
    let mut weights = 0.0f32;
    for k in -r..=r {
        for j in -r..=r {
            for i in -r..=r {
                let o = IVec3::new(i, j, k);
                let p = (center + o).clamp(IVec3::ZERO, max).as_uvec3();
                let v = editor.intensities[linear_index(editor.dims, p.x, p.y, p.z)] as f32 / 255.0;
                let of = o.as_vec3();
                let w = (-of.length_squared() / (2.0 * sigma_sq)).exp();
                gradient += v * w * (-of / sigma_sq);
                weights += w;
            }
        }
    }

    let n = gradient / weights;
    if n.length() < MIN_GRADIENT {
        -ray.normalize()
    } else {
        n.normalize()
    }
}

// ============================================================================
// FLOOD FILL
// ============================================================================

/// Voxels inside the tool reachable from `origin` that pass `accept`.
///
/// The origin always seeds the queue; afterwards only accepted voxels
/// spread to their 6 neighbors.
pub fn flood_fill(dims: UVec3, frame: &ToolFrame, origin: UVec3, accept: impl Fn(usize) -> bool) -> Vec<usize> {
    let extent = bounding_extent(frame);
    let origin_i = origin.as_ivec3();
    let lo = (origin_i - extent).max(IVec3::ZERO);
    let hi = (origin_i + extent).min(dims.as_ivec3() - IVec3::ONE);

    let mut accepted = Vec::new();
    let mut visited = FxHashSet::default();
    let mut queue = VecDeque::new();
    visited.insert(linear_index(dims, origin.x, origin.y, origin.z));
    queue.push_back(origin_i);

    while let Some(voxel) = queue.pop_front() {
        let p = voxel.as_uvec3();
        let index = linear_index(dims, p.x, p.y, p.z);
        let inside = inside_tool(frame, (voxel - origin_i).as_vec3()) && accept(index);
        if inside {
            accepted.push(index);
        } else if voxel != origin_i {
            continue;
        }

        for step in NEIGHBORS {
            let n = voxel + step;
            if n.cmplt(lo).any() || n.cmpgt(hi).any() {
                continue;
            }
            let nu = n.as_uvec3();
            if visited.insert(linear_index(dims, nu.x, nu.y, nu.z)) {
                queue.push_back(n);
            }
        }
    }
    accepted
}

// ============================================================================
// ERASE / UNDO
// ============================================================================

/// Erase under screen pixel (x, y) of the captured frame
pub fn erase_start(
    editor: &mut VoxelMaskEditor,
    capture: Option<&FrameCapture>,
    x: i32,
    y: i32,
    iso_threshold: f32,
    is_new_stroke: bool,
) -> EraseOutcome {
    let Some(capture) = capture else {
        log::debug!("[Eraser] No frame capture available");
        return EraseOutcome::NoCapture;
    };
    let (entry, exit, distance) = match sample_capture(capture, x, y) {
        Ok(sample) => sample,
        Err(outcome) => return outcome,
    };
    let ray = exit - entry;
    if ray.length_squared() <= f32::EPSILON {
        return EraseOutcome::NoMaterial;
    }
    let direction = ray.normalize();
    let dims = editor.dims;
    let origin = target_voxel(entry, direction, distance, dims);
    let ray_voxels = (direction * dims.as_vec3()).normalize();
    let normal = estimate_normal(editor, origin, ray_voxels);

    if is_new_stroke || editor.reset_flag {
        editor.prev_distance = distance;
        editor.reset_flag = false;
    } else if (editor.prev_distance - distance).abs() < editor.config.continuity_tolerance {
        editor.prev_distance = distance;
    } else {
        log::debug!(
            "[Eraser] Stroke broken: distance {:.3} -> {:.3}",
            editor.prev_distance,
            distance
        );
        editor.reset_flag = true;
        return EraseOutcome::Discontinuous;
    }

    let rotation = euler_from_normal(normal);
    let back = back_distance(ray_voxels, normal, editor.radius, editor.depth);
    let frame = tool_frame(rotation, editor.radius, editor.depth, back, radius_ratio(dims));

    let iso_level = (iso_threshold - editor.config.iso_border) * 255.0;
    let intensities = &editor.intensities;
    let mask = &editor.mask.voxels;
    let mut erased = flood_fill(dims, &frame, origin, |i| {
        intensities[i] as f32 >= iso_level && mask[i] != MASK_ERASED
    });
    if erased.is_empty() {
        return EraseOutcome::Unchanged;
    }

    for &i in &erased {
        editor.mask.voxels[i] = MASK_ERASED;
    }
    erased.sort_unstable();
    let voxels = erased.len();
    editor.strokes.push(Stroke {
        radius: editor.radius,
        depth: editor.depth,
        rotation,
        origin,
        back_distance: back,
        erased,
    });
    editor.mask_dirty = true;

    log::debug!(
        "[Eraser] Erased {} voxels at {:?} (stroke {})",
        voxels,
        origin,
        editor.strokes.len()
    );
    EraseOutcome::Erased { voxels }
}

/// Restore the voxels of the most recent stroke. None when history is empty.
pub fn undo_last_erasing(editor: &mut VoxelMaskEditor) -> Option<usize> {
    let Some(stroke) = editor.strokes.pop() else {
        log::debug!("[Eraser] Nothing to undo");
        return None;
    };

    let frame = tool_frame(
        stroke.rotation,
        stroke.radius,
        stroke.depth,
        stroke.back_distance,
        radius_ratio(editor.dims),
    );
    let mask = &editor.mask.voxels;
    let restored = flood_fill(editor.dims, &frame, stroke.origin, |i| {
        mask[i] == MASK_ERASED && stroke.erased.binary_search(&i).is_ok()
    });

    for &i in &restored {
        editor.mask.voxels[i] = MASK_VISIBLE;
    }
    if !restored.is_empty() {
        editor.mask_dirty = true;
    }
    log::debug!(
        "[Eraser] Restored {} voxels, {} strokes left",
        restored.len(),
        editor.strokes.len()
    );
    Some(restored.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: u32 = 32;

    fn editor(value: u8) -> VoxelMaskEditor {
        let dims = UVec3::splat(N);
        let config = EraserConfig {
            radius: 3.0,
            depth: 5.0,
            ..EraserConfig::default()
        };
        create_eraser(vec![value; voxel_count(dims)], dims, &config).unwrap()
    }

    /// 3x3 capture, every pixel looking down +x through voxel row (y, z)
    fn capture_along_x(y: u32, z: u32, distance: f32) -> FrameCapture {
        let cy = (y as f32 + 0.5) / N as f32 - 0.5;
        let cz = (z as f32 + 0.5) / N as f32 - 0.5;
        let mut capture = FrameCapture {
            width: 3,
            height: 3,
            low_res_width: 1,
            low_res_height: 1,
            low_res_divisor: 3,
            low_res: vec![0.2, 0.2, 0.2, distance],
            ..FrameCapture::default()
        };
        for _ in 0..9 {
            capture.frontface.extend_from_slice(&[-0.5, cy, cz, 1.0]);
            capture.backface.extend_from_slice(&[0.5, cy, cz, 1.0]);
        }
        capture
    }

    fn at(editor: &VoxelMaskEditor, x: u32, y: u32, z: u32) -> u8 {
        editor.mask.voxels[linear_index(editor.dims, x, y, z)]
    }

    #[test]
    fn test_target_voxel_rounds_down_after_shift() {
        let dims = UVec3::splat(N);
        let cy = 16.5 / N as f32 - 0.5;
        let v = target_voxel(Vec3::new(-0.5, cy, cy), Vec3::X, 0.0, dims);
        assert_eq!(v, UVec3::new(0, 16, 16));
        // Past the far side clamps
        assert_eq!(target_voxel(Vec3::new(-0.5, cy, cy), Vec3::X, 3.0, dims).x, N - 1);
    }

    #[test]
    fn test_uniform_neighborhood_falls_back_to_ray() {
        let e = editor(200);
        let n = estimate_normal(&e, UVec3::new(0, 16, 16), Vec3::X);
        assert!((n + Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_normal_points_out_of_material() {
        let mut e = editor(0);
        for z in 0..N {
            for y in 0..N {
                for x in 10..N {
                    e.intensities[linear_index(e.dims, x, y, z)] = 200;
                }
            }
        }
        let n = estimate_normal(&e, UVec3::new(10, 16, 16), Vec3::X);
        assert!(n.x < -0.99);
    }

    #[test]
    fn test_erase_cylinder_and_undo() {
        let mut e = editor(200);
        let capture = capture_along_x(16, 16, 0.0);

        let outcome = erase_start(&mut e, Some(&capture), 1, 1, 0.5, true);
        assert_eq!(outcome, EraseOutcome::Erased { voxels: 174 });
        assert!(take_dirty(&mut e));
        assert!(!take_dirty(&mut e));

        assert_eq!(at(&e, 0, 16, 16), MASK_ERASED);
        assert_eq!(at(&e, 5, 16, 16), MASK_ERASED);
        assert_eq!(at(&e, 6, 16, 16), MASK_VISIBLE);
        assert_eq!(at(&e, 0, 19, 16), MASK_ERASED);
        assert_eq!(at(&e, 0, 19, 17), MASK_VISIBLE);
        assert_eq!(e.strokes.len(), 1);
        assert_eq!(e.strokes[0].back_distance, 0.0);

        assert_eq!(undo_last_erasing(&mut e), Some(174));
        assert!(e.mask.voxels.iter().all(|v| *v == MASK_VISIBLE));
        assert!(e.strokes.is_empty());
        assert_eq!(undo_last_erasing(&mut e), None);
    }

    #[test]
    fn test_erasing_erased_region_is_noop() {
        let mut e = editor(200);
        let capture = capture_along_x(16, 16, 0.0);
        erase_start(&mut e, Some(&capture), 0, 0, 0.5, true);
        let snapshot = e.mask.clone();

        let again = erase_start(&mut e, Some(&capture), 0, 0, 0.5, true);
        assert_eq!(again, EraseOutcome::Unchanged);
        assert_eq!(e.strokes.len(), 1);
        assert_eq!(e.mask, snapshot);
    }

    #[test]
    fn test_overlapping_strokes_undo_in_order() {
        let mut e = editor(200);
        erase_start(&mut e, Some(&capture_along_x(16, 16, 0.0)), 0, 0, 0.5, true);
        let after_first = e.mask.clone();

        // Rims touch along one row at y = 19
        let second = erase_start(&mut e, Some(&capture_along_x(22, 16, 0.0)), 0, 0, 0.5, true);
        assert_eq!(second, EraseOutcome::Erased { voxels: 168 });

        assert_eq!(undo_last_erasing(&mut e), Some(168));
        assert_eq!(e.mask, after_first);
        assert_eq!(undo_last_erasing(&mut e), Some(174));
        assert!(e.mask.voxels.iter().all(|v| *v == MASK_VISIBLE));
    }

    #[test]
    fn test_stroke_at_volume_edge_is_clipped() {
        let mut e = editor(200);
        let outcome = erase_start(&mut e, Some(&capture_along_x(N - 1, 16, 0.0)), 2, 2, 0.5, true);
        assert_eq!(outcome, EraseOutcome::Erased { voxels: 108 });
        assert_eq!(undo_last_erasing(&mut e), Some(108));
    }

    #[test]
    fn test_faint_material_is_kept() {
        let mut e = editor(100);
        let outcome = erase_start(&mut e, Some(&capture_along_x(16, 16, 0.0)), 0, 0, 0.5, true);
        assert_eq!(outcome, EraseOutcome::Unchanged);
        assert!(e.strokes.is_empty());
    }

    #[test]
    fn test_noop_outcomes() {
        let mut e = editor(200);
        assert_eq!(erase_start(&mut e, None, 0, 0, 0.5, true), EraseOutcome::NoCapture);

        let capture = capture_along_x(16, 16, 0.0);
        assert_eq!(
            erase_start(&mut e, Some(&capture), 3, 0, 0.5, true),
            EraseOutcome::OutOfViewport
        );
        assert_eq!(
            erase_start(&mut e, Some(&capture), 0, -1, 0.5, true),
            EraseOutcome::OutOfViewport
        );

        let empty = capture_along_x(16, 16, NO_MATERIAL);
        assert_eq!(erase_start(&mut e, Some(&empty), 0, 0, 0.5, true), EraseOutcome::NoMaterial);
        assert!(!e.mask_dirty);
    }

    #[test]
    fn test_discontinuity_restarts_stroke() {
        let mut e = editor(200);
        let near = capture_along_x(16, 16, 0.0);
        let far = capture_along_x(16, 16, 0.2);

        assert!(matches!(
            erase_start(&mut e, Some(&near), 0, 0, 0.5, true),
            EraseOutcome::Erased { .. }
        ));
        assert_eq!(
            erase_start(&mut e, Some(&far), 0, 0, 0.5, false),
            EraseOutcome::Discontinuous
        );
        assert!(e.reset_flag);
        // Next continuation is treated as a fresh stroke
        assert!(matches!(
            erase_start(&mut e, Some(&far), 0, 0, 0.5, false),
            EraseOutcome::Erased { .. }
        ));
        assert!(!e.reset_flag);
    }

    #[test]
    fn test_oblique_surface_erases_whole_footprint() {
        let mut e = editor(0);
        for z in 0..N {
            for y in 0..N {
                for x in 0..N {
                    if x + y >= N {
                        e.intensities[linear_index(e.dims, x, y, z)] = 200;
                    }
                }
            }
        }
        // Ray along +x through row (16, 16) meets the slanted face at x = 16
        let capture = capture_along_x(16, 16, 16.5 / N as f32);
        let outcome = erase_start(&mut e, Some(&capture), 1, 1, 0.5, true);
        let EraseOutcome::Erased { voxels } = outcome else {
            panic!("expected an erase, got {:?}", outcome);
        };

        let stroke = e.strokes[0].clone();
        assert_eq!(stroke.origin, UVec3::new(16, 16, 16));
        let frame = tool_frame(
            stroke.rotation,
            stroke.radius,
            stroke.depth,
            stroke.back_distance,
            radius_ratio(e.dims),
        );
        // Tool axis follows the surface normal, not the view ray
        let axis = frame.rotation * Vec3::Z;
        assert!((axis - Vec3::new(1.0, 1.0, 0.0).normalize()).length() < 1e-3);

        let origin = stroke.origin.as_ivec3();
        let footprint: Vec<usize> = (0..voxel_count(e.dims))
            .filter(|&i| {
                let offset = (voxel_coords(e.dims, i).as_ivec3() - origin).as_vec3();
                e.intensities[i] == 200 && inside_tool(&frame, offset)
            })
            .collect();
        assert_eq!(voxels, footprint.len());
        assert_eq!(stroke.erased, footprint);
        for &i in &footprint {
            assert_eq!(e.mask.voxels[i], MASK_ERASED);
        }

        assert_eq!(undo_last_erasing(&mut e), Some(voxels));
        assert!(e.mask.voxels.iter().all(|v| *v == MASK_VISIBLE));
    }

    #[test]
    fn test_tool_size_is_limited_to_volume() {
        let mut e = editor(200);
        set_radius(&mut e, 1e10);
        set_depth(&mut e, f32::INFINITY);
        assert_eq!(e.radius, max_tool_size(e.dims));
        assert_eq!(e.depth, max_tool_size(e.dims));
        set_radius(&mut e, f32::NAN);
        assert_eq!(e.radius, max_tool_size(e.dims));

        let outcome = erase_start(&mut e, Some(&capture_along_x(16, 16, 0.0)), 0, 0, 0.5, true);
        assert!(matches!(outcome, EraseOutcome::Erased { .. }));
        assert!(undo_last_erasing(&mut e).is_some());
        assert!(e.mask.voxels.iter().all(|v| *v == MASK_VISIBLE));
    }

    #[test]
    fn test_reset_mask_clears_history() {
        let mut e = editor(200);
        erase_start(&mut e, Some(&capture_along_x(16, 16, 0.0)), 0, 0, 0.5, true);
        take_dirty(&mut e);
        reset_mask(&mut e);
        assert!(e.strokes.is_empty());
        assert!(e.mask.voxels.iter().all(|v| *v == MASK_VISIBLE));
        assert!(take_dirty(&mut e));
    }
}
