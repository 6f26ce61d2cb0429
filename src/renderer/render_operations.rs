//! Render Operations - Pure DOP Functions
//!
//! Everything here is CPU math on `RenderParams`: camera, cut planes, light,
//! slider mappings and uniform packing. No GPU handles.

use glam::{Mat4, Quat, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::render_data::{
    BoundsUniform, BoundsVertex, RenderMode, RenderParams, RenderState, RenderUniform,
    MAX_SSAO_SAMPLES,
};
use crate::config::RendererConfig;
use crate::error::{OptionExt, VolumeError, VolumeResult};
use crate::volume::NonEmptyBox;
use crate::transfer::{band_array, bands_from_thresholds};

/// Slider to opacity barrier factor
pub const OPACITY_SCALE: f32 = 175.0;
/// Slider to cut-plane depth factor
pub const Z_CUT_MULTIPLIER: f32 = 1.4;
/// Radians of object rotation per dragged pixel
pub const ORBIT_SENSITIVITY: f32 = 0.01;
pub const MIN_CAMERA_DISTANCE: f32 = 0.5;
pub const MAX_CAMERA_DISTANCE: f32 = 5.0;
const ZOOM_STEP: f32 = 0.1;

// ============================================================================
// INITIALIZATION
// ============================================================================

pub fn create_render_params(config: &RendererConfig) -> RenderParams {
    let mut params = RenderParams {
        mode: RenderMode::RaycastBlend,
        state: RenderState::Once,
        rotation: Quat::IDENTITY,
        rotation_dirty: true,
        camera_distance: config.camera_distance,
        fov_degrees: config.fov_degrees,
        near: config.near,
        far: config.far,
        iso_threshold: config.iso_threshold,
        opacity_barrier: opacity_barrier(config.opacity_tissue),
        brightness: config.brightness,
        contrast: config.contrast,
        step_size: Vec4::from_array(config.step_sizes),
        cut_plane_center: Vec3::from_array(config.cut_plane_center),
        cut_planes: [Vec4::ZERO; 3],
        light_dir: Vec3::ONE.normalize(),
        bands: band_array(&bands_from_thresholds(
            [
                config.threshold_tissue1,
                config.threshold_tissue2,
                config.iso_threshold,
            ],
            false,
        )),
        box_virtual: Vec3::ONE,
        bounds_min: Vec3::splat(-0.5),
        bounds_max: Vec3::splat(0.5),
        mask_enabled: false,
        ambient_enabled: false,
        ambient_iso: config.iso_threshold,
        ssao_offsets: ssao_offsets(config.ssao_seed, config.ssao_samples),
    };
    update_orientation(&mut params);
    params
}

// ============================================================================
// SLIDER MAPPINGS
// ============================================================================

/// h = 1 / (100 + 700 v)
pub fn step_size_from_slider(value: f32) -> f32 {
    1.0 / (100.0 + 700.0 * value)
}

pub fn opacity_barrier(value: f32) -> f32 {
    OPACITY_SCALE * value
}

pub fn z_cut_center(value: f32) -> f32 {
    Z_CUT_MULTIPLIER * value
}

/// Raycast and full-volume modes show ROI colors for ROI volumes. ROI color
/// on a volume without ROI ids falls back to raycast blend.
pub fn effective_mode(requested: RenderMode, has_roi: bool) -> RenderMode {
    match requested {
        RenderMode::RaycastBlend | RenderMode::FullVolume if has_roi => RenderMode::RoiColor,
        RenderMode::RoiColor if !has_roi => RenderMode::RaycastBlend,
        mode => mode,
    }
}

/// Whether to draw this tick, and the state after it
pub fn advance_render_state(state: RenderState) -> (bool, RenderState) {
    match state {
        RenderState::Enabled => (true, RenderState::Enabled),
        RenderState::Once => (true, RenderState::Disabled),
        RenderState::Disabled => (false, RenderState::Disabled),
    }
}

/// State after an erase attempt. A held button keeps every frame drawing
/// until mouse-up; a lone erase redraws once.
pub fn state_after_erase(state: RenderState, erased: bool, pressed: bool) -> RenderState {
    match (erased, pressed) {
        (_, true) => RenderState::Enabled,
        (true, false) => RenderState::Once,
        (false, false) => state,
    }
}

// ============================================================================
// ORIENTATION
// ============================================================================

/// X, Y and Z cut planes for an object rotation.
///
/// Axes and center are taken into object space by the inverse rotation;
/// `w = -center . axis`. The Z plane lives in mirrored volume space, so its
/// x component is negated.
pub fn cut_planes(rotation: Quat, center: Vec3) -> [Vec4; 3] {
    let inverse = rotation.inverse();
    let c = inverse * center;
    let x_axis = inverse * Vec3::NEG_X;
    let y_axis = inverse * Vec3::NEG_Y;
    let z_axis = inverse * Vec3::NEG_Z;
    [
        x_axis.extend(-c.dot(x_axis)),
        y_axis.extend(-c.dot(y_axis)),
        Vec4::new(-z_axis.x, z_axis.y, z_axis.z, -c.dot(z_axis)),
    ]
}

/// normalize(1,1,1) through the inverse rotation, mirrored in x
pub fn light_direction(rotation: Quat) -> Vec3 {
    let mut dir = rotation.inverse() * Vec3::ONE.normalize();
    dir.x = -dir.x;
    dir
}

/// Refresh planes and light if the rotation changed
pub fn update_orientation(params: &mut RenderParams) {
    if !params.rotation_dirty {
        return;
    }
    params.cut_planes = cut_planes(params.rotation, params.cut_plane_center);
    params.light_dir = light_direction(params.rotation);
    params.rotation_dirty = false;
}

/// Drag by (dx, dy) pixels
pub fn orbit(rotation: Quat, dx: f32, dy: f32) -> Quat {
    let yaw = Quat::from_rotation_y(dx * ORBIT_SENSITIVITY);
    let pitch = Quat::from_rotation_x(dy * ORBIT_SENSITIVITY);
    (yaw * pitch * rotation).normalize()
}

/// Wheel delta > 0 moves the camera closer
pub fn zoom(distance: f32, delta: f32) -> f32 {
    (distance - delta * ZOOM_STEP).clamp(MIN_CAMERA_DISTANCE, MAX_CAMERA_DISTANCE)
}

// ============================================================================
// CAMERA
// ============================================================================

pub fn fov_to_tan(fov_degrees: f32) -> f32 {
    (fov_degrees.to_radians() * 0.5).tan()
}

pub fn tan_to_fov(tan: f32) -> f32 {
    (tan.atan() * 2.0).to_degrees()
}

/// Vertical FOV that keeps the centered square area of interest in frame
pub fn screenshot_fov(fov_degrees: f32, width: u32, height: u32) -> f32 {
    let aspect = width as f32 / height.max(1) as f32;
    tan_to_fov(fov_to_tan(fov_degrees) / aspect.min(1.0))
}

/// Object rotation times the virtual box scale
pub fn model_matrix(params: &RenderParams) -> Mat4 {
    Mat4::from_quat(params.rotation) * Mat4::from_scale(params.box_virtual)
}

pub fn view_projection(params: &RenderParams, aspect: f32) -> Mat4 {
    let eye = Vec3::new(0.0, 0.0, params.camera_distance);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(
        params.fov_degrees.to_radians(),
        aspect,
        params.near,
        params.far,
    );
    projection * view
}

/// Object-space box around the non-empty region.
///
/// Hints are texture coordinates; object x runs opposite to texture x.
pub fn object_bounds(hint: Option<NonEmptyBox>) -> (Vec3, Vec3) {
    let Some(hint) = hint else {
        return (Vec3::splat(-0.5), Vec3::splat(0.5));
    };
    let lo = hint.min.min(hint.max).clamp(Vec3::ZERO, Vec3::ONE) - Vec3::splat(0.5);
    let hi = hint.max.max(hint.min).clamp(Vec3::ZERO, Vec3::ONE) - Vec3::splat(0.5);
    (Vec3::new(-hi.x, lo.y, lo.z), Vec3::new(-lo.x, hi.y, hi.z))
}

/// Screen-aligned quad lying in the Z cut plane, in object space
pub fn cut_plane_quad(params: &RenderParams) -> [BoundsVertex; 4] {
    let inverse = params.rotation.inverse();
    let normal = inverse * Vec3::NEG_Z;
    let u = inverse * Vec3::X;
    let v = inverse * Vec3::Y;
    let center = inverse * params.cut_plane_center;
    let origin = normal * normal.dot(center);
    // Covers the unit box from any orientation
    let extent = 1.0;
    [
        origin - u * extent - v * extent,
        origin + u * extent - v * extent,
        origin + u * extent + v * extent,
        origin - u * extent + v * extent,
    ]
    .map(|p| BoundsVertex {
        position: p.to_array(),
    })
}

// ============================================================================
// SSAO
// ============================================================================

/// Reproducible offsets with x, y in [-1, 1] and z in [-1, 0]
pub fn ssao_offsets(seed: u64, count: u32) -> Vec<Vec4> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count.min(MAX_SSAO_SAMPLES))
        .map(|_| {
            Vec4::new(
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=0.0),
                0.0,
            )
        })
        .collect()
}

// ============================================================================
// UNIFORM PACKING
// ============================================================================

pub fn build_bounds_uniform(params: &RenderParams, aspect: f32) -> BoundsUniform {
    let mvp = view_projection(params, aspect) * model_matrix(params);
    BoundsUniform {
        mvp: mvp.to_cols_array_2d(),
        plane_x: params.cut_planes[0].to_array(),
        plane_y: params.cut_planes[1].to_array(),
        plane_z: params.cut_planes[2].to_array(),
        box_min: params.bounds_min.extend(0.0).to_array(),
        box_max: params.bounds_max.extend(0.0).to_array(),
    }
}

pub fn build_render_uniform(
    params: &RenderParams,
    viewport: (u32, u32),
    low_res: (u32, u32),
    low_res_divisor: u32,
) -> RenderUniform {
    let mut ssao = [[0.0f32; 4]; MAX_SSAO_SAMPLES as usize];
    for (slot, offset) in ssao.iter_mut().zip(&params.ssao_offsets) {
        *slot = offset.to_array();
    }
    RenderUniform {
        band1_min: params.bands[0].to_array(),
        band1_max: params.bands[1].to_array(),
        band2_min: params.bands[2].to_array(),
        band2_max: params.bands[3].to_array(),
        step_size: params.step_size.to_array(),
        light_dir: params.light_dir.extend(0.0).to_array(),
        box_size: params.box_virtual.extend(1.0).to_array(),
        viewport: [
            viewport.0 as f32,
            viewport.1 as f32,
            low_res.0 as f32,
            low_res.1 as f32,
        ],
        iso_threshold: params.iso_threshold,
        opacity_barrier: params.opacity_barrier,
        brightness: params.brightness,
        contrast: params.contrast,
        mask_flag: params.mask_enabled as u32,
        ambient_flag: params.ambient_enabled as u32,
        low_res_divisor,
        ssao_count: params.ssao_offsets.len() as u32,
        ssao_offsets: ssao,
    }
}

// ============================================================================
// SCREENSHOT
// ============================================================================

/// Swap red and blue in place for BGRA readbacks
pub fn bgra_to_rgba(pixels: &mut [u8]) {
    for texel in pixels.chunks_exact_mut(4) {
        texel.swap(0, 2);
    }
}

pub fn encode_png(rgba: Vec<u8>, width: u32, height: u32) -> VolumeResult<Vec<u8>> {
    let found = rgba.len();
    let image = image::RgbaImage::from_raw(width, height, rgba).ok_or_volume(|| {
        VolumeError::DataSizeMismatch {
            expected: width as usize * height as usize * 4,
            found,
        }
    })?;
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)?;
    Ok(bytes)
}

/// floor(w / d) x floor(h / d), at least 1x1
pub fn low_res_size(width: u32, height: u32, divisor: u32) -> (u32, u32) {
    let d = divisor.max(1);
    ((width / d).max(1), (height / d).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: Vec4, b: Vec4) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_initial_cut_planes() {
        let planes = cut_planes(Quat::IDENTITY, Vec3::new(-0.5, -0.5, 0.7));
        assert!(approx(planes[0], Vec4::new(-1.0, 0.0, 0.0, -0.5)));
        assert!(approx(planes[1], Vec4::new(0.0, -1.0, 0.0, -0.5)));
        assert!(approx(planes[2], Vec4::new(0.0, 0.0, -1.0, 0.7)));
    }

    #[test]
    fn test_z_plane_mirrors_x() {
        // Quarter turn about y puts the inverse z axis on x
        let rotation = Quat::from_rotation_y(FRAC_PI_2);
        let planes = cut_planes(rotation, Vec3::ZERO);
        let z_axis = rotation.inverse() * Vec3::NEG_Z;
        assert!((planes[2].x + z_axis.x).abs() < 1e-5);
        assert!(z_axis.x.abs() > 0.99);
    }

    #[test]
    fn test_light_direction() {
        let d = light_direction(Quat::IDENTITY);
        let n = 1.0 / 3.0f32.sqrt();
        assert!((d - Vec3::new(-n, n, n)).length() < 1e-5);
    }

    #[test]
    fn test_slider_mappings() {
        assert!((step_size_from_slider(0.0) - 0.01).abs() < 1e-7);
        assert!((step_size_from_slider(1.0) - 0.00125).abs() < 1e-7);
        assert!((opacity_barrier(0.2) - 35.0).abs() < 1e-4);
        assert!((z_cut_center(0.5) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_erase_drag_keeps_drawing_until_release() {
        // Button held: stays Enabled whether or not voxels were removed
        assert_eq!(state_after_erase(RenderState::Enabled, true, true), RenderState::Enabled);
        assert_eq!(state_after_erase(RenderState::Enabled, false, true), RenderState::Enabled);
        let (draw, next) = advance_render_state(state_after_erase(RenderState::Enabled, true, true));
        assert!(draw);
        assert_eq!(next, RenderState::Enabled);

        assert_eq!(state_after_erase(RenderState::Disabled, true, false), RenderState::Once);
        assert_eq!(state_after_erase(RenderState::Disabled, false, false), RenderState::Disabled);
    }

    #[test]
    fn test_render_state_transitions() {
        assert_eq!(advance_render_state(RenderState::Once), (true, RenderState::Disabled));
        assert_eq!(advance_render_state(RenderState::Disabled), (false, RenderState::Disabled));
        assert_eq!(advance_render_state(RenderState::Enabled), (true, RenderState::Enabled));
    }

    #[test]
    fn test_roi_volumes_force_roi_color() {
        assert_eq!(effective_mode(RenderMode::RaycastBlend, true), RenderMode::RoiColor);
        assert_eq!(effective_mode(RenderMode::FullVolume, true), RenderMode::RoiColor);
        assert_eq!(effective_mode(RenderMode::IsoSurface, true), RenderMode::IsoSurface);
        assert_eq!(effective_mode(RenderMode::FullVolume, false), RenderMode::FullVolume);
    }

    #[test]
    fn test_roi_color_without_roi_ids_falls_back() {
        assert_eq!(effective_mode(RenderMode::RoiColor, false), RenderMode::RaycastBlend);
        assert_eq!(effective_mode(RenderMode::RoiColor, true), RenderMode::RoiColor);
    }

    #[test]
    fn test_screenshot_fov_widens_for_portrait() {
        assert!((screenshot_fov(60.0, 800, 600) - 60.0).abs() < 1e-4);
        let portrait = screenshot_fov(60.0, 300, 600);
        let expected = tan_to_fov(fov_to_tan(60.0) * 2.0);
        assert!((portrait - expected).abs() < 1e-4);
        assert!(portrait > 60.0);
    }

    #[test]
    fn test_ssao_offsets_reproducible_and_bounded() {
        let a = ssao_offsets(7, 64);
        let b = ssao_offsets(7, 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.iter().all(|o| o.x.abs() <= 1.0 && o.y.abs() <= 1.0 && o.z <= 0.0 && o.z >= -1.0));
        assert_ne!(a, ssao_offsets(8, 64));
    }

    #[test]
    fn test_zoom_is_clamped() {
        assert_eq!(zoom(1.5, 100.0), MIN_CAMERA_DISTANCE);
        assert_eq!(zoom(1.5, -100.0), MAX_CAMERA_DISTANCE);
        assert!((zoom(1.5, 1.0) - 1.4).abs() < 1e-6);
    }

    #[test]
    fn test_png_encoding() {
        let mut pixels = vec![10, 20, 30, 255, 1, 2, 3, 4];
        bgra_to_rgba(&mut pixels);
        assert_eq!(pixels, vec![30, 20, 10, 255, 3, 2, 1, 4]);

        let png = encode_png(pixels, 2, 1).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        assert!(encode_png(vec![0; 7], 2, 1).is_err());
    }

    #[test]
    fn test_low_res_size() {
        assert_eq!(low_res_size(800, 600, 3), (266, 200));
        assert_eq!(low_res_size(2, 2, 3), (1, 1));
    }

    #[test]
    fn test_cut_plane_quad_lies_in_plane() {
        let params = create_render_params(&RendererConfig::default());
        for v in cut_plane_quad(&params) {
            assert!((v.position[2] - 0.7).abs() < 1e-5);
        }
    }

    #[test]
    fn test_object_bounds_mirror_x() {
        assert_eq!(object_bounds(None), (Vec3::splat(-0.5), Vec3::splat(0.5)));
        let hint = NonEmptyBox {
            min: Vec3::new(0.0, 0.25, 0.5),
            max: Vec3::new(0.25, 1.0, 1.0),
        };
        let (lo, hi) = object_bounds(Some(hint));
        assert!((lo - Vec3::new(0.25, -0.25, 0.0)).length() < 1e-6);
        assert!((hi - Vec3::new(0.5, 0.5, 0.5)).length() < 1e-6);
    }

    #[test]
    fn test_uniform_packing() {
        let params = create_render_params(&RendererConfig::default());
        let u = build_render_uniform(&params, (800, 600), (266, 200), 3);
        assert_eq!(u.ssao_count, 64);
        assert_eq!(u.viewport, [800.0, 600.0, 266.0, 200.0]);
        assert!((u.opacity_barrier - 26.25).abs() < 1e-4);
        assert_eq!(u.band2_min[3], 0.43);
        assert_eq!(u.mask_flag, 0);
    }
}
