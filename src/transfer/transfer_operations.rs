//! Transfer Function Operations - Pure DOP Functions

use super::transfer_data::{TransferBands, TransferFunction, TRANSFER_SIZE};
use glam::{Vec3, Vec4};

const SCALE: f32 = 255.0;

// Default opacity curve knots, as fractions of full scale
const A1: f32 = 0.09;
const A2: f32 = 0.2;
const A3: f32 = 0.3;
const A4: f32 = 0.43;
const A5: f32 = 0.53;

/// Soft tissue is faint, bone is bright
const SOFT_ALPHA_DIVISOR: f32 = 12.0;
const HARD_ALPHA_DIVISOR: f32 = 3.0;
const HARD_COLOR: [u8; 3] = [255, 210, 180];

const BAND1_MIN_COLOR: Vec3 = Vec3::new(0.1, 0.0, 0.0);
const BAND1_MIN_COLOR_ALT: Vec3 = Vec3::new(0.0, 0.8, 0.0);
const BAND1_MAX_COLOR: Vec3 = Vec3::new(1.0, 0.0, 0.0);
const BAND2_MIN_COLOR: Vec3 = Vec3::new(1.0, 0.902, 0.773);
const BAND2_MAX_COLOR: Vec3 = Vec3::new(0.5, 0.4, 0.3);

pub fn default_handle_colors() -> Vec<[u8; 3]> {
    vec![
        [0, 0, 0],
        [255, 128, 64],
        [255, 0, 0],
        [128, 64, 64],
        [128, 0, 0],
        [64, 64, 64],
        [128, 128, 128],
        [192, 192, 192],
        [255, 255, 255],
        [255, 255, 255],
    ]
}

/// Default CT curve: two soft-tissue ramps, then an opaque bone ramp
pub fn create_transfer_function() -> TransferFunction {
    let (a1, a2, a3, a4, a5) = (A1 * SCALE, A2 * SCALE, A3 * SCALE, A4 * SCALE, A5 * SCALE);
    let mut rgba = vec![0u8; TRANSFER_SIZE * 4];
    // Alpha carries over between ramps
    let mut alpha = 0.0f32;

    for pix in 0..TRANSFER_SIZE {
        let p = pix as f32;
        if p > a1 && p < a2 {
            alpha = (p - a1) / (a2 - a1);
        }
        if p > a2 && p < a3 {
            alpha = (a3 - p) / (a3 - a2);
        }
        if p > a4 && p < a5 {
            alpha = (p - a4) / (a5 - a4);
        }
        if p > a5 {
            alpha = 1.0;
        }

        let texel = &mut rgba[pix * 4..pix * 4 + 4];
        if p > a4 {
            texel[..3].copy_from_slice(&HARD_COLOR);
            texel[3] = (SCALE * alpha / HARD_ALPHA_DIVISOR) as u8;
        } else {
            texel[..3].copy_from_slice(&[255, 0, 0]);
            texel[3] = (SCALE * alpha / SOFT_ALPHA_DIVISOR) as u8;
        }
    }

    TransferFunction {
        rgba,
        handle_colors: default_handle_colors(),
    }
}

/// Replace the handle palette used by `update_from_handles`
pub fn set_handle_colors(tf: &mut TransferFunction, colors: &[[u8; 3]]) {
    if colors.is_empty() {
        log::warn!("[TransferFunction] Ignoring empty handle palette");
        return;
    }
    tf.handle_colors = colors.to_vec();
}

/// Rebuild the lookup from editor handles.
///
/// `intensities` are texel positions in 0..256, `opacities` in 0..1. Colors
/// interpolate between consecutive handle colors; negative opacities count as 0.
pub fn update_from_handles(tf: &mut TransferFunction, intensities: &[f32], opacities: &[f32]) {
    let points = intensities.len().min(opacities.len());
    for cur in 0..points.saturating_sub(1) {
        let start = (intensities[cur].floor().max(0.0) as usize).min(TRANSFER_SIZE);
        let end = (intensities[cur + 1].floor().max(0.0) as usize).min(TRANSFER_SIZE);
        let c0 = handle_color(tf, cur);
        let c1 = handle_color(tf, cur + 1);
        let op0 = opacities[cur].max(0.0);
        let op1 = opacities[cur + 1].max(0.0);

        for pix in start..end {
            let t = (pix - start) as f32 / (end - start) as f32;
            let color = c0.lerp(c1, t);
            let texel = &mut tf.rgba[pix * 4..pix * 4 + 4];
            texel[0] = color.x as u8;
            texel[1] = color.y as u8;
            texel[2] = color.z as u8;
            texel[3] = ((op1 * t + (1.0 - t) * op0) * SCALE) as u8;
        }
    }
}

fn handle_color(tf: &TransferFunction, index: usize) -> Vec3 {
    let fallback = [255, 255, 255];
    let c = tf.handle_colors.get(index).copied().unwrap_or(fallback);
    Vec3::new(c[0] as f32, c[1] as f32, c[2] as f32)
}

/// Band uniforms from the three tissue thresholds
pub fn bands_from_thresholds(values: [f32; 3], color_flag: bool) -> TransferBands {
    let band1_min = if color_flag {
        BAND1_MIN_COLOR_ALT
    } else {
        BAND1_MIN_COLOR
    };
    TransferBands {
        function1_min: band1_min.extend(values[0]),
        function1_max: BAND1_MAX_COLOR.extend(values[1]),
        function2_min: BAND2_MIN_COLOR.extend(values[2]),
        function2_max: BAND2_MAX_COLOR.extend(values[2]),
    }
}

pub fn band_array(bands: &TransferBands) -> [Vec4; 4] {
    [
        bands.function1_min,
        bands.function1_max,
        bands.function2_min,
        bands.function2_max,
    ]
}
