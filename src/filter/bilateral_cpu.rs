//! CPU reference kernel for the bilateral filter

use std::ops::Range;

use glam::{IVec3, UVec3};
use rayon::prelude::*;

use crate::config::FilterConfig;
use crate::error::{VolumeError, VolumeResult};
use crate::gpu::SliceKernel;
use crate::volume::{linear_index, voxel_count};

pub struct CpuBilateralKernel<'a> {
    source: &'a [u8],
    dims: UVec3,
    radius: i32,
    /// Precomputed spatial weights over the (2r+1)^3 cube, x fastest
    spatial: Vec<f32>,
    inv_val_sigma_sq: f32,
}

/// (dist_sigma, val_sigma) for a kernel radius and the two coefficients
pub fn filter_sigmas(config: &FilterConfig) -> (f32, f32) {
    let kernel_size = config.kernel_radius.max(1) as f32;
    (config.koef_dist / kernel_size, config.koef_val / 256.0)
}

impl<'a> CpuBilateralKernel<'a> {
    pub fn new(source: &'a [u8], dims: UVec3, config: &FilterConfig) -> VolumeResult<Self> {
        if source.len() != voxel_count(dims) {
            return Err(VolumeError::DataSizeMismatch {
                expected: voxel_count(dims),
                found: source.len(),
            });
        }
        let radius = config.kernel_radius.max(1) as i32;
        let (dist_sigma, val_sigma) = filter_sigmas(config);
        let inv_dist = 1.0 / (dist_sigma * dist_sigma);

        let mut spatial = Vec::with_capacity(((2 * radius + 1) as usize).pow(3));
        for k in -radius..=radius {
            for j in -radius..=radius {
                for i in -radius..=radius {
                    let d = IVec3::new(i, j, k).as_vec3() / radius as f32;
                    spatial.push((-d.length_squared() * inv_dist).exp());
                }
            }
        }

        Ok(Self {
            source,
            dims,
            radius,
            spatial,
            inv_val_sigma_sq: 1.0 / (val_sigma * val_sigma),
        })
    }

    fn filter_voxel(&self, base: IVec3) -> u8 {
        let dims = self.dims.as_ivec3();
        let center = self.value(base.as_uvec3());
        let r = self.radius;
        let mut acc = 0.0f32;
        let mut weights = 0.0f32;
        let mut w_index = 0;

        for k in -r..=r {
            for j in -r..=r {
                for i in -r..=r {
                    let spatial = self.spatial[w_index];
                    w_index += 1;
                    let p = base + IVec3::new(i, j, k);
                    if p.cmplt(IVec3::ZERO).any() || p.cmpge(dims).any() {
                        continue;
                    }
                    let value = self.value(p.as_uvec3());
                    let dv = value - center;
                    let w = spatial * (-dv * dv * self.inv_val_sigma_sq).exp();
                    acc += value * w;
                    weights += w;
                }
            }
        }

        // The center always contributes, so weights > 0
        ((acc / weights) * 255.0).round().clamp(0.0, 255.0) as u8
    }

    fn value(&self, p: UVec3) -> f32 {
        self.source[linear_index(self.dims, p.x, p.y, p.z)] as f32 / 255.0
    }
}

impl SliceKernel for CpuBilateralKernel<'_> {
    fn label(&self) -> &'static str {
        "CPU Bilateral Filter"
    }

    fn process_slices(&mut self, z_range: Range<u32>, out: &mut [u8]) -> VolumeResult<()> {
        let row = self.dims.x as usize;
        let rows_per_slice = self.dims.y as usize;
        let kernel = &*self;
        out.par_chunks_mut(row).enumerate().for_each(|(r, dst)| {
            let z = z_range.start as i32 + (r / rows_per_slice) as i32;
            let y = (r % rows_per_slice) as i32;
            for (x, value) in dst.iter_mut().enumerate() {
                *value = kernel.filter_voxel(IVec3::new(x as i32, y, z));
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmas_follow_radius() {
        let config = FilterConfig {
            kernel_radius: 4,
            koef_dist: 0.8,
            koef_val: 1.6,
            ..FilterConfig::default()
        };
        let (dist, val) = filter_sigmas(&config);
        assert!((dist - 0.2).abs() < 1e-6);
        assert!((val - 0.00625).abs() < 1e-6);
    }

    #[test]
    fn test_isolated_spike_is_smoothed_but_edges_kept() {
        let dims = UVec3::new(5, 5, 5);
        let mut data = vec![100u8; voxel_count(dims)];
        // One-step bump is within the value sigma and gets averaged out
        data[linear_index(dims, 2, 2, 2)] = 101;
        // A hard edge far beyond the value sigma
        for y in 0..5 {
            for x in 0..5 {
                data[linear_index(dims, x, y, 4)] = 250;
            }
        }

        let mut kernel = CpuBilateralKernel::new(&data, dims, &FilterConfig::default()).unwrap();
        let mut out = vec![0u8; voxel_count(dims)];
        kernel.process_slices(0..5, &mut out).unwrap();

        assert_eq!(out[linear_index(dims, 2, 2, 2)], 100);
        assert_eq!(out[linear_index(dims, 2, 2, 4)], 250);
        assert_eq!(out[linear_index(dims, 0, 0, 3)], 100);
    }
}
