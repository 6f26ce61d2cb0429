//! Ambient occlusion precompute
//!
//! For every voxel, the share of sphere directions that escape the
//! isosurface within a short march. The result is an 8-bit volume laid out
//! like the input and uploaded next to it for isosurface shading.

pub mod ambient_cpu;
pub mod ambient_gpu;
pub mod sphere_directions;

pub use ambient_cpu::CpuAmbientKernel;
pub use ambient_gpu::{AmbientUniform, GpuAmbientKernel, MAX_AMBIENT_DIRECTIONS};
pub use sphere_directions::sphere_directions;

use glam::UVec3;
use std::time::Instant;

use crate::error::VolumeResult;
use crate::gpu::SliceKernel;
use crate::volume::voxel_count;

/// Drives a slice kernel over the whole volume in readback-sized batches
pub struct AmbientOcclusionPrecomputer<K: SliceKernel> {
    kernel: K,
    dims: UVec3,
    slices_per_readback: u32,
}

impl<K: SliceKernel> AmbientOcclusionPrecomputer<K> {
    pub fn new(kernel: K, dims: UVec3, slices_per_readback: u32) -> Self {
        Self {
            kernel,
            dims,
            slices_per_readback: slices_per_readback.max(1),
        }
    }

    /// Occlusion volume, indexed `x + y*xDim + z*xDim*yDim`
    pub fn compute(&mut self) -> VolumeResult<Vec<u8>> {
        let start = Instant::now();
        let slice_len = (self.dims.x * self.dims.y) as usize;
        let mut out = vec![0u8; voxel_count(self.dims)];

        log::info!(
            "[AmbientOcclusion] {} over {}x{}x{}",
            self.kernel.label(),
            self.dims.x,
            self.dims.y,
            self.dims.z
        );

        let mut z = 0;
        while z < self.dims.z {
            let end = (z + self.slices_per_readback).min(self.dims.z);
            let dst = &mut out[z as usize * slice_len..end as usize * slice_len];
            self.kernel.process_slices(z..end, dst)?;
            log::debug!("[AmbientOcclusion] slices {}..{} of {}", z, end, self.dims.z);
            z = end;
        }

        log::info!(
            "[AmbientOcclusion] Finished in {:.1}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(out)
    }

    pub fn into_kernel(self) -> K {
        self.kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AmbientConfig, SeedSolid};
    use crate::volume::linear_index;

    fn run_cpu(data: &[u8], dims: UVec3, iso: f32) -> Vec<u8> {
        let config = AmbientConfig::default();
        let dirs = sphere_directions(SeedSolid::Tetrahedron, config.subdivisions);
        let kernel = CpuAmbientKernel::new(data, dims, dirs, iso, &config).unwrap();
        AmbientOcclusionPrecomputer::new(kernel, dims, 3)
            .compute()
            .unwrap()
    }

    #[test]
    fn test_uniform_volume_gives_uniform_output() {
        let dims = UVec3::new(6, 5, 7);
        let empty = run_cpu(&vec![20u8; voxel_count(dims)], dims, 0.5);
        assert!(empty.iter().all(|v| *v == 255));

        let solid = run_cpu(&vec![220u8; voxel_count(dims)], dims, 0.5);
        assert!(solid.iter().all(|v| *v == solid[0]));
        assert_eq!(solid[0], 0);
    }

    #[test]
    fn test_bright_voxel_occludes_neighbors() {
        let dims = UVec3::splat(17);
        let mut data = vec![0u8; voxel_count(dims)];
        data[linear_index(dims, 3, 3, 3)] = 255;
        let ao = run_cpu(&data, dims, 0.5);

        let next_to = ao[linear_index(dims, 4, 3, 3)];
        // Out of reach of an 8-step march
        let far = ao[linear_index(dims, 16, 16, 16)];
        assert!(next_to < 255);
        assert_eq!(far, 255);
    }

    #[test]
    fn test_batches_cover_every_slice() {
        struct Counting {
            calls: Vec<std::ops::Range<u32>>,
        }
        impl SliceKernel for Counting {
            fn label(&self) -> &'static str {
                "counting"
            }
            fn process_slices(&mut self, z: std::ops::Range<u32>, out: &mut [u8]) -> VolumeResult<()> {
                out.fill(z.start as u8 + 1);
                self.calls.push(z);
                Ok(())
            }
        }

        let dims = UVec3::new(2, 2, 7);
        let mut pre = AmbientOcclusionPrecomputer::new(Counting { calls: Vec::new() }, dims, 3);
        let out = pre.compute().unwrap();
        assert_eq!(pre.into_kernel().calls, vec![0..3, 3..6, 6..7]);
        assert_eq!(out[linear_index(dims, 1, 1, 6)], 7);
    }
}
