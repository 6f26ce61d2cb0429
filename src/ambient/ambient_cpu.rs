//! CPU reference kernel for ambient occlusion
//!
//! Same march as `ambient_slice.wgsl`. Rows are spread over the rayon pool.

use std::ops::Range;

use glam::{IVec3, UVec3, Vec3};
use rayon::prelude::*;

use crate::config::AmbientConfig;
use crate::error::{VolumeError, VolumeResult};
use crate::gpu::SliceKernel;
use crate::volume::{linear_index, voxel_count};

pub struct CpuAmbientKernel<'a> {
    intensities: &'a [u8],
    dims: UVec3,
    directions: Vec<Vec3>,
    /// Threshold in voxel units (0..255)
    iso_level: f32,
    ray_steps: u32,
    step_length: f32,
}

impl<'a> CpuAmbientKernel<'a> {
    pub fn new(
        intensities: &'a [u8],
        dims: UVec3,
        directions: Vec<Vec3>,
        iso_threshold: f32,
        config: &AmbientConfig,
    ) -> VolumeResult<Self> {
        if intensities.len() != voxel_count(dims) {
            return Err(VolumeError::DataSizeMismatch {
                expected: voxel_count(dims),
                found: intensities.len(),
            });
        }
        Ok(Self {
            intensities,
            dims,
            directions,
            iso_level: iso_threshold * 255.0,
            ray_steps: config.ray_steps,
            step_length: config.step_length,
        })
    }

    fn load(&self, p: IVec3) -> f32 {
        let max = self.dims.as_ivec3() - IVec3::ONE;
        let c = p.clamp(IVec3::ZERO, max).as_uvec3();
        self.intensities[linear_index(self.dims, c.x, c.y, c.z)] as f32
    }

    fn visibility(&self, x: u32, y: u32, z: u32) -> u8 {
        let origin = Vec3::new(x as f32, y as f32, z as f32);
        let occluded = self
            .directions
            .iter()
            .filter(|dir| {
                (1..=self.ray_steps).any(|s| {
                    let p = origin + **dir * (s as f32 * self.step_length);
                    self.load(p.round().as_ivec3()) >= self.iso_level
                })
            })
            .count();
        let visible = 1.0 - occluded as f32 / self.directions.len().max(1) as f32;
        (visible * 255.0).round() as u8
    }
}

impl SliceKernel for CpuAmbientKernel<'_> {
    fn label(&self) -> &'static str {
        "CPU Ambient Occlusion"
    }

    fn process_slices(&mut self, z_range: Range<u32>, out: &mut [u8]) -> VolumeResult<()> {
        let row = self.dims.x as usize;
        let rows_per_slice = self.dims.y as usize;
        let kernel = &*self;
        out.par_chunks_mut(row).enumerate().for_each(|(r, dst)| {
            let z = z_range.start + (r / rows_per_slice) as u32;
            let y = (r % rows_per_slice) as u32;
            for (x, value) in dst.iter_mut().enumerate() {
                *value = kernel.visibility(x as u32, y, z);
            }
        });
        Ok(())
    }
}
