//! Bilateral filter engine
//!
//! Edge-preserving smoothing of the intensity volume, one batch of z-slices
//! per `update()` so a host can spread the work over several frames.

pub mod bilateral_cpu;
pub mod bilateral_gpu;

pub use bilateral_cpu::{filter_sigmas, CpuBilateralKernel};
pub use bilateral_gpu::{BilateralUniform, GpuBilateralKernel};

use glam::UVec3;

use crate::error::{VolumeError, VolumeResult};
use crate::gpu::SliceKernel;
use crate::volume::voxel_count;

/// Number of `update()` calls for volumes deeper than 16 slices
const STEPS_LARGE: u32 = 24;
const STEPS_SMALL: u32 = 2;

pub struct BilateralFilterEngine<K: SliceKernel> {
    kernel: K,
    dims: UVec3,
    result: Vec<u8>,
    z: u32,
    iteration: u32,
}

impl<K: SliceKernel> BilateralFilterEngine<K> {
    /// The result starts as a copy of `input`
    pub fn new(kernel: K, input: &[u8], dims: UVec3) -> VolumeResult<Self> {
        if input.len() != voxel_count(dims) {
            return Err(VolumeError::DataSizeMismatch {
                expected: voxel_count(dims),
                found: input.len(),
            });
        }
        log::info!(
            "[BilateralFilter] {} over {}x{}x{}",
            kernel.label(),
            dims.x,
            dims.y,
            dims.z
        );
        Ok(Self {
            kernel,
            dims,
            result: input.to_vec(),
            z: 0,
            iteration: 0,
        })
    }

    fn steps(&self) -> u32 {
        if self.dims.z > 16 {
            STEPS_LARGE
        } else {
            STEPS_SMALL
        }
    }

    /// Filter the next batch of slices. No-op once finished.
    pub fn update(&mut self) -> VolumeResult<()> {
        if self.is_finished() {
            return Ok(());
        }
        let z_next = ((self.iteration + 1) as u64 * self.dims.z as u64 / self.steps() as u64) as u32;
        let z_next = z_next.clamp(self.z, self.dims.z);

        if z_next > self.z {
            let slice_len = (self.dims.x * self.dims.y) as usize;
            let dst = &mut self.result[self.z as usize * slice_len..z_next as usize * slice_len];
            self.kernel.process_slices(self.z..z_next, dst)?;
            log::debug!(
                "[BilateralFilter] slices {}..{} of {}",
                self.z,
                z_next,
                self.dims.z
            );
        }
        self.z = z_next;
        self.iteration += 1;

        if self.is_finished() {
            log::info!("[BilateralFilter] Finished after {} updates", self.iteration);
        }
        Ok(())
    }

    /// Drive `update()` to completion
    pub fn run_to_end(&mut self) -> VolumeResult<()> {
        while !self.is_finished() {
            self.update()?;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.z >= self.dims.z
    }

    /// Fraction of slices done, 0..=1
    pub fn progress(&self) -> f32 {
        self.z as f32 / self.dims.z as f32
    }

    pub fn result(&self) -> &[u8] {
        &self.result
    }

    pub fn into_result(self) -> Vec<u8> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;

    #[test]
    fn test_flat_volume_is_fixed_point() {
        let dims = UVec3::new(6, 4, 5);
        let input = vec![137u8; voxel_count(dims)];
        let kernel = CpuBilateralKernel::new(&input, dims, &FilterConfig::default()).unwrap();
        let mut engine = BilateralFilterEngine::new(kernel, &input, dims).unwrap();
        engine.run_to_end().unwrap();
        assert_eq!(engine.result(), input.as_slice());
    }

    #[test]
    fn test_small_volume_finishes_in_two_updates() {
        let dims = UVec3::new(3, 3, 5);
        let input = vec![10u8; voxel_count(dims)];
        let kernel = CpuBilateralKernel::new(&input, dims, &FilterConfig::default()).unwrap();
        let mut engine = BilateralFilterEngine::new(kernel, &input, dims).unwrap();

        assert_eq!(engine.progress(), 0.0);
        engine.update().unwrap();
        assert!(!engine.is_finished());
        assert!((engine.progress() - 0.4).abs() < 1e-6);
        engine.update().unwrap();
        assert!(engine.is_finished());
        assert_eq!(engine.progress(), 1.0);
    }

    #[test]
    fn test_large_volume_takes_24_updates() {
        let dims = UVec3::new(2, 2, 48);
        let input = vec![0u8; voxel_count(dims)];
        let kernel = CpuBilateralKernel::new(&input, dims, &FilterConfig::default()).unwrap();
        let mut engine = BilateralFilterEngine::new(kernel, &input, dims).unwrap();
        let mut updates = 0;
        while !engine.is_finished() {
            engine.update().unwrap();
            updates += 1;
        }
        assert_eq!(updates, 24);
    }

    #[test]
    fn test_rejects_wrong_input_size() {
        let dims = UVec3::new(2, 2, 2);
        let input = vec![0u8; 8];
        let kernel = CpuBilateralKernel::new(&input, dims, &FilterConfig::default()).unwrap();
        assert!(BilateralFilterEngine::new(kernel, &[0u8; 3], dims).is_err());
    }
}
