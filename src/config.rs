//! Renderer, eraser and precompute configuration
//!
//! Every struct has defaults tuned for CT data and can be overridden from a
//! TOML document. `validate()` rejects values the GPU passes cannot handle.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ambient::MAX_AMBIENT_DIRECTIONS;
use crate::error::{VolumeError, VolumeResult};

/// Seed solid subdivided onto the unit sphere for AO sample directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSolid {
    Tetrahedron,
    Icosahedron,
}

/// Ray-casting renderer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub fov_degrees: f32,
    pub camera_distance: f32,
    pub near: f32,
    pub far: f32,
    /// Per-band ray step lengths in texture space
    pub step_sizes: [f32; 4],
    pub iso_threshold: f32,
    pub threshold_tissue1: f32,
    pub threshold_tissue2: f32,
    /// Slider value in 0..1, scaled by the opacity barrier factor
    pub opacity_tissue: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub low_res_divisor: u32,
    pub ssao_samples: u32,
    pub ssao_seed: u64,
    pub cut_plane_center: [f32; 3],
    /// Zero the first and last slices of 1-byte volumes so isosurfaces close
    pub seal_edge_slices: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewport_width: 800,
            viewport_height: 600,
            fov_degrees: 60.0,
            camera_distance: 1.5,
            near: 0.01,
            far: 10.0,
            step_sizes: [0.0025, 0.0033, 0.0025, 0.0029],
            iso_threshold: 0.43,
            threshold_tissue1: 0.1,
            threshold_tissue2: 0.35,
            opacity_tissue: 0.15,
            brightness: 0.69,
            contrast: 1.0,
            low_res_divisor: 3,
            ssao_samples: 64,
            ssao_seed: 0x5EED_A0,
            cut_plane_center: [-0.5, -0.5, 0.7],
            seal_edge_slices: true,
        }
    }
}

/// Voxel eraser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EraserConfig {
    pub radius: f32,
    pub depth: f32,
    /// Max change of hit distance between two samples of one stroke
    pub continuity_tolerance: f32,
    pub gauss_radius: u32,
    pub gauss_sigma: f32,
    /// Fraction of full scale subtracted from the iso threshold
    pub iso_border: f32,
}

impl Default for EraserConfig {
    fn default() -> Self {
        Self {
            radius: 10.0,
            depth: 10.0,
            continuity_tolerance: 0.05,
            gauss_radius: 2,
            gauss_sigma: 1.4,
            iso_border: 0.01,
        }
    }
}

/// Ambient occlusion precompute settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientConfig {
    pub seed_solid: SeedSolid,
    pub subdivisions: u32,
    pub ray_steps: u32,
    /// March step in voxels
    pub step_length: f32,
    pub slices_per_readback: u32,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            seed_solid: SeedSolid::Tetrahedron,
            subdivisions: 3,
            ray_steps: 8,
            step_length: 1.5,
            slices_per_readback: 8,
        }
    }
}

/// Bilateral filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub kernel_radius: u32,
    pub koef_dist: f32,
    pub koef_val: f32,
    pub slices_per_readback: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kernel_radius: 2,
            koef_dist: 0.8,
            koef_val: 1.6,
            slices_per_readback: 4,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub renderer: RendererConfig,
    pub eraser: EraserConfig,
    pub ambient: AmbientConfig,
    pub filter: FilterConfig,
}

impl VolumeConfig {
    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: VolumeConfig =
            toml::from_str(source).context("VolumeConfig: failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("VolumeConfig: failed to read {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.renderer.validate()?;
        self.eraser.validate()?;
        self.ambient.validate()?;
        self.filter.validate()?;
        log::info!("[VolumeConfig] Configuration validated successfully");
        Ok(())
    }

    /// Like `validate`, but names the rejected section in a crate error
    pub fn check(&self) -> VolumeResult<()> {
        let sections = [
            ("renderer", self.renderer.validate(), format!("{:?}", self.renderer)),
            ("eraser", self.eraser.validate(), format!("{:?}", self.eraser)),
            ("ambient", self.ambient.validate(), format!("{:?}", self.ambient)),
            ("filter", self.filter.validate(), format!("{:?}", self.filter)),
        ];
        for (field, result, value) in sections {
            if let Err(e) = result {
                log::warn!("[VolumeConfig] Rejected {} section: {}", field, e);
                return Err(VolumeError::InvalidConfig {
                    field: field.to_string(),
                    value,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl RendererConfig {
    pub fn validate(&self) -> Result<()> {
        if self.viewport_width < self.low_res_divisor || self.viewport_height < self.low_res_divisor
        {
            return Err(anyhow!(
                "RendererConfig: viewport {}x{} is smaller than the low-res divisor {}",
                self.viewport_width,
                self.viewport_height,
                self.low_res_divisor
            ));
        }
        if self.viewport_width > 16384 || self.viewport_height > 16384 {
            return Err(anyhow!(
                "RendererConfig: viewport too large (max 16384x16384)"
            ));
        }
        if self.low_res_divisor == 0 {
            return Err(anyhow!("RendererConfig: low_res_divisor cannot be 0"));
        }
        if !(1.0..179.0).contains(&self.fov_degrees) {
            return Err(anyhow!(
                "RendererConfig: fov_degrees {} must be within 1..179",
                self.fov_degrees
            ));
        }
        if self.near <= 0.0 || self.far <= self.near {
            return Err(anyhow!(
                "RendererConfig: invalid clip range near={} far={}",
                self.near,
                self.far
            ));
        }
        if self.step_sizes.iter().any(|s| *s <= 0.0) {
            return Err(anyhow!(
                "RendererConfig: step sizes must be positive, got {:?}",
                self.step_sizes
            ));
        }
        if !(0.0..=1.0).contains(&self.iso_threshold) {
            return Err(anyhow!(
                "RendererConfig: iso_threshold {} outside 0..1",
                self.iso_threshold
            ));
        }
        if self.ssao_samples == 0 || self.ssao_samples > crate::renderer::MAX_SSAO_SAMPLES {
            return Err(anyhow!(
                "RendererConfig: ssao_samples {} must be within 1..={}",
                self.ssao_samples,
                crate::renderer::MAX_SSAO_SAMPLES
            ));
        }
        Ok(())
    }
}

impl EraserConfig {
    pub fn validate(&self) -> Result<()> {
        if self.radius <= 0.0 || self.depth <= 0.0 {
            return Err(anyhow!(
                "EraserConfig: radius {} and depth {} must be positive",
                self.radius,
                self.depth
            ));
        }
        if self.gauss_sigma <= 0.0 {
            return Err(anyhow!("EraserConfig: gauss_sigma must be positive"));
        }
        if self.continuity_tolerance <= 0.0 {
            return Err(anyhow!(
                "EraserConfig: continuity_tolerance must be positive"
            ));
        }
        Ok(())
    }
}

impl AmbientConfig {
    /// Sample directions the seed solid yields after subdividing.
    /// A closed triangle mesh with F faces has 2 + F/2 vertices.
    pub fn direction_count(&self) -> usize {
        let seed_faces: usize = match self.seed_solid {
            SeedSolid::Tetrahedron => 4,
            SeedSolid::Icosahedron => 20,
        };
        let faces = 4usize
            .checked_pow(self.subdivisions)
            .and_then(|split| split.checked_mul(seed_faces))
            .unwrap_or(usize::MAX);
        2usize.saturating_add(faces / 2)
    }

    pub fn validate(&self) -> Result<()> {
        let count = self.direction_count();
        if count > MAX_AMBIENT_DIRECTIONS {
            return Err(anyhow!(
                "AmbientConfig: {:?} with {} subdivisions gives {} directions, maximum is {}",
                self.seed_solid,
                self.subdivisions,
                count,
                MAX_AMBIENT_DIRECTIONS
            ));
        }
        if self.ray_steps == 0 || self.step_length <= 0.0 {
            return Err(anyhow!(
                "AmbientConfig: ray_steps and step_length must be positive"
            ));
        }
        if self.slices_per_readback == 0 {
            return Err(anyhow!("AmbientConfig: slices_per_readback cannot be 0"));
        }
        Ok(())
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kernel_radius == 0 || self.kernel_radius > 8 {
            return Err(anyhow!(
                "FilterConfig: kernel_radius {} must be within 1..=8",
                self.kernel_radius
            ));
        }
        if self.koef_dist <= 0.0 || self.koef_val <= 0.0 {
            return Err(anyhow!("FilterConfig: coefficients must be positive"));
        }
        if self.slices_per_readback == 0 {
            return Err(anyhow!("FilterConfig: slices_per_readback cannot be 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(VolumeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = VolumeConfig::from_toml_str(
            r#"
            [eraser]
            radius = 4.0

            [ambient]
            seed_solid = "icosahedron"
            subdivisions = 2
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.eraser.radius, 4.0);
        assert_eq!(config.eraser.depth, 10.0);
        assert_eq!(config.ambient.seed_solid, SeedSolid::Icosahedron);
        assert_eq!(config.renderer.low_res_divisor, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = VolumeConfig::default();
        config.filter.kernel_radius = 0;
        assert!(config.validate().is_err());

        let mut config = VolumeConfig::default();
        config.renderer.viewport_width = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ambient_direction_count_is_bounded() {
        let mut ambient = AmbientConfig::default();
        assert_eq!(ambient.direction_count(), 130);
        assert!(ambient.validate().is_ok());

        ambient.subdivisions = 4;
        assert_eq!(ambient.direction_count(), 514);
        assert!(ambient.validate().is_err());

        ambient.seed_solid = SeedSolid::Icosahedron;
        ambient.subdivisions = 2;
        assert_eq!(ambient.direction_count(), 162);
        assert!(ambient.validate().is_ok());
        ambient.subdivisions = 3;
        assert!(ambient.validate().is_err());

        ambient.subdivisions = 40;
        assert!(ambient.validate().is_err());

        for seed in [SeedSolid::Tetrahedron, SeedSolid::Icosahedron] {
            for subdivisions in 0..3 {
                let config = AmbientConfig {
                    seed_solid: seed,
                    subdivisions,
                    ..AmbientConfig::default()
                };
                assert_eq!(
                    config.direction_count(),
                    crate::ambient::sphere_directions(seed, subdivisions).len()
                );
            }
        }
    }

    #[test]
    fn test_check_names_rejected_section() {
        assert!(VolumeConfig::default().check().is_ok());

        let mut config = VolumeConfig::default();
        config.ambient.subdivisions = 4;
        match config.check() {
            Err(VolumeError::InvalidConfig { field, reason, .. }) => {
                assert_eq!(field, "ambient");
                assert!(reason.contains("514"), "{}", reason);
            }
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[renderer]\niso_threshold = 0.6").expect("write");

        let config = VolumeConfig::from_toml_file(file.path()).expect("load");
        assert!((config.renderer.iso_threshold - 0.6).abs() < 1e-6);
    }
}
