//! Transfer Function Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in transfer_operations.rs

use glam::Vec4;

/// Number of texels in the intensity lookup
pub const TRANSFER_SIZE: usize = 256;

/// Intensity to RGBA8 lookup sampled by the raymarch shaders
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    /// TRANSFER_SIZE * 4 bytes
    pub rgba: Vec<u8>,
    /// Colors the editor handles interpolate between
    pub handle_colors: Vec<[u8; 3]>,
}

/// Two tissue bands: rgb color plus threshold in w
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferBands {
    pub function1_min: Vec4,
    pub function1_max: Vec4,
    pub function2_min: Vec4,
    pub function2_max: Vec4,
}
