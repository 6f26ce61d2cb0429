//! Error handling for the volume renderer
//!
//! One error type for the whole crate so that GPU setup, packing and editing
//! failures propagate with `?` instead of panicking inside a frame.

use std::error::Error as StdError;
use std::fmt;

/// Main error type for hearth-volume
#[derive(Debug)]
pub enum VolumeError {
    // Volume Errors
    InvalidDimensions {
        x: u32,
        y: u32,
        z: u32,
        reason: String,
    },
    DataSizeMismatch {
        expected: usize,
        found: usize,
    },
    UnsupportedVoxelFormat {
        bytes_per_voxel: u32,
    },

    // Tiled Atlas Errors
    InvalidTileLayout {
        z_dim: u32,
        tile_cols: u32,
    },
    AtlasTooLarge {
        width: u32,
        height: u32,
        max_dimension: u32,
    },

    // GPU Errors
    AdapterNotFound,
    DeviceRequestFailed {
        error: String,
    },
    ShaderCompilation {
        variant: String,
        error: String,
    },
    Readback(crate::gpu::ReadbackError),

    // Renderer State Errors
    NoVolumeLoaded,
    StateError {
        expected: String,
        actual: String,
    },

    // Configuration Errors
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    // Encoding Errors
    ImageEncoding {
        error: String,
    },

    // Generic fallback for unexpected errors
    Internal {
        message: String,
    },
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeError::InvalidDimensions { x, y, z, reason } => {
                write!(f, "Invalid volume dimensions {}x{}x{}: {}", x, y, z, reason)
            }
            VolumeError::DataSizeMismatch { expected, found } => write!(
                f,
                "Voxel data size mismatch: expected {} bytes, found {}",
                expected, found
            ),
            VolumeError::UnsupportedVoxelFormat { bytes_per_voxel } => write!(
                f,
                "Unsupported voxel format: {} bytes per voxel (expected 1 or 4)",
                bytes_per_voxel
            ),
            VolumeError::InvalidTileLayout { z_dim, tile_cols } => write!(
                f,
                "Invalid tile layout: {}x{} tiles cannot hold {} slices",
                tile_cols, tile_cols, z_dim
            ),
            VolumeError::AtlasTooLarge {
                width,
                height,
                max_dimension,
            } => write!(
                f,
                "Tiled atlas {}x{} exceeds max texture dimension {}",
                width, height, max_dimension
            ),
            VolumeError::AdapterNotFound => write!(f, "No suitable GPU adapter found"),
            VolumeError::DeviceRequestFailed { error } => {
                write!(f, "GPU device request failed: {}", error)
            }
            VolumeError::ShaderCompilation { variant, error } => {
                write!(f, "Pipeline {} failed to build: {}", variant, error)
            }
            VolumeError::Readback(error) => write!(f, "GPU readback failed: {}", error),
            VolumeError::NoVolumeLoaded => write!(f, "No volume loaded"),
            VolumeError::StateError { expected, actual } => write!(
                f,
                "Invalid state: expected {}, found {}",
                expected, actual
            ),
            VolumeError::InvalidConfig {
                field,
                value,
                reason,
            } => write!(
                f,
                "Invalid config value for {}: {} ({})",
                field, value, reason
            ),
            VolumeError::ImageEncoding { error } => write!(f, "Image encoding failed: {}", error),
            VolumeError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl StdError for VolumeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            VolumeError::Readback(error) => Some(error),
            _ => None,
        }
    }
}

/// Type alias for Results in hearth-volume
pub type VolumeResult<T> = Result<T, VolumeError>;

impl From<crate::gpu::ReadbackError> for VolumeError {
    fn from(error: crate::gpu::ReadbackError) -> Self {
        VolumeError::Readback(error)
    }
}

impl From<image::ImageError> for VolumeError {
    fn from(error: image::ImageError) -> Self {
        VolumeError::ImageEncoding {
            error: error.to_string(),
        }
    }
}

impl From<wgpu::RequestDeviceError> for VolumeError {
    fn from(error: wgpu::RequestDeviceError) -> Self {
        VolumeError::DeviceRequestFailed {
            error: error.to_string(),
        }
    }
}

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_volume<F>(self, f: F) -> VolumeResult<T>
    where
        F: FnOnce() -> VolumeError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_volume<F>(self, f: F) -> VolumeResult<T>
    where
        F: FnOnce() -> VolumeError,
    {
        self.ok_or_else(f)
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> VolumeResult<T>;
    fn with_context<F>(self, f: F) -> VolumeResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn context(self, msg: &str) -> VolumeResult<T> {
        self.map_err(|e| VolumeError::Internal {
            message: format!("{}: {}", msg, e),
        })
    }

    fn with_context<F>(self, f: F) -> VolumeResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| VolumeError::Internal {
            message: format!("{}: {}", f(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VolumeError::InvalidTileLayout {
            z_dim: 20,
            tile_cols: 4,
        };
        assert_eq!(
            err.to_string(),
            "Invalid tile layout: 4x4 tiles cannot hold 20 slices"
        );
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_volume(|| VolumeError::NoVolumeLoaded);
        assert!(matches!(result, Err(VolumeError::NoVolumeLoaded)));
    }

    #[test]
    fn test_error_context_keeps_source_message() {
        let result: Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let err = result.context("loading config").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Internal error: loading config: file not found"
        );
    }

    #[test]
    fn test_readback_error_is_source() {
        let err: VolumeError = crate::gpu::ReadbackError::ChannelClosed.into();
        assert!(err.source().is_some());
    }
}
