// Hearth Volume - GPU volume ray casting with a voxel mask eraser
//
// Data-oriented layout: plain data in *_data.rs, free functions in
// *_operations.rs. GPU handles live in the renderer context and are dropped
// as a unit whenever a new volume is loaded.
//
// - volume: packing into a 3D texture or tiled 2D atlas
// - ambient / filter: per-slice precompute kernels (GPU or CPU)
// - transfer: 256-entry color/opacity lookup and tissue bands
// - renderer: multi-pass ray caster
// - eraser: CPU mask editing against a captured frame

pub mod ambient;
pub mod config;
pub mod eraser;
pub mod error;
pub mod filter;
pub mod gpu;
pub mod renderer;
pub mod transfer;
pub mod volume;

pub use ambient::AmbientOcclusionPrecomputer;
pub use config::{AmbientConfig, EraserConfig, FilterConfig, RendererConfig, SeedSolid, VolumeConfig};
pub use eraser::{EraseOutcome, FrameCapture, VoxelMaskEditor};
pub use error::{ErrorContext, OptionExt, VolumeError, VolumeResult};
pub use filter::BilateralFilterEngine;
pub use gpu::{request_headless_context, GpuCapabilities, GpuContext};
pub use renderer::{OverlayScene, RenderMode, ShaderFailure, VolumeRenderer};
pub use transfer::TransferFunction;
pub use volume::{create_volume, AddressingMode, NonEmptyBox, RoiPalette, Volume};

// Re-export wgpu so hosts create surfaces and overlays against the same version
pub use wgpu;
