//! Volume ray-casting renderer
//!
//! - render_data.rs / render_operations.rs: parameters, camera and uniform packing
//! - pipeline_cache.rs: shader variants and their pipelines
//! - readiness.rs: gate that keeps `render()` idle until every variant built
//! - geometry.rs / targets.rs / context.rs: GPU resources per volume and viewport
//! - orchestrator.rs: `VolumeRenderer`, the host-facing frame loop

pub mod context;
pub mod geometry;
pub mod orchestrator;
pub mod pipeline_cache;
pub mod readiness;
pub mod render_data;
pub mod render_operations;
pub mod targets;

pub use orchestrator::{OverlayScene, VolumeRenderer};
pub use pipeline_cache::{required_variants, PipelineVariant};
pub use readiness::{ReadinessBarrier, ShaderFailure};
pub use render_data::{
    BoundsUniform, MouseState, RenderMode, RenderParams, RenderState, RenderUniform,
    MAX_SSAO_SAMPLES,
};
