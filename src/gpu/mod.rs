//! GPU plumbing shared by the packer, precompute kernels and renderer

pub mod capabilities;
pub mod readback;
pub mod shader_source;
pub mod slice_pass;

pub use capabilities::{
    choose_slice_backend, detect_capabilities, request_headless_context, GpuCapabilities,
    GpuContext, SliceBackend,
};
pub use readback::{ReadbackError, ReadbackResultExt};
pub use slice_pass::{build_checked, kernel_bind_group_layout, SliceKernel, SlicePass};
