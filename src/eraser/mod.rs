//! Voxel mask editor
//!
//! - eraser_data.rs: mask, strokes and frame capture (no methods)
//! - tool_frame.rs: tool cylinder pose shared by erase and undo
//! - eraser_operations.rs: erase, undo and history functions

pub mod eraser_data;
pub mod eraser_operations;
pub mod tool_frame;

pub use eraser_data::{
    EraseOutcome, FrameCapture, Mask, Stroke, VoxelMaskEditor, MASK_ERASED, MASK_VISIBLE,
    NO_MATERIAL,
};
pub use eraser_operations::{
    clear_history, create_eraser, create_mask, erase_start, estimate_normal, flood_fill,
    radius_ratio, reset_mask, sample_capture, set_depth, set_radius, take_dirty, target_voxel,
    undo_last_erasing,
};
pub use tool_frame::{back_distance, euler_from_normal, inside_tool, tool_frame, ToolFrame};
