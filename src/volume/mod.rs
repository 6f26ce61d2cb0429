//! Volume texture packing
//!
//! Turns the loader's voxel grid into a GPU texture. Devices that can hold
//! the volume get a native 3D texture; everything else gets z-slices tiled
//! into one 2D atlas. The chosen `AddressingMode` is shared by every
//! consumer for the rest of the session.

pub mod volume_data;
pub mod volume_operations;
pub mod volume_upload;

pub use volume_data::{
    AddressingMode, NonEmptyBox, PackedVolume, RoiPalette, TileLayout, Volume, VolumeTexture, ROI_TABLE_SIZE,
};
pub use volume_operations::{
    arrange_texels, choose_addressing_mode, create_volume, default_palette,
    default_selected_rois, linear_index, pack_volume, tile_cols_for, tile_forward, tile_inverse,
    tile_layout, virtual_box, voxel_coords, voxel_count,
};
pub use volume_upload::{
    placeholder_voxel_texture, upload_mask_texture, upload_roi_lut, upload_volume_texture,
    upload_voxel_texture, write_mask_texture, write_roi_lut, write_voxel_texture,
};
