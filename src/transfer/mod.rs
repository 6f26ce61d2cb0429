//! Transfer function lookup and tissue bands

pub mod transfer_data;
pub mod transfer_operations;

pub use transfer_data::{TransferBands, TransferFunction, TRANSFER_SIZE};
pub use transfer_operations::{
    band_array, bands_from_thresholds, create_transfer_function, default_handle_colors,
    set_handle_colors, update_from_handles,
};
