//! Texture readback
//!
//! Copies render targets into a staging buffer with rows padded to
//! `COPY_BYTES_PER_ROW_ALIGNMENT`, blocks until the map completes and strips
//! the padding again. Several copies can share one staging buffer so a batch
//! of slices costs a single round trip.

use std::time::Instant;

/// Readback errors
#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("Readback channel closed before mapping finished")]
    ChannelClosed,

    #[error("Buffer mapping failed: {message}")]
    MapFailed { message: String },

    #[error("Unsupported readback format {format:?}")]
    UnsupportedFormat { format: wgpu::TextureFormat },

    #[error("Readback size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Readback failed: {message}")]
    OperationFailed { message: String },
}

/// Extension trait for wrapping foreign errors as readback errors
pub trait ReadbackResultExt<T> {
    fn readback_context(self, context: &str) -> Result<T, ReadbackError>;
}

impl<T, E: std::fmt::Display> ReadbackResultExt<T> for Result<T, E> {
    fn readback_context(self, context: &str) -> Result<T, ReadbackError> {
        self.map_err(|e| ReadbackError::OperationFailed {
            message: format!("{}: {}", context, e),
        })
    }
}

/// Round a row up to the copy alignment
pub fn padded_bytes_per_row(tight_bytes_per_row: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (tight_bytes_per_row + align - 1) / align * align
}

/// Bytes per texel for the formats this crate reads back
pub fn bytes_per_texel(format: wgpu::TextureFormat) -> Result<u32, ReadbackError> {
    match format {
        wgpu::TextureFormat::R8Unorm => Ok(1),
        wgpu::TextureFormat::R32Float => Ok(4),
        wgpu::TextureFormat::Rgba8Unorm
        | wgpu::TextureFormat::Rgba8UnormSrgb
        | wgpu::TextureFormat::Bgra8Unorm
        | wgpu::TextureFormat::Bgra8UnormSrgb => Ok(4),
        wgpu::TextureFormat::Rgba32Float => Ok(16),
        format => Err(ReadbackError::UnsupportedFormat { format }),
    }
}

/// Drop the row padding of `rows` rows
pub fn depad_rows(padded: &[u8], tight_bytes_per_row: usize, padded_bytes_per_row: usize, rows: usize) -> Vec<u8> {
    let mut tight = Vec::with_capacity(tight_bytes_per_row * rows);
    for row in 0..rows {
        let start = row * padded_bytes_per_row;
        tight.extend_from_slice(&padded[start..start + tight_bytes_per_row]);
    }
    tight
}

/// Reinterpret little-endian bytes as f32 values
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Size and layout of one 2D texture copy
#[derive(Debug, Clone, Copy)]
pub struct CopyLayout {
    pub width: u32,
    pub height: u32,
    pub tight_bytes_per_row: u32,
    pub padded_bytes_per_row: u32,
}

impl CopyLayout {
    pub fn new(width: u32, height: u32, format: wgpu::TextureFormat) -> Result<Self, ReadbackError> {
        let tight_bytes_per_row = width * bytes_per_texel(format)?;
        Ok(Self {
            width,
            height,
            tight_bytes_per_row,
            padded_bytes_per_row: padded_bytes_per_row(tight_bytes_per_row),
        })
    }

    /// Bytes one copy occupies in the staging buffer
    pub fn padded_size(&self) -> u64 {
        self.padded_bytes_per_row as u64 * self.height as u64
    }

    pub fn tight_size(&self) -> usize {
        self.tight_bytes_per_row as usize * self.height as usize
    }
}

pub fn create_staging_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    })
}

/// Record a copy of `texture` into `staging` at `offset`
pub fn encode_texture_copy(
    encoder: &mut wgpu::CommandEncoder,
    texture: &wgpu::Texture,
    layout: &CopyLayout,
    staging: &wgpu::Buffer,
    offset: u64,
) {
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: staging,
            layout: wgpu::ImageDataLayout {
                offset,
                bytes_per_row: Some(layout.padded_bytes_per_row),
                rows_per_image: Some(layout.height),
            },
        },
        wgpu::Extent3d {
            width: layout.width,
            height: layout.height,
            depth_or_array_layers: 1,
        },
    );
}

/// Map `staging` for reading, wait for the GPU and copy the first `size` bytes out
pub fn map_staging_buffer(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, ReadbackError> {
    let mapping_start = Instant::now();
    let buffer_slice = staging.slice(..size);
    let (sender, receiver) = flume::bounded(1);
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|_| ReadbackError::ChannelClosed)?
        .map_err(|e| ReadbackError::MapFailed {
            message: format!("{:?}", e),
        })?;

    let mapped = buffer_slice.get_mapped_range();
    let data = mapped.to_vec();
    drop(mapped);
    staging.unmap();

    log::debug!(
        "[Readback] Mapped {} bytes in {:.2}ms",
        size,
        mapping_start.elapsed().as_secs_f64() * 1000.0
    );

    if data.len() as u64 != size {
        return Err(ReadbackError::SizeMismatch {
            expected: size as usize,
            actual: data.len(),
        });
    }
    Ok(data)
}

/// Read one whole 2D texture into tightly packed bytes
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> Result<Vec<u8>, ReadbackError> {
    let layout = CopyLayout::new(width, height, format)?;
    let staging = create_staging_buffer(device, "Readback Staging Buffer", layout.padded_size());

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encode_texture_copy(&mut encoder, texture, &layout, &staging, 0);
    queue.submit(std::iter::once(encoder.finish()));

    let padded = map_staging_buffer(device, &staging, layout.padded_size())?;
    Ok(depad_rows(
        &padded,
        layout.tight_bytes_per_row as usize,
        layout.padded_bytes_per_row as usize,
        height as usize,
    ))
}

/// Read an Rgba32Float texture as f32 values
pub fn read_texture_f32(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<f32>, ReadbackError> {
    let bytes = read_texture(
        device,
        queue,
        texture,
        width,
        height,
        wgpu::TextureFormat::Rgba32Float,
    )?;
    Ok(bytes_to_f32(&bytes))
}
