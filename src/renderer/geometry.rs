//! Bounding box and cut-plane geometry

use glam::Vec3;
use wgpu::util::DeviceExt;

use super::render_data::BoundsVertex;

/// Corner `i` has x, y, z taken from bits 0, 1, 2
pub const BOX_INDICES: [u16; 36] = [
    0, 2, 1, 1, 2, 3, // -Z
    4, 5, 6, 5, 7, 6, // +Z
    0, 4, 2, 2, 4, 6, // -X
    1, 3, 5, 3, 7, 5, // +X
    0, 1, 4, 1, 5, 4, // -Y
    2, 6, 3, 3, 6, 7, // +Y
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

pub fn box_vertices(min: Vec3, max: Vec3) -> [BoundsVertex; 8] {
    std::array::from_fn(|i| {
        let pick = |bit: usize, lo: f32, hi: f32| if i & (1 << bit) != 0 { hi } else { lo };
        BoundsVertex {
            position: [
                pick(0, min.x, max.x),
                pick(1, min.y, max.y),
                pick(2, min.z, max.z),
            ],
        }
    })
}

/// GPU buffers of the box and the cut-plane quad
pub struct BoundsGeometry {
    pub box_vertices: wgpu::Buffer,
    pub box_indices: wgpu::Buffer,
    /// Rewritten every frame from the current rotation
    pub quad_vertices: wgpu::Buffer,
    pub quad_indices: wgpu::Buffer,
}

pub fn create_bounds_geometry(device: &wgpu::Device, min: Vec3, max: Vec3) -> BoundsGeometry {
    let box_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Bounding Box Vertices"),
        contents: bytemuck::cast_slice(&box_vertices(min, max)),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let box_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Bounding Box Indices"),
        contents: bytemuck::cast_slice(&BOX_INDICES),
        usage: wgpu::BufferUsages::INDEX,
    });
    let quad_vertices = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Cut Plane Vertices"),
        size: (std::mem::size_of::<BoundsVertex>() * 4) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let quad_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Cut Plane Indices"),
        contents: bytemuck::cast_slice(&QUAD_INDICES),
        usage: wgpu::BufferUsages::INDEX,
    });

    BoundsGeometry {
        box_vertices,
        box_indices,
        quad_vertices,
        quad_indices,
    }
}
