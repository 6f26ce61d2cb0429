//! Uniform sample directions on the unit sphere
//!
//! A seed solid is subdivided recursively: every triangle splits into four
//! and new vertices are pushed out onto the sphere. Shared edges reuse one
//! midpoint, so the result has no duplicate directions.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::config::SeedSolid;

const ICO_X: f32 = 0.525_731_1;
const ICO_Z: f32 = 0.850_650_8;

const ICO_VERTICES: [[f32; 3]; 12] = [
    [-ICO_X, 0.0, ICO_Z],
    [ICO_X, 0.0, ICO_Z],
    [-ICO_X, 0.0, -ICO_Z],
    [ICO_X, 0.0, -ICO_Z],
    [0.0, ICO_Z, ICO_X],
    [0.0, ICO_Z, -ICO_X],
    [0.0, -ICO_Z, ICO_X],
    [0.0, -ICO_Z, -ICO_X],
    [ICO_Z, ICO_X, 0.0],
    [-ICO_Z, ICO_X, 0.0],
    [ICO_Z, -ICO_X, 0.0],
    [-ICO_Z, -ICO_X, 0.0],
];

const ICO_TRIANGLES: [[u32; 3]; 20] = [
    [0, 4, 1],
    [0, 9, 4],
    [9, 5, 4],
    [4, 5, 8],
    [4, 8, 1],
    [8, 10, 1],
    [8, 3, 10],
    [5, 3, 8],
    [5, 2, 3],
    [2, 7, 3],
    [7, 10, 3],
    [7, 6, 10],
    [7, 11, 6],
    [11, 0, 6],
    [0, 1, 6],
    [6, 1, 10],
    [9, 0, 11],
    [9, 11, 2],
    [9, 2, 5],
    [7, 2, 11],
];

const TETRA_VERTICES: [[f32; 3]; 4] = [
    [1.0, 1.0, 1.0],
    [-1.0, -1.0, 1.0],
    [-1.0, 1.0, -1.0],
    [1.0, -1.0, -1.0],
];

const TETRA_TRIANGLES: [[u32; 3]; 4] = [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]];

/// Subdivided sphere mesh; only the vertices are used as directions
struct SphereMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
}

fn seed_mesh(seed: SeedSolid) -> SphereMesh {
    let (vertices, triangles): (&[[f32; 3]], &[[u32; 3]]) = match seed {
        SeedSolid::Tetrahedron => (&TETRA_VERTICES, &TETRA_TRIANGLES),
        SeedSolid::Icosahedron => (&ICO_VERTICES, &ICO_TRIANGLES),
    };
    SphereMesh {
        vertices: vertices.iter().map(|v| Vec3::from(*v).normalize()).collect(),
        triangles: triangles.to_vec(),
    }
}

fn midpoint(mesh: &mut SphereMesh, cache: &mut FxHashMap<(u32, u32), u32>, a: u32, b: u32) -> u32 {
    let key = if a < b { (a, b) } else { (b, a) };
    if let Some(index) = cache.get(&key) {
        return *index;
    }
    let mid = (mesh.vertices[a as usize] + mesh.vertices[b as usize]).normalize();
    let index = mesh.vertices.len() as u32;
    mesh.vertices.push(mid);
    cache.insert(key, index);
    index
}

fn subdivide(mesh: &mut SphereMesh) {
    let mut cache = FxHashMap::default();
    let triangles = std::mem::take(&mut mesh.triangles);
    let mut next = Vec::with_capacity(triangles.len() * 4);
    for [a, b, c] in triangles {
        let ab = midpoint(mesh, &mut cache, a, b);
        let bc = midpoint(mesh, &mut cache, b, c);
        let ca = midpoint(mesh, &mut cache, c, a);
        next.push([a, ab, ca]);
        next.push([b, bc, ab]);
        next.push([c, ca, bc]);
        next.push([ab, bc, ca]);
    }
    mesh.triangles = next;
}

/// Unit directions from `seed` after `levels` subdivisions
pub fn sphere_directions(seed: SeedSolid, levels: u32) -> Vec<Vec3> {
    let mut mesh = seed_mesh(seed);
    for _ in 0..levels {
        subdivide(&mut mesh);
    }
    mesh.vertices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_counts() {
        assert_eq!(sphere_directions(SeedSolid::Tetrahedron, 0).len(), 4);
        assert_eq!(sphere_directions(SeedSolid::Tetrahedron, 3).len(), 130);
        assert_eq!(sphere_directions(SeedSolid::Icosahedron, 2).len(), 162);
    }

    #[test]
    fn test_directions_are_unit_and_balanced() {
        let dirs = sphere_directions(SeedSolid::Tetrahedron, 3);
        for d in &dirs {
            assert!((d.length() - 1.0).abs() < 1e-5);
        }
        // Symmetric seed keeps the mean near the origin
        let mean = dirs.iter().copied().sum::<Vec3>() / dirs.len() as f32;
        assert!(mean.length() < 1e-3);
    }
}
