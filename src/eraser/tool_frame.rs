//! Eraser tool frame
//!
//! The tool is a cylinder whose +Z axis points into the surface. Its pose is
//! stored on each stroke as XYZ Euler angles, and both erasing and undo go
//! through `tool_frame` to turn those angles back into a rotation. Voxel
//! offsets are measured in voxels with z scaled by `radius_ratio` to account
//! for anisotropic slice spacing.

use glam::{EulerRot, Quat, Vec3};

/// Slack on the cylinder bounds so voxels on the rim are not lost to rounding
pub const FRAME_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct ToolFrame {
    /// Maps tool space into voxel space
    pub rotation: Quat,
    pub radius: f32,
    pub depth: f32,
    /// Non-positive; how far behind the hit point the cylinder starts
    pub back_distance: f32,
    pub radius_ratio: f32,
}

/// Euler angles (XYZ) of the rotation taking +Z onto `-normal`
pub fn euler_from_normal(normal: Vec3) -> Vec3 {
    let rotation = Quat::from_rotation_arc(Vec3::Z, -normal.normalize());
    let (a, b, c) = rotation.to_euler(EulerRot::XYZ);
    Vec3::new(a, b, c)
}

/// -round(|tan(angle)| * radius) for the angle between view ray and normal,
/// limited to `[-depth, 0]`
pub fn back_distance(ray: Vec3, normal: Vec3, radius: f32, depth: f32) -> f32 {
    let angle = ray.angle_between(normal);
    let tan = angle.tan().abs();
    if !tan.is_finite() {
        return -depth;
    }
    (-(tan * radius).round()).clamp(-depth, 0.0)
}

/// The single place where stored angles become a frame
pub fn tool_frame(euler: Vec3, radius: f32, depth: f32, back_distance: f32, radius_ratio: f32) -> ToolFrame {
    ToolFrame {
        rotation: Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z),
        radius,
        depth,
        back_distance,
        radius_ratio,
    }
}

/// Voxel offset from the tool origin expressed in tool space
pub fn to_tool_space(frame: &ToolFrame, offset: Vec3) -> Vec3 {
    let scaled = Vec3::new(offset.x, offset.y, offset.z * frame.radius_ratio);
    frame.rotation.inverse() * scaled
}

/// Whether a voxel offset lies inside the tool cylinder
pub fn inside_tool(frame: &ToolFrame, offset: Vec3) -> bool {
    let local = to_tool_space(frame, offset);
    let radial = (local.x * local.x + local.y * local.y).sqrt();
    radial <= frame.radius + FRAME_EPSILON
        && local.z >= frame.back_distance - FRAME_EPSILON
        && local.z <= frame.depth + FRAME_EPSILON
}

/// Half extent of the voxel cube that encloses the cylinder, per axis
pub fn bounding_extent(frame: &ToolFrame) -> glam::IVec3 {
    let reach = frame.depth.max(-frame.back_distance);
    let half = ((frame.radius * frame.radius + reach * reach).sqrt().ceil() as i32).saturating_add(1);
    let z_half = (half as f32 / frame.radius_ratio.max(1e-3)).ceil() as i32;
    glam::IVec3::new(half, half, z_half)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_points_into_surface() {
        let normal = Vec3::new(-1.0, 0.0, 0.0);
        let frame = tool_frame(euler_from_normal(normal), 3.0, 5.0, 0.0, 1.0);
        // +Z of the tool lands on -normal = +x
        let axis = frame.rotation * Vec3::Z;
        assert!((axis - Vec3::X).length() < 1e-4);

        assert!(inside_tool(&frame, Vec3::new(5.0, 0.0, 0.0)));
        assert!(!inside_tool(&frame, Vec3::new(6.0, 0.0, 0.0)));
        assert!(!inside_tool(&frame, Vec3::new(-1.0, 0.0, 0.0)));
        assert!(inside_tool(&frame, Vec3::new(2.0, 3.0, 0.0)));
        assert!(!inside_tool(&frame, Vec3::new(2.0, 3.0, 1.0)));
    }

    #[test]
    fn test_euler_round_trip_is_stable() {
        for normal in [
            Vec3::new(0.3, -0.5, 0.8),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(-0.7, 0.7, 0.1),
        ] {
            let frame = tool_frame(euler_from_normal(normal), 1.0, 1.0, 0.0, 1.0);
            let axis = frame.rotation * Vec3::Z;
            assert!((axis + normal.normalize()).length() < 1e-4);
        }
    }

    #[test]
    fn test_back_distance() {
        // Head-on view: nothing behind the hit
        assert_eq!(back_distance(Vec3::X, -Vec3::X, 4.0, 10.0), 0.0);
        // 45 degrees off: one radius back
        let ray = Vec3::new(1.0, 1.0, 0.0).normalize();
        assert_eq!(back_distance(ray, -Vec3::X, 4.0, 10.0), -4.0);
        // Grazing: limited by depth
        let ray = Vec3::new(0.01, 1.0, 0.0).normalize();
        assert_eq!(back_distance(ray, -Vec3::X, 4.0, 10.0), -10.0);
    }

    #[test]
    fn test_radius_ratio_stretches_z() {
        let frame = tool_frame(euler_from_normal(-Vec3::X), 2.0, 4.0, 0.0, 2.0);
        // z offset of 1 slice is 2 voxels wide
        assert!(inside_tool(&frame, Vec3::new(1.0, 0.0, 1.0)));
        assert!(!inside_tool(&frame, Vec3::new(1.0, 0.0, 1.5)));
        assert_eq!(bounding_extent(&frame).z, 3);
    }

    #[test]
    fn test_bounding_extent_saturates() {
        let frame = tool_frame(euler_from_normal(-Vec3::X), 1e10, 1e10, 0.0, 1.0);
        assert_eq!(bounding_extent(&frame).x, i32::MAX);
    }
}
