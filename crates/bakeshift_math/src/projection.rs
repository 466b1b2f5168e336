//! Coordinate projection into a 2D compositor's 3D-layer space.
//!
//! The compositor puts its origin at the top-left corner of the canvas with
//! Y pointing down and Z pointing away from the viewer. Positions and scale
//! come from the world matrix. Rotation comes from the *local* matrix so that
//! purely organisational parent groups do not leak into layer orientation.

use glam::{DMat3, DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::euler::{element, GIMBAL_EPSILON};
use crate::transform::DMat4Ext;

/// Flip of the vertical and depth axes between the two tools.
const AXIS_FLIP: DMat3 = DMat3::from_cols(
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(0.0, -1.0, 0.0),
    DVec3::new(0.0, 0.0, -1.0),
);

/// Destination canvas and unit conversion.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasSettings {
    /// Canvas width in pixels
    pub width: f64,

    /// Canvas height in pixels
    pub height: f64,

    /// Scene units to pixels
    pub unit_scale: f64,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
            unit_scale: 1.0,
        }
    }
}

/// One node's transform in the compositor's convention at one frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedTransform {
    pub position: DVec3,

    /// Rotation in degrees, applied X then Y then Z
    pub rotation: DVec3,

    /// World-space scale factors (inherited scale included)
    pub scale: DVec3,
}

/// Project a node's world and local matrices onto the canvas.
pub fn project(world: &DMat4, local: &DMat4, canvas: &CanvasSettings) -> ProjectedTransform {
    ProjectedTransform {
        position: project_position(world, canvas),
        rotation: project_rotation(local),
        scale: world.axis_scales(),
    }
}

/// World translation with Y and Z flipped, scaled, and centred on the canvas.
pub fn project_position(world: &DMat4, canvas: &CanvasSettings) -> DVec3 {
    let flipped = AXIS_FLIP * world.translation() * canvas.unit_scale;
    flipped + DVec3::new(canvas.width * 0.5, canvas.height * 0.5, 0.0)
}

/// Local rotation, scale removed and axes flipped, as X/Y/Z degrees.
pub fn project_rotation(local: &DMat4) -> DVec3 {
    let rotation = AXIS_FLIP * local.normalized_rotation() * AXIS_FLIP;
    destination_euler(&rotation)
}

/// Decompose an already-flipped rotation into the compositor's X/Y/Z angles (degrees).
///
/// At pitch = ±90° roll is pinned to zero and yaw is read from the second
/// column, so the result stays finite.
pub fn destination_euler(r: &DMat3) -> DVec3 {
    let pitch = (-element(r, 2, 0)).clamp(-1.0, 1.0).asin();

    let (roll, yaw) = if pitch.cos().abs() > GIMBAL_EPSILON {
        (
            (-element(r, 2, 1)).atan2(element(r, 2, 2)),
            element(r, 1, 0).atan2(element(r, 0, 0)),
        )
    } else {
        (0.0, (-element(r, 0, 1)).atan2(element(r, 1, 1)))
    };

    DVec3::new(roll, pitch, yaw) * (180.0 / std::f64::consts::PI)
}

/// Rebuild the flipped rotation matrix that [`destination_euler`] decomposes.
pub fn destination_rotation(degrees: DVec3) -> DMat3 {
    let radians = degrees * (std::f64::consts::PI / 180.0);
    DMat3::from_rotation_z(radians.z)
        * DMat3::from_rotation_y(radians.y)
        * DMat3::from_rotation_x(-radians.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_projects_to_canvas_center() {
        let canvas = CanvasSettings::default();
        let projected = project(&DMat4::IDENTITY, &DMat4::IDENTITY, &canvas);

        assert_eq!(projected.position, DVec3::new(960.0, 540.0, 0.0));
        assert_eq!(projected.rotation, DVec3::ZERO);
        assert_eq!(projected.scale, DVec3::ONE);
    }

    #[test]
    fn test_position_flips_vertical_and_depth() {
        let canvas = CanvasSettings {
            width: 100.0,
            height: 50.0,
            unit_scale: 2.0,
        };
        let world = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
        let position = project_position(&world, &canvas);

        assert!((position - DVec3::new(52.0, 21.0, -6.0)).length() < 1e-12);
    }

    #[test]
    fn test_rotation_ignores_parent_world_orientation() {
        let parent = DMat4::from_rotation_y(1.0);
        let local = DMat4::from_translation(DVec3::new(0.0, 1.0, 0.0));
        let world = parent * local;

        let projected = project(&world, &local, &CanvasSettings::default());
        assert!(projected.rotation.length() < 1e-12);
    }

    #[test]
    fn test_scale_includes_inherited_scale() {
        let parent = DMat4::from_scale(DVec3::splat(2.0));
        let local = DMat4::from_scale(DVec3::new(1.0, 3.0, 1.0));
        let world = parent * local;

        let projected = project(&world, &local, &CanvasSettings::default());
        assert!((projected.scale - DVec3::new(2.0, 6.0, 2.0)).length() < 1e-12);
        assert!(projected.rotation.length() < 1e-12);
    }

    #[test]
    fn test_rotation_roundtrip_within_tolerance() {
        let samples = [-88.9, -45.0, -10.5, 0.0, 12.25, 60.0, 88.9];
        for &pitch in &samples {
            for &(roll, yaw) in &[(30.0, -70.0), (-120.0, 15.0), (179.0, 0.5)] {
                let angles = DVec3::new(roll, pitch, yaw);
                let recovered = destination_euler(&destination_rotation(angles));
                assert!(
                    (recovered - angles).abs().max_element() < 1e-6,
                    "{angles:?} -> {recovered:?}"
                );
            }
        }
    }

    #[test]
    fn test_gimbal_lock_returns_finite_angles() {
        let recovered = destination_euler(&destination_rotation(DVec3::new(0.0, 90.0, 25.0)));

        assert!(recovered.is_finite());
        assert_eq!(recovered.x, 0.0);
        assert!((recovered.y - 90.0).abs() < 1e-9);
        assert!((recovered.z - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_gimbal_lock_with_roll_folds_into_yaw() {
        let recovered = destination_euler(&destination_rotation(DVec3::new(40.0, -90.0, 10.0)));

        assert!(recovered.is_finite());
        assert_eq!(recovered.x, 0.0);
        assert!((recovered.y + 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_projected_rotation_through_local_matrix() {
        let local = DMat4::from_mat3(AXIS_FLIP * destination_rotation(DVec3::new(20.0, -35.0, 50.0)) * AXIS_FLIP);
        let rotation = project_rotation(&local);
        assert!((rotation - DVec3::new(20.0, -35.0, 50.0)).abs().max_element() < 1e-6);
    }
}
