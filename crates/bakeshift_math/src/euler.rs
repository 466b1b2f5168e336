//! Euler angle composition and decomposition for all six rotate orders.
//!
//! Matrices use glam's column-vector convention. A rotate order names the
//! axes in the order they are applied, so `Xyz` composes `Rz * Ry * Rx`.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

/// Below this cosine of the middle angle, the first and third axes line up
/// and the decomposition falls back to the gimbal-lock branch.
pub const GIMBAL_EPSILON: f64 = 1e-6;

/// Order in which the three axis rotations are applied.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotateOrder {
    #[default]
    Xyz,
    Yzx,
    Zxy,
    Xzy,
    Yxz,
    Zyx,
}

impl RotateOrder {
    /// Axis indices (0 = X, 1 = Y, 2 = Z) in application order.
    pub fn axes(self) -> [usize; 3] {
        match self {
            RotateOrder::Xyz => [0, 1, 2],
            RotateOrder::Yzx => [1, 2, 0],
            RotateOrder::Zxy => [2, 0, 1],
            RotateOrder::Xzy => [0, 2, 1],
            RotateOrder::Yxz => [1, 0, 2],
            RotateOrder::Zyx => [2, 1, 0],
        }
    }

    /// Non-cyclic orders flip the signs in the decomposition.
    fn is_odd(self) -> bool {
        matches!(self, RotateOrder::Xzy | RotateOrder::Yxz | RotateOrder::Zyx)
    }
}

fn axis_rotation(axis: usize, angle: f64) -> DMat3 {
    match axis {
        0 => DMat3::from_rotation_x(angle),
        1 => DMat3::from_rotation_y(angle),
        _ => DMat3::from_rotation_z(angle),
    }
}

/// Matrix element at `row`, `col`.
#[inline]
pub(crate) fn element(m: &DMat3, row: usize, col: usize) -> f64 {
    m.col(col)[row]
}

/// Compose per-axis angles (radians, indexed by axis) into a rotation matrix.
pub fn compose(order: RotateOrder, angles: DVec3) -> DMat3 {
    let [i, j, k] = order.axes();
    axis_rotation(k, angles[k]) * axis_rotation(j, angles[j]) * axis_rotation(i, angles[i])
}

/// Decompose a pure rotation matrix into per-axis angles (radians, indexed by axis).
///
/// At gimbal lock the first applied angle is forced to zero and the third is
/// recovered from the remaining entries, so the result is always finite.
pub fn decompose(order: RotateOrder, m: &DMat3) -> DVec3 {
    let [i, j, k] = order.axes();
    let sign = if order.is_odd() { -1.0 } else { 1.0 };

    let sin_middle = (-sign * element(m, k, i)).clamp(-1.0, 1.0);
    let middle = sin_middle.asin();

    let (first, last) = if (1.0 - sin_middle * sin_middle).sqrt() > GIMBAL_EPSILON {
        (
            (sign * element(m, k, j)).atan2(element(m, k, k)),
            (sign * element(m, j, i)).atan2(element(m, i, i)),
        )
    } else {
        (0.0, (-sign * element(m, i, j)).atan2(element(m, j, j)))
    };

    let mut angles = DVec3::ZERO;
    angles[i] = first;
    angles[j] = middle;
    angles[k] = last;
    angles
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: [RotateOrder; 6] = [
        RotateOrder::Xyz,
        RotateOrder::Yzx,
        RotateOrder::Zxy,
        RotateOrder::Xzy,
        RotateOrder::Yxz,
        RotateOrder::Zyx,
    ];

    #[test]
    fn test_identity_decomposes_to_zero() {
        for order in ORDERS {
            let angles = decompose(order, &DMat3::IDENTITY);
            assert!(angles.length() < 1e-12, "{order:?} gave {angles:?}");
        }
    }

    #[test]
    fn test_xyz_matches_explicit_product() {
        let angles = DVec3::new(0.3, -0.4, 1.1);
        let expected = DMat3::from_rotation_z(angles.z)
            * DMat3::from_rotation_y(angles.y)
            * DMat3::from_rotation_x(angles.x);
        let composed = compose(RotateOrder::Xyz, angles);
        assert!(composed.abs_diff_eq(expected, 1e-12));
    }

    #[test]
    fn test_roundtrip_all_orders() {
        let angles = DVec3::new(0.5, -0.7, 1.3);
        for order in ORDERS {
            let recovered = decompose(order, &compose(order, angles));
            assert!(
                (recovered - angles).length() < 1e-9,
                "{order:?}: {recovered:?} != {angles:?}"
            );
        }
    }

    #[test]
    fn test_gimbal_lock_is_finite() {
        for order in ORDERS {
            let [_, j, k] = order.axes();
            let mut angles = DVec3::ZERO;
            angles[j] = std::f64::consts::FRAC_PI_2;
            angles[k] = 0.4;
            let recovered = decompose(order, &compose(order, angles));
            assert!(recovered.is_finite(), "{order:?} produced {recovered:?}");
            assert!((recovered[k] - 0.4).abs() < 1e-9, "{order:?}: {recovered:?}");
        }
    }
}
