// Transform utilities for DMat4
//
// Composes and decomposes node transforms the way an authoring tool stores
// them: nine channels plus a rotate order and two pivots.

use glam::{DMat3, DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::euler::{self, RotateOrder};

/// Scale magnitudes at or below this are treated as degenerate.
const MIN_SCALE: f64 = 1e-12;

/// Extension trait for DMat4 to pull apart affine transforms.
pub trait DMat4Ext {
    /// Length of each basis column (the per-axis scale, including any inherited scale).
    fn axis_scales(&self) -> DVec3;

    /// Upper 3x3 with each column divided by its axis scale.
    ///
    /// Degenerate axes are left untouched instead of producing NaN.
    fn normalized_rotation(&self) -> DMat3;

    /// The translation column.
    fn translation(&self) -> DVec3;
}

impl DMat4Ext for DMat4 {
    fn axis_scales(&self) -> DVec3 {
        DVec3::new(
            self.x_axis.truncate().length(),
            self.y_axis.truncate().length(),
            self.z_axis.truncate().length(),
        )
    }

    fn normalized_rotation(&self) -> DMat3 {
        let linear = DMat3::from_mat4(*self);
        let scales = self.axis_scales();
        let normalize = |column: DVec3, scale: f64| {
            if scale > MIN_SCALE {
                column / scale
            } else {
                column
            }
        };
        DMat3::from_cols(
            normalize(linear.x_axis, scales.x),
            normalize(linear.y_axis, scales.y),
            normalize(linear.z_axis, scales.z),
        )
    }

    fn translation(&self) -> DVec3 {
        self.w_axis.truncate()
    }
}

/// Translate, rotate (degrees) and scale, as held on a node's nine channels.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trs {
    pub translate: DVec3,

    /// Per-axis rotation in degrees
    pub rotate: DVec3,

    pub scale: DVec3,
}

impl Default for Trs {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Trs {
    pub const IDENTITY: Trs = Trs {
        translate: DVec3::ZERO,
        rotate: DVec3::ZERO,
        scale: DVec3::ONE,
    };

    /// Flatten into channel order: tx ty tz rx ry rz sx sy sz.
    pub fn to_array(&self) -> [f64; 9] {
        [
            self.translate.x,
            self.translate.y,
            self.translate.z,
            self.rotate.x,
            self.rotate.y,
            self.rotate.z,
            self.scale.x,
            self.scale.y,
            self.scale.z,
        ]
    }

    /// Inverse of [`Trs::to_array`].
    pub fn from_array(values: [f64; 9]) -> Self {
        Self {
            translate: DVec3::new(values[0], values[1], values[2]),
            rotate: DVec3::new(values[3], values[4], values[5]),
            scale: DVec3::new(values[6], values[7], values[8]),
        }
    }
}

/// Per-node attributes that shape how channels turn into a matrix.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformAttrs {
    pub rotate_order: RotateOrder,
    pub rotate_pivot: DVec3,
    pub scale_pivot: DVec3,
}

impl TransformAttrs {
    /// Build the local matrix `T * Rp * R * Rp^-1 * Sp * S * Sp^-1`.
    pub fn compose(&self, trs: &Trs) -> DMat4 {
        let rotation = euler::compose(self.rotate_order, trs.rotate * DEG_TO_RAD);
        DMat4::from_translation(trs.translate)
            * DMat4::from_translation(self.rotate_pivot)
            * DMat4::from_mat3(rotation)
            * DMat4::from_translation(-self.rotate_pivot)
            * DMat4::from_translation(self.scale_pivot)
            * DMat4::from_scale(trs.scale)
            * DMat4::from_translation(-self.scale_pivot)
    }

    /// Recover channel values that [`TransformAttrs::compose`] maps to `matrix`.
    ///
    /// Assumes no shear. A mirrored basis is folded into a negative X scale.
    pub fn decompose(&self, matrix: &DMat4) -> Trs {
        let mut scale = matrix.axis_scales();
        let mut rotation = matrix.normalized_rotation();
        if rotation.determinant() < 0.0 {
            scale.x = -scale.x;
            rotation.x_axis = -rotation.x_axis;
        }

        let rotate = euler::decompose(self.rotate_order, &rotation) * RAD_TO_DEG;

        // The pivots contribute a fixed offset that depends on R and S.
        let pivot_offset = self.rotate_pivot
            + rotation * (self.scale_pivot - scale * self.scale_pivot - self.rotate_pivot);
        let translate = matrix.translation() - pivot_offset;

        Trs {
            translate,
            rotate,
            scale,
        }
    }
}

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_scales() {
        let mat = DMat4::from_scale(DVec3::new(2.0, 3.0, 4.0));
        assert!((mat.axis_scales() - DVec3::new(2.0, 3.0, 4.0)).length() < 1e-12);
    }

    #[test]
    fn test_normalized_rotation_strips_scale() {
        let rotation = DMat3::from_rotation_y(0.5);
        let mat = DMat4::from_mat3(rotation) * DMat4::from_scale(DVec3::new(2.0, 5.0, 0.5));
        assert!(mat.normalized_rotation().abs_diff_eq(rotation, 1e-12));
    }

    #[test]
    fn test_normalized_rotation_zero_scale_is_finite() {
        let mat = DMat4::from_scale(DVec3::new(0.0, 1.0, 1.0));
        let rotation = mat.normalized_rotation();
        assert!(rotation.is_finite());
    }

    #[test]
    fn test_compose_identity() {
        let mat = TransformAttrs::default().compose(&Trs::IDENTITY);
        assert!(mat.abs_diff_eq(DMat4::IDENTITY, 1e-12));
    }

    #[test]
    fn test_compose_decompose_roundtrip() {
        let attrs = TransformAttrs {
            rotate_order: RotateOrder::Zxy,
            rotate_pivot: DVec3::new(1.0, 2.0, -1.0),
            scale_pivot: DVec3::new(0.5, 0.0, 3.0),
        };
        let trs = Trs {
            translate: DVec3::new(4.0, -2.0, 7.0),
            rotate: DVec3::new(10.0, 35.0, -60.0),
            scale: DVec3::new(1.5, 2.0, 0.75),
        };

        let recovered = attrs.decompose(&attrs.compose(&trs));
        assert!((recovered.translate - trs.translate).length() < 1e-9);
        assert!((recovered.rotate - trs.rotate).length() < 1e-9);
        assert!((recovered.scale - trs.scale).length() < 1e-9);
    }

    #[test]
    fn test_trs_array_roundtrip() {
        let trs = Trs {
            translate: DVec3::new(1.0, 2.0, 3.0),
            rotate: DVec3::new(4.0, 5.0, 6.0),
            scale: DVec3::new(7.0, 8.0, 9.0),
        };
        assert_eq!(trs.to_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(Trs::from_array(trs.to_array()), trs);
    }
}
