// Re-export glam for convenience
pub use glam::*;

// bakeshift math types
mod euler;
mod frame_range;
mod projection;
mod transform;

pub use euler::{compose as compose_euler, decompose as decompose_euler, RotateOrder, GIMBAL_EPSILON};
pub use frame_range::{BakeRange, Frame, RangeError};
pub use projection::{
    destination_euler, destination_rotation, project, project_position, project_rotation,
    CanvasSettings, ProjectedTransform,
};
pub use transform::{DMat4Ext, TransformAttrs, Trs};
