//! Handle and payload types shared by every host implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to a node in the host scene.
///
/// Handles are never reused, so a handle that outlives its node simply stops
/// resolving instead of aliasing a newer node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Opaque handle to a morph deformer bound to a base mesh.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeformerId(pub u64);

impl fmt::Display for DeformerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deformer#{}", self.0)
    }
}

/// Opaque handle to one incoming connection on a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

/// Opaque handle to an open (or closed, not yet rolled back) edit boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoundaryId(pub u64);

/// One of the nine translate/rotate/scale channels on a node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "tx")]
    TranslateX,
    #[serde(rename = "ty")]
    TranslateY,
    #[serde(rename = "tz")]
    TranslateZ,
    #[serde(rename = "rx")]
    RotateX,
    #[serde(rename = "ry")]
    RotateY,
    #[serde(rename = "rz")]
    RotateZ,
    #[serde(rename = "sx")]
    ScaleX,
    #[serde(rename = "sy")]
    ScaleY,
    #[serde(rename = "sz")]
    ScaleZ,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::TranslateX,
        Channel::TranslateY,
        Channel::TranslateZ,
        Channel::RotateX,
        Channel::RotateY,
        Channel::RotateZ,
        Channel::ScaleX,
        Channel::ScaleY,
        Channel::ScaleZ,
    ];

    pub const TRANSLATE: [Channel; 3] = [Channel::TranslateX, Channel::TranslateY, Channel::TranslateZ];
    pub const ROTATE: [Channel; 3] = [Channel::RotateX, Channel::RotateY, Channel::RotateZ];
    pub const SCALE: [Channel; 3] = [Channel::ScaleX, Channel::ScaleY, Channel::ScaleZ];
    pub const TRANSLATE_ROTATE: [Channel; 6] = [
        Channel::TranslateX,
        Channel::TranslateY,
        Channel::TranslateZ,
        Channel::RotateX,
        Channel::RotateY,
        Channel::RotateZ,
    ];

    /// Position in [`Channel::ALL`], matching `Trs::to_array` order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short attribute name, e.g. `tx`.
    pub fn short_name(self) -> &'static str {
        match self {
            Channel::TranslateX => "tx",
            Channel::TranslateY => "ty",
            Channel::TranslateZ => "tz",
            Channel::RotateX => "rx",
            Channel::RotateY => "ry",
            Channel::RotateZ => "rz",
            Channel::ScaleX => "sx",
            Channel::ScaleY => "sy",
            Channel::ScaleZ => "sz",
        }
    }

    /// Value of this channel on an untouched node.
    pub fn rest_value(self) -> f64 {
        if Channel::SCALE.contains(&self) {
            1.0
        } else {
            0.0
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Kind-specific data for mesh nodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshInfo {
    pub vertex_count: usize,
}

/// Kind-specific data for camera nodes.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Focal length in millimetres
    pub focal_length: f64,

    /// Horizontal film aperture in inches
    pub horizontal_aperture: f64,
}

impl Default for CameraInfo {
    fn default() -> Self {
        Self {
            focal_length: 35.0,
            horizontal_aperture: 1.417,
        }
    }
}

/// Which channels a constraint drives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    /// Translate and rotate
    Parent,
    Point,
    Orient,
    Scale,
    /// All nine channels
    Full,
}

impl ConstraintKind {
    pub fn channels(self) -> &'static [Channel] {
        match self {
            ConstraintKind::Parent => &Channel::TRANSLATE_ROTATE,
            ConstraintKind::Point => &Channel::TRANSLATE,
            ConstraintKind::Orient => &Channel::ROTATE,
            ConstraintKind::Scale => &Channel::SCALE,
            ConstraintKind::Full => &Channel::ALL,
        }
    }
}

/// Kind-specific data for constraint nodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    pub kind: ConstraintKind,

    /// Node whose world transform is followed
    pub target: NodeId,

    /// Node whose channels are driven
    pub constrained: NodeId,
}

/// The closed set of node kinds the engine distinguishes.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Transform,
    Mesh(MeshInfo),
    Camera(CameraInfo),
    Joint,
    Locator,
    Constraint(ConstraintInfo),
}

impl NodeKind {
    pub fn tag(&self) -> KindTag {
        match self {
            NodeKind::Transform => KindTag::Transform,
            NodeKind::Mesh(_) => KindTag::Mesh,
            NodeKind::Camera(_) => KindTag::Camera,
            NodeKind::Joint => KindTag::Joint,
            NodeKind::Locator => KindTag::Locator,
            NodeKind::Constraint(_) => KindTag::Constraint,
        }
    }
}

/// Payload-free discriminant of [`NodeKind`], used for filtering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindTag {
    Transform,
    Mesh,
    Camera,
    Joint,
    Locator,
    Constraint,
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KindTag::Transform => "transform",
            KindTag::Mesh => "mesh",
            KindTag::Camera => "camera",
            KindTag::Joint => "joint",
            KindTag::Locator => "locator",
            KindTag::Constraint => "constraint",
        };
        f.write_str(name)
    }
}

/// What feeds an incoming channel connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// An ordinary keyframe curve
    Curve,
    Expression,
    /// A per-frame transform cache
    Cache,
    Constraint,
}

impl SourceKind {
    pub fn is_curve(self) -> bool {
        self == SourceKind::Curve
    }
}

/// One incoming connection on a channel, as reported by the host.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub kind: SourceKind,

    /// Source node, for sources that are scene nodes (constraints)
    pub source_node: Option<NodeId>,

    /// Only the first connection on a channel drives its value
    pub active: bool,
}

/// A construction-history entry on a mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub name: String,

    /// Deformers (skin, caches, morphs) survive history cleanup
    #[serde(default)]
    pub deformer: bool,
}

impl HistoryItem {
    pub fn new(name: impl Into<String>, deformer: bool) -> Self {
        Self {
            name: name.into(),
            deformer,
        }
    }
}

/// Namespace part of a node name (`"rig:arm:joint1"` -> `Some("rig:arm")`).
pub fn namespace_of(name: &str) -> Option<&str> {
    name.rfind(':').map(|index| &name[..index])
}

/// Parent namespace (`"rig:arm"` -> `Some("rig")`, `"rig"` -> `None`).
pub fn parent_namespace(namespace: &str) -> Option<&str> {
    namespace_of(namespace)
}
