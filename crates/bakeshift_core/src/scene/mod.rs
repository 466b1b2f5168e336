//! Scene model shared by the engine and every host.
//!
//! The engine only talks to a scene through [`HostScene`]. [`MemoryScene`]
//! is a complete in-memory host used by the binary and by tests.

pub mod curve;
pub mod driver;
pub mod host;
pub mod memory;
pub mod types;

pub use curve::{AnimCurve, Key, Tangent};
pub use driver::{Expression, TransformCache, VertexCache};
pub use host::{topology, HostScene, SceneError, SceneResult, TopologyEntry};
pub use memory::{MemoryScene, RollbackFault};
pub use types::{
    namespace_of, parent_namespace, BoundaryId, CameraInfo, Channel, ConnectionId, ConnectionInfo,
    ConstraintInfo, ConstraintKind, DeformerId, HistoryItem, KindTag, MeshInfo, NodeId, NodeKind,
    SourceKind,
};
