//! The capability set the engine needs from a host scene.
//!
//! Every query that depends on time takes an explicit `frame`; the host's
//! own time cursor is only read and written to leave the user's timeline
//! where it was found. Mutating calls take `&mut self`, so one caller at a
//! time is enforced by ownership rather than convention.

use bakeshift_math::{BakeRange, DMat4, DVec3, Frame, TransformAttrs};
use thiserror::Error;

use super::curve::Key;
use super::types::{
    BoundaryId, Channel, ConnectionId, ConnectionInfo, ConstraintKind, DeformerId, HistoryItem,
    KindTag, NodeId, NodeKind,
};

/// Errors reported by a host scene.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("{0} does not exist")]
    MissingNode(NodeId),

    #[error("{node} is not a {expected}")]
    WrongKind { node: NodeId, expected: KindTag },

    #[error("{0} does not exist")]
    MissingDeformer(DeformerId),

    #[error("connection {connection:?} not found on {node}.{channel}")]
    MissingConnection {
        node: NodeId,
        channel: Channel,
        connection: ConnectionId,
    },

    #[error("{deformer} has no target at index {index}")]
    MissingTarget { deformer: DeformerId, index: usize },

    #[error("vertex {index} out of range for {node} ({count} vertices)")]
    VertexOutOfRange {
        node: NodeId,
        index: usize,
        count: usize,
    },

    #[error("target {target} does not share topology with base {base}")]
    TopologyMismatch { base: NodeId, target: NodeId },

    #[error("edit boundary {0:?} is unknown")]
    UnknownBoundary(BoundaryId),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("namespace '{0}' does not exist")]
    MissingNamespace(String),

    #[error("{0}")]
    Rejected(String),
}

/// Result type for host scene operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Abstract access to a live, mutable 3D scene.
pub trait HostScene {
    // ---- Topology ---------------------------------------------------------

    fn contains(&self, node: NodeId) -> bool;

    fn find_node(&self, name: &str) -> Option<NodeId>;

    fn node_name(&self, node: NodeId) -> SceneResult<String>;

    fn node_kind(&self, node: NodeId) -> SceneResult<NodeKind>;

    fn parent(&self, node: NodeId) -> SceneResult<Option<NodeId>>;

    fn children(&self, node: NodeId) -> SceneResult<Vec<NodeId>>;

    /// Nodes without a parent, in creation order.
    fn root_nodes(&self) -> Vec<NodeId>;

    /// All nodes below `node` in depth-first pre-order, excluding `node` itself.
    fn descendants(&self, node: NodeId) -> SceneResult<Vec<NodeId>> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node)?.into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            result.push(current);
            stack.extend(self.children(current)?.into_iter().rev());
        }
        Ok(result)
    }

    /// `root` and its descendants, filtered to one kind.
    fn subtree_of_kind(&self, root: NodeId, kind: KindTag) -> SceneResult<Vec<NodeId>> {
        let mut result = Vec::new();
        for node in std::iter::once(root).chain(self.descendants(root)?) {
            if self.node_kind(node)?.tag() == kind {
                result.push(node);
            }
        }
        Ok(result)
    }

    // ---- Channels ---------------------------------------------------------

    /// Incoming connections on a channel, active connection first.
    fn channel_inputs(&self, node: NodeId, channel: Channel) -> SceneResult<Vec<ConnectionInfo>>;

    fn disconnect(
        &mut self,
        node: NodeId,
        channel: Channel,
        connection: ConnectionId,
    ) -> SceneResult<()>;

    /// Unlock a channel and make it keyable.
    fn unlock_channel(&mut self, node: NodeId, channel: Channel) -> SceneResult<()>;

    fn channel_value(&self, node: NodeId, channel: Channel, frame: Frame) -> SceneResult<f64>;

    // ---- Evaluation -------------------------------------------------------

    fn local_matrix(&self, node: NodeId, frame: Frame) -> SceneResult<DMat4>;

    fn world_matrix(&self, node: NodeId, frame: Frame) -> SceneResult<DMat4> {
        let mut matrix = self.local_matrix(node, frame)?;
        let mut current = self.parent(node)?;
        while let Some(parent) = current {
            matrix = self.local_matrix(parent, frame)? * matrix;
            current = self.parent(parent)?;
        }
        Ok(matrix)
    }

    fn current_frame(&self) -> Frame;

    fn set_current_frame(&mut self, frame: Frame);

    fn vertex_count(&self, node: NodeId) -> SceneResult<usize>;

    /// Local-space position of one vertex, fully deformed at `frame`.
    fn vertex_position(&self, node: NodeId, index: usize, frame: Frame) -> SceneResult<DVec3>;

    fn transform_attrs(&self, node: NodeId) -> SceneResult<TransformAttrs>;

    fn set_transform_attrs(&mut self, node: NodeId, attrs: TransformAttrs) -> SceneResult<()>;

    // ---- Creation and editing ---------------------------------------------

    /// Capture the evaluated shape of a mesh at `frame` into a new
    /// history-free mesh node with rest channels, parented to the world.
    fn duplicate_shape(&mut self, node: NodeId, frame: Frame, name: &str) -> SceneResult<NodeId>;

    fn create_group(&mut self, name: &str, parent: Option<NodeId>) -> SceneResult<NodeId>;

    /// Move `node` under `parent`, keeping its local channel values.
    fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> SceneResult<()>;

    /// Delete `node` and everything below it.
    fn delete_node(&mut self, node: NodeId) -> SceneResult<()>;

    fn set_visible(&mut self, node: NodeId, visible: bool) -> SceneResult<()>;

    // ---- Morph deformers --------------------------------------------------

    fn create_morph_deformer(&mut self, base: NodeId, name: &str) -> SceneResult<DeformerId>;

    fn deformer_exists(&self, deformer: DeformerId) -> bool;

    fn add_morph_target(
        &mut self,
        deformer: DeformerId,
        index: usize,
        target: NodeId,
    ) -> SceneResult<()>;

    fn morph_targets(&self, deformer: DeformerId) -> SceneResult<Vec<(usize, NodeId)>>;

    fn weight_keys(&self, deformer: DeformerId, index: usize) -> SceneResult<Vec<Key>>;

    fn clear_weight_keys(&mut self, deformer: DeformerId, index: usize) -> SceneResult<()>;

    fn set_weight_key(&mut self, deformer: DeformerId, index: usize, key: Key) -> SceneResult<()>;

    fn weight_value(&self, deformer: DeformerId, index: usize, frame: Frame) -> SceneResult<f64>;

    fn delete_deformer(&mut self, deformer: DeformerId) -> SceneResult<()>;

    // ---- Constraints and baking -------------------------------------------

    /// Make `driven` follow `driver`'s world transform; returns the constraint node.
    fn create_constraint(
        &mut self,
        driver: NodeId,
        driven: NodeId,
        kind: ConstraintKind,
    ) -> SceneResult<NodeId>;

    /// Sample every channel of every node at each frame and replace the
    /// active input with a keyframe curve. Other inputs may survive as
    /// inactive links.
    fn bake_simulation(&mut self, nodes: &[NodeId], range: BakeRange) -> SceneResult<()>;

    // ---- Rig cleanup ------------------------------------------------------

    fn is_skinned(&self, node: NodeId) -> SceneResult<bool>;

    fn construction_history(&self, node: NodeId) -> SceneResult<Vec<HistoryItem>>;

    fn delete_non_deformer_history(&mut self, node: NodeId) -> SceneResult<()>;

    /// Bake the transform at `frame` into the node's rest pose and reset its channels.
    fn freeze_transform(&mut self, node: NodeId, frame: Frame) -> SceneResult<()>;

    fn namespaces(&self) -> Vec<String>;

    fn namespace_has_referenced_nodes(&self, namespace: &str) -> bool;

    /// Remove a namespace, merging its contents into the parent namespace.
    fn remove_namespace(&mut self, namespace: &str) -> SceneResult<()>;

    // ---- Edit boundaries --------------------------------------------------

    fn open_edit_boundary(&mut self, name: &str) -> SceneResult<BoundaryId>;

    fn close_edit_boundary(&mut self, boundary: BoundaryId) -> SceneResult<()>;

    /// Undo everything recorded since `boundary` was opened.
    fn rollback(&mut self, boundary: BoundaryId) -> SceneResult<()>;
}

/// One node's place in the hierarchy, used to compare scene states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEntry {
    pub node: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Record `roots` and every node below them.
pub fn topology<S: HostScene + ?Sized>(scene: &S, roots: &[NodeId]) -> SceneResult<Vec<TopologyEntry>> {
    let mut entries = Vec::new();
    for &root in roots {
        for node in std::iter::once(root).chain(scene.descendants(root)?) {
            entries.push(TopologyEntry {
                node,
                name: scene.node_name(node)?,
                parent: scene.parent(node)?,
                children: scene.children(node)?,
            });
        }
    }
    Ok(entries)
}
