//! In-memory reference implementation of [`HostScene`].
//!
//! `MemoryScene` evaluates keyframe curves, expressions, transform caches,
//! constraints, vertex caches and morph deformers, so the whole conversion
//! pipeline can run without an authoring tool. Edit boundaries are whole
//! scene snapshots.

use std::collections::{BTreeMap, BTreeSet};

use bakeshift_math::{BakeRange, DMat4, DVec3, Frame, TransformAttrs, Trs};

use super::curve::{AnimCurve, Key};
use super::driver::{Expression, TransformCache, VertexCache};
use super::host::{HostScene, SceneError, SceneResult};
use super::types::{
    namespace_of, parent_namespace, BoundaryId, CameraInfo, Channel, ConnectionId, ConnectionInfo,
    ConstraintInfo, ConstraintKind, DeformerId, HistoryItem, KindTag, MeshInfo, NodeId, NodeKind,
    SourceKind,
};
use crate::mesh::Mesh;

/// Simulated faults in the host's undo mechanism.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RollbackFault {
    /// Rollback restores the scene exactly
    #[default]
    None,

    /// Rollback reports an error and changes nothing
    Fails,

    /// Rollback reports success but nodes created inside the boundary survive
    LeavesCreatedNodes,
}

#[derive(Debug, Clone)]
enum InputSource {
    Curve(AnimCurve),
    Expression(Expression),
    Cache(TransformCache),
    Constraint(NodeId),
}

impl InputSource {
    fn kind(&self) -> SourceKind {
        match self {
            InputSource::Curve(_) => SourceKind::Curve,
            InputSource::Expression(_) => SourceKind::Expression,
            InputSource::Cache(_) => SourceKind::Cache,
            InputSource::Constraint(_) => SourceKind::Constraint,
        }
    }
}

#[derive(Debug, Clone)]
struct PlugInput {
    id: ConnectionId,
    source: InputSource,
}

#[derive(Debug, Clone)]
struct ChannelPlug {
    value: f64,
    locked: bool,
    keyable: bool,
    inputs: Vec<PlugInput>,
}

impl ChannelPlug {
    fn rest(channel: Channel) -> Self {
        Self {
            value: channel.rest_value(),
            locked: false,
            keyable: true,
            inputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct MeshShape {
    mesh: Mesh,
    cache: Option<VertexCache>,
    deformer: Option<DeformerId>,
}

#[derive(Debug, Clone)]
enum NodeData {
    Transform,
    Mesh(MeshShape),
    Camera(CameraInfo),
    Joint,
    Locator,
    Constraint(ConstraintInfo),
}

impl NodeData {
    fn kind(&self) -> NodeKind {
        match self {
            NodeData::Transform => NodeKind::Transform,
            NodeData::Mesh(shape) => NodeKind::Mesh(MeshInfo {
                vertex_count: shape.mesh.vertex_count(),
            }),
            NodeData::Camera(info) => NodeKind::Camera(*info),
            NodeData::Joint => NodeKind::Joint,
            NodeData::Locator => NodeKind::Locator,
            NodeData::Constraint(info) => NodeKind::Constraint(*info),
        }
    }
}

#[derive(Debug, Clone)]
struct NodeRecord {
    name: String,
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    channels: [ChannelPlug; 9],
    attrs: TransformAttrs,
    visible: bool,
    referenced: bool,
    skinned: bool,
    history: Vec<HistoryItem>,
}

impl NodeRecord {
    fn new(name: &str, data: NodeData, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            data,
            parent,
            children: Vec::new(),
            channels: std::array::from_fn(|index| ChannelPlug::rest(Channel::ALL[index])),
            attrs: TransformAttrs::default(),
            visible: true,
            referenced: false,
            skinned: false,
            history: Vec::new(),
        }
    }

    fn has_inputs(&self) -> bool {
        self.channels.iter().any(|plug| !plug.inputs.is_empty())
    }
}

#[derive(Debug, Clone)]
struct MorphDeformer {
    base: NodeId,
    base_rest: Vec<DVec3>,
    targets: BTreeMap<usize, NodeId>,
    weights: BTreeMap<usize, AnimCurve>,
}

#[derive(Debug, Clone, Default)]
struct SceneState {
    nodes: BTreeMap<NodeId, NodeRecord>,
    roots: Vec<NodeId>,
    deformers: BTreeMap<DeformerId, MorphDeformer>,
    namespaces: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct Boundary {
    id: BoundaryId,
    name: String,
    snapshot: SceneState,
    frame: Frame,
    /// First id handed out after the boundary opened
    watermark: u64,
    open: bool,
}

/// A complete scene held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryScene {
    name: String,
    state: SceneState,
    next_id: u64,
    current_frame: Frame,
    boundaries: Vec<Boundary>,
    rollback_fault: RollbackFault,
}

impl MemoryScene {
    /// Create an empty scene.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_frame: 1,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get total node count.
    pub fn node_count(&self) -> usize {
        self.state.nodes.len()
    }

    /// Get morph deformer count.
    pub fn deformer_count(&self) -> usize {
        self.state.deformers.len()
    }

    /// Make subsequent rollbacks misbehave the way a real host undo queue can.
    pub fn inject_rollback_fault(&mut self, fault: RollbackFault) {
        self.rollback_fault = fault;
    }

    /// Name of each currently open edit boundary, outermost first.
    pub fn open_boundaries(&self) -> Vec<&str> {
        self.boundaries
            .iter()
            .filter(|boundary| boundary.open)
            .map(|boundary| boundary.name.as_str())
            .collect()
    }

    // ---- Building ---------------------------------------------------------

    pub fn add_transform(&mut self, name: &str, parent: Option<NodeId>) -> SceneResult<NodeId> {
        self.insert_node(name, NodeData::Transform, parent)
    }

    pub fn add_locator(&mut self, name: &str, parent: Option<NodeId>) -> SceneResult<NodeId> {
        self.insert_node(name, NodeData::Locator, parent)
    }

    pub fn add_joint(&mut self, name: &str, parent: Option<NodeId>) -> SceneResult<NodeId> {
        self.insert_node(name, NodeData::Joint, parent)
    }

    pub fn add_camera(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
        info: CameraInfo,
    ) -> SceneResult<NodeId> {
        self.insert_node(name, NodeData::Camera(info), parent)
    }

    pub fn add_mesh(&mut self, name: &str, parent: Option<NodeId>, mesh: Mesh) -> SceneResult<NodeId> {
        let shape = MeshShape {
            mesh,
            cache: None,
            deformer: None,
        };
        self.insert_node(name, NodeData::Mesh(shape), parent)
    }

    /// Set a channel's constant value.
    pub fn set_channel(&mut self, node: NodeId, channel: Channel, value: f64) -> SceneResult<()> {
        self.plug_mut(node, channel)?.value = value;
        Ok(())
    }

    /// Set all nine constant channel values.
    pub fn set_trs(&mut self, node: NodeId, trs: &Trs) -> SceneResult<()> {
        for (channel, value) in Channel::ALL.iter().zip(trs.to_array()) {
            self.set_channel(node, *channel, value)?;
        }
        Ok(())
    }

    pub fn lock_channel(&mut self, node: NodeId, channel: Channel) -> SceneResult<()> {
        let plug = self.plug_mut(node, channel)?;
        plug.locked = true;
        plug.keyable = false;
        Ok(())
    }

    /// `(locked, keyable)` for a channel.
    pub fn channel_flags(&self, node: NodeId, channel: Channel) -> SceneResult<(bool, bool)> {
        let plug = self.plug(node, channel)?;
        Ok((plug.locked, plug.keyable))
    }

    pub fn connect_curve(
        &mut self,
        node: NodeId,
        channel: Channel,
        curve: AnimCurve,
    ) -> SceneResult<ConnectionId> {
        self.push_input(node, channel, InputSource::Curve(curve))
    }

    pub fn connect_expression(
        &mut self,
        node: NodeId,
        channel: Channel,
        expression: Expression,
    ) -> SceneResult<ConnectionId> {
        self.push_input(node, channel, InputSource::Expression(expression))
    }

    pub fn connect_cache(
        &mut self,
        node: NodeId,
        channel: Channel,
        cache: TransformCache,
    ) -> SceneResult<ConnectionId> {
        self.push_input(node, channel, InputSource::Cache(cache))
    }

    /// Drive a mesh's vertices from per-frame cached positions.
    pub fn set_vertex_cache(&mut self, node: NodeId, cache: VertexCache) -> SceneResult<()> {
        let shape = self.mesh_shape_mut(node)?;
        if let Some((frame, positions)) = cache
            .frames
            .iter()
            .find(|(_, positions)| positions.len() != shape.mesh.vertex_count())
        {
            return Err(SceneError::Rejected(format!(
                "vertex cache frame {} has {} positions, mesh has {}",
                frame,
                positions.len(),
                shape.mesh.vertex_count()
            )));
        }
        shape.cache = Some(cache);
        Ok(())
    }

    pub fn set_skinned(&mut self, node: NodeId, skinned: bool) -> SceneResult<()> {
        self.node_mut(node)?.skinned = skinned;
        Ok(())
    }

    /// Mark a node as owned by an external file reference.
    pub fn set_referenced(&mut self, node: NodeId, referenced: bool) -> SceneResult<()> {
        self.node_mut(node)?.referenced = referenced;
        Ok(())
    }

    pub fn add_history(&mut self, node: NodeId, item: HistoryItem) -> SceneResult<()> {
        self.node_mut(node)?.history.push(item);
        Ok(())
    }

    /// Register a namespace and all of its parents.
    pub fn add_namespace(&mut self, namespace: &str) {
        let mut current = Some(namespace);
        while let Some(ns) = current {
            if ns.is_empty() {
                break;
            }
            self.state.namespaces.insert(ns.to_string());
            current = parent_namespace(ns);
        }
    }

    pub fn is_visible(&self, node: NodeId) -> SceneResult<bool> {
        Ok(self.node(node)?.visible)
    }

    // ---- Internals --------------------------------------------------------

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn node(&self, node: NodeId) -> SceneResult<&NodeRecord> {
        self.state.nodes.get(&node).ok_or(SceneError::MissingNode(node))
    }

    fn node_mut(&mut self, node: NodeId) -> SceneResult<&mut NodeRecord> {
        self.state
            .nodes
            .get_mut(&node)
            .ok_or(SceneError::MissingNode(node))
    }

    fn plug(&self, node: NodeId, channel: Channel) -> SceneResult<&ChannelPlug> {
        Ok(&self.node(node)?.channels[channel.index()])
    }

    fn plug_mut(&mut self, node: NodeId, channel: Channel) -> SceneResult<&mut ChannelPlug> {
        Ok(&mut self.node_mut(node)?.channels[channel.index()])
    }

    fn mesh_shape(&self, node: NodeId) -> SceneResult<&MeshShape> {
        match &self.node(node)?.data {
            NodeData::Mesh(shape) => Ok(shape),
            _ => Err(SceneError::WrongKind {
                node,
                expected: KindTag::Mesh,
            }),
        }
    }

    fn mesh_shape_mut(&mut self, node: NodeId) -> SceneResult<&mut MeshShape> {
        match &mut self.node_mut(node)?.data {
            NodeData::Mesh(shape) => Ok(shape),
            _ => Err(SceneError::WrongKind {
                node,
                expected: KindTag::Mesh,
            }),
        }
    }

    fn deformer(&self, deformer: DeformerId) -> SceneResult<&MorphDeformer> {
        self.state
            .deformers
            .get(&deformer)
            .ok_or(SceneError::MissingDeformer(deformer))
    }

    fn deformer_mut(&mut self, deformer: DeformerId) -> SceneResult<&mut MorphDeformer> {
        self.state
            .deformers
            .get_mut(&deformer)
            .ok_or(SceneError::MissingDeformer(deformer))
    }

    fn weight_curve_mut(&mut self, deformer: DeformerId, index: usize) -> SceneResult<&mut AnimCurve> {
        self.deformer_mut(deformer)?
            .weights
            .get_mut(&index)
            .ok_or(SceneError::MissingTarget { deformer, index })
    }

    fn insert_node(
        &mut self,
        name: &str,
        data: NodeData,
        parent: Option<NodeId>,
    ) -> SceneResult<NodeId> {
        if let Some(parent) = parent {
            self.node(parent)?;
        }
        let id = NodeId(self.alloc_id());
        self.state.nodes.insert(id, NodeRecord::new(name, data, parent));
        self.attach(id, parent)?;
        if let Some(namespace) = namespace_of(name) {
            self.add_namespace(namespace);
        }
        Ok(id)
    }

    fn attach(&mut self, node: NodeId, parent: Option<NodeId>) -> SceneResult<()> {
        match parent {
            Some(parent) => self.node_mut(parent)?.children.push(node),
            None => self.state.roots.push(node),
        }
        self.node_mut(node)?.parent = parent;
        Ok(())
    }

    fn detach(&mut self, node: NodeId) -> SceneResult<()> {
        match self.node(node)?.parent {
            Some(parent) => self.node_mut(parent)?.children.retain(|&child| child != node),
            None => self.state.roots.retain(|&root| root != node),
        }
        self.node_mut(node)?.parent = None;
        Ok(())
    }

    fn push_input(
        &mut self,
        node: NodeId,
        channel: Channel,
        source: InputSource,
    ) -> SceneResult<ConnectionId> {
        self.node(node)?;
        let id = ConnectionId(self.alloc_id());
        self.plug_mut(node, channel)?
            .inputs
            .insert(0, PlugInput { id, source });
        Ok(id)
    }

    fn constraint_value(
        &self,
        constraint: NodeId,
        driven: NodeId,
        channel: Channel,
        frame: Frame,
    ) -> SceneResult<f64> {
        let info = match &self.node(constraint)?.data {
            NodeData::Constraint(info) => *info,
            _ => {
                return Err(SceneError::WrongKind {
                    node: constraint,
                    expected: KindTag::Constraint,
                })
            }
        };

        let target_world = self.world_matrix(info.target, frame)?;
        let record = self.node(driven)?;
        let parent_world = match record.parent {
            Some(parent) => self.world_matrix(parent, frame)?,
            None => DMat4::IDENTITY,
        };
        let local = parent_world.inverse() * target_world;
        Ok(record.attrs.decompose(&local).to_array()[channel.index()])
    }

    fn trs_at(&self, node: NodeId, frame: Frame) -> SceneResult<Trs> {
        let mut values = [0.0; 9];
        for channel in Channel::ALL {
            values[channel.index()] = self.channel_value(node, channel, frame)?;
        }
        Ok(Trs::from_array(values))
    }

    /// Remove `node`'s subtree plus anything that cannot outlive it.
    fn remove_subtree(&mut self, node: NodeId) -> SceneResult<()> {
        self.detach(node)?;
        let mut doomed = vec![node];
        doomed.extend(self.descendants(node)?);
        for id in &doomed {
            self.state.nodes.remove(id);
        }

        // Constraints pointing at removed nodes go with them.
        let orphaned: Vec<NodeId> = self
            .state
            .nodes
            .iter()
            .filter_map(|(id, record)| match &record.data {
                NodeData::Constraint(info)
                    if !self.state.nodes.contains_key(&info.target)
                        || !self.state.nodes.contains_key(&info.constrained) =>
                {
                    Some(*id)
                }
                _ => None,
            })
            .collect();
        for id in orphaned {
            if self.state.nodes.contains_key(&id) {
                self.remove_subtree(id)?;
            }
        }

        let nodes = &self.state.nodes;
        let mut dangling_deformers = Vec::new();
        for (id, deformer) in &self.state.deformers {
            if !nodes.contains_key(&deformer.base) {
                dangling_deformers.push(*id);
            }
        }
        for id in dangling_deformers {
            self.state.deformers.remove(&id);
        }

        let live: BTreeSet<NodeId> = self.state.nodes.keys().copied().collect();
        for record in self.state.nodes.values_mut() {
            for plug in record.channels.iter_mut() {
                plug.inputs.retain(|input| match input.source {
                    InputSource::Constraint(source) => live.contains(&source),
                    _ => true,
                });
            }
        }
        Ok(())
    }

    fn restore_with_leaks(&mut self, snapshot: SceneState, watermark: u64) {
        let leaked: Vec<(NodeId, NodeRecord)> = self
            .state
            .nodes
            .iter()
            .filter(|(id, _)| id.0 >= watermark)
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        let leaked_deformers: Vec<(DeformerId, MorphDeformer)> = self
            .state
            .deformers
            .iter()
            .filter(|(id, _)| id.0 >= watermark)
            .map(|(id, deformer)| (*id, deformer.clone()))
            .collect();

        self.state = snapshot;
        let leaked_ids: BTreeSet<NodeId> = leaked.iter().map(|(id, _)| *id).collect();
        for (id, mut record) in leaked {
            record.children.retain(|child| leaked_ids.contains(child));
            let parent = record
                .parent
                .filter(|parent| leaked_ids.contains(parent) || self.state.nodes.contains_key(parent));
            record.parent = parent;
            let attach_outside = parent.map_or(true, |parent| !leaked_ids.contains(&parent));
            self.state.nodes.insert(id, record);
            if attach_outside {
                match parent {
                    Some(parent) => {
                        if let Some(parent_record) = self.state.nodes.get_mut(&parent) {
                            parent_record.children.push(id);
                        }
                    }
                    None => self.state.roots.push(id),
                }
            }
        }
        self.state.deformers.extend(leaked_deformers);
    }
}

impl HostScene for MemoryScene {
    fn contains(&self, node: NodeId) -> bool {
        self.state.nodes.contains_key(&node)
    }

    fn find_node(&self, name: &str) -> Option<NodeId> {
        self.state
            .nodes
            .iter()
            .find(|(_, record)| record.name == name)
            .map(|(id, _)| *id)
    }

    fn node_name(&self, node: NodeId) -> SceneResult<String> {
        Ok(self.node(node)?.name.clone())
    }

    fn node_kind(&self, node: NodeId) -> SceneResult<NodeKind> {
        Ok(self.node(node)?.data.kind())
    }

    fn parent(&self, node: NodeId) -> SceneResult<Option<NodeId>> {
        Ok(self.node(node)?.parent)
    }

    fn children(&self, node: NodeId) -> SceneResult<Vec<NodeId>> {
        Ok(self.node(node)?.children.clone())
    }

    fn root_nodes(&self) -> Vec<NodeId> {
        self.state.roots.clone()
    }

    fn channel_inputs(&self, node: NodeId, channel: Channel) -> SceneResult<Vec<ConnectionInfo>> {
        let plug = self.plug(node, channel)?;
        Ok(plug
            .inputs
            .iter()
            .enumerate()
            .map(|(position, input)| ConnectionInfo {
                id: input.id,
                kind: input.source.kind(),
                source_node: match input.source {
                    InputSource::Constraint(source) => Some(source),
                    _ => None,
                },
                active: position == 0,
            })
            .collect())
    }

    fn disconnect(
        &mut self,
        node: NodeId,
        channel: Channel,
        connection: ConnectionId,
    ) -> SceneResult<()> {
        let plug = self.plug_mut(node, channel)?;
        let before = plug.inputs.len();
        plug.inputs.retain(|input| input.id != connection);
        if plug.inputs.len() == before {
            return Err(SceneError::MissingConnection {
                node,
                channel,
                connection,
            });
        }
        Ok(())
    }

    fn unlock_channel(&mut self, node: NodeId, channel: Channel) -> SceneResult<()> {
        let plug = self.plug_mut(node, channel)?;
        plug.locked = false;
        plug.keyable = true;
        Ok(())
    }

    fn channel_value(&self, node: NodeId, channel: Channel, frame: Frame) -> SceneResult<f64> {
        let plug = self.plug(node, channel)?;
        let Some(input) = plug.inputs.first() else {
            return Ok(plug.value);
        };
        match &input.source {
            InputSource::Curve(curve) => Ok(curve.evaluate(f64::from(frame)).unwrap_or(plug.value)),
            InputSource::Expression(expression) => Ok(expression.evaluate(frame)),
            InputSource::Cache(cache) => Ok(cache.sample(frame).unwrap_or(plug.value)),
            InputSource::Constraint(constraint) => {
                self.constraint_value(*constraint, node, channel, frame)
            }
        }
    }

    fn local_matrix(&self, node: NodeId, frame: Frame) -> SceneResult<DMat4> {
        let trs = self.trs_at(node, frame)?;
        Ok(self.node(node)?.attrs.compose(&trs))
    }

    fn current_frame(&self) -> Frame {
        self.current_frame
    }

    fn set_current_frame(&mut self, frame: Frame) {
        self.current_frame = frame;
    }

    fn vertex_count(&self, node: NodeId) -> SceneResult<usize> {
        Ok(self.mesh_shape(node)?.mesh.vertex_count())
    }

    fn vertex_position(&self, node: NodeId, index: usize, frame: Frame) -> SceneResult<DVec3> {
        let shape = self.mesh_shape(node)?;
        let count = shape.mesh.vertex_count();
        if index >= count {
            return Err(SceneError::VertexOutOfRange { node, index, count });
        }

        let rest = shape.mesh.positions[index];
        let mut position = shape
            .cache
            .as_ref()
            .and_then(|cache| cache.positions(frame))
            .and_then(|positions| positions.get(index).copied())
            .unwrap_or(rest);

        if let Some(deformer) = shape.deformer.and_then(|id| self.state.deformers.get(&id)) {
            let base_rest = deformer.base_rest.get(index).copied().unwrap_or(rest);
            for (slot, target) in &deformer.targets {
                let weight = deformer
                    .weights
                    .get(slot)
                    .and_then(|curve| curve.evaluate(f64::from(frame)))
                    .unwrap_or(0.0);
                if weight == 0.0 {
                    continue;
                }
                let target_position = self
                    .mesh_shape(*target)
                    .ok()
                    .and_then(|target_shape| target_shape.mesh.positions.get(index).copied());
                if let Some(target_position) = target_position {
                    position += (target_position - base_rest) * weight;
                }
            }
        }

        Ok(position)
    }

    fn transform_attrs(&self, node: NodeId) -> SceneResult<TransformAttrs> {
        Ok(self.node(node)?.attrs)
    }

    fn set_transform_attrs(&mut self, node: NodeId, attrs: TransformAttrs) -> SceneResult<()> {
        self.node_mut(node)?.attrs = attrs;
        Ok(())
    }

    fn duplicate_shape(&mut self, node: NodeId, frame: Frame, name: &str) -> SceneResult<NodeId> {
        let count = self.vertex_count(node)?;
        let positions = (0..count)
            .map(|index| self.vertex_position(node, index, frame))
            .collect::<SceneResult<Vec<_>>>()?;
        let indices = self.mesh_shape(node)?.mesh.indices.clone();
        self.add_mesh(name, None, Mesh::new(positions, indices))
    }

    fn create_group(&mut self, name: &str, parent: Option<NodeId>) -> SceneResult<NodeId> {
        self.add_transform(name, parent)
    }

    fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> SceneResult<()> {
        self.node(node)?;
        if let Some(parent) = parent {
            self.node(parent)?;
            if parent == node || self.descendants(node)?.contains(&parent) {
                return Err(SceneError::Rejected(format!(
                    "cannot parent {node} under its own descendant {parent}"
                )));
            }
        }
        self.detach(node)?;
        self.attach(node, parent)
    }

    fn delete_node(&mut self, node: NodeId) -> SceneResult<()> {
        self.node(node)?;
        self.remove_subtree(node)
    }

    fn set_visible(&mut self, node: NodeId, visible: bool) -> SceneResult<()> {
        self.node_mut(node)?.visible = visible;
        Ok(())
    }

    fn create_morph_deformer(&mut self, base: NodeId, _name: &str) -> SceneResult<DeformerId> {
        let shape = self.mesh_shape(base)?;
        if shape.deformer.is_some() {
            return Err(SceneError::Rejected(format!(
                "{base} already has a morph deformer"
            )));
        }
        let base_rest = shape.mesh.positions.clone();

        let id = DeformerId(self.alloc_id());
        self.state.deformers.insert(
            id,
            MorphDeformer {
                base,
                base_rest,
                targets: BTreeMap::new(),
                weights: BTreeMap::new(),
            },
        );
        self.mesh_shape_mut(base)?.deformer = Some(id);
        Ok(id)
    }

    fn deformer_exists(&self, deformer: DeformerId) -> bool {
        self.state.deformers.contains_key(&deformer)
    }

    fn add_morph_target(
        &mut self,
        deformer: DeformerId,
        index: usize,
        target: NodeId,
    ) -> SceneResult<()> {
        let base = self.deformer(deformer)?.base;
        let base_mesh = &self.mesh_shape(base)?.mesh;
        let target_mesh = &self.mesh_shape(target)?.mesh;
        if !base_mesh.same_topology(target_mesh) {
            return Err(SceneError::TopologyMismatch { base, target });
        }

        let entry = self.deformer_mut(deformer)?;
        entry.targets.insert(index, target);
        entry.weights.entry(index).or_default();
        Ok(())
    }

    fn morph_targets(&self, deformer: DeformerId) -> SceneResult<Vec<(usize, NodeId)>> {
        Ok(self
            .deformer(deformer)?
            .targets
            .iter()
            .map(|(index, target)| (*index, *target))
            .collect())
    }

    fn weight_keys(&self, deformer: DeformerId, index: usize) -> SceneResult<Vec<Key>> {
        self.deformer(deformer)?
            .weights
            .get(&index)
            .map(|curve| curve.keys().to_vec())
            .ok_or(SceneError::MissingTarget { deformer, index })
    }

    fn clear_weight_keys(&mut self, deformer: DeformerId, index: usize) -> SceneResult<()> {
        self.weight_curve_mut(deformer, index)?.clear();
        Ok(())
    }

    fn set_weight_key(&mut self, deformer: DeformerId, index: usize, key: Key) -> SceneResult<()> {
        self.weight_curve_mut(deformer, index)?.set_key(key);
        Ok(())
    }

    fn weight_value(&self, deformer: DeformerId, index: usize, frame: Frame) -> SceneResult<f64> {
        self.deformer(deformer)?
            .weights
            .get(&index)
            .map(|curve| curve.evaluate(f64::from(frame)).unwrap_or(0.0))
            .ok_or(SceneError::MissingTarget { deformer, index })
    }

    fn delete_deformer(&mut self, deformer: DeformerId) -> SceneResult<()> {
        let removed = self
            .state
            .deformers
            .remove(&deformer)
            .ok_or(SceneError::MissingDeformer(deformer))?;
        if let Ok(shape) = self.mesh_shape_mut(removed.base) {
            shape.deformer = None;
        }
        Ok(())
    }

    fn create_constraint(
        &mut self,
        driver: NodeId,
        driven: NodeId,
        kind: ConstraintKind,
    ) -> SceneResult<NodeId> {
        self.node(driver)?;
        let driven_name = self.node(driven)?.name.clone();
        if driver == driven {
            return Err(SceneError::Rejected(format!(
                "{driven} cannot be constrained to itself"
            )));
        }

        let info = ConstraintInfo {
            kind,
            target: driver,
            constrained: driven,
        };
        let label = format!("{kind:?}").to_lowercase();
        let name = format!("{driven_name}_{label}Constraint");
        let constraint = self.insert_node(&name, NodeData::Constraint(info), Some(driven))?;
        for &channel in kind.channels() {
            self.push_input(driven, channel, InputSource::Constraint(constraint))?;
        }
        Ok(constraint)
    }

    fn bake_simulation(&mut self, nodes: &[NodeId], range: BakeRange) -> SceneResult<()> {
        // Sample everything first; baked nodes may drive each other.
        let mut baked = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let mut curves: [AnimCurve; 9] = Default::default();
            for frame in range.frames() {
                for channel in Channel::ALL {
                    let value = self.channel_value(node, channel, frame)?;
                    curves[channel.index()].set_key(Key::linear(f64::from(frame), value));
                }
            }
            baked.push((node, curves));
        }

        for (node, curves) in baked {
            for (channel, curve) in Channel::ALL.into_iter().zip(curves) {
                if self.plug(node, channel)?.locked {
                    continue;
                }
                self.plug_mut(node, channel)?
                    .inputs
                    .retain(|input| !matches!(input.source, InputSource::Curve(_)));
                self.push_input(node, channel, InputSource::Curve(curve))?;
            }
        }
        Ok(())
    }

    fn is_skinned(&self, node: NodeId) -> SceneResult<bool> {
        Ok(self.node(node)?.skinned)
    }

    fn construction_history(&self, node: NodeId) -> SceneResult<Vec<HistoryItem>> {
        Ok(self.node(node)?.history.clone())
    }

    fn delete_non_deformer_history(&mut self, node: NodeId) -> SceneResult<()> {
        self.node_mut(node)?.history.retain(|item| item.deformer);
        Ok(())
    }

    fn freeze_transform(&mut self, node: NodeId, frame: Frame) -> SceneResult<()> {
        if self.node(node)?.has_inputs() {
            return Err(SceneError::Rejected(format!(
                "{node} has animated channels and cannot be frozen"
            )));
        }

        let local = self.local_matrix(node, frame)?;
        let children = self.children(node)?;
        let mut compensated = Vec::new();
        for child in children {
            if self.node(child)?.has_inputs() {
                return Err(SceneError::Rejected(format!(
                    "child {child} of {node} has animated channels"
                )));
            }
            let child_local = local * self.local_matrix(child, frame)?;
            let attrs = self.node(child)?.attrs;
            compensated.push((child, attrs.decompose(&child_local)));
        }

        for (child, trs) in compensated {
            self.set_trs(child, &trs)?;
        }

        let record = self.node_mut(node)?;
        record.attrs.rotate_pivot = local.transform_point3(record.attrs.rotate_pivot);
        record.attrs.scale_pivot = local.transform_point3(record.attrs.scale_pivot);
        for (plug, channel) in record.channels.iter_mut().zip(Channel::ALL) {
            plug.value = channel.rest_value();
        }
        if let NodeData::Mesh(shape) = &mut record.data {
            shape.mesh = shape.mesh.transformed(&local);
            if let Some(cache) = shape.cache.as_mut() {
                for positions in cache.frames.values_mut() {
                    for position in positions.iter_mut() {
                        *position = local.transform_point3(*position);
                    }
                }
            }
        }
        Ok(())
    }

    fn namespaces(&self) -> Vec<String> {
        self.state.namespaces.iter().cloned().collect()
    }

    fn namespace_has_referenced_nodes(&self, namespace: &str) -> bool {
        self.state
            .nodes
            .values()
            .any(|record| record.referenced && namespace_of(&record.name) == Some(namespace))
    }

    fn remove_namespace(&mut self, namespace: &str) -> SceneResult<()> {
        if !self.state.namespaces.contains(namespace) {
            return Err(SceneError::MissingNamespace(namespace.to_string()));
        }
        let nested_prefix = format!("{namespace}:");
        if self
            .state
            .namespaces
            .iter()
            .any(|other| other.starts_with(&nested_prefix))
        {
            return Err(SceneError::Rejected(format!(
                "namespace '{namespace}' still has nested namespaces"
            )));
        }
        if self.namespace_has_referenced_nodes(namespace) {
            return Err(SceneError::Rejected(format!(
                "namespace '{namespace}' contains referenced nodes"
            )));
        }

        let parent = parent_namespace(namespace).map(str::to_string);
        for record in self.state.nodes.values_mut() {
            if namespace_of(&record.name) != Some(namespace) {
                continue;
            }
            let short = record.name[nested_prefix.len()..].to_string();
            record.name = match &parent {
                Some(parent) => format!("{parent}:{short}"),
                None => short,
            };
        }
        self.state.namespaces.remove(namespace);
        Ok(())
    }

    fn open_edit_boundary(&mut self, name: &str) -> SceneResult<BoundaryId> {
        let id = BoundaryId(self.alloc_id());
        self.boundaries.push(Boundary {
            id,
            name: name.to_string(),
            snapshot: self.state.clone(),
            frame: self.current_frame,
            watermark: self.next_id + 1,
            open: true,
        });
        Ok(id)
    }

    fn close_edit_boundary(&mut self, boundary: BoundaryId) -> SceneResult<()> {
        let entry = self
            .boundaries
            .iter_mut()
            .find(|entry| entry.id == boundary)
            .ok_or(SceneError::UnknownBoundary(boundary))?;
        entry.open = false;
        Ok(())
    }

    fn rollback(&mut self, boundary: BoundaryId) -> SceneResult<()> {
        let position = self
            .boundaries
            .iter()
            .position(|entry| entry.id == boundary)
            .ok_or(SceneError::UnknownBoundary(boundary))?;

        if self.rollback_fault == RollbackFault::Fails {
            return Err(SceneError::Rollback(format!(
                "undo queue rejected rollback of '{}'",
                self.boundaries[position].name
            )));
        }

        let entry = self.boundaries.remove(position);
        self.boundaries.truncate(position);
        match self.rollback_fault {
            RollbackFault::LeavesCreatedNodes => {
                self.restore_with_leaks(entry.snapshot, entry.watermark)
            }
            _ => self.state = entry.snapshot,
        }
        self.current_frame = entry.frame;
        Ok(())
    }
}
