//! Node classification.
//!
//! Every leaf under the given roots lands in exactly one class. A mesh is a
//! leaf even if it has children; any other node is a leaf when nothing below
//! it carries a mesh. Constraint nodes are never leaves.

use std::fmt;

use bakeshift_math::{BakeRange, DVec3};
use serde::Serialize;

use crate::report::{ClassCounts, SkippedNode, Stage};
use crate::scene::{Channel, HostScene, KindTag, NodeId, SceneResult};
use crate::settings::ConversionSettings;

/// What a leaf needs before it can be exported.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Nothing moves
    Static,

    /// Channels driven by something other than keyframe curves
    Driven,

    /// Vertices move relative to the node
    VertexDeformed,
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeClass::Static => "static",
            NodeClass::Driven => "driven",
            NodeClass::VertexDeformed => "vertex-deformed",
        };
        f.write_str(name)
    }
}

/// Leaves under a set of roots, partitioned by class.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classification {
    pub static_nodes: Vec<NodeId>,
    pub driven: Vec<NodeId>,
    pub vertex_deformed: Vec<NodeId>,
    pub skipped: Vec<SkippedNode>,
}

impl Classification {
    pub fn counts(&self) -> ClassCounts {
        ClassCounts {
            static_nodes: self.static_nodes.len(),
            driven: self.driven.len(),
            vertex_deformed: self.vertex_deformed.len(),
        }
    }

    pub fn class_of(&self, node: NodeId) -> Option<NodeClass> {
        if self.static_nodes.contains(&node) {
            Some(NodeClass::Static)
        } else if self.driven.contains(&node) {
            Some(NodeClass::Driven)
        } else if self.vertex_deformed.contains(&node) {
            Some(NodeClass::VertexDeformed)
        } else {
            None
        }
    }

    fn push(&mut self, node: NodeId, class: NodeClass) {
        match class {
            NodeClass::Static => self.static_nodes.push(node),
            NodeClass::Driven => self.driven.push(node),
            NodeClass::VertexDeformed => self.vertex_deformed.push(node),
        }
    }
}

/// Every leaf below (and including) `roots`, in depth-first order.
pub fn collect_leaves<S: HostScene + ?Sized>(scene: &S, roots: &[NodeId]) -> SceneResult<Vec<NodeId>> {
    let mut leaves = Vec::new();
    let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();

    while let Some(node) = stack.pop() {
        let kind = scene.node_kind(node)?.tag();
        match kind {
            KindTag::Constraint => continue,
            KindTag::Mesh => leaves.push(node),
            _ => {
                let meshes_below = scene.subtree_of_kind(node, KindTag::Mesh)?;
                if meshes_below.is_empty() {
                    leaves.push(node);
                } else {
                    stack.extend(scene.children(node)?.into_iter().rev());
                }
            }
        }
    }

    Ok(leaves)
}

/// Classify every leaf under `roots`.
///
/// Nodes that cannot be read are skipped with a warning; the pass itself
/// never fails.
pub fn classify<S: HostScene + ?Sized>(
    scene: &S,
    roots: &[NodeId],
    range: BakeRange,
    settings: &ConversionSettings,
) -> Classification {
    let mut result = Classification::default();

    for &root in roots {
        let leaves = match collect_leaves(scene, &[root]) {
            Ok(leaves) => leaves,
            Err(e) => {
                log::warn!("Skipping root {}: {}", root, e);
                result
                    .skipped
                    .push(SkippedNode::new(scene, root, Stage::Classify, e));
                continue;
            }
        };

        for node in leaves {
            match classify_node(scene, node, range, settings) {
                Ok(class) => {
                    log::debug!(
                        "Classified {} as {}",
                        scene.node_name(node).unwrap_or_else(|_| node.to_string()),
                        class
                    );
                    result.push(node, class);
                }
                Err(e) => {
                    log::warn!("Skipping {} during classification: {}", node, e);
                    result
                        .skipped
                        .push(SkippedNode::new(scene, node, Stage::Classify, e));
                }
            }
        }
    }

    log::info!("Classified {} leaves: {}", result.counts().total(), result.counts());
    result
}

/// Classify one node. Vertex deformation wins over a driven transform.
pub fn classify_node<S: HostScene + ?Sized>(
    scene: &S,
    node: NodeId,
    range: BakeRange,
    settings: &ConversionSettings,
) -> SceneResult<NodeClass> {
    let driven = has_driver(scene, node)?;
    if is_vertex_deformed(scene, node, range, settings)? {
        return Ok(NodeClass::VertexDeformed);
    }
    Ok(if driven {
        NodeClass::Driven
    } else {
        NodeClass::Static
    })
}

/// True if any TRS channel has an incoming connection from something other
/// than a keyframe curve.
pub fn has_driver<S: HostScene + ?Sized>(scene: &S, node: NodeId) -> SceneResult<bool> {
    for channel in Channel::ALL {
        if scene
            .channel_inputs(node, channel)?
            .iter()
            .any(|input| !input.kind.is_curve())
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Compare sampled local-space vertex positions across sampled frames.
///
/// Always false for anything but a mesh. This is a heuristic: deformation
/// between sampled frames or on unsampled vertices goes unnoticed.
pub fn is_vertex_deformed<S: HostScene + ?Sized>(
    scene: &S,
    node: NodeId,
    range: BakeRange,
    settings: &ConversionSettings,
) -> SceneResult<bool> {
    if scene.node_kind(node)?.tag() != KindTag::Mesh {
        return Ok(false);
    }

    let count = scene.vertex_count(node)?;
    let indices = settings.sampling.vertices.indices(count);
    let frames = settings.sampling.frames.frames(&range);
    let Some((&first_frame, other_frames)) = frames.split_first() else {
        return Ok(false);
    };

    let reference = indices
        .iter()
        .map(|&index| scene.vertex_position(node, index, first_frame))
        .collect::<SceneResult<Vec<DVec3>>>()?;

    for &frame in other_frames {
        for (&index, &before) in indices.iter().zip(&reference) {
            let after = scene.vertex_position(node, index, frame)?;
            if (after - before).abs().max_element() > settings.deformation_epsilon {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::{
        AnimCurve, ConstraintKind, Expression, Key, MemoryScene, VertexCache,
    };
    use crate::settings::{FrameSampling, VertexSampling};

    fn range(start: i32, end: i32) -> BakeRange {
        BakeRange::new(start, end).unwrap()
    }

    /// A 2x2 grid whose vertices wave in Y per frame.
    fn cloth(scene: &mut MemoryScene, frames: std::ops::RangeInclusive<i32>) -> NodeId {
        let mesh = Mesh::grid(2, 2);
        let cache = VertexCache {
            frames: frames
                .map(|frame| {
                    let positions = mesh
                        .positions
                        .iter()
                        .map(|p| *p + DVec3::Y * f64::from(frame) * 0.1)
                        .collect();
                    (frame, positions)
                })
                .collect(),
        };
        let node = scene.add_mesh("cloth", None, mesh).unwrap();
        scene.set_vertex_cache(node, cache).unwrap();
        node
    }

    #[test]
    fn test_static_cube_is_static() {
        let mut scene = MemoryScene::new("test");
        let cube = scene.add_mesh("cube", None, Mesh::cuboid(10.0, 10.0, 10.0)).unwrap();
        let settings = ConversionSettings::default();

        for _ in 0..2 {
            let class = classify_node(&scene, cube, range(1, 50), &settings).unwrap();
            assert_eq!(class, NodeClass::Static);
        }
    }

    #[test]
    fn test_cloth_is_vertex_deformed() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=10);
        let settings = ConversionSettings::default();

        let class = classify_node(&scene, cloth, range(1, 10), &settings).unwrap();
        assert_eq!(class, NodeClass::VertexDeformed);
    }

    #[test]
    fn test_deformation_beats_driver() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=10);
        scene
            .connect_expression(cloth, Channel::TranslateX, Expression::Linear { rate: 1.0, offset: 0.0 })
            .unwrap();

        let class = classify_node(&scene, cloth, range(1, 10), &ConversionSettings::default()).unwrap();
        assert_eq!(class, NodeClass::VertexDeformed);
    }

    #[test]
    fn test_constrained_locator_is_driven() {
        let mut scene = MemoryScene::new("test");
        let target = scene.add_locator("target", None).unwrap();
        let locator = scene.add_locator("follower", None).unwrap();
        scene
            .create_constraint(target, locator, ConstraintKind::Parent)
            .unwrap();

        let class =
            classify_node(&scene, locator, range(1, 10), &ConversionSettings::default()).unwrap();
        assert_eq!(class, NodeClass::Driven);
    }

    #[test]
    fn test_keyframed_node_is_not_driven() {
        let mut scene = MemoryScene::new("test");
        let locator = scene.add_locator("keyed", None).unwrap();
        scene
            .connect_curve(
                locator,
                Channel::RotateY,
                AnimCurve::from_keys([Key::linear(1.0, 0.0), Key::linear(10.0, 90.0)]),
            )
            .unwrap();

        assert!(!has_driver(&scene, locator).unwrap());
    }

    #[test]
    fn test_endpoint_sampling_misses_returning_motion() {
        let mut scene = MemoryScene::new("test");
        let mesh = Mesh::grid(1, 1);
        let mut bulged = mesh.positions.clone();
        bulged[0] += DVec3::Y;
        let cache = VertexCache {
            frames: [(1, mesh.positions.clone()), (5, bulged), (10, mesh.positions.clone())]
                .into_iter()
                .collect(),
        };
        let node = scene.add_mesh("pulse", None, mesh).unwrap();
        scene.set_vertex_cache(node, cache).unwrap();

        let mut settings = ConversionSettings::default();
        assert!(!is_vertex_deformed(&scene, node, range(1, 10), &settings).unwrap());

        settings.sampling.frames = FrameSampling::All;
        assert!(is_vertex_deformed(&scene, node, range(1, 10), &settings).unwrap());
    }

    #[test]
    fn test_unsampled_vertex_needs_wider_sampling() {
        let mut scene = MemoryScene::new("test");
        let mesh = Mesh::grid(3, 0);
        let mut moved = mesh.positions.clone();
        moved[1] += DVec3::Y;
        let cache = VertexCache {
            frames: [(1, mesh.positions.clone()), (2, moved)].into_iter().collect(),
        };
        let node = scene.add_mesh("strip", None, mesh).unwrap();
        scene.set_vertex_cache(node, cache).unwrap();

        let mut settings = ConversionSettings::default();
        assert!(!is_vertex_deformed(&scene, node, range(1, 2), &settings).unwrap());

        settings.sampling.vertices = VertexSampling::All;
        assert!(is_vertex_deformed(&scene, node, range(1, 2), &settings).unwrap());
    }

    #[test]
    fn test_collect_leaves() {
        let mut scene = MemoryScene::new("test");
        let root = scene.add_transform("geo", None).unwrap();
        let group = scene.add_transform("props", Some(root)).unwrap();
        let cube = scene.add_mesh("cube", Some(group), Mesh::cuboid(1.0, 1.0, 1.0)).unwrap();
        scene.add_locator("cube_tip", Some(cube)).unwrap();
        let lamp = scene.add_locator("lamp", Some(root)).unwrap();
        let empty = scene.add_transform("empty", None).unwrap();

        let leaves = collect_leaves(&scene, &[root, empty]).unwrap();
        assert_eq!(leaves, vec![cube, lamp, empty]);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let mut scene = MemoryScene::new("test");
        let cube = scene.add_mesh("cube", None, Mesh::cuboid(1.0, 1.0, 1.0)).unwrap();

        let result = classify(
            &scene,
            &[NodeId(404), cube],
            range(1, 5),
            &ConversionSettings::default(),
        );
        assert_eq!(result.static_nodes, vec![cube]);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].node, NodeId(404));
        assert_eq!(result.class_of(cube), Some(NodeClass::Static));
    }

    #[test]
    fn test_each_leaf_in_one_class() {
        let mut scene = MemoryScene::new("test");
        let root = scene.add_transform("geo", None).unwrap();
        let cloth = cloth(&mut scene, 1..=4);
        scene.reparent(cloth, Some(root)).unwrap();
        let cube = scene.add_mesh("cube", Some(root), Mesh::cuboid(1.0, 1.0, 1.0)).unwrap();
        let mover = scene.add_mesh("mover", Some(root), Mesh::cuboid(1.0, 1.0, 1.0)).unwrap();
        scene
            .connect_expression(mover, Channel::TranslateY, Expression::Linear { rate: 1.0, offset: 0.0 })
            .unwrap();

        let result = classify(&scene, &[root], range(1, 4), &ConversionSettings::default());
        assert_eq!(result.vertex_deformed, vec![cloth]);
        assert_eq!(result.static_nodes, vec![cube]);
        assert_eq!(result.driven, vec![mover]);
        assert_eq!(result.counts().total(), 3);
    }
}
