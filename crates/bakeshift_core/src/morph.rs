//! Morph target synthesis.
//!
//! Turns a vertex-deformed mesh into a base mesh carrying the node's rigid
//! motion plus one morph target per frame, with weights keyed so exactly one
//! target is fully on at every sampled frame.
//!
//! All targets are created and wired into the deformer before any weight is
//! keyed. Some exporters only find morph data by walking live connections,
//! so targets stay in the scene (in a hidden holding group) until the
//! surrounding transaction ends.

use bakeshift_math::{BakeRange, Frame};
use serde::Serialize;
use thiserror::Error;

use crate::bake::{bake_transform, BakeError};
use crate::report::{SkippedNode, Stage};
use crate::scene::{
    ConstraintKind, DeformerId, HostScene, Key, KindTag, NodeId, SceneError, SceneResult,
};
use crate::settings::ConversionSettings;
use crate::transaction::{Artifact, Artifacts};

/// Errors that can occur while synthesizing morph targets for one node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MorphError {
    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error("failed to bake base mesh motion: {0}")]
    BaseBake(#[from] BakeError),

    #[error("{0} is not a mesh")]
    NotAMesh(NodeId),

    #[error("failed to capture target for frame {frame}: {source}")]
    Target { frame: Frame, source: SceneError },

    #[error("failed to key weight for target {index}: {source}")]
    Weight { index: usize, source: SceneError },
}

/// Result type for morph synthesis.
pub type MorphResult<T> = Result<T, MorphError>;

/// A base mesh and the per-frame targets that reproduce its source's deformation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorphTarget {
    /// Name of the node this replaced
    pub source_name: String,

    pub base: NodeId,
    pub deformer: DeformerId,

    /// Hidden group holding every target shape
    pub group: NodeId,

    /// `(frame, target)` in frame order; index `i` is deformer target `i`
    pub targets: Vec<(Frame, NodeId)>,
}

impl MorphTarget {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target_for_frame(&self, frame: Frame) -> Option<NodeId> {
        self.targets
            .iter()
            .find(|(target_frame, _)| *target_frame == frame)
            .map(|(_, target)| *target)
    }
}

/// Synthesize morph targets for `source` over `range`.
///
/// On failure every artifact created for this node is deleted and the time
/// cursor restored; `artifacts` is only extended on success. The source node
/// is deleted on success.
pub fn synthesize<S: HostScene + ?Sized>(
    scene: &mut S,
    source: NodeId,
    range: BakeRange,
    settings: &ConversionSettings,
    artifacts: &mut Artifacts,
) -> MorphResult<MorphTarget> {
    let saved_frame = scene.current_frame();
    let mut local = Artifacts::new();

    let result = build(scene, source, range, settings, &mut local);
    scene.set_current_frame(saved_frame);

    match result {
        Ok(morph) => {
            log::info!(
                "Synthesized {} morph targets for {}",
                morph.len(),
                morph.source_name
            );
            artifacts.extend(local);
            Ok(morph)
        }
        Err(e) => {
            let release = local.release(scene);
            log::warn!(
                "Morph synthesis for {} failed, removed {} partial artifacts: {}",
                source,
                release.removed.len(),
                e
            );
            Err(e)
        }
    }
}

/// Synthesize each node independently. A failure excludes that node only.
pub fn synthesize_all<S: HostScene + ?Sized>(
    scene: &mut S,
    sources: &[NodeId],
    range: BakeRange,
    settings: &ConversionSettings,
    artifacts: &mut Artifacts,
) -> (Vec<MorphTarget>, Vec<SkippedNode>) {
    let mut morphs = Vec::with_capacity(sources.len());
    let mut skipped = Vec::new();

    for &source in sources {
        // Look the name up first: a failure may leave the node unresolvable.
        let name = scene.node_name(source).ok();
        match synthesize(scene, source, range, settings, artifacts) {
            Ok(morph) => morphs.push(morph),
            Err(e) => skipped.push(SkippedNode {
                node: source,
                name,
                stage: Stage::Morph,
                reason: e.to_string(),
            }),
        }
    }

    (morphs, skipped)
}

fn build<S: HostScene + ?Sized>(
    scene: &mut S,
    source: NodeId,
    range: BakeRange,
    settings: &ConversionSettings,
    local: &mut Artifacts,
) -> MorphResult<MorphTarget> {
    if scene.node_kind(source)?.tag() != KindTag::Mesh {
        return Err(MorphError::NotAMesh(source));
    }
    let source_name = scene.node_name(source)?;
    let short_name = source_name.rsplit(':').next().unwrap_or(&source_name).to_string();

    let group_name = settings.artifact_name(&format!("{short_name}_morph_grp"));
    let group = local.track_node(scene.create_group(&group_name, None)?);
    scene.set_visible(group, false)?;

    let base = prepare_base(scene, source, &short_name, range, settings, local)?;
    let deformer_name = settings.artifact_name(&format!("{short_name}_morph"));
    let deformer = local.track_deformer(scene.create_morph_deformer(base, &deformer_name)?);

    // Pass 1: every target exists and is connected before any weight is keyed.
    let mut targets = Vec::with_capacity(range.frame_count());
    for (index, frame) in range.frames().enumerate() {
        scene.set_current_frame(frame);
        let target = capture_target(scene, source, frame, &short_name, settings, local)
            .map_err(|source| MorphError::Target { frame, source })?;
        scene
            .reparent(target, Some(group))
            .and_then(|_| scene.add_morph_target(deformer, index, target))
            .map_err(|source| MorphError::Target { frame, source })?;
        targets.push((frame, target));
    }

    // Pass 2: a one-frame pulse per target.
    for (index, &(frame, _)) in targets.iter().enumerate() {
        key_weight_pulse(scene, deformer, index, frame, range)
            .map_err(|source| MorphError::Weight { index, source })?;
    }

    adopt_children(scene, source, base)?;
    scene.delete_node(source)?;

    Ok(MorphTarget {
        source_name,
        base,
        deformer,
        group,
        targets,
    })
}

/// Duplicate the source at the range start and bake its rigid motion onto
/// the copy through a temporary constraint.
fn prepare_base<S: HostScene + ?Sized>(
    scene: &mut S,
    source: NodeId,
    short_name: &str,
    range: BakeRange,
    settings: &ConversionSettings,
    local: &mut Artifacts,
) -> MorphResult<NodeId> {
    let base_name = settings.artifact_name(&format!("{short_name}_base"));
    let base = local.track_node(scene.duplicate_shape(source, range.start(), &base_name)?);
    scene.delete_non_deformer_history(base)?;
    let attrs = scene.transform_attrs(source)?;
    scene.set_transform_attrs(base, attrs)?;

    let constraint = local.track_node(scene.create_constraint(source, base, ConstraintKind::Full)?);
    bake_transform(scene, base, range)?;
    scene.delete_node(constraint)?;
    local.forget(Artifact::Node(constraint));

    Ok(base)
}

/// Move the source's children onto the base, which follows the source's
/// world motion. On failure the children already moved are put back.
fn adopt_children<S: HostScene + ?Sized>(scene: &mut S, source: NodeId, base: NodeId) -> SceneResult<()> {
    let children = scene.children(source)?;
    for (moved, &child) in children.iter().enumerate() {
        if let Err(e) = scene.reparent(child, Some(base)) {
            for &child in &children[..moved] {
                if let Err(e) = scene.reparent(child, Some(source)) {
                    log::warn!("Failed to return {} to {}: {}", child, source, e);
                }
            }
            return Err(e);
        }
    }
    if !children.is_empty() {
        log::debug!("Moved {} children of {} onto {}", children.len(), source, base);
    }
    Ok(())
}

fn capture_target<S: HostScene + ?Sized>(
    scene: &mut S,
    source: NodeId,
    frame: Frame,
    short_name: &str,
    settings: &ConversionSettings,
    local: &mut Artifacts,
) -> SceneResult<NodeId> {
    let name = settings.artifact_name(&format!("{short_name}_f{frame}"));
    Ok(local.track_node(scene.duplicate_shape(source, frame, &name)?))
}

/// Key weight 0 at `frame - 1`, 1 at `frame` and 0 at `frame + 1`, holding
/// the last two. The leading key is stepped at the range start so the weight
/// stays 0 before the range.
pub fn key_weight_pulse<S: HostScene + ?Sized>(
    scene: &mut S,
    deformer: DeformerId,
    index: usize,
    frame: Frame,
    range: BakeRange,
) -> SceneResult<()> {
    scene.clear_weight_keys(deformer, index)?;
    let lead = if range.contains(frame - 1) {
        Key::linear(f64::from(frame - 1), 0.0)
    } else {
        Key::step(f64::from(frame - 1), 0.0)
    };
    scene.set_weight_key(deformer, index, lead)?;
    scene.set_weight_key(deformer, index, Key::step(f64::from(frame), 1.0))?;
    scene.set_weight_key(deformer, index, Key::step(f64::from(frame + 1), 0.0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::{AnimCurve, Channel, MemoryScene, Tangent, VertexCache};
    use bakeshift_math::DVec3;

    fn range(start: i32, end: i32) -> BakeRange {
        BakeRange::new(start, end).unwrap()
    }

    /// A moving 2x2 grid with distinct vertex positions on every frame.
    fn cloth(scene: &mut MemoryScene, frames: std::ops::RangeInclusive<i32>) -> NodeId {
        let mesh = Mesh::grid(2, 2);
        let cache = VertexCache {
            frames: frames
                .map(|frame| {
                    let positions = mesh
                        .positions
                        .iter()
                        .enumerate()
                        .map(|(i, p)| *p + DVec3::Y * (f64::from(frame) * 0.25 + i as f64 * 0.01))
                        .collect();
                    (frame, positions)
                })
                .collect(),
        };
        let node = scene.add_mesh("fx:cloth", None, mesh).unwrap();
        scene.set_vertex_cache(node, cache).unwrap();
        scene
            .connect_curve(
                node,
                Channel::TranslateX,
                AnimCurve::from_keys([Key::linear(1.0, 0.0), Key::linear(10.0, 9.0)]),
            )
            .unwrap();
        node
    }

    fn world_points(scene: &MemoryScene, node: NodeId, frame: Frame) -> Vec<DVec3> {
        let world = scene.world_matrix(node, frame).unwrap();
        (0..scene.vertex_count(node).unwrap())
            .map(|i| world.transform_point3(scene.vertex_position(node, i, frame).unwrap()))
            .collect()
    }

    #[test]
    fn test_cloth_produces_one_target_per_frame() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=10);
        let mut artifacts = Artifacts::new();

        let morph = synthesize(
            &mut scene,
            cloth,
            range(1, 10),
            &ConversionSettings::default(),
            &mut artifacts,
        )
        .unwrap();

        assert_eq!(morph.len(), 10);
        assert_eq!(scene.morph_targets(morph.deformer).unwrap().len(), 10);
        assert!(!scene.contains(cloth));
        assert!(!scene.is_visible(morph.group).unwrap());
        assert_eq!(scene.children(morph.group).unwrap().len(), 10);
        assert_eq!(scene.node_name(morph.base).unwrap(), "bks_cloth_base");
        assert!(artifacts.contains(Artifact::Deformer(morph.deformer)));
        assert_eq!(artifacts.len(), 13);
    }

    #[test]
    fn test_exactly_one_target_active_per_frame() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=10);
        let mut artifacts = Artifacts::new();
        let morph = synthesize(
            &mut scene,
            cloth,
            range(1, 10),
            &ConversionSettings::default(),
            &mut artifacts,
        )
        .unwrap();

        for frame in 1..=10 {
            for (index, (target_frame, _)) in morph.targets.iter().enumerate() {
                let weight = scene.weight_value(morph.deformer, index, frame).unwrap();
                let expected = if *target_frame == frame { 1.0 } else { 0.0 };
                assert_eq!(weight, expected, "target {index} at frame {frame}");
            }
        }
    }

    #[test]
    fn test_weight_key_tangents() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=3);
        let mut artifacts = Artifacts::new();
        let morph = synthesize(
            &mut scene,
            cloth,
            range(1, 3),
            &ConversionSettings::default(),
            &mut artifacts,
        )
        .unwrap();

        let first = scene.weight_keys(morph.deformer, 0).unwrap();
        assert_eq!(
            first,
            vec![Key::step(0.0, 0.0), Key::step(1.0, 1.0), Key::step(2.0, 0.0)]
        );

        let middle = scene.weight_keys(morph.deformer, 1).unwrap();
        assert_eq!(middle.len(), 3);
        assert_eq!(middle[0], Key::linear(1.0, 0.0));
        assert_eq!(middle[1].out_tangent, Tangent::Step);
        assert_eq!(middle[2], Key::step(3.0, 0.0));
    }

    #[test]
    fn test_weights_are_zero_outside_range() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 5..=8);
        let mut artifacts = Artifacts::new();
        let morph = synthesize(
            &mut scene,
            cloth,
            range(5, 8),
            &ConversionSettings::default(),
            &mut artifacts,
        )
        .unwrap();

        for index in 0..morph.len() {
            for frame in [-10, 0, 4, 9, 20] {
                let weight = scene.weight_value(morph.deformer, index, frame).unwrap();
                assert_eq!(weight, 0.0, "target {index} at frame {frame}");
            }
        }
        assert_eq!(scene.weight_value(morph.deformer, 0, 5).unwrap(), 1.0);
    }

    #[test]
    fn test_base_reproduces_source_in_world_space() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=5);
        let expected: Vec<Vec<DVec3>> = (1..=5).map(|f| world_points(&scene, cloth, f)).collect();
        let mut artifacts = Artifacts::new();

        let morph = synthesize(
            &mut scene,
            cloth,
            range(1, 5),
            &ConversionSettings::default(),
            &mut artifacts,
        )
        .unwrap();

        for (frame, expected) in (1..=5).zip(expected) {
            let actual = world_points(&scene, morph.base, frame);
            for (a, e) in actual.iter().zip(&expected) {
                assert!((*a - *e).length() < 1e-9, "frame {frame}: {a} != {e}");
            }
        }
    }

    #[test]
    fn test_children_survive_on_base() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=4);
        let pin = scene.add_locator("pin", Some(cloth)).unwrap();
        scene.set_channel(pin, Channel::TranslateZ, 2.0).unwrap();
        let expected: Vec<DVec3> = (1..=4)
            .map(|f| scene.world_matrix(pin, f).unwrap().transform_point3(DVec3::ZERO))
            .collect();
        let mut artifacts = Artifacts::new();

        let morph = synthesize(
            &mut scene,
            cloth,
            range(1, 4),
            &ConversionSettings::default(),
            &mut artifacts,
        )
        .unwrap();

        assert!(scene.contains(pin));
        assert_eq!(scene.parent(pin).unwrap(), Some(morph.base));
        for (frame, expected) in (1..=4).zip(expected) {
            let actual = scene.world_matrix(pin, frame).unwrap().transform_point3(DVec3::ZERO);
            assert!((actual - expected).length() < 1e-9, "frame {frame}: {actual} != {expected}");
        }
    }

    #[test]
    fn test_time_cursor_restored() {
        let mut scene = MemoryScene::new("test");
        let cloth = cloth(&mut scene, 1..=4);
        scene.set_current_frame(42);
        let mut artifacts = Artifacts::new();

        synthesize(
            &mut scene,
            cloth,
            range(1, 4),
            &ConversionSettings::default(),
            &mut artifacts,
        )
        .unwrap();

        assert_eq!(scene.current_frame(), 42);
    }

    #[test]
    fn test_failure_removes_partial_artifacts() {
        let mut scene = MemoryScene::new("test");
        let locator = scene.add_locator("not_a_mesh", None).unwrap();
        let cloth = cloth(&mut scene, 1..=3);
        let count = scene.node_count();
        let mut artifacts = Artifacts::new();

        let (morphs, skipped) = synthesize_all(
            &mut scene,
            &[locator, cloth],
            range(1, 3),
            &ConversionSettings::default(),
            &mut artifacts,
        );

        assert_eq!(morphs.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name.as_deref(), Some("not_a_mesh"));
        assert!(scene.contains(locator));
        // group + base + 3 targets replace the cloth
        assert_eq!(scene.node_count(), count - 1 + 5);
    }
}
