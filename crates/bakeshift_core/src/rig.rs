//! Skeletal baking and rig normalization.
//!
//! Prepares joint hierarchies and their geometry for a general-purpose
//! skeletal exporter. The steps run in a fixed order; later steps assume the
//! earlier ones completed:
//!
//! 1. bake the camera over the range
//! 2. bake every joint over the skeletal range while constraints are live
//! 3. delete constraint nodes under the rig roots
//! 4. sever non-curve inputs left on the baked joints
//! 5. warn about joints without unit scale at the range start
//! 6. delete non-deformer history on meshes
//! 7. freeze meshes that are neither skinned nor above a joint
//! 8. strip unprotected namespaces, deepest first

use bakeshift_math::{BakeRange, DVec3, Frame};
use serde::Serialize;
use thiserror::Error;

use crate::bake::{bake_transform, sever_non_curve_inputs};
use crate::report::{SkippedNode, Stage};
use crate::scene::{Channel, HostScene, KindTag, NodeId, SceneError, SceneResult};
use crate::settings::ConversionSettings;

/// Errors that abort rig normalization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RigError {
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Result type for rig normalization.
pub type RigResult<T> = Result<T, RigError>;

/// What to normalize.
#[derive(Debug, Clone, PartialEq)]
pub struct RigRequest {
    pub camera: Option<NodeId>,
    pub rig_roots: Vec<NodeId>,
    pub geometry_roots: Vec<NodeId>,
    pub range: BakeRange,

    /// Extra frame holding a reference pose, baked along with the joints
    pub reference_frame: Option<Frame>,
}

impl RigRequest {
    /// The joint bake range, widened to the reference frame if there is one.
    pub fn skeletal_range(&self) -> BakeRange {
        match self.reference_frame {
            Some(frame) => self.range.widened_to(frame),
            None => self.range,
        }
    }
}

/// A joint whose scale is not unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleWarning {
    pub joint: NodeId,
    pub name: String,
    pub scale: DVec3,
}

/// Everything normalization did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RigReport {
    pub baked_camera: Option<NodeId>,
    pub baked_joints: Vec<NodeId>,
    pub deleted_constraints: usize,
    pub severed_links: usize,
    pub scale_warnings: Vec<ScaleWarning>,
    pub cleaned_meshes: Vec<NodeId>,
    pub frozen_meshes: Vec<NodeId>,
    pub removed_namespaces: Vec<String>,
    pub kept_namespaces: Vec<String>,
    pub skipped: Vec<SkippedNode>,
}

/// Run all normalization steps.
///
/// Missing roots and per-node failures are recorded in the report's skipped
/// list and the remaining nodes carry on.
pub fn normalize_rig<S: HostScene + ?Sized>(
    scene: &mut S,
    request: &RigRequest,
    settings: &ConversionSettings,
) -> RigResult<RigReport> {
    let mut report = RigReport::default();

    if let Some(camera) = request.camera {
        match bake_transform(scene, camera, request.range) {
            Ok(_) => report.baked_camera = Some(camera),
            Err(e) => {
                log::warn!("Failed to bake camera {}: {}", camera, e);
                report
                    .skipped
                    .push(SkippedNode::new(&*scene, camera, Stage::Rig, e));
            }
        }
    }

    let rig_roots = resolve_roots(&*scene, &request.rig_roots, &mut report.skipped);
    let geometry_roots = resolve_roots(&*scene, &request.geometry_roots, &mut report.skipped);

    let joints = collect(&*scene, &rig_roots, KindTag::Joint)?;
    let joints = bake_joints(scene, &joints, request.skeletal_range(), &mut report.skipped);
    report.baked_joints = joints.clone();

    report.deleted_constraints = delete_constraints(scene, &rig_roots, &mut report.skipped)?;

    for &joint in &joints {
        match sever_non_curve_inputs(scene, joint) {
            Ok(severed) => report.severed_links += severed,
            Err(e) => {
                log::warn!("Failed to clean inputs on joint {}: {}", joint, e);
                report.skipped.push(SkippedNode::new(&*scene, joint, Stage::Rig, e));
            }
        }
    }

    report.scale_warnings = check_joint_scale(
        &*scene,
        &joints,
        request.range.start(),
        settings,
        &mut report.skipped,
    );

    let roots: Vec<NodeId> = geometry_roots.iter().chain(&rig_roots).copied().collect();
    let meshes = collect(&*scene, &roots, KindTag::Mesh)?;
    for &mesh in &meshes {
        match scene.delete_non_deformer_history(mesh) {
            Ok(()) => report.cleaned_meshes.push(mesh),
            Err(e) => report.skipped.push(SkippedNode::new(&*scene, mesh, Stage::Rig, e)),
        }
    }

    for &mesh in &meshes {
        match freeze_if_static(scene, mesh, request.range.start()) {
            Ok(true) => report.frozen_meshes.push(mesh),
            Ok(false) => {}
            Err(e) => {
                log::warn!("Failed to freeze {}: {}", mesh, e);
                report.skipped.push(SkippedNode::new(&*scene, mesh, Stage::Rig, e));
            }
        }
    }

    let (removed, kept) = strip_namespaces(scene, settings);
    report.removed_namespaces = removed;
    report.kept_namespaces = kept;

    log::info!(
        "Normalized rig: {} joints baked, {} constraints deleted, {} meshes frozen, {} namespaces removed",
        report.baked_joints.len(),
        report.deleted_constraints,
        report.frozen_meshes.len(),
        report.removed_namespaces.len()
    );
    Ok(report)
}

/// Roots that still exist. Missing ones are reported and dropped.
fn resolve_roots<S: HostScene + ?Sized>(
    scene: &S,
    roots: &[NodeId],
    skipped: &mut Vec<SkippedNode>,
) -> Vec<NodeId> {
    let mut resolved = Vec::with_capacity(roots.len());
    for &root in roots {
        if scene.contains(root) {
            resolved.push(root);
        } else {
            log::warn!("Rig normalization skipping missing root {}", root);
            skipped.push(SkippedNode::new(
                scene,
                root,
                Stage::Rig,
                SceneError::MissingNode(root),
            ));
        }
    }
    resolved
}

/// Nodes of `kind` under `roots` (roots included), without duplicates.
fn collect<S: HostScene + ?Sized>(scene: &S, roots: &[NodeId], kind: KindTag) -> SceneResult<Vec<NodeId>> {
    let mut nodes = Vec::new();
    for &root in roots {
        for node in scene.subtree_of_kind(root, kind)? {
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
    }
    Ok(nodes)
}

/// Bake all joints in one pass so each sample sees every constraint still
/// live. If the pass fails, joints are baked one at a time and the ones that
/// fail are skipped. Returns the joints that were baked.
fn bake_joints<S: HostScene + ?Sized>(
    scene: &mut S,
    joints: &[NodeId],
    range: BakeRange,
    skipped: &mut Vec<SkippedNode>,
) -> Vec<NodeId> {
    let mut ready = Vec::with_capacity(joints.len());
    for &joint in joints {
        match unlock_all(scene, joint) {
            Ok(()) => ready.push(joint),
            Err(e) => {
                log::warn!("Failed to unlock joint {}: {}", joint, e);
                skipped.push(SkippedNode::new(&*scene, joint, Stage::Rig, e));
            }
        }
    }
    if ready.is_empty() {
        return ready;
    }

    if let Err(e) = scene.bake_simulation(&ready, range) {
        log::warn!("Joint bake failed ({}), retrying joints one by one", e);
        let mut baked = Vec::with_capacity(ready.len());
        for joint in ready {
            match scene.bake_simulation(&[joint], range) {
                Ok(()) => baked.push(joint),
                Err(e) => {
                    log::warn!("Failed to bake joint {}: {}", joint, e);
                    skipped.push(SkippedNode::new(&*scene, joint, Stage::Rig, e));
                }
            }
        }
        ready = baked;
    }

    log::debug!(
        "Baked {} joints over {}..={}",
        ready.len(),
        range.start(),
        range.end()
    );
    ready
}

fn unlock_all<S: HostScene + ?Sized>(scene: &mut S, node: NodeId) -> SceneResult<()> {
    for channel in Channel::ALL {
        scene.unlock_channel(node, channel)?;
    }
    Ok(())
}

fn delete_constraints<S: HostScene + ?Sized>(
    scene: &mut S,
    roots: &[NodeId],
    skipped: &mut Vec<SkippedNode>,
) -> SceneResult<usize> {
    let constraints = collect(&*scene, roots, KindTag::Constraint)?;
    let mut deleted = 0;
    for constraint in constraints {
        // Deleting one constraint can take others with it.
        if !scene.contains(constraint) {
            continue;
        }
        match scene.delete_node(constraint) {
            Ok(()) => deleted += 1,
            Err(e) => {
                log::warn!("Failed to delete constraint {}: {}", constraint, e);
                skipped.push(SkippedNode::new(&*scene, constraint, Stage::Rig, e));
            }
        }
    }
    Ok(deleted)
}

/// Joints whose scale channels differ from 1 by more than the tolerance.
/// Joints whose scale cannot be read are added to `skipped`.
pub fn check_joint_scale<S: HostScene + ?Sized>(
    scene: &S,
    joints: &[NodeId],
    frame: Frame,
    settings: &ConversionSettings,
    skipped: &mut Vec<SkippedNode>,
) -> Vec<ScaleWarning> {
    let mut warnings = Vec::new();
    for &joint in joints {
        match joint_scale(scene, joint, frame) {
            Ok(scale) if (scale - DVec3::ONE).abs().max_element() > settings.joint_scale_tolerance => {
                let name = scene.node_name(joint).unwrap_or_else(|_| joint.to_string());
                log::warn!("Joint {} has non-unit scale {} at frame {}", name, scale, frame);
                warnings.push(ScaleWarning { joint, name, scale });
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("Failed to read scale of joint {}: {}", joint, e);
                skipped.push(SkippedNode::new(scene, joint, Stage::Rig, e));
            }
        }
    }
    warnings
}

fn joint_scale<S: HostScene + ?Sized>(scene: &S, joint: NodeId, frame: Frame) -> SceneResult<DVec3> {
    Ok(DVec3::new(
        scene.channel_value(joint, Channel::ScaleX, frame)?,
        scene.channel_value(joint, Channel::ScaleY, frame)?,
        scene.channel_value(joint, Channel::ScaleZ, frame)?,
    ))
}

/// Freeze a mesh unless it is skinned, sits above a joint or is animated.
fn freeze_if_static<S: HostScene + ?Sized>(scene: &mut S, mesh: NodeId, frame: Frame) -> SceneResult<bool> {
    if scene.is_skinned(mesh)? {
        return Ok(false);
    }
    for node in scene.descendants(mesh)? {
        if scene.node_kind(node)?.tag() == KindTag::Joint {
            return Ok(false);
        }
    }
    for channel in Channel::ALL {
        if !scene.channel_inputs(mesh, channel)?.is_empty() {
            log::debug!("Not freezing animated mesh {}", mesh);
            return Ok(false);
        }
    }
    scene.freeze_transform(mesh, frame)?;
    Ok(true)
}

/// Remove every unprotected namespace, deepest first. Returns
/// `(removed, kept)`.
pub fn strip_namespaces<S: HostScene + ?Sized>(
    scene: &mut S,
    settings: &ConversionSettings,
) -> (Vec<String>, Vec<String>) {
    let mut namespaces = scene.namespaces();
    namespaces.sort_by(|a, b| {
        let depth = |ns: &str| ns.matches(':').count();
        depth(b).cmp(&depth(a)).then_with(|| a.cmp(b))
    });

    let mut removed = Vec::new();
    let mut kept = Vec::new();
    for namespace in namespaces {
        if settings.is_protected_namespace(&namespace) {
            kept.push(namespace);
            continue;
        }
        if scene.namespace_has_referenced_nodes(&namespace) {
            log::warn!("Keeping namespace '{}': it holds referenced nodes", namespace);
            kept.push(namespace);
            continue;
        }
        match scene.remove_namespace(&namespace) {
            Ok(()) => removed.push(namespace),
            Err(e) => {
                log::warn!("Keeping namespace '{}': {}", namespace, e);
                kept.push(namespace);
            }
        }
    }
    (removed, kept)
}
