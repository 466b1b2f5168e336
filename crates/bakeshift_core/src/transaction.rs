//! Scoped scene mutation.
//!
//! A [`Transaction`] opens an edit boundary on the host and owns the list of
//! every artifact created under it. However the transaction ends (explicit
//! [`Transaction::rollback`], early return, or unwinding) the boundary is
//! rolled back and any tracked artifact that survived the rollback is
//! deleted. Rollback problems are logged and reported, never raised.

use bakeshift_math::Frame;
use serde::Serialize;
use thiserror::Error;

use crate::scene::{BoundaryId, DeformerId, HostScene, NodeId, SceneError};

/// Errors that can occur when starting a transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("failed to open edit boundary '{name}': {source}")]
    Begin { name: String, source: SceneError },
}

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Something created in the scene during conversion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Artifact {
    Node(NodeId),
    Deformer(DeformerId),
}

/// Owned list of artifacts, in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts {
    items: Vec<Artifact>,
}

/// What [`Artifacts::release`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReleaseReport {
    /// Artifacts that still existed and were deleted
    pub removed: Vec<Artifact>,

    /// Artifacts that could not be deleted
    pub failures: Vec<(Artifact, String)>,
}

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, artifact: Artifact) {
        self.items.push(artifact);
    }

    pub fn track_node(&mut self, node: NodeId) -> NodeId {
        self.track(Artifact::Node(node));
        node
    }

    pub fn track_deformer(&mut self, deformer: DeformerId) -> DeformerId {
        self.track(Artifact::Deformer(deformer));
        deformer
    }

    /// Stop tracking an artifact that was deleted on purpose.
    pub fn forget(&mut self, artifact: Artifact) {
        self.items.retain(|item| *item != artifact);
    }

    /// Take over every artifact from `other`.
    pub fn extend(&mut self, other: Artifacts) {
        self.items.extend(other.items);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, artifact: Artifact) -> bool {
        self.items.contains(&artifact)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.items.iter()
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.items
            .iter()
            .filter_map(|item| match item {
                Artifact::Node(node) => Some(*node),
                Artifact::Deformer(_) => None,
            })
            .collect()
    }

    /// Delete every tracked artifact that still exists, newest first, and
    /// empty the list.
    pub fn release<S: HostScene + ?Sized>(&mut self, scene: &mut S) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        for artifact in self.items.drain(..).rev() {
            let outcome = match artifact {
                Artifact::Node(node) if scene.contains(node) => scene.delete_node(node),
                Artifact::Deformer(deformer) if scene.deformer_exists(deformer) => {
                    scene.delete_deformer(deformer)
                }
                _ => continue,
            };
            match outcome {
                Ok(()) => report.removed.push(artifact),
                Err(e) => {
                    log::error!("Failed to delete artifact {:?}: {}", artifact, e);
                    report.failures.push((artifact, e.to_string()));
                }
            }
        }

        report
    }
}

/// Outcome of ending a transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollbackReport {
    /// The host's rollback completed
    pub rolled_back: bool,

    /// Why the host's rollback failed, if it did
    pub rollback_error: Option<String>,

    /// Artifacts still alive after the rollback, deleted by the cleanup pass
    pub leaked: Vec<Artifact>,

    pub cleanup_failures: Vec<String>,
}

impl RollbackReport {
    /// True if the scene is back where it started with nothing left over.
    pub fn is_clean(&self) -> bool {
        self.rolled_back && self.leaked.is_empty() && self.cleanup_failures.is_empty()
    }
}

/// Scope guard around a destructive edit of the host scene.
pub struct Transaction<'a, S: HostScene + ?Sized> {
    scene: &'a mut S,
    name: String,
    boundary: BoundaryId,
    saved_frame: Frame,
    artifacts: Artifacts,
    finished: bool,
}

impl<'a, S: HostScene + ?Sized> Transaction<'a, S> {
    /// Open a named edit boundary on `scene`.
    pub fn begin(scene: &'a mut S, name: &str) -> TransactionResult<Self> {
        let saved_frame = scene.current_frame();
        let boundary = scene
            .open_edit_boundary(name)
            .map_err(|source| TransactionError::Begin {
                name: name.to_string(),
                source,
            })?;
        log::debug!("Opened edit boundary '{}'", name);

        Ok(Self {
            scene,
            name: name.to_string(),
            boundary,
            saved_frame,
            artifacts: Artifacts::new(),
            finished: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scene(&self) -> &S {
        &*self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut *self.scene
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> &mut Artifacts {
        &mut self.artifacts
    }

    /// The scene and the artifact list together, for code that creates
    /// artifacts as it edits.
    pub fn parts(&mut self) -> (&mut S, &mut Artifacts) {
        (&mut *self.scene, &mut self.artifacts)
    }

    /// Roll back and clean up now, returning what happened.
    pub fn rollback(mut self) -> RollbackReport {
        self.restore()
    }

    fn restore(&mut self) -> RollbackReport {
        self.finished = true;
        let mut report = RollbackReport::default();

        if let Err(e) = self.scene.close_edit_boundary(self.boundary) {
            log::error!("Failed to close edit boundary '{}': {}", self.name, e);
        }

        match self.scene.rollback(self.boundary) {
            Ok(()) => report.rolled_back = true,
            Err(e) => {
                log::error!("Rollback of '{}' failed: {}", self.name, e);
                report.rollback_error = Some(e.to_string());
            }
        }

        let release = self.artifacts.release(&mut *self.scene);
        if !release.removed.is_empty() {
            log::warn!(
                "Removed {} artifacts that survived rollback of '{}'",
                release.removed.len(),
                self.name
            );
        }
        report.leaked = release.removed;
        report.cleanup_failures = release
            .failures
            .into_iter()
            .map(|(artifact, reason)| format!("{artifact:?}: {reason}"))
            .collect();

        self.scene.set_current_frame(self.saved_frame);

        if report.is_clean() {
            log::info!("Rolled back '{}'", self.name);
        } else {
            log::error!("Rollback of '{}' was incomplete: {:?}", self.name, report);
        }
        report
    }
}

impl<S: HostScene + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::{topology, Channel, MemoryScene, RollbackFault};
    use pretty_assertions::assert_eq;

    fn scene_with_cube() -> (MemoryScene, NodeId) {
        let mut scene = MemoryScene::new("test");
        let root = scene.add_transform("geo", None).unwrap();
        scene.add_mesh("cube", Some(root), Mesh::cuboid(1.0, 1.0, 1.0)).unwrap();
        (scene, root)
    }

    #[test]
    fn test_rollback_restores_topology_and_frame() {
        let (mut scene, root) = scene_with_cube();
        scene.set_current_frame(7);
        let before = topology(&scene, &[root]).unwrap();
        let count = scene.node_count();

        let mut txn = Transaction::begin(&mut scene, "edit").unwrap();
        {
            let (scene, artifacts) = txn.parts();
            let group = artifacts.track_node(scene.create_group("bks_grp", Some(root)).unwrap());
            scene.set_channel(group, Channel::TranslateX, 3.0).unwrap();
            scene.set_current_frame(50);
        }
        let report = txn.rollback();

        assert!(report.is_clean());
        assert_eq!(scene.node_count(), count);
        assert_eq!(topology(&scene, &[root]).unwrap(), before);
        assert_eq!(scene.current_frame(), 7);
    }

    #[test]
    fn test_drop_rolls_back() {
        let (mut scene, root) = scene_with_cube();
        let count = scene.node_count();

        {
            let mut txn = Transaction::begin(&mut scene, "edit").unwrap();
            txn.scene_mut().delete_node(root).unwrap();
        }

        assert_eq!(scene.node_count(), count);
        assert!(scene.contains(root));
    }

    #[test]
    fn test_leaked_artifacts_are_deleted() {
        let (mut scene, root) = scene_with_cube();
        scene.inject_rollback_fault(RollbackFault::LeavesCreatedNodes);
        let count = scene.node_count();

        let mut txn = Transaction::begin(&mut scene, "edit").unwrap();
        {
            let (scene, artifacts) = txn.parts();
            let group = artifacts.track_node(scene.create_group("bks_grp", None).unwrap());
            artifacts.track_node(scene.create_group("bks_inner", Some(group)).unwrap());
            artifacts.track_node(scene.create_group("bks_under_root", Some(root)).unwrap());
        }
        let report = txn.rollback();

        assert!(report.rolled_back);
        assert_eq!(report.leaked.len(), 3);
        assert!(!report.is_clean());
        assert_eq!(scene.node_count(), count);
    }

    #[test]
    fn test_failed_rollback_is_reported_not_raised() {
        let (mut scene, _) = scene_with_cube();
        scene.inject_rollback_fault(RollbackFault::Fails);
        let count = scene.node_count();

        let mut txn = Transaction::begin(&mut scene, "edit").unwrap();
        {
            let (scene, artifacts) = txn.parts();
            artifacts.track_node(scene.create_group("bks_grp", None).unwrap());
        }
        let report = txn.rollback();

        assert!(!report.rolled_back);
        assert!(report.rollback_error.is_some());
        assert_eq!(scene.node_count(), count);
    }

    #[test]
    fn test_release_skips_missing_artifacts() {
        let mut scene = MemoryScene::new("test");
        let mut artifacts = Artifacts::new();
        let a = artifacts.track_node(scene.create_group("a", None).unwrap());
        let b = artifacts.track_node(scene.create_group("b", None).unwrap());
        scene.delete_node(a).unwrap();

        let report = artifacts.release(&mut scene);

        assert_eq!(report.removed, vec![Artifact::Node(b)]);
        assert!(artifacts.is_empty());
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn test_forget_and_extend() {
        let mut artifacts = Artifacts::new();
        artifacts.track_node(NodeId(1));
        let mut other = Artifacts::new();
        other.track_deformer(DeformerId(2));
        other.track_node(NodeId(3));
        artifacts.extend(other);
        artifacts.forget(Artifact::Node(NodeId(1)));

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts.nodes(), vec![NodeId(3)]);
        assert!(artifacts.contains(Artifact::Deformer(DeformerId(2))));
    }
}
