//! The destructive baked-package conversion.
//!
//! [`convert_for_package`] classifies geometry, bakes driven nodes,
//! synthesizes morph targets and normalizes the rig inside a
//! [`Transaction`], hands the resulting [`PackageManifest`] to a writer while
//! every artifact is still alive, and then rolls the scene back.

use std::fmt;

use bakeshift_math::{BakeRange, Frame};
use serde::Serialize;

use crate::bake::bake_transforms;
use crate::classify::classify;
use crate::morph::{synthesize_all, MorphTarget};
use crate::report::{ClassCounts, SkippedNode};
use crate::rig::{normalize_rig, RigError, RigReport, RigRequest};
use crate::scene::{HostScene, NodeId};
use crate::settings::ConversionSettings;
use crate::transaction::{Artifacts, RollbackReport, Transaction};

/// Name the package camera is exported under.
pub const CAMERA_EXPORT_NAME: &str = "main_cam";

/// Edit boundary name used by the package conversion.
const BOUNDARY_NAME: &str = "bakeshift_package";

/// What to convert.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub geometry_roots: Vec<NodeId>,
    pub rig_roots: Vec<NodeId>,
    pub camera: Option<NodeId>,
    pub range: BakeRange,

    /// Extra frame holding a reference pose for the skeletal bake
    pub reference_frame: Option<Frame>,
}

impl ConversionRequest {
    pub fn new(range: BakeRange) -> Self {
        Self {
            geometry_roots: Vec::new(),
            rig_roots: Vec::new(),
            camera: None,
            range,
            reference_frame: None,
        }
    }

    fn rig_request(&self) -> RigRequest {
        RigRequest {
            camera: self.camera,
            rig_roots: self.rig_roots.clone(),
            geometry_roots: self.geometry_roots.clone(),
            range: self.range,
            reference_frame: self.reference_frame,
        }
    }
}

/// Everything a package writer needs. Handles are only valid until the
/// surrounding transaction ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageManifest {
    pub range: (Frame, Frame),

    /// Export-ready geometry: static leaves, baked driven leaves and morph bases
    pub nodes: Vec<NodeId>,

    pub morphs: Vec<MorphTarget>,
    pub rig_roots: Vec<NodeId>,
    pub camera: Option<NodeId>,
}

impl PackageManifest {
    /// Name the camera must carry in the written package.
    pub fn camera_export_name(&self) -> Option<&'static str> {
        self.camera.map(|_| CAMERA_EXPORT_NAME)
    }
}

/// Receives the manifest while the converted scene is still live.
pub trait PackageWriter<S: HostScene + ?Sized> {
    type Error: fmt::Display;

    fn write_package(&mut self, scene: &S, manifest: &PackageManifest) -> Result<(), Self::Error>;
}

impl<S, F, E> PackageWriter<S> for F
where
    S: HostScene + ?Sized,
    F: FnMut(&S, &PackageManifest) -> Result<(), E>,
    E: fmt::Display,
{
    type Error = E;

    fn write_package(&mut self, scene: &S, manifest: &PackageManifest) -> Result<(), E> {
        self(scene, manifest)
    }
}

/// Overall outcome of a conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionStatus {
    Succeeded,
    Partial { skipped: usize },
    Failed { reason: String },
}

impl ConversionStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, ConversionStatus::Failed { .. })
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionStatus::Succeeded => f.write_str("succeeded"),
            ConversionStatus::Partial { skipped } => {
                write!(f, "succeeded with {} nodes skipped", skipped)
            }
            ConversionStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// What a conversion produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub status: ConversionStatus,

    /// Export-ready nodes as handed to the writer
    pub nodes: Vec<NodeId>,

    pub counts: ClassCounts,
    pub morph_targets: usize,
    pub skipped: Vec<SkippedNode>,
    pub rig: Option<RigReport>,

    /// How the scene was restored, when a transaction was opened
    pub rollback: Option<RollbackReport>,
}

impl ConversionResult {
    fn failed(reason: impl fmt::Display) -> Self {
        Self {
            status: ConversionStatus::Failed {
                reason: reason.to_string(),
            },
            nodes: Vec::new(),
            counts: ClassCounts::default(),
            morph_targets: 0,
            skipped: Vec::new(),
            rig: None,
            rollback: None,
        }
    }
}

/// The scene edits of a package conversion, without the transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPackage {
    pub manifest: PackageManifest,
    pub counts: ClassCounts,
    pub skipped: Vec<SkippedNode>,
    pub rig: RigReport,
}

/// Edit the scene into an exportable state, tracking every artifact.
///
/// The caller is responsible for restoring the scene afterwards.
pub fn prepare_package<S: HostScene + ?Sized>(
    scene: &mut S,
    request: &ConversionRequest,
    settings: &ConversionSettings,
    artifacts: &mut Artifacts,
) -> Result<PreparedPackage, RigError> {
    let classification = classify(&*scene, &request.geometry_roots, request.range, settings);
    let counts = classification.counts();
    let mut skipped = classification.skipped;

    let (baked, bake_skipped) = bake_transforms(scene, &classification.driven, request.range);
    skipped.extend(bake_skipped);

    let (morphs, morph_skipped) = synthesize_all(
        scene,
        &classification.vertex_deformed,
        request.range,
        settings,
        artifacts,
    );
    skipped.extend(morph_skipped);

    let rig = normalize_rig(scene, &request.rig_request(), settings)?;
    // A missing geometry root is already reported by classification.
    for entry in &rig.skipped {
        if !skipped.iter().any(|known| known.node == entry.node) {
            skipped.push(entry.clone());
        }
    }

    let mut nodes = classification.static_nodes;
    nodes.extend(baked);
    nodes.extend(morphs.iter().map(|morph| morph.base));
    nodes.retain(|&node| scene.contains(node));

    let manifest = PackageManifest {
        range: request.range.into(),
        nodes,
        morphs,
        rig_roots: request.rig_roots.clone(),
        camera: request.camera,
    };

    Ok(PreparedPackage {
        manifest,
        counts,
        skipped,
        rig,
    })
}

/// Convert for the baked-package writer and restore the scene.
///
/// Never fails outright: problems are folded into the returned status. The
/// node handles in the result refer to the converted scene and no longer
/// resolve once this returns.
pub fn convert_for_package<S, W>(
    scene: &mut S,
    request: &ConversionRequest,
    settings: &ConversionSettings,
    writer: &mut W,
) -> ConversionResult
where
    S: HostScene + ?Sized,
    W: PackageWriter<S> + ?Sized,
{
    let mut transaction = match Transaction::begin(scene, BOUNDARY_NAME) {
        Ok(transaction) => transaction,
        Err(e) => {
            log::error!("Package conversion could not start: {}", e);
            return ConversionResult::failed(e);
        }
    };

    let prepared = {
        let (scene, artifacts) = transaction.parts();
        prepare_package(scene, request, settings, artifacts)
    };

    let mut result = match prepared {
        Ok(prepared) => {
            let write = writer.write_package(transaction.scene(), &prepared.manifest);
            let status = match write {
                Err(e) => {
                    log::error!("Package writer failed: {}", e);
                    ConversionStatus::Failed {
                        reason: format!("writer failed: {e}"),
                    }
                }
                Ok(()) if prepared.skipped.is_empty() => ConversionStatus::Succeeded,
                Ok(()) => ConversionStatus::Partial {
                    skipped: prepared.skipped.len(),
                },
            };
            ConversionResult {
                status,
                nodes: prepared.manifest.nodes,
                counts: prepared.counts,
                morph_targets: prepared.manifest.morphs.iter().map(MorphTarget::len).sum(),
                skipped: prepared.skipped,
                rig: Some(prepared.rig),
                rollback: None,
            }
        }
        Err(e) => {
            log::error!("Package conversion failed: {}", e);
            ConversionResult::failed(e)
        }
    };

    let rollback = transaction.rollback();
    if let Some(reason) = &rollback.rollback_error {
        result.status = ConversionStatus::Failed {
            reason: format!("rollback failed: {reason}"),
        };
    }
    result.rollback = Some(rollback);

    log::info!("Package conversion {}", result.status);
    result
}
