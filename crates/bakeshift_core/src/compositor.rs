//! Per-frame transform tracks for a 2D compositor's 3D layers.
//!
//! Read-only: the scene is sampled through the projector and never edited.

use bakeshift_math::{project, BakeRange, CanvasSettings, Frame, ProjectedTransform};
use serde::Serialize;

use crate::report::{SkippedNode, Stage};
use crate::scene::{CameraInfo, HostScene, KindTag, NodeId, NodeKind, SceneResult};

/// Millimetres per inch, for film-back conversion.
const MM_PER_INCH: f64 = 25.4;

/// One sampled frame of a track.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct CompositorKey {
    pub frame: Frame,

    #[serde(flatten)]
    pub transform: ProjectedTransform,
}

/// A node's projected motion plus its static metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositorTrack {
    pub node: NodeId,
    pub name: String,
    pub kind: KindTag,

    /// Camera zoom in canvas pixels, for camera nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,

    pub keys: Vec<CompositorKey>,
}

/// Compositor zoom for a camera: focal length scaled from film back to canvas width.
pub fn camera_zoom(info: &CameraInfo, canvas: &CanvasSettings) -> f64 {
    if info.horizontal_aperture <= 0.0 {
        return 0.0;
    }
    info.focal_length * canvas.width / (info.horizontal_aperture * MM_PER_INCH)
}

/// Sample one node at every frame of `range`.
pub fn sample_track<S: HostScene + ?Sized>(
    scene: &S,
    node: NodeId,
    range: BakeRange,
    canvas: &CanvasSettings,
) -> SceneResult<CompositorTrack> {
    let kind = scene.node_kind(node)?;
    let zoom = match kind {
        NodeKind::Camera(info) => Some(camera_zoom(&info, canvas)),
        _ => None,
    };

    let mut keys = Vec::with_capacity(range.frame_count());
    for frame in range.frames() {
        let world = scene.world_matrix(node, frame)?;
        let local = scene.local_matrix(node, frame)?;
        keys.push(CompositorKey {
            frame,
            transform: project(&world, &local, canvas),
        });
    }

    Ok(CompositorTrack {
        node,
        name: scene.node_name(node)?,
        kind: kind.tag(),
        zoom,
        keys,
    })
}

/// Sample several nodes. Nodes that cannot be read are skipped.
pub fn sample_tracks<S: HostScene + ?Sized>(
    scene: &S,
    nodes: &[NodeId],
    range: BakeRange,
    canvas: &CanvasSettings,
) -> (Vec<CompositorTrack>, Vec<SkippedNode>) {
    let mut tracks = Vec::with_capacity(nodes.len());
    let mut skipped = Vec::new();

    for &node in nodes {
        match sample_track(scene, node, range, canvas) {
            Ok(track) => tracks.push(track),
            Err(e) => {
                log::warn!("Skipping compositor track for {}: {}", node, e);
                skipped.push(SkippedNode::new(scene, node, Stage::Compositor, e));
            }
        }
    }

    log::info!("Sampled {} compositor tracks over {} frames", tracks.len(), range.frame_count());
    (tracks, skipped)
}
