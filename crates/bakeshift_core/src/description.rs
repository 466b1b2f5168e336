//! JSON scene descriptions.
//!
//! A description builds a [`MemoryScene`] for the binary and for tests:
//!
//! ```json
//! {
//!   "range": [1, 24],
//!   "nodes": [
//!     { "name": "geo", "type": "transform", "children": [
//!       { "name": "flag", "type": "mesh",
//!         "shape": { "grid": { "columns": 4, "rows": 2 } },
//!         "vertex_cache": { "wave": { "amplitude": 0.5, "period": 12, "start": 1, "end": 24 } } }
//!     ] },
//!     { "name": "spinner", "type": "locator",
//!       "channels": { "ry": { "expression": { "type": "linear", "rate": 15, "offset": 0 } } } }
//!   ],
//!   "constraints": [ { "driver": "spinner", "driven": "flag", "kind": "point" } ],
//!   "roles": { "geometry_roots": ["geo"], "camera": null }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use bakeshift_math::{BakeRange, DVec3, Frame, RangeError, RotateOrder, TransformAttrs, Trs};
use serde::Deserialize;
use thiserror::Error;

use crate::mesh::Mesh;
use crate::pipeline::ConversionRequest;
use crate::scene::{
    AnimCurve, CameraInfo, Channel, ConstraintKind, Expression, HistoryItem, HostScene, Key,
    MemoryScene, NodeId, SceneError, TransformCache, VertexCache,
};

/// Errors that can occur while loading a scene description.
#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Invalid frame range: {0}")]
    Range(#[from] RangeError),

    #[error("Unknown node '{name}' referenced by {context}")]
    UnknownNode { name: String, context: String },

    #[error("Duplicate node name '{0}'")]
    DuplicateName(String),
}

/// Result type for description loading.
pub type DescriptionResult<T> = Result<T, DescriptionError>;

#[derive(Debug, Deserialize)]
struct DescriptionSpec {
    range: BakeRange,

    #[serde(default)]
    current_frame: Option<Frame>,

    #[serde(default)]
    namespaces: Vec<String>,

    #[serde(default)]
    nodes: Vec<NodeSpec>,

    #[serde(default)]
    constraints: Vec<ConstraintSpec>,

    #[serde(default)]
    roles: RolesSpec,
}

#[derive(Debug, Deserialize)]
struct NodeSpec {
    name: String,

    #[serde(flatten)]
    kind: KindSpec,

    #[serde(default)]
    translate: Option<DVec3>,
    #[serde(default)]
    rotate: Option<DVec3>,
    #[serde(default)]
    scale: Option<DVec3>,
    #[serde(default)]
    rotate_order: Option<RotateOrder>,
    #[serde(default)]
    rotate_pivot: Option<DVec3>,
    #[serde(default)]
    scale_pivot: Option<DVec3>,

    #[serde(default)]
    channels: BTreeMap<Channel, ChannelSpec>,

    #[serde(default)]
    locked: Vec<Channel>,

    #[serde(default)]
    referenced: bool,

    #[serde(default)]
    history: Vec<HistoryItem>,

    #[serde(default)]
    children: Vec<NodeSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KindSpec {
    Transform,
    Locator,
    Joint,
    Camera {
        #[serde(default)]
        focal_length: Option<f64>,
        #[serde(default)]
        horizontal_aperture: Option<f64>,
    },
    Mesh {
        shape: ShapeSpec,
        #[serde(default)]
        vertex_cache: Option<VertexCacheSpec>,
        #[serde(default)]
        skinned: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ShapeSpec {
    Cuboid {
        size: DVec3,
    },
    Grid {
        columns: u32,
        rows: u32,
    },
    Points {
        positions: Vec<DVec3>,
        #[serde(default)]
        indices: Vec<u32>,
    },
}

impl ShapeSpec {
    fn build(&self) -> Mesh {
        match self {
            ShapeSpec::Cuboid { size } => Mesh::cuboid(size.x, size.y, size.z),
            ShapeSpec::Grid { columns, rows } => Mesh::grid(*columns, *rows),
            ShapeSpec::Points { positions, indices } => Mesh::new(positions.clone(), indices.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CacheFrameSpec {
    frame: Frame,
    positions: Vec<DVec3>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum VertexCacheSpec {
    /// Explicit per-frame positions
    Frames(Vec<CacheFrameSpec>),

    /// Travelling sine wave along local Y, phased by each vertex's X
    Wave {
        amplitude: f64,
        period: f64,
        start: Frame,
        end: Frame,
    },
}

impl VertexCacheSpec {
    fn build(&self, rest: &Mesh) -> DescriptionResult<VertexCache> {
        let frames = match self {
            VertexCacheSpec::Frames(frames) => frames
                .iter()
                .map(|spec| (spec.frame, spec.positions.clone()))
                .collect(),
            VertexCacheSpec::Wave {
                amplitude,
                period,
                start,
                end,
            } => {
                let range = BakeRange::new(*start, *end)?;
                range
                    .frames()
                    .map(|frame| (frame, wave(rest, *amplitude, *period, frame)))
                    .collect()
            }
        };
        Ok(VertexCache { frames })
    }
}

fn wave(rest: &Mesh, amplitude: f64, period: f64, frame: Frame) -> Vec<DVec3> {
    if period == 0.0 {
        return rest.positions.clone();
    }
    let phase = std::f64::consts::TAU * f64::from(frame) / period;
    rest.positions
        .iter()
        .map(|p| *p + DVec3::Y * amplitude * (phase + p.x).sin())
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ChannelSpec {
    Value(f64),
    Curve(Vec<Key>),
    Expression(Expression),
    /// `[frame, value]` samples
    Cache(Vec<(Frame, f64)>),
}

#[derive(Debug, Deserialize)]
struct ConstraintSpec {
    driver: String,
    driven: String,
    kind: ConstraintKind,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RolesSpec {
    geometry_roots: Vec<String>,
    rig_roots: Vec<String>,
    camera: Option<String>,
    reference_frame: Option<Frame>,
}

/// Nodes the description assigns to each conversion role.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneRoles {
    pub geometry_roots: Vec<NodeId>,
    pub rig_roots: Vec<NodeId>,
    pub camera: Option<NodeId>,
    pub range: BakeRange,
    pub reference_frame: Option<Frame>,
}

impl SceneRoles {
    pub fn conversion_request(&self) -> ConversionRequest {
        ConversionRequest {
            geometry_roots: self.geometry_roots.clone(),
            rig_roots: self.rig_roots.clone(),
            camera: self.camera,
            range: self.range,
            reference_frame: self.reference_frame,
        }
    }
}

/// A loaded description.
#[derive(Debug)]
pub struct LoadedScene {
    pub scene: MemoryScene,
    pub roles: SceneRoles,
}

/// Load a scene description from a JSON file.
pub fn load_description<P: AsRef<Path>>(path: P) -> DescriptionResult<LoadedScene> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");
    load_description_from_str(&content, name)
}

/// Load a scene description from a JSON string (useful for testing).
pub fn load_description_from_str(content: &str, name: &str) -> DescriptionResult<LoadedScene> {
    let spec: DescriptionSpec = serde_json::from_str(content)?;

    let mut builder = SceneBuilder::new(name);
    for namespace in &spec.namespaces {
        builder.scene.add_namespace(namespace);
    }
    for node in &spec.nodes {
        builder.add_node(node, None)?;
    }
    for constraint in &spec.constraints {
        let driver = builder.lookup(&constraint.driver, "a constraint")?;
        let driven = builder.lookup(&constraint.driven, "a constraint")?;
        builder
            .scene
            .create_constraint(driver, driven, constraint.kind)?;
    }

    let roles = SceneRoles {
        geometry_roots: builder.lookup_all(&spec.roles.geometry_roots, "geometry_roots")?,
        rig_roots: builder.lookup_all(&spec.roles.rig_roots, "rig_roots")?,
        camera: spec
            .roles
            .camera
            .as_deref()
            .map(|name| builder.lookup(name, "camera"))
            .transpose()?,
        range: spec.range,
        reference_frame: spec.roles.reference_frame,
    };

    let mut scene = builder.scene;
    scene.set_current_frame(spec.current_frame.unwrap_or(spec.range.start()));
    log::info!(
        "Loaded scene '{}' with {} nodes over {}..={}",
        name,
        scene.node_count(),
        spec.range.start(),
        spec.range.end()
    );
    Ok(LoadedScene { scene, roles })
}

struct SceneBuilder {
    scene: MemoryScene,
}

impl SceneBuilder {
    fn new(name: &str) -> Self {
        Self {
            scene: MemoryScene::new(name),
        }
    }

    fn lookup(&self, name: &str, context: &str) -> DescriptionResult<NodeId> {
        self.scene
            .find_node(name)
            .ok_or_else(|| DescriptionError::UnknownNode {
                name: name.to_string(),
                context: context.to_string(),
            })
    }

    fn lookup_all(&self, names: &[String], context: &str) -> DescriptionResult<Vec<NodeId>> {
        names.iter().map(|name| self.lookup(name, context)).collect()
    }

    fn add_node(&mut self, spec: &NodeSpec, parent: Option<NodeId>) -> DescriptionResult<NodeId> {
        if self.scene.find_node(&spec.name).is_some() {
            return Err(DescriptionError::DuplicateName(spec.name.clone()));
        }

        let scene = &mut self.scene;
        let name = spec.name.as_str();
        let node = match &spec.kind {
            KindSpec::Transform => scene.add_transform(name, parent)?,
            KindSpec::Locator => scene.add_locator(name, parent)?,
            KindSpec::Joint => scene.add_joint(name, parent)?,
            KindSpec::Camera {
                focal_length,
                horizontal_aperture,
            } => {
                let defaults = CameraInfo::default();
                let info = CameraInfo {
                    focal_length: focal_length.unwrap_or(defaults.focal_length),
                    horizontal_aperture: horizontal_aperture.unwrap_or(defaults.horizontal_aperture),
                };
                scene.add_camera(name, parent, info)?
            }
            KindSpec::Mesh {
                shape,
                vertex_cache,
                skinned,
            } => {
                let mesh = shape.build();
                let cache = vertex_cache
                    .as_ref()
                    .map(|cache| cache.build(&mesh))
                    .transpose()?;
                let node = scene.add_mesh(name, parent, mesh)?;
                if let Some(cache) = cache {
                    scene.set_vertex_cache(node, cache)?;
                }
                scene.set_skinned(node, *skinned)?;
                node
            }
        };

        let trs = Trs {
            translate: spec.translate.unwrap_or(Trs::IDENTITY.translate),
            rotate: spec.rotate.unwrap_or(Trs::IDENTITY.rotate),
            scale: spec.scale.unwrap_or(Trs::IDENTITY.scale),
        };
        scene.set_trs(node, &trs)?;

        let defaults = TransformAttrs::default();
        scene.set_transform_attrs(
            node,
            TransformAttrs {
                rotate_order: spec.rotate_order.unwrap_or(defaults.rotate_order),
                rotate_pivot: spec.rotate_pivot.unwrap_or(defaults.rotate_pivot),
                scale_pivot: spec.scale_pivot.unwrap_or(defaults.scale_pivot),
            },
        )?;

        for (&channel, channel_spec) in &spec.channels {
            match channel_spec {
                ChannelSpec::Value(value) => scene.set_channel(node, channel, *value)?,
                ChannelSpec::Curve(keys) => {
                    scene.connect_curve(node, channel, AnimCurve::from_keys(keys.iter().copied()))?;
                }
                ChannelSpec::Expression(expression) => {
                    scene.connect_expression(node, channel, expression.clone())?;
                }
                ChannelSpec::Cache(samples) => {
                    let cache = TransformCache {
                        samples: samples.iter().copied().collect(),
                    };
                    scene.connect_cache(node, channel, cache)?;
                }
            }
        }

        for &channel in &spec.locked {
            scene.lock_channel(node, channel)?;
        }
        scene.set_referenced(node, spec.referenced)?;
        for item in &spec.history {
            scene.add_history(node, item.clone())?;
        }

        for child in &spec.children {
            self.add_node(child, Some(node))?;
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, NodeClass};
    use crate::scene::{KindTag, SourceKind};
    use crate::settings::ConversionSettings;

    const SHOT: &str = r#"{
        "range": [1, 12],
        "namespaces": ["UI"],
        "nodes": [
            { "name": "geo", "type": "transform", "children": [
                { "name": "crate", "type": "mesh",
                  "shape": { "cuboid": { "size": [2, 2, 2] } },
                  "translate": [0, 1, 0] },
                { "name": "flag", "type": "mesh",
                  "shape": { "grid": { "columns": 3, "rows": 1 } },
                  "vertex_cache": { "wave": { "amplitude": 0.5, "period": 12, "start": 1, "end": 12 } } },
                { "name": "lamp", "type": "locator" }
            ] },
            { "name": "target", "type": "locator",
              "channels": {
                  "tx": { "curve": [ { "frame": 1, "value": 0 }, { "frame": 12, "value": 11 } ] },
                  "ry": { "expression": { "type": "linear", "rate": 15, "offset": 0 } },
                  "tz": { "cache": [[1, 0.0], [6, 2.5]] },
                  "sy": { "value": 2 }
              },
              "locked": ["ry"] },
            { "name": "char:rig", "type": "transform", "children": [
                { "name": "char:hip", "type": "joint", "referenced": true }
            ] },
            { "name": "shotCam", "type": "camera", "focal_length": 50 }
        ],
        "constraints": [ { "driver": "target", "driven": "lamp", "kind": "parent" } ],
        "roles": {
            "geometry_roots": ["geo"],
            "rig_roots": ["char:rig"],
            "camera": "shotCam",
            "reference_frame": 0
        }
    }"#;

    #[test]
    fn test_load_shot() {
        let loaded = load_description_from_str(SHOT, "shot").unwrap();
        let scene = &loaded.scene;

        let target = scene.find_node("target").unwrap();
        assert_eq!(scene.channel_value(target, Channel::TranslateX, 12).unwrap(), 11.0);
        assert_eq!(scene.channel_value(target, Channel::RotateY, 2).unwrap(), 30.0);
        assert_eq!(scene.channel_value(target, Channel::TranslateZ, 7).unwrap(), 2.5);
        assert_eq!(scene.channel_value(target, Channel::ScaleY, 1).unwrap(), 2.0);
        assert!(scene.channel_flags(target, Channel::RotateY).unwrap().0);
        let inputs = scene.channel_inputs(target, Channel::TranslateZ).unwrap();
        assert_eq!(inputs[0].kind, SourceKind::Cache);

        let camera = loaded.roles.camera.unwrap();
        match scene.node_kind(camera).unwrap() {
            crate::scene::NodeKind::Camera(info) => {
                assert_eq!(info.focal_length, 50.0);
                assert_eq!(info.horizontal_aperture, CameraInfo::default().horizontal_aperture);
            }
            other => panic!("expected a camera, got {other:?}"),
        }

        assert_eq!(scene.current_frame(), 1);
        assert!(scene.namespaces().contains(&"char".to_string()));
        assert!(scene.namespaces().contains(&"UI".to_string()));
        assert!(scene.namespace_has_referenced_nodes("char"));
    }

    #[test]
    fn test_loaded_roles_classify() {
        let loaded = load_description_from_str(SHOT, "shot").unwrap();
        let request = loaded.roles.conversion_request();
        assert_eq!(request.reference_frame, Some(0));
        assert_eq!(loaded.roles.rig_roots.len(), 1);

        let classification = classify(
            &loaded.scene,
            &request.geometry_roots,
            request.range,
            &ConversionSettings::default(),
        );

        let find = |name| loaded.scene.find_node(name).unwrap();
        assert_eq!(classification.class_of(find("crate")), Some(NodeClass::Static));
        assert_eq!(classification.class_of(find("flag")), Some(NodeClass::VertexDeformed));
        assert_eq!(classification.class_of(find("lamp")), Some(NodeClass::Driven));
    }

    #[test]
    fn test_constraint_node_created() {
        let loaded = load_description_from_str(SHOT, "shot").unwrap();
        let lamp = loaded.scene.find_node("lamp").unwrap();
        let constraints = loaded.scene.subtree_of_kind(lamp, KindTag::Constraint).unwrap();
        assert_eq!(constraints.len(), 1);
    }

    #[test]
    fn test_unknown_role_is_an_error() {
        let json = r#"{ "range": [1, 2], "roles": { "camera": "ghost" } }"#;
        let err = load_description_from_str(json, "bad").unwrap_err();
        assert!(matches!(err, DescriptionError::UnknownNode { ref name, .. } if name == "ghost"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"{
            "range": [1, 2],
            "nodes": [
                { "name": "a", "type": "locator" },
                { "name": "a", "type": "joint" }
            ]
        }"#;
        assert!(matches!(
            load_description_from_str(json, "dup"),
            Err(DescriptionError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_bad_cache_topology_rejected() {
        let json = r#"{
            "range": [1, 2],
            "nodes": [
                { "name": "m", "type": "mesh",
                  "shape": { "points": { "positions": [[0, 0, 0], [1, 0, 0]] } },
                  "vertex_cache": { "frames": [ { "frame": 1, "positions": [[0, 0, 0]] } ] } }
            ]
        }"#;
        assert!(matches!(
            load_description_from_str(json, "bad"),
            Err(DescriptionError::Scene(_))
        ));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let json = r#"{ "range": [5, 1] }"#;
        assert!(matches!(
            load_description_from_str(json, "bad"),
            Err(DescriptionError::Json(_))
        ));
    }
}
