//! Conversion settings.
//!
//! Everything here deserializes from JSON with every field optional; missing
//! fields take the defaults below.

use bakeshift_math::{BakeRange, CanvasSettings, Frame};
use serde::{Deserialize, Serialize};

/// Which frames the vertex-deformation test compares.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FrameSampling {
    /// First and last frame of the range
    #[default]
    Endpoints,

    /// Every `step` frames from the start, plus the last frame
    Every { step: u32 },

    /// Every frame in the range
    All,
}

impl FrameSampling {
    /// Frames to sample inside `range`, ascending and without duplicates.
    pub fn frames(&self, range: &BakeRange) -> Vec<Frame> {
        let mut frames: Vec<Frame> = match *self {
            FrameSampling::Endpoints => vec![range.start(), range.end()],
            FrameSampling::Every { step } => range.frames().step_by(step.max(1) as usize).collect(),
            FrameSampling::All => range.frames().collect(),
        };
        if frames.last() != Some(&range.end()) {
            frames.push(range.end());
        }
        frames.dedup();
        frames
    }
}

/// Which vertices the vertex-deformation test compares.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VertexSampling {
    /// First, middle and last vertex
    #[default]
    FirstMiddleLast,

    /// Every `step`-th vertex, plus the last one
    Stride { step: u32 },

    /// Every vertex
    All,
}

impl VertexSampling {
    /// Vertex indices to sample on a mesh with `count` vertices.
    pub fn indices(&self, count: usize) -> Vec<usize> {
        if count == 0 {
            return Vec::new();
        }
        let last = count - 1;
        let mut indices: Vec<usize> = match *self {
            VertexSampling::FirstMiddleLast => vec![0, count / 2, last],
            VertexSampling::Stride { step } => (0..count).step_by(step.max(1) as usize).collect(),
            VertexSampling::All => (0..count).collect(),
        };
        if indices.last() != Some(&last) {
            indices.push(last);
        }
        indices.dedup();
        indices
    }
}

/// How much of a mesh the classifier looks at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingStrategy {
    pub frames: FrameSampling,
    pub vertices: VertexSampling,
}

/// Settings for one conversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    /// Vertex-deformation sampling
    pub sampling: SamplingStrategy,

    /// Largest per-coordinate difference still treated as "not deformed"
    pub deformation_epsilon: f64,

    /// Allowed deviation from unit scale on joints before warning
    pub joint_scale_tolerance: f64,

    /// Name prefix for every node created during conversion
    pub artifact_prefix: String,

    /// Namespaces never removed by rig normalization
    pub protected_namespaces: Vec<String>,

    /// Compositor canvas
    pub canvas: CanvasSettings,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            sampling: SamplingStrategy::default(),
            deformation_epsilon: 1e-4,
            joint_scale_tolerance: 1e-3,
            artifact_prefix: "bks_".to_string(),
            protected_namespaces: vec!["UI".to_string(), "shared".to_string()],
            canvas: CanvasSettings::default(),
        }
    }
}

impl ConversionSettings {
    /// Prefix `name` with the artifact prefix.
    pub fn artifact_name(&self, name: &str) -> String {
        format!("{}{}", self.artifact_prefix, name)
    }

    /// True for a protected namespace or anything nested inside one.
    pub fn is_protected_namespace(&self, namespace: &str) -> bool {
        self.protected_namespaces.iter().any(|protected| {
            namespace == protected
                || namespace
                    .strip_prefix(protected.as_str())
                    .is_some_and(|rest| rest.starts_with(':'))
        })
    }
}
