//! Per-node outcomes reported back to the caller.

use std::fmt;

use serde::Serialize;

use crate::scene::{HostScene, NodeId};

/// The pipeline stage a node dropped out of.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Classify,
    Bake,
    Morph,
    Rig,
    Compositor,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Classify => "classify",
            Stage::Bake => "bake",
            Stage::Morph => "morph",
            Stage::Rig => "rig",
            Stage::Compositor => "compositor",
        };
        f.write_str(name)
    }
}

/// A node excluded from the result, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedNode {
    pub node: NodeId,

    /// Name at the time of the failure, if the node still resolved
    pub name: Option<String>,

    pub stage: Stage,
    pub reason: String,
}

impl SkippedNode {
    /// Record a skipped node, looking its name up while it may still exist.
    pub fn new<S: HostScene + ?Sized>(
        scene: &S,
        node: NodeId,
        stage: Stage,
        reason: impl fmt::Display,
    ) -> Self {
        Self {
            node,
            name: scene.node_name(node).ok(),
            stage,
            reason: reason.to_string(),
        }
    }

    /// Name if known, otherwise the handle.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.node.to_string())
    }
}

impl fmt::Display for SkippedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.label(), self.reason)
    }
}

/// How many leaves fell into each class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ClassCounts {
    #[serde(rename = "static")]
    pub static_nodes: usize,
    pub driven: usize,
    pub vertex_deformed: usize,
}

impl ClassCounts {
    pub fn total(&self) -> usize {
        self.static_nodes + self.driven + self.vertex_deformed
    }
}

impl fmt::Display for ClassCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} static, {} driven, {} vertex-deformed",
            self.static_nodes, self.driven, self.vertex_deformed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryScene;

    #[test]
    fn test_skipped_node_label() {
        let mut scene = MemoryScene::new("test");
        let node = scene.add_locator("loc", None).unwrap();

        let named = SkippedNode::new(&scene, node, Stage::Bake, "boom");
        assert_eq!(named.to_string(), "[bake] loc: boom");

        let missing = SkippedNode::new(&scene, NodeId(999), Stage::Classify, "gone");
        assert_eq!(missing.label(), "node#999");
    }

    #[test]
    fn test_class_counts_total() {
        let counts = ClassCounts {
            static_nodes: 2,
            driven: 1,
            vertex_deformed: 3,
        };
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.to_string(), "2 static, 1 driven, 3 vertex-deformed");
    }
}
