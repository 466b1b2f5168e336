//! Print how each leaf under the geometry roots would be converted.
use std::path::Path;

use bakeshift_core::{classify, ConversionSettings, HostScene};

use super::load_scene;

pub fn execute(scene_path: &Path, settings: &ConversionSettings) -> anyhow::Result<()> {
    let loaded = load_scene(scene_path)?;
    let scene = &loaded.scene;
    let roles = &loaded.roles;

    let classification = classify(scene, &roles.geometry_roots, roles.range, settings);

    let groups = [
        ("static", &classification.static_nodes),
        ("driven", &classification.driven),
        ("vertex-deformed", &classification.vertex_deformed),
    ];
    for (label, nodes) in groups {
        for &node in nodes {
            println!("{:<16} {}", label, scene.node_name(node)?);
        }
    }
    for skipped in &classification.skipped {
        println!("{:<16} {}", "skipped", skipped);
    }

    println!("\n{}", classification.counts());
    Ok(())
}
