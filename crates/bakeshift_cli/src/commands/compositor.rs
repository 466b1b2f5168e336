//! Compositor track export.
use std::path::Path;

use anyhow::Context;
use bakeshift_core::classify::collect_leaves;
use bakeshift_core::{sample_tracks, ConversionSettings, HostScene};

use super::load_scene;

pub fn execute(
    scene_path: &Path,
    output: &Path,
    names: &[String],
    settings: &ConversionSettings,
) -> anyhow::Result<()> {
    let loaded = load_scene(scene_path)?;
    let scene = &loaded.scene;
    let roles = &loaded.roles;

    let nodes = if names.is_empty() {
        let mut nodes: Vec<_> = roles.camera.into_iter().collect();
        nodes.extend(collect_leaves(scene, &roles.geometry_roots)?);
        nodes
    } else {
        names
            .iter()
            .map(|name| {
                scene
                    .find_node(name)
                    .with_context(|| format!("No node named '{name}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let (tracks, skipped) = sample_tracks(scene, &nodes, roles.range, &settings.canvas);
    for node in &skipped {
        log::warn!("Skipped {}", node);
    }

    let json = serde_json::to_string_pretty(&tracks)?;
    std::fs::write(output, json).with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} tracks over {} frames to {}",
        tracks.len(),
        roles.range.frame_count(),
        output.display()
    );
    Ok(())
}
