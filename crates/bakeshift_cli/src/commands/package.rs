//! Destructive package conversion with a JSON manifest writer.
use std::path::Path;

use anyhow::{bail, Context};
use bakeshift_core::scene::topology;
use bakeshift_core::{
    convert_for_package, ConversionSettings, HostScene, MemoryScene, NodeId, PackageManifest,
};
use bakeshift_math::Frame;
use serde::Serialize;

use super::load_scene;

/// Manifest as written to disk, with handles resolved to names.
#[derive(Debug, Serialize)]
pub struct ManifestFile {
    pub range: (Frame, Frame),
    pub nodes: Vec<String>,
    pub morphs: Vec<MorphFile>,
    pub rig_roots: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraFile>,
}

#[derive(Debug, Serialize)]
pub struct MorphFile {
    pub source: String,
    pub base: String,
    pub targets: Vec<(Frame, String)>,
}

#[derive(Debug, Serialize)]
pub struct CameraFile {
    pub node: String,
    pub export_name: String,
}

impl ManifestFile {
    pub fn resolve(scene: &MemoryScene, manifest: &PackageManifest) -> anyhow::Result<Self> {
        let name = |node: NodeId| scene.node_name(node).context("manifest node vanished");
        let names = |nodes: &[NodeId]| -> anyhow::Result<Vec<String>> {
            nodes.iter().map(|&node| name(node)).collect()
        };

        let morphs = manifest
            .morphs
            .iter()
            .map(|morph| -> anyhow::Result<MorphFile> {
                let targets = morph
                    .targets
                    .iter()
                    .map(|&(frame, target)| -> anyhow::Result<(Frame, String)> {
                        Ok((frame, name(target)?))
                    })
                    .collect::<anyhow::Result<_>>()?;
                Ok(MorphFile {
                    source: morph.source_name.clone(),
                    base: name(morph.base)?,
                    targets,
                })
            })
            .collect::<anyhow::Result<_>>()?;

        let camera = match (manifest.camera, manifest.camera_export_name()) {
            (Some(node), Some(export_name)) => Some(CameraFile {
                node: name(node)?,
                export_name: export_name.to_string(),
            }),
            _ => None,
        };

        Ok(Self {
            range: manifest.range,
            nodes: names(&manifest.nodes)?,
            morphs,
            rig_roots: names(&manifest.rig_roots)?,
            camera,
        })
    }
}

pub fn execute(
    scene_path: &Path,
    output: Option<&Path>,
    settings: &ConversionSettings,
) -> anyhow::Result<()> {
    let mut loaded = load_scene(scene_path)?;
    let request = loaded.roles.conversion_request();

    let roots = loaded.scene.root_nodes();
    let before = topology(&loaded.scene, &roots)?;
    let node_count = loaded.scene.node_count();

    let mut writer = |scene: &MemoryScene, manifest: &PackageManifest| -> anyhow::Result<()> {
        let file = ManifestFile::resolve(scene, manifest)?;
        let json = serde_json::to_string_pretty(&file)?;
        match output {
            Some(path) => {
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                log::info!("Wrote manifest to {}", path.display());
            }
            None => println!("{json}"),
        }
        Ok(())
    };

    let result = convert_for_package(&mut loaded.scene, &request, settings, &mut writer);

    println!("Conversion {}", result.status);
    println!("  {}", result.counts);
    println!("  {} morph targets", result.morph_targets);
    if let Some(rig) = &result.rig {
        println!(
            "  {} joints baked, {} constraints deleted, {} namespaces removed",
            rig.baked_joints.len(),
            rig.deleted_constraints,
            rig.removed_namespaces.len()
        );
        for warning in &rig.scale_warnings {
            println!("  warning: joint {} has scale {}", warning.name, warning.scale);
        }
    }
    for skipped in &result.skipped {
        println!("  skipped {}", skipped);
    }

    let after = topology(&loaded.scene, &roots)?;
    if after != before || loaded.scene.node_count() != node_count {
        bail!("scene was not restored after conversion");
    }
    let leftovers = loaded
        .scene
        .root_nodes()
        .into_iter()
        .filter(|node| !roots.contains(node))
        .count();
    if leftovers > 0 {
        bail!("{leftovers} conversion artifacts survived rollback");
    }
    log::info!("Scene restored ({} nodes)", node_count);

    if !result.status.is_success() {
        bail!("conversion {}", result.status);
    }
    Ok(())
}
