//! Versioned export paths and pre-flight validation.
use std::path::Path;

use anyhow::{bail, Context};
use bakeshift_core::export::{ExportFormat, ExportPaths, ExportRequest};
use bakeshift_core::HostScene;

use super::load_scene;

pub fn execute(
    scene_file: &Path,
    root: &Path,
    formats: &[ExportFormat],
    validate: Option<&Path>,
    create: bool,
) -> anyhow::Result<()> {
    let mut request = ExportRequest {
        scene_file: Some(scene_file.to_path_buf()),
        export_root: Some(root.to_path_buf()),
        formats: formats.to_vec(),
        ..Default::default()
    };

    if let Some(description) = validate {
        let loaded = load_scene(description)?;
        let scene = &loaded.scene;
        let first_name = |nodes: &[_]| -> anyhow::Result<Option<String>> {
            nodes.first().map(|&node| scene.node_name(node)).transpose().map_err(Into::into)
        };
        request.geo_root = first_name(&loaded.roles.geometry_roots)?;
        request.rig_root = first_name(&loaded.roles.rig_roots)?;
        request.camera = loaded.roles.camera.map(|node| scene.node_name(node)).transpose()?;
        request.start = loaded.roles.range.start();
        request.end = loaded.roles.range.end();

        let validation = request.validate(scene)?;
        for warning in &validation.warnings {
            log::warn!("{}", warning);
        }
        for error in &validation.errors {
            log::error!("{}", error);
        }
        if !validation.is_ok() {
            bail!("export request has {} errors", validation.errors.len());
        }
    }

    let paths: ExportPaths = request
        .plan()?
        .context("scene file and export root are required")?;
    for format in formats {
        if let Some(path) = paths.get(*format) {
            println!("{:<4} {}", format, path.display());
        }
    }

    if create {
        paths.ensure_directories()?;
        println!("Created export folders under {}", root.display());
    }
    Ok(())
}
