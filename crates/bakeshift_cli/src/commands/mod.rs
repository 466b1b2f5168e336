use std::path::{Path, PathBuf};

use anyhow::Context;
use bakeshift_core::export::ExportFormat;
use bakeshift_core::{load_description, ConversionSettings, LoadedScene};
use clap::Subcommand;

pub mod classify;
pub mod compositor;
pub mod package;
pub mod plan;

#[derive(Subcommand)]
pub enum Commands {
    /// Classify the geometry roots of a scene description
    Classify {
        /// Scene description (JSON)
        scene: PathBuf,
    },

    /// Run the baked-package conversion and restore the scene
    Package {
        /// Scene description (JSON)
        scene: PathBuf,

        /// Manifest output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write per-frame compositor tracks
    Compositor {
        /// Scene description (JSON)
        scene: PathBuf,

        /// Track output file
        #[arg(short, long)]
        output: PathBuf,

        /// Nodes to sample (camera and geometry leaves if omitted)
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,
    },

    /// Print the versioned export paths for a scene file
    Plan {
        /// Saved scene file, e.g. shot_v03.ma
        scene_file: PathBuf,

        /// Export root directory
        #[arg(short, long)]
        root: PathBuf,

        /// Formats to export
        #[arg(short, long, value_delimiter = ',', default_values_t = ExportFormat::ALL)]
        formats: Vec<ExportFormat>,

        /// Scene description to validate the roles against
        #[arg(long)]
        validate: Option<PathBuf>,

        /// Create the export folders
        #[arg(long)]
        create: bool,
    },
}

impl Commands {
    pub fn execute(&self, settings: &ConversionSettings) -> anyhow::Result<()> {
        match self {
            Commands::Classify { scene } => classify::execute(scene, settings),
            Commands::Package { scene, output } => package::execute(scene, output.as_deref(), settings),
            Commands::Compositor {
                scene,
                output,
                nodes,
            } => compositor::execute(scene, output, nodes, settings),
            Commands::Plan {
                scene_file,
                root,
                formats,
                validate,
                create,
            } => plan::execute(scene_file, root, formats, validate.as_deref(), *create),
        }
    }
}

/// Read settings from `path`, or the defaults.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ConversionSettings> {
    let Some(path) = path else {
        return Ok(ConversionSettings::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings {}", path.display()))?;
    let settings = serde_json::from_str(&content)
        .with_context(|| format!("Invalid settings {}", path.display()))?;
    log::info!("Loaded settings from {}", path.display());
    Ok(settings)
}

pub(crate) fn load_scene(path: &Path) -> anyhow::Result<LoadedScene> {
    load_description(path).with_context(|| format!("Failed to load scene {}", path.display()))
}
