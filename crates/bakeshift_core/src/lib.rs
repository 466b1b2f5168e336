//! Bakeshift Core - Scene classification, baking and conversion.
//!
//! This crate provides:
//!
//! - **Scene model**: the `HostScene` capability trait and `MemoryScene`
//! - **Classification**: static / driven / vertex-deformed leaves
//! - **Baking**: transform bakes, morph-target synthesis, rig normalization
//! - **Transactions**: scoped scene edits with guaranteed rollback
//! - **Outputs**: package manifests, compositor tracks and export planning
//!
//! # Example
//!
//! ```ignore
//! use bakeshift_core::{convert_for_package, load_description, ConversionSettings};
//!
//! let mut loaded = load_description("shot.json")?;
//! let request = loaded.roles.conversion_request();
//! let mut writer = |_scene: &_, manifest: &_| -> Result<(), String> {
//!     println!("{} nodes ready", manifest.nodes.len());
//!     Ok(())
//! };
//! let result = convert_for_package(&mut loaded.scene, &request, &ConversionSettings::default(), &mut writer);
//! println!("{}", result.status);
//! ```

pub mod bake;
pub mod classify;
pub mod compositor;
pub mod description;
pub mod export;
pub mod mesh;
pub mod morph;
pub mod pipeline;
pub mod report;
pub mod rig;
pub mod scene;
pub mod settings;
pub mod transaction;

// Re-export commonly used types
pub use bake::{bake_transform, BakeError};
pub use classify::{classify, Classification, NodeClass};
pub use compositor::{sample_tracks, CompositorTrack};
pub use description::{load_description, load_description_from_str, DescriptionError, LoadedScene};
pub use export::{ExportFormat, ExportPaths, ExportRequest};
pub use mesh::Mesh;
pub use morph::{synthesize, MorphTarget};
pub use pipeline::{
    convert_for_package, ConversionRequest, ConversionResult, ConversionStatus, PackageManifest,
    PackageWriter,
};
pub use report::{ClassCounts, SkippedNode, Stage};
pub use rig::{normalize_rig, RigReport, RigRequest};
pub use scene::{HostScene, MemoryScene, NodeId, SceneError};
pub use settings::ConversionSettings;
pub use transaction::{Artifacts, RollbackReport, Transaction};
