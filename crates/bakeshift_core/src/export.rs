//! Export planning: scene-file versions, the versioned folder layout and
//! pre-flight validation of an export request.
//!
//! Scene files carry their version as a `_v##` (or `_v###`) token right
//! before the extension, e.g. `shot_v03.ma`. Every format is written to
//! `<root>/<base>/<format>/<version>/<base>_<version>.<ext>`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bakeshift_math::Frame;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::HostScene;

/// Version used when the scene file carries none.
pub const DEFAULT_VERSION: &str = "v01";

static VERSION_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"_v(\d{2,3})(?:\.|$)"));

/// Errors that can occur while planning an export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid version pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Unknown export format '{0}'")]
    UnknownFormat(String),

    #[error("Scene file '{0}' has no file name")]
    NoFileName(PathBuf),

    #[error("Failed to create '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for export planning.
pub type ExportResult<T> = Result<T, ExportError>;

fn version_pattern() -> ExportResult<&'static Regex> {
    VERSION_PATTERN.as_ref().map_err(|e| ExportError::Pattern(e.clone()))
}

/// Byte offset and digits of the last version token in `name`.
fn last_version(name: &str) -> ExportResult<Option<(usize, &str)>> {
    let last = version_pattern()?
        .captures_iter(name)
        .last()
        .and_then(|caps| Some((caps.get(0)?.start(), caps.get(1)?.as_str())));
    Ok(last)
}

/// Parse the last `_v##` token of a scene file name into `("v01", 1)`.
pub fn parse_version(scene_file: &str) -> ExportResult<Option<(String, u32)>> {
    Ok(last_version(scene_file)?.and_then(|(_, digits)| {
        let number = digits.parse().ok()?;
        Some((format!("v{digits}"), number))
    }))
}

/// Scene file name without its extension and last version token.
pub fn scene_base_name(scene_file: &Path) -> ExportResult<String> {
    let stem = scene_file
        .file_stem()
        .ok_or_else(|| ExportError::NoFileName(scene_file.to_path_buf()))?
        .to_string_lossy()
        .into_owned();

    match last_version(&stem)? {
        Some((start, _)) => Ok(stem[..start].to_string()),
        None => Ok(stem),
    }
}

/// Output formats of the export tool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Scene-file copy of the assigned roles
    Ma,
    /// Baked skeletal package
    Fbx,
    /// Geometry cache
    Abc,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Ma, ExportFormat::Fbx, ExportFormat::Abc];

    /// Folder name and file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Ma => "ma",
            ExportFormat::Fbx => "fbx",
            ExportFormat::Abc => "abc",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportFormat::ALL
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExportError::UnknownFormat(s.to_string()))
    }
}

/// Output file for each format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportPaths {
    paths: BTreeMap<ExportFormat, PathBuf>,
}

impl ExportPaths {
    pub fn build(root: &Path, base: &str, version: &str) -> Self {
        let paths = ExportFormat::ALL
            .into_iter()
            .map(|format| {
                let ext = format.extension();
                let path = root
                    .join(base)
                    .join(ext)
                    .join(version)
                    .join(format!("{base}_{version}.{ext}"));
                (format, path)
            })
            .collect();
        Self { paths }
    }

    pub fn get(&self, format: ExportFormat) -> Option<&Path> {
        self.paths.get(&format).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExportFormat, &Path)> {
        self.paths.iter().map(|(format, path)| (*format, path.as_path()))
    }

    /// Create the parent folder of every path.
    pub fn ensure_directories(&self) -> ExportResult<()> {
        for path in self.paths.values() {
            let Some(dir) = path.parent() else {
                continue;
            };
            fs::create_dir_all(dir).map_err(|source| ExportError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            log::debug!("Ensured export folder {}", dir.display());
        }
        Ok(())
    }
}

/// A scene role an export needs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Camera,
    GeoRoot,
    RigRoot,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Camera => "Camera",
            Role::GeoRoot => "Geo Root",
            Role::RigRoot => "Rig Root",
        })
    }
}

/// A problem found by [`ExportRequest::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportIssue {
    #[error("Scene has not been saved")]
    UnsavedScene,

    #[error("Export root directory is not set")]
    MissingExportRoot,

    #[error("Export root directory does not exist: {}", .0.display())]
    ExportRootNotFound(PathBuf),

    #[error("No export format selected")]
    NoFormat,

    #[error("{format} export enabled but it has nothing to export")]
    NothingToExport { format: ExportFormat },

    #[error("{role} '{name}' no longer exists in the scene")]
    MissingRole { role: Role, name: String },

    #[error("End frame {end} must be greater than start frame {start}")]
    InvalidRange { start: Frame, end: Frame },

    #[error("No _v## version found in '{0}', defaulting to v01")]
    MissingVersion(String),
}

/// Outcome of validation. Errors block the export, warnings do not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: Vec<ExportIssue>,
    pub warnings: Vec<ExportIssue>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Everything the export tool collects before writing files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportRequest {
    /// Saved scene file, `None` for an unsaved scene
    pub scene_file: Option<PathBuf>,
    pub export_root: Option<PathBuf>,
    pub formats: Vec<ExportFormat>,
    pub camera: Option<String>,
    pub geo_root: Option<String>,
    pub rig_root: Option<String>,
    pub start: Frame,
    pub end: Frame,
}

impl ExportRequest {
    pub fn wants(&self, format: ExportFormat) -> bool {
        self.formats.contains(&format)
    }

    fn roles(&self) -> [(Role, Option<&str>); 3] {
        [
            (Role::Camera, self.camera.as_deref()),
            (Role::GeoRoot, self.geo_root.as_deref()),
            (Role::RigRoot, self.rig_root.as_deref()),
        ]
    }

    /// Check the request against the scene.
    pub fn validate<S: HostScene + ?Sized>(&self, scene: &S) -> ExportResult<Validation> {
        let mut validation = Validation::default();
        let errors = &mut validation.errors;

        if self.scene_file.is_none() {
            errors.push(ExportIssue::UnsavedScene);
        }

        match &self.export_root {
            None => errors.push(ExportIssue::MissingExportRoot),
            Some(root) if !root.is_dir() => errors.push(ExportIssue::ExportRootNotFound(root.clone())),
            Some(_) => {}
        }

        if self.formats.is_empty() {
            errors.push(ExportIssue::NoFormat);
        }

        let has_geo = self.geo_root.is_some();
        let has_rig = self.rig_root.is_some();
        let has_any = has_geo || has_rig || self.camera.is_some();
        for format in ExportFormat::ALL {
            let satisfied = match format {
                ExportFormat::Ma => has_any,
                ExportFormat::Fbx => has_geo || has_rig,
                ExportFormat::Abc => has_geo,
            };
            if self.wants(format) && !satisfied {
                errors.push(ExportIssue::NothingToExport { format });
            }
        }

        for (role, name) in self.roles() {
            if let Some(name) = name {
                if scene.find_node(name).is_none() {
                    errors.push(ExportIssue::MissingRole {
                        role,
                        name: name.to_string(),
                    });
                }
            }
        }

        if self.end <= self.start {
            errors.push(ExportIssue::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }

        if let Some(file) = &self.scene_file {
            let short = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if parse_version(&short)?.is_none() {
                validation.warnings.push(ExportIssue::MissingVersion(short));
            }
        }

        Ok(validation)
    }

    /// Folder layout for this request, or `None` while the scene is unsaved
    /// or the root is unset.
    pub fn plan(&self) -> ExportResult<Option<ExportPaths>> {
        let (Some(file), Some(root)) = (&self.scene_file, &self.export_root) else {
            return Ok(None);
        };
        let short = file
            .file_name()
            .ok_or_else(|| ExportError::NoFileName(file.clone()))?
            .to_string_lossy();
        let version = parse_version(&short)?
            .map(|(version, _)| version)
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());
        let base = scene_base_name(file)?;
        Ok(Some(ExportPaths::build(root, &base, &version)))
    }
}
