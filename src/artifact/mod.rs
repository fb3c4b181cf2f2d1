//! Artifact value types: named, typed references to files in the output tree.
//!
//! An artifact is immutable once written. Stages that correct acquired data
//! produce a new artifact under `corrected/`; nothing ever mutates `input/`.

mod store;

pub use store::ArtifactStore;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The eleven fixed top-level categories of the output tree.
///
/// The directory names are part of the persisted layout and must not change
/// between releases; reruns locate prior outputs through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Raw input data, copied verbatim.
    Input,
    /// Corrected copies of acquired data.
    Corrected,
    /// Calibration outputs (M0 maps, reference region masks).
    Calib,
    /// Kinetic model fitting outputs.
    Basil,
    /// Registration transforms.
    Reg,
    /// Distortion correction warp fields.
    Distcorr,
    /// Structural image derivatives (brain extraction, segmentation).
    Structural,
    /// Motion correction transforms.
    Moco,
    /// Region-of-interest masks.
    Rois,
    /// Final native-space output maps.
    Native,
    /// Run metadata consumed by report rendering.
    Report,
}

impl Category {
    /// All categories, in output-tree order.
    pub const ALL: [Category; 11] = [
        Category::Input,
        Category::Corrected,
        Category::Calib,
        Category::Basil,
        Category::Reg,
        Category::Distcorr,
        Category::Structural,
        Category::Moco,
        Category::Rois,
        Category::Native,
        Category::Report,
    ];

    /// The subdirectory name under the workspace root.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Corrected => "corrected",
            Self::Calib => "calib",
            Self::Basil => "basil",
            Self::Reg => "reg",
            Self::Distcorr => "distcorr",
            Self::Structural => "structural",
            Self::Moco => "moco",
            Self::Rois => "rois",
            Self::Native => "native",
            Self::Report => "report",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// What sort of file an artifact refers to.
///
/// The kind fixes the file extension and the format stamp that
/// [`ArtifactStore`] checks when validating cached outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A 3D/4D image volume (gzipped NIfTI).
    Volume,
    /// A binary mask volume (gzipped NIfTI).
    Mask,
    /// An affine transformation matrix (FSL text format).
    Transform,
    /// A nonlinear warp field (gzipped NIfTI).
    Warp,
}

impl ArtifactKind {
    /// File extension for this kind.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Volume | Self::Mask | Self::Warp => "nii.gz",
            Self::Transform => "mat",
        }
    }

    /// Returns true if the file content carries a valid format stamp for
    /// this kind. Gzipped volumes must start with the gzip magic bytes;
    /// transform matrices must be non-empty text.
    #[must_use]
    pub fn stamp_valid(self, head: &[u8]) -> bool {
        match self {
            Self::Volume | Self::Mask | Self::Warp => head.len() >= 2 && head[..2] == [0x1f, 0x8b],
            Self::Transform => !head.is_empty(),
        }
    }
}

/// Which stage produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Supplied by the caller, copied into `input/`.
    RawInput,
    /// Produced by the named stage.
    Stage(String),
}

impl Provenance {
    /// The producing stage name, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::RawInput => None,
            Self::Stage(name) => Some(name),
        }
    }
}

/// A named, typed reference to a file in the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical name, unique within one run.
    pub name: String,
    /// Output-tree category; the path is always under its subdirectory.
    pub category: Category,
    /// File kind.
    pub kind: ArtifactKind,
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Which stage produced it.
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_dir_names_are_fixed() {
        let dirs: Vec<&str> = Category::ALL.iter().map(|c| c.dir_name()).collect();
        assert_eq!(
            dirs,
            vec![
                "input",
                "corrected",
                "calib",
                "basil",
                "reg",
                "distcorr",
                "structural",
                "moco",
                "rois",
                "native",
                "report"
            ]
        );
    }

    #[test]
    fn test_volume_stamp() {
        assert!(ArtifactKind::Volume.stamp_valid(&[0x1f, 0x8b, 0x08]));
        assert!(!ArtifactKind::Volume.stamp_valid(b"plain text"));
        assert!(!ArtifactKind::Volume.stamp_valid(&[]));
    }

    #[test]
    fn test_transform_stamp() {
        assert!(ArtifactKind::Transform.stamp_valid(b"1 0 0 0"));
        assert!(!ArtifactKind::Transform.stamp_valid(&[]));
    }

    #[test]
    fn test_provenance_stage() {
        assert_eq!(Provenance::RawInput.stage(), None);
        assert_eq!(Provenance::Stage("moco".to_string()).stage(), Some("moco"));
    }
}
