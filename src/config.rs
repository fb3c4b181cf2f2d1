//! Analysis configuration and raw input declaration.
//!
//! Every recognized option is enumerated here with its default and resolved
//! once at pipeline construction. The configuration is never mutated during
//! a run; stages see it through an immutable [`crate::context::StageContext`].

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;

/// How the perfusion maps are scaled to absolute units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Divide voxelwise by the M0 calibration image.
    Voxelwise,
    /// Estimate a single M0 value from a reference tissue region.
    RefRegion,
}

impl std::fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voxelwise => write!(f, "voxelwise"),
            Self::RefRegion => write!(f, "refregion"),
        }
    }
}

/// Which stages must re-execute even when validated cached outputs exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRecompute {
    /// Recompute every stage.
    #[serde(default)]
    pub all: bool,
    /// Recompute the named stages (and, transitively, their dependents).
    #[serde(default)]
    pub stages: HashSet<String>,
}

impl ForceRecompute {
    /// Forces recomputation of every stage.
    #[must_use]
    pub fn everything() -> Self {
        Self {
            all: true,
            stages: HashSet::new(),
        }
    }

    /// Forces recomputation of the named stages.
    #[must_use]
    pub fn stages(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            all: false,
            stages: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the named stage must re-execute.
    #[must_use]
    pub fn covers(&self, stage: &str) -> bool {
        self.all || self.stages.contains(stage)
    }
}

/// Paths to the raw acquired data for one analysis run.
///
/// Only the ASL series is mandatory; every other input narrows behavior
/// when absent rather than blocking the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInputs {
    /// The ASL perfusion-weighted series.
    pub asl: PathBuf,
    /// M0 calibration image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calib: Option<PathBuf>,
    /// Structural (T1) image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural: Option<PathBuf>,
    /// Field map for distortion correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldmap: Option<PathBuf>,
    /// Pre-drawn reference region mask for refregion calibration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refregion_mask: Option<PathBuf>,
}

impl RawInputs {
    /// Creates a raw input set with only the ASL series.
    #[must_use]
    pub fn new(asl: impl Into<PathBuf>) -> Self {
        Self {
            asl: asl.into(),
            calib: None,
            structural: None,
            fieldmap: None,
            refregion_mask: None,
        }
    }

    /// Sets the M0 calibration image.
    #[must_use]
    pub fn with_calib(mut self, path: impl Into<PathBuf>) -> Self {
        self.calib = Some(path.into());
        self
    }

    /// Sets the structural image.
    #[must_use]
    pub fn with_structural(mut self, path: impl Into<PathBuf>) -> Self {
        self.structural = Some(path.into());
        self
    }

    /// Sets the field map.
    #[must_use]
    pub fn with_fieldmap(mut self, path: impl Into<PathBuf>) -> Self {
        self.fieldmap = Some(path.into());
        self
    }

    /// Sets the reference region mask.
    #[must_use]
    pub fn with_refregion_mask(mut self, path: impl Into<PathBuf>) -> Self {
        self.refregion_mask = Some(path.into());
        self
    }
}

/// The complete option surface for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Determine and apply motion correction to the ASL series.
    pub motion_correct: bool,
    /// Determine distortion correction from a field map when one is supplied.
    pub distortion_correction: bool,
    /// Calibration method. `None` means no calibration; resolved from the
    /// supplied inputs when a calibration image is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_method: Option<CalibrationMethod>,
    /// Cache-override flags.
    #[serde(default)]
    pub force_recompute: ForceRecompute,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            motion_correct: true,
            distortion_correction: true,
            calibration_method: None,
            force_recompute: ForceRecompute::default(),
        }
    }
}

impl AnalysisConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables motion correction.
    #[must_use]
    pub fn without_motion_correction(mut self) -> Self {
        self.motion_correct = false;
        self
    }

    /// Disables distortion correction.
    #[must_use]
    pub fn without_distortion_correction(mut self) -> Self {
        self.distortion_correction = false;
        self
    }

    /// Sets the calibration method.
    #[must_use]
    pub fn with_calibration_method(mut self, method: CalibrationMethod) -> Self {
        self.calibration_method = Some(method);
        self
    }

    /// Sets the force-recompute flags.
    #[must_use]
    pub fn with_force_recompute(mut self, force: ForceRecompute) -> Self {
        self.force_recompute = force;
        self
    }

    /// Fills in defaults that depend on which inputs were supplied.
    ///
    /// When a calibration image is present and no method was requested,
    /// refregion is chosen if a structural image is available, otherwise
    /// voxelwise.
    #[must_use]
    pub fn resolved(mut self, inputs: &RawInputs) -> Self {
        if self.calibration_method.is_none() && inputs.calib.is_some() {
            self.calibration_method = Some(if inputs.structural.is_some() {
                CalibrationMethod::RefRegion
            } else {
                CalibrationMethod::Voxelwise
            });
        }
        self
    }

    /// Pre-flight validation against the supplied inputs.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for contradictory setups, e.g. a
    /// calibration method requested with no calibration image, or refregion
    /// calibration with no possible reference region source.
    pub fn validate(&self, inputs: &RawInputs) -> Result<(), ConfigurationError> {
        if inputs.asl.as_os_str().is_empty() {
            return Err(ConfigurationError::new("no ASL input supplied"));
        }

        if let Some(method) = self.calibration_method {
            if inputs.calib.is_none() {
                return Err(ConfigurationError::new(format!(
                    "calibration method '{method}' requested but no calibration image supplied"
                ))
                .with_fix_hint("Supply an M0 calibration image or remove the calibration method."));
            }
            if method == CalibrationMethod::RefRegion
                && inputs.structural.is_none()
                && inputs.refregion_mask.is_none()
            {
                return Err(ConfigurationError::new(
                    "refregion calibration requested but no reference region source \
                     is available (no structural image and no reference mask)",
                )
                .with_fix_hint(
                    "Supply a structural image or a reference region mask, \
                     or use voxelwise calibration.",
                ));
            }
        }

        Ok(())
    }

    /// SHA-256 hash of the resolved configuration, excluding the
    /// force-recompute flags.
    ///
    /// Recorded in the output-tree manifest; cached stage outputs are only
    /// honoured by reruns whose hash matches. Force flags are excluded so a
    /// forced rerun does not invalidate the caches of unrelated branches.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hashable = self.clone();
        hashable.force_recompute = ForceRecompute::default();
        let json = serde_json::to_string(&hashable).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert!(config.motion_correct);
        assert!(config.distortion_correction);
        assert!(config.calibration_method.is_none());
    }

    #[test]
    fn test_resolved_prefers_refregion_with_structural() {
        let inputs = RawInputs::new("asl.nii.gz")
            .with_calib("m0.nii.gz")
            .with_structural("t1.nii.gz");
        let config = AnalysisConfig::default().resolved(&inputs);
        assert_eq!(config.calibration_method, Some(CalibrationMethod::RefRegion));
    }

    #[test]
    fn test_resolved_falls_back_to_voxelwise() {
        let inputs = RawInputs::new("asl.nii.gz").with_calib("m0.nii.gz");
        let config = AnalysisConfig::default().resolved(&inputs);
        assert_eq!(config.calibration_method, Some(CalibrationMethod::Voxelwise));
    }

    #[test]
    fn test_resolved_without_calib_stays_none() {
        let inputs = RawInputs::new("asl.nii.gz");
        let config = AnalysisConfig::default().resolved(&inputs);
        assert_eq!(config.calibration_method, None);
    }

    #[test]
    fn test_validate_rejects_calibration_without_image() {
        let inputs = RawInputs::new("asl.nii.gz");
        let config =
            AnalysisConfig::default().with_calibration_method(CalibrationMethod::Voxelwise);
        assert!(config.validate(&inputs).is_err());
    }

    #[test]
    fn test_validate_rejects_refregion_without_reference_source() {
        let inputs = RawInputs::new("asl.nii.gz").with_calib("m0.nii.gz");
        let config =
            AnalysisConfig::default().with_calibration_method(CalibrationMethod::RefRegion);
        let err = config.validate(&inputs).unwrap_err();
        assert!(err.message.contains("refregion"));
        assert!(err.fix_hint.is_some());
    }

    #[test]
    fn test_validate_accepts_refregion_with_mask_only() {
        let inputs = RawInputs::new("asl.nii.gz")
            .with_calib("m0.nii.gz")
            .with_refregion_mask("csf.nii.gz");
        let config =
            AnalysisConfig::default().with_calibration_method(CalibrationMethod::RefRegion);
        assert!(config.validate(&inputs).is_ok());
    }

    #[test]
    fn test_hash_ignores_force_flags() {
        let base = AnalysisConfig::default();
        let forced = AnalysisConfig::default()
            .with_force_recompute(ForceRecompute::stages(["moco"]));
        assert_eq!(base.hash(), forced.hash());

        let different = AnalysisConfig::default().without_motion_correction();
        assert_ne!(base.hash(), different.hash());
    }

    #[test]
    fn test_force_recompute_covers() {
        let force = ForceRecompute::stages(["moco"]);
        assert!(force.covers("moco"));
        assert!(!force.covers("reg"));
        assert!(ForceRecompute::everything().covers("reg"));
    }
}
