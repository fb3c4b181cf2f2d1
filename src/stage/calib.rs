//! Calibration stage.

use super::{artifacts, commit_outputs, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
use crate::config::CalibrationMethod;
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::toolkit::{CalibrateRequest, Toolkit};
use async_trait::async_trait;
use std::sync::Arc;

/// Stage name.
pub const NAME: &str = "calib";

/// Where the reference region for refregion calibration comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceSource {
    /// Caller supplied a mask directly.
    Supplied,
    /// Derived from the white-matter segmentation.
    Segmentation,
}

/// Computes the M0 scaling map from the calibration image.
///
/// Voxelwise calibration needs only the calibration image. Refregion
/// calibration additionally needs the ASL-to-structural registration and a
/// reference region, either supplied or derived from segmentation; the
/// outputs live under `calib/`, with `corrected/` reserved for corrected
/// copies of acquired data.
#[derive(Debug)]
pub struct CalibrationStage {
    descriptor: StageDescriptor,
    toolkit: Arc<dyn Toolkit>,
    method: CalibrationMethod,
    reference: Option<ReferenceSource>,
}

impl CalibrationStage {
    /// Creates the stage.
    ///
    /// `refmask_supplied` selects the reference source for refregion
    /// calibration; when false the white-matter partial volume map from
    /// segmentation is used and the derived mask is declared as an output.
    /// `structural_supplied` decides whether the registration output is a
    /// required input: with no structural image there is no common space
    /// to register through and calibration happens in ASL space directly.
    #[must_use]
    pub fn new(
        toolkit: Arc<dyn Toolkit>,
        method: CalibrationMethod,
        refmask_supplied: bool,
        structural_supplied: bool,
    ) -> Self {
        let mut descriptor = StageDescriptor::new(NAME, Operation::Calibrate)
            .with_required([artifacts::CALIB])
            .with_output(OutputSpec::new(
                artifacts::M0_MAP,
                Category::Calib,
                ArtifactKind::Volume,
            ));

        let reference = match method {
            CalibrationMethod::Voxelwise => {
                descriptor = descriptor.with_optional([artifacts::ASL2STRUC]);
                None
            }
            CalibrationMethod::RefRegion if refmask_supplied => {
                if structural_supplied {
                    descriptor = descriptor.with_required([artifacts::ASL2STRUC]);
                }
                descriptor = descriptor.with_required([artifacts::REFREGION_MASK]);
                Some(ReferenceSource::Supplied)
            }
            CalibrationMethod::RefRegion => {
                // Deriving the reference region needs segmentation, so a
                // structural image is present in this branch.
                descriptor = descriptor
                    .with_required([artifacts::ASL2STRUC, artifacts::WM_PV])
                    .with_output(OutputSpec::new(
                        artifacts::CALIB_REFMASK,
                        Category::Calib,
                        ArtifactKind::Mask,
                    ));
                Some(ReferenceSource::Segmentation)
            }
        };

        Self {
            descriptor,
            toolkit,
            method,
            reference,
        }
    }
}

#[async_trait]
impl Stage for CalibrationStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let calib = ctx.require(artifacts::CALIB)?;

        let (reference_mask, refmask_out) = match self.reference {
            None => (None, None),
            Some(ReferenceSource::Supplied) => (
                Some(ctx.require(artifacts::REFREGION_MASK)?.path.clone()),
                None,
            ),
            Some(ReferenceSource::Segmentation) => (
                Some(ctx.require(artifacts::WM_PV)?.path.clone()),
                Some(store.target_path(
                    Category::Calib,
                    artifacts::CALIB_REFMASK,
                    ArtifactKind::Mask,
                )),
            ),
        };

        self.toolkit
            .calibrate(CalibrateRequest {
                calib: calib.path.clone(),
                method: self.method,
                reference_mask,
                m0_out: store.target_path(Category::Calib, artifacts::M0_MAP, ArtifactKind::Volume),
                refmask_out,
            })
            .await?;
        commit_outputs(&self.descriptor, store)
    }
}
