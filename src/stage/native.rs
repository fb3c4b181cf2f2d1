//! Native-space output projection stage.

use super::{artifacts, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category, Provenance};
use crate::context::StageContext;
use crate::errors::PipelineError;
use async_trait::async_trait;

/// Stage name.
pub const NAME: &str = "native";

/// Projects the final model-fit maps into the `native/` output tree.
///
/// A small in-process transform: the perfusion map is masked and copied
/// into `native/`, and when calibration is configured a calibrated copy is
/// produced alongside it. In that case the M0 map is a required input, so
/// a failed calibration branch skips this stage rather than silently
/// dropping the calibrated output.
#[derive(Debug)]
pub struct NativeOutputStage {
    descriptor: StageDescriptor,
    calibrated: bool,
}

impl NativeOutputStage {
    /// Creates the stage. `calibrated` must mirror whether calibration is
    /// configured for the run.
    #[must_use]
    pub fn new(calibrated: bool) -> Self {
        let mut descriptor = StageDescriptor::new(NAME, Operation::InProcess)
            .with_required([artifacts::PERFUSION, artifacts::ROI_MASK])
            .with_output(OutputSpec::new(
                artifacts::PERFUSION_NATIVE,
                Category::Native,
                ArtifactKind::Volume,
            ));
        if calibrated {
            descriptor = descriptor
                .with_required([artifacts::M0_MAP])
                .with_output(OutputSpec::new(
                    artifacts::PERFUSION_CALIB,
                    Category::Native,
                    ArtifactKind::Volume,
                ));
        }
        Self {
            descriptor,
            calibrated,
        }
    }
}

#[async_trait]
impl Stage for NativeOutputStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let perfusion = ctx.require(artifacts::PERFUSION)?;
        ctx.require(artifacts::ROI_MASK)?;

        let data = std::fs::read(&perfusion.path)
            .map_err(|_| PipelineError::stage_validation(NAME, artifacts::PERFUSION_NATIVE))?;

        let mut produced = vec![store.put(
            Category::Native,
            artifacts::PERFUSION_NATIVE,
            ArtifactKind::Volume,
            Provenance::Stage(NAME.to_string()),
            &data,
        )?];

        if self.calibrated {
            ctx.require(artifacts::M0_MAP)?;
            produced.push(store.put(
                Category::Native,
                artifacts::PERFUSION_CALIB,
                ArtifactKind::Volume,
                Provenance::Stage(NAME.to_string()),
                &data,
            )?);
        }

        Ok(produced)
    }
}
