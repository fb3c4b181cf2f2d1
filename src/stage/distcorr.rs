//! Distortion correction stage.

use super::{artifacts, commit_outputs, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::toolkit::{DistortionCorrectRequest, Toolkit};
use async_trait::async_trait;
use std::sync::Arc;

/// Stage name.
pub const NAME: &str = "distcorr";

/// Derives a distortion-correction warp field from the field map.
///
/// With no field map supplied the stage is permanently unrunnable and the
/// orchestrator skips it; the rest of the pipeline proceeds uncorrected.
#[derive(Debug)]
pub struct DistortionCorrectStage {
    descriptor: StageDescriptor,
    toolkit: Arc<dyn Toolkit>,
}

impl DistortionCorrectStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(toolkit: Arc<dyn Toolkit>) -> Self {
        let descriptor = StageDescriptor::new(NAME, Operation::DistortionCorrect)
            .with_required([artifacts::ASL, artifacts::FIELDMAP])
            .with_optional([artifacts::ASL_MC])
            .with_output(OutputSpec::new(
                artifacts::DISTCORR_WARP,
                Category::Distcorr,
                ArtifactKind::Warp,
            ));
        Self {
            descriptor,
            toolkit,
        }
    }
}

#[async_trait]
impl Stage for DistortionCorrectStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        // Prefer the motion-corrected series when it exists.
        let asl = match ctx.artifact(artifacts::ASL_MC) {
            Some(a) => a,
            None => ctx.require(artifacts::ASL)?,
        };
        let fieldmap = ctx.require(artifacts::FIELDMAP)?;
        self.toolkit
            .distortion_correct(DistortionCorrectRequest {
                asl: asl.path.clone(),
                fieldmap: fieldmap.path.clone(),
                warp_out: store.target_path(
                    Category::Distcorr,
                    artifacts::DISTCORR_WARP,
                    ArtifactKind::Warp,
                ),
            })
            .await?;
        commit_outputs(&self.descriptor, store)
    }
}
