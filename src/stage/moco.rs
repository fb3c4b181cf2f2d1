//! Motion correction stage.

use super::{artifacts, commit_outputs, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::toolkit::{MotionCorrectRequest, Toolkit};
use async_trait::async_trait;
use std::sync::Arc;

/// Stage name.
pub const NAME: &str = "moco";

/// Determines and applies motion correction to the ASL series.
///
/// Produces a corrected copy under `corrected/` and the per-volume
/// transforms under `moco/`; the raw series in `input/` is untouched.
#[derive(Debug)]
pub struct MotionCorrectStage {
    descriptor: StageDescriptor,
    toolkit: Arc<dyn Toolkit>,
}

impl MotionCorrectStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(toolkit: Arc<dyn Toolkit>) -> Self {
        let descriptor = StageDescriptor::new(NAME, Operation::MotionCorrect)
            .with_required([artifacts::ASL])
            .with_output(OutputSpec::new(
                artifacts::ASL_MC,
                Category::Corrected,
                ArtifactKind::Volume,
            ))
            .with_output(OutputSpec::new(
                artifacts::MOCO_TRANSFORMS,
                Category::Moco,
                ArtifactKind::Transform,
            ));
        Self {
            descriptor,
            toolkit,
        }
    }
}

#[async_trait]
impl Stage for MotionCorrectStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let asl = ctx.require(artifacts::ASL)?;
        self.toolkit
            .motion_correct(MotionCorrectRequest {
                asl: asl.path.clone(),
                corrected_out: store.target_path(
                    Category::Corrected,
                    artifacts::ASL_MC,
                    ArtifactKind::Volume,
                ),
                transforms_out: store.target_path(
                    Category::Moco,
                    artifacts::MOCO_TRANSFORMS,
                    ArtifactKind::Transform,
                ),
            })
            .await?;
        commit_outputs(&self.descriptor, store)
    }
}
