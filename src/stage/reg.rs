//! Registration stage: ASL to structural space.

use super::{artifacts, commit_outputs, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::toolkit::{RegisterRequest, Toolkit};
use async_trait::async_trait;
use std::sync::Arc;

/// Stage name.
pub const NAME: &str = "reg";

/// Registers the ASL data to the brain-extracted structural image.
///
/// Produces both directions of the transform so later stages can move
/// either way between the two spaces. Calibration and reference-region
/// data acquired in a different physical space are brought into the common
/// structural space through these transforms rather than private ones.
#[derive(Debug)]
pub struct RegistrationStage {
    descriptor: StageDescriptor,
    toolkit: Arc<dyn Toolkit>,
}

impl RegistrationStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(toolkit: Arc<dyn Toolkit>) -> Self {
        let descriptor = StageDescriptor::new(NAME, Operation::Register)
            .with_required([artifacts::ASL, artifacts::STRUC_BRAIN])
            .with_optional([artifacts::ASL_MC])
            .with_output(OutputSpec::new(
                artifacts::ASL2STRUC,
                Category::Reg,
                ArtifactKind::Transform,
            ))
            .with_output(OutputSpec::new(
                artifacts::STRUC2ASL,
                Category::Reg,
                ArtifactKind::Transform,
            ));
        Self {
            descriptor,
            toolkit,
        }
    }
}

#[async_trait]
impl Stage for RegistrationStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let moving = match ctx.artifact(artifacts::ASL_MC) {
            Some(a) => a,
            None => ctx.require(artifacts::ASL)?,
        };
        let fixed = ctx.require(artifacts::STRUC_BRAIN)?;
        self.toolkit
            .register(RegisterRequest {
                moving: moving.path.clone(),
                fixed: fixed.path.clone(),
                forward_out: store.target_path(
                    Category::Reg,
                    artifacts::ASL2STRUC,
                    ArtifactKind::Transform,
                ),
                inverse_out: store.target_path(
                    Category::Reg,
                    artifacts::STRUC2ASL,
                    ArtifactKind::Transform,
                ),
            })
            .await?;
        commit_outputs(&self.descriptor, store)
    }
}
