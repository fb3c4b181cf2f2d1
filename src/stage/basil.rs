//! Kinetic model fitting stage.

use super::{artifacts, commit_outputs, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::toolkit::{FitModelRequest, Toolkit};
use async_trait::async_trait;
use std::sync::Arc;

/// Stage name.
pub const NAME: &str = "basil";

/// Fits the kinetic model to the ASL series within the analysis mask.
///
/// Fits the motion-corrected series when available. An M0 map is passed
/// through when calibration produced one; without it the perfusion map is
/// in arbitrary units.
#[derive(Debug)]
pub struct ModelFitStage {
    descriptor: StageDescriptor,
    toolkit: Arc<dyn Toolkit>,
}

impl ModelFitStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(toolkit: Arc<dyn Toolkit>) -> Self {
        let descriptor = StageDescriptor::new(NAME, Operation::FitModel)
            .with_required([artifacts::ASL, artifacts::ROI_MASK])
            .with_optional([artifacts::ASL_MC, artifacts::M0_MAP])
            .with_output(OutputSpec::new(
                artifacts::PERFUSION,
                Category::Basil,
                ArtifactKind::Volume,
            ))
            .with_output(OutputSpec::new(
                artifacts::ARRIVAL,
                Category::Basil,
                ArtifactKind::Volume,
            ))
            .with_output(OutputSpec::new(
                artifacts::MODELFIT,
                Category::Basil,
                ArtifactKind::Volume,
            ));
        Self {
            descriptor,
            toolkit,
        }
    }
}

#[async_trait]
impl Stage for ModelFitStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let asl = match ctx.artifact(artifacts::ASL_MC) {
            Some(a) => a,
            None => ctx.require(artifacts::ASL)?,
        };
        let mask = ctx.require(artifacts::ROI_MASK)?;
        self.toolkit
            .fit_model(FitModelRequest {
                asl: asl.path.clone(),
                mask: mask.path.clone(),
                m0: ctx.artifact(artifacts::M0_MAP).map(|a| a.path.clone()),
                perfusion_out: store.target_path(
                    Category::Basil,
                    artifacts::PERFUSION,
                    ArtifactKind::Volume,
                ),
                arrival_out: store.target_path(
                    Category::Basil,
                    artifacts::ARRIVAL,
                    ArtifactKind::Volume,
                ),
                modelfit_out: store.target_path(
                    Category::Basil,
                    artifacts::MODELFIT,
                    ArtifactKind::Volume,
                ),
            })
            .await?;
        commit_outputs(&self.descriptor, store)
    }
}
