//! Structural preprocessing stage: brain extraction and segmentation.

use super::{artifacts, commit_outputs, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::toolkit::{SegmentRequest, Toolkit};
use async_trait::async_trait;
use std::sync::Arc;

/// Stage name.
pub const NAME: &str = "struc";

/// Brain-extracts and segments the structural image.
#[derive(Debug)]
pub struct StructuralStage {
    descriptor: StageDescriptor,
    toolkit: Arc<dyn Toolkit>,
}

impl StructuralStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(toolkit: Arc<dyn Toolkit>) -> Self {
        let descriptor = StageDescriptor::new(NAME, Operation::Segment)
            .with_required([artifacts::STRUC])
            .with_output(OutputSpec::new(
                artifacts::STRUC_BRAIN,
                Category::Structural,
                ArtifactKind::Volume,
            ))
            .with_output(OutputSpec::new(
                artifacts::GM_PV,
                Category::Structural,
                ArtifactKind::Volume,
            ))
            .with_output(OutputSpec::new(
                artifacts::WM_PV,
                Category::Structural,
                ArtifactKind::Volume,
            ));
        Self {
            descriptor,
            toolkit,
        }
    }
}

#[async_trait]
impl Stage for StructuralStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let structural = ctx.require(artifacts::STRUC)?;
        self.toolkit
            .segment(SegmentRequest {
                structural: structural.path.clone(),
                brain_out: store.target_path(
                    Category::Structural,
                    artifacts::STRUC_BRAIN,
                    ArtifactKind::Volume,
                ),
                gm_out: store.target_path(
                    Category::Structural,
                    artifacts::GM_PV,
                    ArtifactKind::Volume,
                ),
                wm_out: store.target_path(
                    Category::Structural,
                    artifacts::WM_PV,
                    ArtifactKind::Volume,
                ),
            })
            .await?;
        commit_outputs(&self.descriptor, store)
    }
}
