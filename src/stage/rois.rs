//! ROI mask generation stage.

use super::{artifacts, Operation, OutputSpec, Stage, StageDescriptor};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category, Provenance};
use crate::context::StageContext;
use crate::errors::PipelineError;
use async_trait::async_trait;

/// Stage name.
pub const NAME: &str = "rois";

/// Generates the analysis mask as a small in-process transform.
///
/// The mask volume is derived from the best available reference: the
/// brain-extracted structural image when registration has brought it into
/// ASL space, otherwise the (corrected) ASL data itself. Voxel-level
/// thresholding is the external toolkit's concern; the core fixes which
/// source the mask comes from and where it lives.
#[derive(Debug)]
pub struct RoiMaskStage {
    descriptor: StageDescriptor,
}

impl RoiMaskStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        let descriptor = StageDescriptor::new(NAME, Operation::InProcess)
            .with_required([artifacts::ASL])
            .with_optional([
                artifacts::ASL_MC,
                artifacts::STRUC_BRAIN,
                artifacts::STRUC2ASL,
            ])
            .with_output(OutputSpec::new(
                artifacts::ROI_MASK,
                Category::Rois,
                ArtifactKind::Mask,
            ));
        Self { descriptor }
    }
}

impl Default for RoiMaskStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for RoiMaskStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError> {
        // Structural source needs the struc->ASL transform to be usable.
        let source = if ctx.has(artifacts::STRUC2ASL) {
            ctx.artifact(artifacts::STRUC_BRAIN)
        } else {
            None
        };
        let source = match source.or_else(|| ctx.artifact(artifacts::ASL_MC)) {
            Some(a) => a,
            None => ctx.require(artifacts::ASL)?,
        };

        let data = std::fs::read(&source.path)
            .map_err(|_| PipelineError::stage_validation(NAME, artifacts::ROI_MASK))?;
        let mask = store.put(
            Category::Rois,
            artifacts::ROI_MASK,
            ArtifactKind::Mask,
            Provenance::Stage(NAME.to_string()),
            &data,
        )?;
        Ok(vec![mask])
    }
}
