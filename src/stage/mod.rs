//! Stage trait and the standard ASL processing stages.
//!
//! A stage is a named unit of work with declared input and output
//! artifacts. Each implementation wraps exactly one external toolkit
//! operation, or one small in-process transform.

mod basil;
mod calib;
mod distcorr;
mod moco;
mod native;
mod reg;
mod rois;
mod struc;

pub use basil::ModelFitStage;
pub use calib::CalibrationStage;
pub use distcorr::DistortionCorrectStage;
pub use moco::MotionCorrectStage;
pub use native::NativeOutputStage;
pub use reg::RegistrationStage;
pub use rois::RoiMaskStage;
pub use struc::StructuralStage;

use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
use crate::context::StageContext;
use crate::errors::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Logical artifact names shared between the stages and the graph wiring.
pub mod artifacts {
    /// Raw ASL series.
    pub const ASL: &str = "asl";
    /// Raw calibration (M0) image.
    pub const CALIB: &str = "calib";
    /// Raw structural image.
    pub const STRUC: &str = "struc";
    /// Raw field map.
    pub const FIELDMAP: &str = "fieldmap";
    /// Supplied reference region mask.
    pub const REFREGION_MASK: &str = "refregion_mask";

    /// Motion-corrected ASL series.
    pub const ASL_MC: &str = "asl_mc";
    /// Motion correction transforms.
    pub const MOCO_TRANSFORMS: &str = "moco_transforms";
    /// Distortion correction warp field.
    pub const DISTCORR_WARP: &str = "distcorr_warp";
    /// Brain-extracted structural image.
    pub const STRUC_BRAIN: &str = "struc_brain";
    /// Grey matter partial volume map.
    pub const GM_PV: &str = "gm_pv";
    /// White matter partial volume map.
    pub const WM_PV: &str = "wm_pv";
    /// ASL to structural transform.
    pub const ASL2STRUC: &str = "asl2struc";
    /// Structural to ASL transform.
    pub const STRUC2ASL: &str = "struc2asl";
    /// Analysis mask.
    pub const ROI_MASK: &str = "roi_mask";
    /// M0 scaling map.
    pub const M0_MAP: &str = "m0_map";
    /// Reference region mask derived from segmentation.
    pub const CALIB_REFMASK: &str = "calib_refmask";
    /// Perfusion map from model fitting.
    pub const PERFUSION: &str = "perfusion";
    /// Bolus arrival time map.
    pub const ARRIVAL: &str = "arrival";
    /// Model fit volume.
    pub const MODELFIT: &str = "modelfit";
    /// Native-space perfusion output.
    pub const PERFUSION_NATIVE: &str = "perfusion_native";
    /// Native-space calibrated perfusion output.
    pub const PERFUSION_CALIB: &str = "perfusion_calib";
}

/// The external operation a stage wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// External motion correction.
    MotionCorrect,
    /// External distortion correction.
    DistortionCorrect,
    /// External registration.
    Register,
    /// External segmentation.
    Segment,
    /// External calibration.
    Calibrate,
    /// External kinetic model fitting.
    FitModel,
    /// Small deterministic in-process transform.
    InProcess,
}

/// A declared stage output: name plus where and as what it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Logical artifact name.
    pub name: String,
    /// Output-tree category.
    pub category: Category,
    /// File kind.
    pub kind: ArtifactKind,
}

impl OutputSpec {
    /// Creates an output spec.
    #[must_use]
    pub fn new(name: impl Into<String>, category: Category, kind: ArtifactKind) -> Self {
        Self {
            name: name.into(),
            category,
            kind,
        }
    }
}

/// Declared identity and dependencies of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// The unique stage name.
    pub name: String,
    /// Input artifact names that must be present for the stage to run.
    pub required: Vec<String>,
    /// Input artifact names whose absence narrows behavior but does not
    /// block the stage.
    pub optional: Vec<String>,
    /// Artifacts the stage declares it will produce.
    pub outputs: Vec<OutputSpec>,
    /// The external operation the stage wraps.
    pub operation: Operation,
}

impl StageDescriptor {
    /// Creates a descriptor with no inputs or outputs.
    #[must_use]
    pub fn new(name: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
            optional: Vec::new(),
            outputs: Vec::new(),
            operation,
        }
    }

    /// Adds required input names.
    #[must_use]
    pub fn with_required(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds optional input names.
    #[must_use]
    pub fn with_optional(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.optional.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds a declared output.
    #[must_use]
    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }
}

/// A named unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync + std::fmt::Debug {
    /// The stage's declared identity and dependencies.
    fn descriptor(&self) -> &StageDescriptor;

    /// The stage name.
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Returns true iff every required input artifact is visible in the
    /// context. When this is false, `run` must never be invoked.
    fn is_runnable(&self, ctx: &StageContext) -> bool {
        self.descriptor().required.iter().all(|name| ctx.has(name))
    }

    /// Executes the stage: invokes the wrapped operation and registers the
    /// declared outputs with the store.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StageExecution`] on non-zero external-tool exit,
    /// [`PipelineError::StageValidation`] when the tool exits zero but a
    /// declared output file is missing or malformed.
    async fn run(
        &self,
        ctx: &StageContext,
        store: &ArtifactStore,
    ) -> Result<Vec<Artifact>, PipelineError>;
}

/// Registers every declared output of `descriptor` after the wrapped tool
/// has written them, validating each file.
pub(crate) fn commit_outputs(
    descriptor: &StageDescriptor,
    store: &ArtifactStore,
) -> Result<Vec<Artifact>, PipelineError> {
    descriptor
        .outputs
        .iter()
        .map(|out| {
            store.commit(
                out.category,
                &out.name,
                out.kind,
                crate::artifact::Provenance::Stage(descriptor.name.clone()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use std::sync::Arc;

    #[derive(Debug)]
    struct DescriptorOnly(StageDescriptor);

    #[async_trait]
    impl Stage for DescriptorOnly {
        fn descriptor(&self) -> &StageDescriptor {
            &self.0
        }

        async fn run(
            &self,
            _ctx: &StageContext,
            _store: &ArtifactStore,
        ) -> Result<Vec<Artifact>, PipelineError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_is_runnable_requires_all_inputs() {
        let stage = DescriptorOnly(
            StageDescriptor::new("reg", Operation::Register)
                .with_required([artifacts::ASL, artifacts::STRUC_BRAIN])
                .with_optional([artifacts::ASL_MC]),
        );

        let ctx = StageContext::new(Arc::new(AnalysisConfig::default()));
        assert!(!stage.is_runnable(&ctx));

        let ctx = ctx.with_artifacts([
            test_artifact(artifacts::ASL),
            test_artifact(artifacts::STRUC_BRAIN),
        ]);
        // Optional inputs do not gate runnability.
        assert!(stage.is_runnable(&ctx));
    }

    fn test_artifact(name: &str) -> Artifact {
        Artifact {
            name: name.to_string(),
            category: Category::Input,
            kind: ArtifactKind::Volume,
            path: format!("/tmp/{name}.nii.gz").into(),
            provenance: crate::artifact::Provenance::RawInput,
        }
    }
}
