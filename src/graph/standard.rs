//! Construction of the standard ASL processing pipeline.

use super::{GraphBuilder, PipelineGraph};
use crate::config::{AnalysisConfig, RawInputs};
use crate::errors::GraphValidationError;
use crate::stage::{
    artifacts, CalibrationStage, DistortionCorrectStage, ModelFitStage, MotionCorrectStage,
    NativeOutputStage, RegistrationStage, RoiMaskStage, StructuralStage,
};
use crate::toolkit::Toolkit;
use std::collections::HashSet;
use std::sync::Arc;

/// Builds the standard pipeline for one analysis run.
///
/// Stages are declared in processing order; which ones appear depends on
/// the resolved configuration. Stages whose raw inputs were not supplied
/// stay in the graph and are reported as skipped at run time, so the run
/// report accounts for every standard stage that was configured.
///
/// # Errors
///
/// Returns an error if the declared stages fail graph validation; with the
/// fixed roster here that indicates a programming error.
pub fn standard_pipeline(
    toolkit: Arc<dyn Toolkit>,
    config: &AnalysisConfig,
    inputs: &RawInputs,
) -> Result<PipelineGraph, GraphValidationError> {
    let mut builder = GraphBuilder::new("asl");

    if config.motion_correct {
        builder = builder.stage(Arc::new(MotionCorrectStage::new(Arc::clone(&toolkit))))?;
    }
    if config.distortion_correction {
        builder = builder.stage(Arc::new(DistortionCorrectStage::new(Arc::clone(&toolkit))))?;
    }
    builder = builder
        .stage(Arc::new(StructuralStage::new(Arc::clone(&toolkit))))?
        .stage(Arc::new(RegistrationStage::new(Arc::clone(&toolkit))))?
        .stage(Arc::new(RoiMaskStage::new()))?;
    if let Some(method) = config.calibration_method {
        builder = builder.stage(Arc::new(CalibrationStage::new(
            Arc::clone(&toolkit),
            method,
            inputs.refregion_mask.is_some(),
            inputs.structural.is_some(),
        )))?;
    }
    builder = builder
        .stage(Arc::new(ModelFitStage::new(toolkit)))?
        .stage(Arc::new(NativeOutputStage::new(
            config.calibration_method.is_some(),
        )))?;

    builder.build(&raw_input_names(inputs))
}

/// The logical artifact names of the supplied raw inputs.
#[must_use]
pub fn raw_input_names(inputs: &RawInputs) -> HashSet<String> {
    let mut names = HashSet::new();
    names.insert(artifacts::ASL.to_string());
    if inputs.calib.is_some() {
        names.insert(artifacts::CALIB.to_string());
    }
    if inputs.structural.is_some() {
        names.insert(artifacts::STRUC.to_string());
    }
    if inputs.fieldmap.is_some() {
        names.insert(artifacts::FIELDMAP.to_string());
    }
    if inputs.refregion_mask.is_some() {
        names.insert(artifacts::REFREGION_MASK.to_string());
    }
    names
}
