//! The external toolkit boundary.
//!
//! Every stage invokes exactly one conceptual operation on a [`Toolkit`]:
//! a black-box call with a defined input file set, a defined output file
//! set, a success/failure status, and diagnostic text on failure. The core
//! never looks inside the image files.

mod command;

pub use command::{CommandToolkit, ToolPrograms};

use crate::config::CalibrationMethod;
use crate::errors::PipelineError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Successful completion of an external operation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// Diagnostic text emitted by the tool (informational on success).
    pub diagnostics: String,
}

impl ToolOutcome {
    /// Creates an outcome with diagnostics.
    #[must_use]
    pub fn new(diagnostics: impl Into<String>) -> Self {
        Self {
            diagnostics: diagnostics.into(),
        }
    }
}

/// Motion correction: transforms plus a corrected image.
#[derive(Debug, Clone)]
pub struct MotionCorrectRequest {
    /// The ASL series to correct.
    pub asl: PathBuf,
    /// Where to write the corrected series.
    pub corrected_out: PathBuf,
    /// Where to write the per-volume transforms.
    pub transforms_out: PathBuf,
}

/// Distortion correction: a warp field from a field map.
#[derive(Debug, Clone)]
pub struct DistortionCorrectRequest {
    /// The ASL series.
    pub asl: PathBuf,
    /// The acquired field map.
    pub fieldmap: PathBuf,
    /// Where to write the warp field.
    pub warp_out: PathBuf,
}

/// Registration of a moving image to a fixed image.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    /// The moving image.
    pub moving: PathBuf,
    /// The fixed (reference) image.
    pub fixed: PathBuf,
    /// Where to write the moving-to-fixed transform.
    pub forward_out: PathBuf,
    /// Where to write the fixed-to-moving transform.
    pub inverse_out: PathBuf,
}

/// Brain extraction and tissue segmentation of a structural image.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    /// The structural image.
    pub structural: PathBuf,
    /// Where to write the brain-extracted image.
    pub brain_out: PathBuf,
    /// Where to write the grey-matter partial volume map.
    pub gm_out: PathBuf,
    /// Where to write the white-matter partial volume map.
    pub wm_out: PathBuf,
}

/// Calibration: an M0 scaling map from the calibration image.
#[derive(Debug, Clone)]
pub struct CalibrateRequest {
    /// The calibration (M0) image.
    pub calib: PathBuf,
    /// Voxelwise or reference-region.
    pub method: CalibrationMethod,
    /// Reference region source, required for refregion: either a
    /// pre-drawn mask or a tissue partial volume map to threshold.
    pub reference_mask: Option<PathBuf>,
    /// Where to write the M0 map.
    pub m0_out: PathBuf,
    /// Where to write the reference region mask actually used, when the
    /// tool derives one from a partial volume map.
    pub refmask_out: Option<PathBuf>,
}

/// Kinetic model fitting: perfusion and arrival maps from the ASL series.
#[derive(Debug, Clone)]
pub struct FitModelRequest {
    /// The (corrected) ASL series.
    pub asl: PathBuf,
    /// Analysis mask.
    pub mask: PathBuf,
    /// M0 map for calibrated output, when available.
    pub m0: Option<PathBuf>,
    /// Where to write the perfusion map.
    pub perfusion_out: PathBuf,
    /// Where to write the bolus arrival time map.
    pub arrival_out: PathBuf,
    /// Where to write the model fit volume.
    pub modelfit_out: PathBuf,
}

/// The set of opaque operations the pipeline delegates to an external
/// neuroimaging toolkit.
///
/// A non-zero tool exit must surface as [`PipelineError::StageExecution`]
/// carrying the exit status and diagnostic text. Implementations must be
/// deterministic in the presence and shape of their outputs: same inputs
/// and options, same declared output files.
#[async_trait]
pub trait Toolkit: Send + Sync + std::fmt::Debug {
    /// Determines and applies motion correction.
    async fn motion_correct(&self, req: MotionCorrectRequest) -> Result<ToolOutcome, PipelineError>;

    /// Derives a distortion-correction warp field from a field map.
    async fn distortion_correct(
        &self,
        req: DistortionCorrectRequest,
    ) -> Result<ToolOutcome, PipelineError>;

    /// Registers a moving image to a fixed image.
    async fn register(&self, req: RegisterRequest) -> Result<ToolOutcome, PipelineError>;

    /// Brain-extracts and segments a structural image.
    async fn segment(&self, req: SegmentRequest) -> Result<ToolOutcome, PipelineError>;

    /// Computes an M0 scaling map.
    async fn calibrate(&self, req: CalibrateRequest) -> Result<ToolOutcome, PipelineError>;

    /// Fits the kinetic model.
    async fn fit_model(&self, req: FitModelRequest) -> Result<ToolOutcome, PipelineError>;
}
