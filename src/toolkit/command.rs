//! Toolkit implementation that shells out to external programs.

use super::{
    CalibrateRequest, DistortionCorrectRequest, FitModelRequest, MotionCorrectRequest,
    RegisterRequest, SegmentRequest, ToolOutcome, Toolkit,
};
use crate::config::CalibrationMethod;
use crate::errors::PipelineError;
use async_trait::async_trait;
use std::ffi::OsString;
use tracing::{debug, info};

/// Program names for each external operation, overridable for non-standard
/// installations.
#[derive(Debug, Clone)]
pub struct ToolPrograms {
    /// Motion correction program.
    pub motion_correct: String,
    /// Distortion correction program.
    pub distortion_correct: String,
    /// Registration program.
    pub register: String,
    /// Segmentation program.
    pub segment: String,
    /// Calibration program.
    pub calibrate: String,
    /// Kinetic model fitting program.
    pub fit_model: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            motion_correct: "mcflirt".to_string(),
            distortion_correct: "fugue".to_string(),
            register: "flirt".to_string(),
            segment: "fast".to_string(),
            calibrate: "asl_calib".to_string(),
            fit_model: "basil".to_string(),
        }
    }
}

/// Invokes external neuroimaging programs as child processes.
///
/// Each call blocks (asynchronously) until the child terminates; the
/// pipeline consumes no partial results mid-operation. Stderr is captured
/// as the diagnostic text.
#[derive(Debug, Default)]
pub struct CommandToolkit {
    programs: ToolPrograms,
}

impl CommandToolkit {
    /// Creates a toolkit using the default program names.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a toolkit with overridden program names.
    #[must_use]
    pub fn with_programs(programs: ToolPrograms) -> Self {
        Self { programs }
    }

    async fn run(&self, program: &str, args: Vec<OsString>) -> Result<ToolOutcome, PipelineError> {
        debug!(%program, ?args, "invoking external tool");
        let output = tokio::process::Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                PipelineError::stage_execution(program, "failed to spawn", e.to_string())
            })?;

        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            info!(%program, "external tool completed");
            Ok(ToolOutcome::new(diagnostics))
        } else {
            let status = output
                .status
                .code()
                .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
            Err(PipelineError::stage_execution(program, status, diagnostics))
        }
    }
}

fn os(s: impl Into<OsString>) -> OsString {
    s.into()
}

#[async_trait]
impl Toolkit for CommandToolkit {
    async fn motion_correct(&self, req: MotionCorrectRequest) -> Result<ToolOutcome, PipelineError> {
        self.run(
            &self.programs.motion_correct,
            vec![
                os("-in"),
                os(req.asl),
                os("-out"),
                os(req.corrected_out),
                os("-mats"),
                os(req.transforms_out),
            ],
        )
        .await
    }

    async fn distortion_correct(
        &self,
        req: DistortionCorrectRequest,
    ) -> Result<ToolOutcome, PipelineError> {
        self.run(
            &self.programs.distortion_correct,
            vec![
                os("--in"),
                os(req.asl),
                os("--loadfmap"),
                os(req.fieldmap),
                os("--saveshift"),
                os(req.warp_out),
            ],
        )
        .await
    }

    async fn register(&self, req: RegisterRequest) -> Result<ToolOutcome, PipelineError> {
        self.run(
            &self.programs.register,
            vec![
                os("-in"),
                os(req.moving),
                os("-ref"),
                os(req.fixed),
                os("-omat"),
                os(req.forward_out),
                os("-oinvmat"),
                os(req.inverse_out),
            ],
        )
        .await
    }

    async fn segment(&self, req: SegmentRequest) -> Result<ToolOutcome, PipelineError> {
        self.run(
            &self.programs.segment,
            vec![
                os(req.structural),
                os("--brain"),
                os(req.brain_out),
                os("--gm-pv"),
                os(req.gm_out),
                os("--wm-pv"),
                os(req.wm_out),
            ],
        )
        .await
    }

    async fn calibrate(&self, req: CalibrateRequest) -> Result<ToolOutcome, PipelineError> {
        let mut args = vec![
            os("--calib"),
            os(req.calib),
            os("--method"),
            os(req.method.to_string()),
            os("--out"),
            os(req.m0_out),
        ];
        if req.method == CalibrationMethod::RefRegion {
            if let Some(mask) = req.reference_mask {
                args.push(os("--refmask"));
                args.push(os(mask));
            }
            if let Some(out) = req.refmask_out {
                args.push(os("--save-refmask"));
                args.push(os(out));
            }
        }
        self.run(&self.programs.calibrate, args).await
    }

    async fn fit_model(&self, req: FitModelRequest) -> Result<ToolOutcome, PipelineError> {
        let mut args = vec![
            os("--data"),
            os(req.asl),
            os("--mask"),
            os(req.mask),
            os("--perfusion"),
            os(req.perfusion_out),
            os("--arrival"),
            os(req.arrival_out),
            os("--modelfit"),
            os(req.modelfit_out),
        ];
        if let Some(m0) = req.m0 {
            args.push(os("--m0"));
            args.push(os(m0));
        }
        self.run(&self.programs.fit_model, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_programs() {
        let programs = ToolPrograms::default();
        assert_eq!(programs.motion_correct, "mcflirt");
        assert_eq!(programs.fit_model, "basil");
    }

    #[tokio::test]
    async fn test_missing_program_is_stage_execution_error() {
        let toolkit = CommandToolkit::with_programs(ToolPrograms {
            motion_correct: "aslflow-no-such-program".to_string(),
            ..ToolPrograms::default()
        });
        let err = toolkit
            .motion_correct(MotionCorrectRequest {
                asl: "asl.nii.gz".into(),
                corrected_out: "out.nii.gz".into(),
                transforms_out: "out.mat".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageExecution { .. }));
    }
}
