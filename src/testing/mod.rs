//! Test doubles for the external toolkit boundary.

use crate::errors::PipelineError;
use crate::toolkit::{
    CalibrateRequest, DistortionCorrectRequest, FitModelRequest, MotionCorrectRequest,
    RegisterRequest, SegmentRequest, ToolOutcome, Toolkit,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Leading bytes of a gzip stream, as written for fake volume outputs.
pub const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b, 0x08, 0x00];

/// The toolkit operations, for scripting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Motion correction.
    MotionCorrect,
    /// Distortion correction.
    DistortionCorrect,
    /// Registration.
    Register,
    /// Segmentation.
    Segment,
    /// Calibration.
    Calibrate,
    /// Kinetic model fitting.
    FitModel,
}

/// In-memory [`Toolkit`] that fabricates plausible output files.
///
/// Every requested output path is written with content that passes the
/// store's format checks: a gzip header for `.nii.gz` paths, a text matrix
/// otherwise. Individual operations can be scripted to fail, and all
/// invocations are recorded for assertions.
#[derive(Debug, Default)]
pub struct ScriptedToolkit {
    calls: Mutex<Vec<Op>>,
    failures: Mutex<HashSet<Op>>,
    diagnostics: Mutex<HashMap<Op, String>>,
}

impl ScriptedToolkit {
    /// Creates a toolkit where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the given operation to fail with the given diagnostics.
    pub fn fail(&self, op: Op, diagnostics: impl Into<String>) {
        self.failures.lock().insert(op);
        self.diagnostics.lock().insert(op, diagnostics.into());
    }

    /// Clears a scripted failure.
    pub fn repair(&self, op: Op) {
        self.failures.lock().remove(&op);
        self.diagnostics.lock().remove(&op);
    }

    /// Number of times the given operation was invoked.
    #[must_use]
    pub fn call_count(&self, op: Op) -> usize {
        self.calls.lock().iter().filter(|c| **c == op).count()
    }

    /// Total invocations across all operations.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// The recorded invocation sequence.
    #[must_use]
    pub fn invocations(&self) -> Vec<Op> {
        self.calls.lock().clone()
    }

    fn invoke(&self, op: Op, tool: &str, outputs: &[&PathBuf]) -> Result<ToolOutcome, PipelineError> {
        self.calls.lock().push(op);
        if self.failures.lock().contains(&op) {
            let diagnostics = self
                .diagnostics
                .lock()
                .get(&op)
                .cloned()
                .unwrap_or_default();
            return Err(PipelineError::stage_execution(tool, "exit code 1", diagnostics));
        }
        for out in outputs {
            write_fake(out)?;
        }
        Ok(ToolOutcome::default())
    }
}

fn write_fake(path: &Path) -> Result<(), PipelineError> {
    let name = path.display().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PipelineError::io_write(name.clone(), e))?;
    }
    let content: Vec<u8> = if name.ends_with(".nii.gz") {
        let mut bytes = GZIP_MAGIC.to_vec();
        bytes.extend_from_slice(b"fake");
        bytes
    } else {
        b"1 0 0 0\n0 1 0 0\n0 0 1 0\n0 0 0 1\n".to_vec()
    };
    std::fs::write(path, content).map_err(|e| PipelineError::io_write(name, e))
}

#[async_trait]
impl Toolkit for ScriptedToolkit {
    async fn motion_correct(&self, req: MotionCorrectRequest) -> Result<ToolOutcome, PipelineError> {
        self.invoke(
            Op::MotionCorrect,
            "motion_correct",
            &[&req.corrected_out, &req.transforms_out],
        )
    }

    async fn distortion_correct(
        &self,
        req: DistortionCorrectRequest,
    ) -> Result<ToolOutcome, PipelineError> {
        self.invoke(Op::DistortionCorrect, "distortion_correct", &[&req.warp_out])
    }

    async fn register(&self, req: RegisterRequest) -> Result<ToolOutcome, PipelineError> {
        self.invoke(
            Op::Register,
            "register",
            &[&req.forward_out, &req.inverse_out],
        )
    }

    async fn segment(&self, req: SegmentRequest) -> Result<ToolOutcome, PipelineError> {
        self.invoke(
            Op::Segment,
            "segment",
            &[&req.brain_out, &req.gm_out, &req.wm_out],
        )
    }

    async fn calibrate(&self, req: CalibrateRequest) -> Result<ToolOutcome, PipelineError> {
        let mut outputs = vec![&req.m0_out];
        if let Some(refmask) = &req.refmask_out {
            outputs.push(refmask);
        }
        self.invoke(Op::Calibrate, "calibrate", &outputs)
    }

    async fn fit_model(&self, req: FitModelRequest) -> Result<ToolOutcome, PipelineError> {
        self.invoke(
            Op::FitModel,
            "fit_model",
            &[&req.perfusion_out, &req.arrival_out, &req.modelfit_out],
        )
    }
}
