//! End-to-end orchestrator tests over the standard pipeline with a
//! scripted toolkit.

use super::{Orchestrator, RunReport, StageState};
use crate::artifact::ArtifactStore;
use crate::cancel::CancellationToken;
use crate::config::{AnalysisConfig, CalibrationMethod, ForceRecompute, RawInputs};
use crate::errors::PipelineError;
use crate::graph::standard_pipeline;
use crate::stage::artifacts;
use crate::testing::{Op, ScriptedToolkit, GZIP_MAGIC};
use crate::toolkit::Toolkit;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn write_input(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = GZIP_MAGIC.to_vec();
    bytes.extend_from_slice(name.as_bytes());
    std::fs::write(&path, bytes).unwrap();
    path
}

fn full_inputs(dir: &Path) -> RawInputs {
    RawInputs::new(write_input(dir, "asl.nii.gz"))
        .with_calib(write_input(dir, "m0.nii.gz"))
        .with_structural(write_input(dir, "t1.nii.gz"))
        .with_fieldmap(write_input(dir, "fmap.nii.gz"))
}

fn orchestrator(
    workspace: &Path,
    toolkit: Arc<dyn Toolkit>,
    config: &AnalysisConfig,
    inputs: &RawInputs,
) -> Orchestrator {
    let graph = standard_pipeline(toolkit, config, inputs).unwrap();
    let store = ArtifactStore::open(workspace, config.hash()).unwrap();
    Orchestrator::new(graph, store)
}

async fn run(
    workspace: &Path,
    toolkit: Arc<dyn Toolkit>,
    config: AnalysisConfig,
    inputs: &RawInputs,
) -> RunReport {
    orchestrator(workspace, Arc::clone(&toolkit), &config, inputs)
        .run(Arc::new(config), inputs)
        .await
        .unwrap()
}

fn assert_succeeded(report: &RunReport, name: &str, cached: bool) {
    match report.state(name) {
        Some(StageState::Succeeded { cached: c, .. }) => {
            assert_eq!(*c, cached, "stage '{name}' cached flag");
        }
        other => panic!("stage '{name}' expected Succeeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_fieldmap_skips_distcorr_only() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = RawInputs::new(write_input(tmp.path(), "asl.nii.gz"))
        .with_calib(write_input(tmp.path(), "m0.nii.gz"))
        .with_structural(write_input(tmp.path(), "t1.nii.gz"));
    let config = AnalysisConfig::default().resolved(&inputs);
    let workspace = tmp.path().join("out");

    let report = run(&workspace, Arc::new(ScriptedToolkit::new()), config, &inputs).await;

    match report.state("distcorr") {
        Some(StageState::Skipped { reason }) => {
            assert!(reason.contains(artifacts::FIELDMAP), "reason: {reason}");
        }
        other => panic!("distcorr expected Skipped, got {other:?}"),
    }
    for stage in ["moco", "struc", "reg", "rois", "calib", "basil", "native"] {
        assert_succeeded(&report, stage, false);
    }
    assert!(report.overall_success);
    assert!(workspace.join("native/perfusion_native.nii.gz").is_file());
    assert!(workspace.join("native/perfusion_calib.nii.gz").is_file());
    assert!(workspace.join("report/run_report.json").is_file());
}

#[tokio::test]
async fn test_refregion_without_reference_source_fails_preflight() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = RawInputs::new(write_input(tmp.path(), "asl.nii.gz"))
        .with_calib(write_input(tmp.path(), "m0.nii.gz"));
    let config = AnalysisConfig::default().with_calibration_method(CalibrationMethod::RefRegion);
    let toolkit = Arc::new(ScriptedToolkit::new());

    let err = orchestrator(&tmp.path().join("out"), toolkit.clone(), &config, &inputs)
        .run(Arc::new(config), &inputs)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    // Pre-flight rejection: nothing must have executed.
    assert_eq!(toolkit.total_calls(), 0);
}

#[tokio::test]
async fn test_rerun_reuses_every_cached_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = full_inputs(tmp.path());
    let config = AnalysisConfig::default().resolved(&inputs);
    let workspace = tmp.path().join("out");

    let first = run(&workspace, Arc::new(ScriptedToolkit::new()), config.clone(), &inputs).await;
    assert!(first.overall_success);

    let toolkit = Arc::new(ScriptedToolkit::new());
    let second = run(&workspace, toolkit.clone(), config, &inputs).await;

    for stage in ["moco", "distcorr", "struc", "reg", "rois", "calib", "basil", "native"] {
        assert_succeeded(&second, stage, true);
    }
    assert_eq!(toolkit.total_calls(), 0, "rerun must not invoke any tool");
    assert!(second.overall_success);
}

#[tokio::test]
async fn test_force_moco_recomputes_downstream_but_not_struc() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = full_inputs(tmp.path());
    let config = AnalysisConfig::default().resolved(&inputs);
    let workspace = tmp.path().join("out");

    run(&workspace, Arc::new(ScriptedToolkit::new()), config.clone(), &inputs).await;

    let forced = config.with_force_recompute(ForceRecompute::stages(["moco"]));
    let toolkit = Arc::new(ScriptedToolkit::new());
    let report = run(&workspace, toolkit.clone(), forced, &inputs).await;

    // The forced stage and everything downstream of it re-executes.
    assert_succeeded(&report, "moco", false);
    assert_succeeded(&report, "distcorr", false);
    assert_succeeded(&report, "reg", false);
    assert_succeeded(&report, "rois", false);
    assert_succeeded(&report, "calib", false);
    assert_succeeded(&report, "basil", false);
    assert_succeeded(&report, "native", false);
    // The structural branch does not depend on motion correction.
    assert_succeeded(&report, "struc", true);
    assert_eq!(toolkit.call_count(Op::Segment), 0);
    assert_eq!(toolkit.call_count(Op::MotionCorrect), 1);
}

#[tokio::test]
async fn test_failed_registration_skips_dependents_and_keeps_fit() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = full_inputs(tmp.path());
    let config = AnalysisConfig::default().resolved(&inputs);

    let toolkit = Arc::new(ScriptedToolkit::new());
    toolkit.fail(Op::Register, "degenerate transform");
    let report = run(&tmp.path().join("out"), toolkit.clone(), config, &inputs).await;

    match report.state("reg") {
        Some(StageState::Failed { error }) => {
            assert!(error.contains("degenerate transform"), "error: {error}");
        }
        other => panic!("reg expected Failed, got {other:?}"),
    }
    // Calibration needed the registration; the fit did not.
    match report.state("calib") {
        Some(StageState::Skipped { reason }) => {
            assert!(reason.contains("reg"), "reason: {reason}");
        }
        other => panic!("calib expected Skipped, got {other:?}"),
    }
    assert_succeeded(&report, "rois", false);
    assert_succeeded(&report, "basil", false);
    // Calibrated native output is impossible without an M0 map.
    assert!(report.state("native").unwrap().is_skipped());
    assert!(report.overall_success, "partial results still count");
}

#[tokio::test]
async fn test_minimal_inputs_with_failed_fit_still_partial_success() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = RawInputs::new(write_input(tmp.path(), "asl.nii.gz"));
    let config = AnalysisConfig::default()
        .without_motion_correction()
        .without_distortion_correction()
        .resolved(&inputs);

    let toolkit = Arc::new(ScriptedToolkit::new());
    toolkit.fail(Op::FitModel, "no convergence");
    let report = run(&tmp.path().join("out"), toolkit, config, &inputs).await;

    // struc and reg lack a structural image, rois feeds the fit, which
    // fails, and native needs the fit.
    assert!(report.state("struc").unwrap().is_skipped());
    assert!(report.state("reg").unwrap().is_skipped());
    assert!(report.state("basil").unwrap().is_failed());
    assert!(report.state("native").unwrap().is_skipped());
    // rois alone succeeded, so the run still counts as a success.
    assert_succeeded(&report, "rois", false);
    assert!(report.overall_success);
}

#[tokio::test]
async fn test_zero_successes_is_overall_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = RawInputs::new(write_input(tmp.path(), "asl.nii.gz"));
    let config = AnalysisConfig::default().resolved(&inputs);

    // A one-stage pipeline whose only stage fails: no stage succeeds, so
    // the run as a whole fails.
    let graph = crate::graph::GraphBuilder::new("failing")
        .stage(Arc::new(AlwaysFails::new()))
        .unwrap()
        .build(&crate::graph::raw_input_names(&inputs))
        .unwrap();
    let store = ArtifactStore::open(tmp.path().join("out"), config.hash()).unwrap();
    let report = Orchestrator::new(graph, store)
        .run(Arc::new(config), &inputs)
        .await
        .unwrap();

    assert!(report.state("fit").unwrap().is_failed());
    assert_eq!(report.stages.succeeded_count(), 0);
    assert!(!report.overall_success);
}

#[derive(Debug)]
struct AlwaysFails(crate::stage::StageDescriptor);

impl AlwaysFails {
    fn new() -> Self {
        Self(
            crate::stage::StageDescriptor::new("fit", crate::stage::Operation::FitModel)
                .with_required([artifacts::ASL]),
        )
    }
}

#[async_trait::async_trait]
impl crate::stage::Stage for AlwaysFails {
    fn descriptor(&self) -> &crate::stage::StageDescriptor {
        &self.0
    }

    async fn run(
        &self,
        _ctx: &crate::context::StageContext,
        _store: &ArtifactStore,
    ) -> Result<Vec<crate::artifact::Artifact>, PipelineError> {
        Err(PipelineError::stage_execution("basil", "exit code 1", "no data"))
    }
}

#[tokio::test]
async fn test_cancelled_token_rejects_run_upfront() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = RawInputs::new(write_input(tmp.path(), "asl.nii.gz"));
    let config = AnalysisConfig::default().resolved(&inputs);
    let cancel = CancellationToken::new();
    cancel.cancel("operator interrupt");

    let err = orchestrator(
        &tmp.path().join("out"),
        Arc::new(ScriptedToolkit::new()),
        &config,
        &inputs,
    )
    .with_cancellation(cancel)
    .run(Arc::new(config), &inputs)
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled(_)));
}

/// Delegating toolkit that cancels the run during its first operation, so
/// cancellation lands between the first and second stage.
#[derive(Debug)]
struct CancelDuringFirstOp {
    inner: ScriptedToolkit,
    token: Arc<CancellationToken>,
}

#[async_trait::async_trait]
impl Toolkit for CancelDuringFirstOp {
    async fn motion_correct(
        &self,
        req: crate::toolkit::MotionCorrectRequest,
    ) -> Result<crate::toolkit::ToolOutcome, PipelineError> {
        let outcome = self.inner.motion_correct(req).await;
        self.token.cancel("operator interrupt");
        outcome
    }

    async fn distortion_correct(
        &self,
        req: crate::toolkit::DistortionCorrectRequest,
    ) -> Result<crate::toolkit::ToolOutcome, PipelineError> {
        self.inner.distortion_correct(req).await
    }

    async fn register(
        &self,
        req: crate::toolkit::RegisterRequest,
    ) -> Result<crate::toolkit::ToolOutcome, PipelineError> {
        self.inner.register(req).await
    }

    async fn segment(
        &self,
        req: crate::toolkit::SegmentRequest,
    ) -> Result<crate::toolkit::ToolOutcome, PipelineError> {
        self.inner.segment(req).await
    }

    async fn calibrate(
        &self,
        req: crate::toolkit::CalibrateRequest,
    ) -> Result<crate::toolkit::ToolOutcome, PipelineError> {
        self.inner.calibrate(req).await
    }

    async fn fit_model(
        &self,
        req: crate::toolkit::FitModelRequest,
    ) -> Result<crate::toolkit::ToolOutcome, PipelineError> {
        self.inner.fit_model(req).await
    }
}

#[tokio::test]
async fn test_cancellation_between_stages_skips_the_rest() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = full_inputs(tmp.path());
    let config = AnalysisConfig::default().resolved(&inputs);
    let cancel = CancellationToken::new();
    let toolkit = Arc::new(CancelDuringFirstOp {
        inner: ScriptedToolkit::new(),
        token: Arc::clone(&cancel),
    });

    let report = orchestrator(&tmp.path().join("out"), toolkit.clone(), &config, &inputs)
        .with_cancellation(cancel)
        .run(Arc::new(config), &inputs)
        .await
        .unwrap();

    // The in-flight stage completed; nothing after it started.
    assert_succeeded(&report, "moco", false);
    for stage in ["distcorr", "struc", "reg", "rois", "calib", "basil", "native"] {
        match report.state(stage) {
            Some(StageState::Skipped { reason }) => {
                assert!(reason.contains("cancelled"), "reason: {reason}");
            }
            other => panic!("{stage} expected Skipped, got {other:?}"),
        }
    }
    assert_eq!(report.cancelled.as_deref(), Some("operator interrupt"));
    assert_eq!(toolkit.inner.total_calls(), 1);
    assert!(report.overall_success);
}

#[tokio::test]
async fn test_changed_config_invalidates_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = full_inputs(tmp.path());
    let workspace = tmp.path().join("out");
    let config = AnalysisConfig::default().resolved(&inputs);

    run(&workspace, Arc::new(ScriptedToolkit::new()), config, &inputs).await;

    // Same tree, different options: nothing may be reused.
    let changed = AnalysisConfig::default()
        .without_distortion_correction()
        .resolved(&inputs);
    let toolkit = Arc::new(ScriptedToolkit::new());
    let report = run(&workspace, toolkit.clone(), changed, &inputs).await;

    assert_succeeded(&report, "moco", false);
    assert_succeeded(&report, "struc", false);
    assert!(toolkit.total_calls() > 0);
}
