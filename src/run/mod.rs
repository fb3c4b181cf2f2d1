//! Sequential pipeline execution and run reporting.
//!
//! The orchestrator walks the graph's topological order one stage at a
//! time. A stage failure never aborts the run: downstream stages that
//! depended on the failed stage are skipped and independent branches
//! continue, so one run extracts every result the supplied inputs allow.

#[cfg(test)]
mod scenario_tests;

use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category, Provenance};
use crate::cancel::CancellationToken;
use crate::config::{AnalysisConfig, RawInputs};
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::graph::PipelineGraph;
use crate::stage::artifacts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

const REPORT_FILE: &str = "run_report.json";

/// Lifecycle state of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageState {
    /// Not reached yet.
    NotRun,
    /// Deliberately not executed; the reason names the missing input or
    /// upstream failure.
    Skipped {
        /// Why the stage did not execute.
        reason: String,
    },
    /// Currently executing.
    Running,
    /// Completed with all declared outputs validated.
    Succeeded {
        /// True when prior validated outputs were reused without
        /// re-executing the stage.
        cached: bool,
        /// The artifacts the stage produced (or reproduced from cache).
        artifacts: Vec<Artifact>,
    },
    /// Executed and failed.
    Failed {
        /// Rendered error.
        error: String,
    },
}

impl StageState {
    /// True for `Succeeded`, cached or not.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// True for `Skipped`.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// True for `Failed`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Per-stage record in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Final state.
    pub state: StageState,
    /// Wall-clock execution time; zero when the stage did not execute.
    pub duration_ms: u64,
}

/// The states of every stage in a run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    records: Vec<StageRecord>,
}

impl RunState {
    fn new(order: &[String]) -> Self {
        Self {
            records: order
                .iter()
                .map(|name| StageRecord {
                    name: name.clone(),
                    state: StageState::NotRun,
                    duration_ms: 0,
                })
                .collect(),
        }
    }

    fn set(&mut self, name: &str, state: StageState) {
        if let Some(record) = self.records.iter_mut().find(|r| r.name == name) {
            record.state = state;
        }
    }

    fn set_duration(&mut self, name: &str, duration_ms: u64) {
        if let Some(record) = self.records.iter_mut().find(|r| r.name == name) {
            record.duration_ms = duration_ms;
        }
    }

    /// The state of the named stage.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&StageState> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.state)
    }

    /// All records in execution order.
    #[must_use]
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Number of stages that succeeded, cached reuse included.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.records.iter().filter(|r| r.state.is_succeeded()).count()
    }
}

/// Summary of one pipeline run, persisted under `report/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Hash of the configuration the run executed under.
    pub config_hash: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-stage outcomes in execution order.
    pub stages: RunState,
    /// Cancellation reason, when the run was cancelled between stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<String>,
    /// False only when no stage at all succeeded.
    pub overall_success: bool,
}

impl RunReport {
    /// The state of the named stage.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&StageState> {
        self.stages.state(name)
    }
}

/// Executes a [`PipelineGraph`] against an [`ArtifactStore`], one stage at
/// a time.
#[derive(Debug)]
pub struct Orchestrator {
    graph: PipelineGraph,
    store: ArtifactStore,
    cancel: Arc<CancellationToken>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(graph: PipelineGraph, store: ArtifactStore) -> Self {
        Self {
            graph,
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses an externally held cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The store the orchestrator writes into.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs the pipeline to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only for faults that preclude running at all:
    /// invalid configuration, failure to import the raw inputs, or a token
    /// already cancelled before the first stage. Stage failures are
    /// recorded in the report, never returned.
    pub async fn run(
        &self,
        config: Arc<AnalysisConfig>,
        inputs: &RawInputs,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, pipeline = %self.graph.name());
        let _guard = span.enter();

        config.validate(inputs)?;
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(
                self.cancel.reason().unwrap_or_default(),
            ));
        }

        let started_at = Utc::now();
        let mut ctx = self.import_inputs(Arc::clone(&config), inputs)?;
        let mut state = RunState::new(self.graph.execution_order());
        // Stages that actually re-executed this run; their dependents must
        // not reuse cached outputs.
        let mut reran: HashSet<String> = HashSet::new();
        let mut cancelled: Option<String> = None;

        info!(
            stages = self.graph.stage_count(),
            order = ?self.graph.execution_order(),
            "starting pipeline run"
        );

        for name in self.graph.execution_order() {
            if self.cancel.is_cancelled() {
                let reason = self.cancel.reason().unwrap_or_default();
                warn!(%reason, "run cancelled; skipping remaining stages");
                state.set(
                    name,
                    StageState::Skipped {
                        reason: format!("run cancelled: {reason}"),
                    },
                );
                cancelled = Some(reason);
                continue;
            }

            let stage = match self.graph.stage(name) {
                Some(s) => s,
                None => continue,
            };

            if !stage.is_runnable(&ctx) {
                let reason = self
                    .skip_reason(name, &ctx, &state)
                    .unwrap_or_else(|| "required inputs missing".to_string());
                info!(stage = %name, %reason, "stage skipped");
                state.set(name, StageState::Skipped { reason });
                continue;
            }

            if let Some(cached) = self.cached_outputs(name, &config, &reran) {
                info!(stage = %name, "reusing validated cached outputs");
                ctx = ctx.with_artifacts(cached.clone());
                state.set(
                    name,
                    StageState::Succeeded {
                        cached: true,
                        artifacts: cached,
                    },
                );
                continue;
            }

            state.set(name, StageState::Running);
            info!(stage = %name, "stage started");
            let timer = Instant::now();
            let result = stage.run(&ctx, &self.store).await;
            let duration_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);
            state.set_duration(name, duration_ms);

            match result {
                Ok(produced) => {
                    info!(stage = %name, duration_ms, outputs = produced.len(), "stage succeeded");
                    ctx = ctx.with_artifacts(produced.clone());
                    reran.insert(name.clone());
                    state.set(
                        name,
                        StageState::Succeeded {
                            cached: false,
                            artifacts: produced,
                        },
                    );
                }
                Err(e) => {
                    error!(stage = %name, error = %e, "stage failed");
                    state.set(
                        name,
                        StageState::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        let overall_success = state.succeeded_count() > 0;
        let report = RunReport {
            run_id,
            pipeline: self.graph.name().to_string(),
            config_hash: config.hash(),
            started_at,
            finished_at: Utc::now(),
            stages: state,
            cancelled,
            overall_success,
        };
        self.write_report(&report)?;
        info!(overall_success, "run finished");
        Ok(report)
    }

    /// Brings the supplied raw files under `input/` and seeds the context.
    ///
    /// A file already ingested by a prior run under the same configuration
    /// is reused without copying again.
    fn import_inputs(
        &self,
        config: Arc<AnalysisConfig>,
        inputs: &RawInputs,
    ) -> Result<StageContext, PipelineError> {
        let mut sources: Vec<(&str, &Path, ArtifactKind)> =
            vec![(artifacts::ASL, inputs.asl.as_path(), ArtifactKind::Volume)];
        if let Some(calib) = &inputs.calib {
            sources.push((artifacts::CALIB, calib, ArtifactKind::Volume));
        }
        if let Some(struc) = &inputs.structural {
            sources.push((artifacts::STRUC, struc, ArtifactKind::Volume));
        }
        if let Some(fieldmap) = &inputs.fieldmap {
            sources.push((artifacts::FIELDMAP, fieldmap, ArtifactKind::Volume));
        }
        if let Some(mask) = &inputs.refregion_mask {
            sources.push((artifacts::REFREGION_MASK, mask, ArtifactKind::Mask));
        }

        let mut imported = Vec::with_capacity(sources.len());
        for (name, source, kind) in sources {
            let artifact = if self.store.exists(name) {
                self.store.get(name)?
            } else {
                self.store
                    .ingest(Category::Input, name, kind, Provenance::RawInput, source)?
            };
            imported.push(artifact);
        }
        Ok(StageContext::new(config).with_artifacts(imported))
    }

    /// Why the stage cannot run, or `None` when it can.
    fn skip_reason(&self, name: &str, ctx: &StageContext, state: &RunState) -> Option<String> {
        let stage = self.graph.stage(name)?;
        let mut reasons: Vec<String> = Vec::new();
        for input in &stage.descriptor().required {
            if ctx.has(input) {
                continue;
            }
            match self.graph.producer(input) {
                Some(producer) => match state.state(producer) {
                    Some(StageState::Failed { .. }) => {
                        reasons.push(format!("upstream stage '{producer}' failed"));
                    }
                    Some(StageState::Skipped { .. }) => {
                        reasons.push(format!("upstream stage '{producer}' was skipped"));
                    }
                    _ => reasons.push(format!("input '{input}' was not produced")),
                },
                None => reasons.push(format!("raw input '{input}' was not supplied")),
            }
        }
        if reasons.is_empty() {
            None
        } else {
            reasons.sort();
            reasons.dedup();
            Some(reasons.join("; "))
        }
    }

    /// The stage's cached outputs, when every declared output still
    /// validates, the stage is not forced, and no upstream re-executed.
    fn cached_outputs(
        &self,
        name: &str,
        config: &AnalysisConfig,
        reran: &HashSet<String>,
    ) -> Option<Vec<Artifact>> {
        if config.force_recompute.covers(name) {
            return None;
        }
        if self
            .graph
            .dependencies(name)
            .iter()
            .any(|dep| reran.contains(dep))
        {
            return None;
        }
        let stage = self.graph.stage(name)?;
        let outputs = &stage.descriptor().outputs;
        if outputs.is_empty() || !outputs.iter().all(|out| self.store.exists(&out.name)) {
            return None;
        }
        outputs
            .iter()
            .map(|out| self.store.get(&out.name).ok())
            .collect()
    }

    fn write_report(&self, report: &RunReport) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| PipelineError::io_write(REPORT_FILE, std::io::Error::other(e)))?;
        let path = self
            .store
            .root()
            .join(Category::Report.dir_name())
            .join(REPORT_FILE);
        std::fs::write(path, json).map_err(|e| PipelineError::io_write(REPORT_FILE, e))
    }
}
