//! # aslflow
//!
//! Orchestration core for an arterial spin labelling (ASL) perfusion
//! analysis pipeline.
//!
//! The crate turns one subject's raw images into a populated output tree
//! by running a fixed roster of processing stages in dependency order:
//!
//! - **Declared dependencies**: stages name their input and output
//!   artifacts; the graph and execution order are derived, never hand-wired
//! - **Partial results**: a failed stage skips its dependents and the rest
//!   of the run continues, so one run extracts everything the inputs allow
//! - **Idempotent reruns**: validated outputs from a prior run under the
//!   same configuration are reused without re-executing their stages
//! - **Opaque tools**: all image processing is delegated to an external
//!   toolkit behind a trait; the core never interprets voxel data
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aslflow::prelude::*;
//! use std::sync::Arc;
//!
//! let inputs = RawInputs::new("asl.nii.gz")
//!     .with_calib("m0.nii.gz")
//!     .with_structural("t1.nii.gz");
//! let config = AnalysisConfig::default().resolved(&inputs);
//!
//! let workspace = Workspace::create("subject01")?;
//! let toolkit: Arc<dyn Toolkit> = Arc::new(CommandToolkit::new());
//! let graph = standard_pipeline(toolkit, &config, &inputs)?;
//! let store = workspace.open_store(config.hash())?;
//!
//! let report = Orchestrator::new(graph, store)
//!     .run(Arc::new(config), &inputs)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod artifact;
pub mod cancel;
pub mod config;
pub mod context;
pub mod errors;
pub mod graph;
pub mod observability;
pub mod run;
pub mod stage;
pub mod testing;
pub mod toolkit;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category, Provenance};
    pub use crate::cancel::CancellationToken;
    pub use crate::config::{AnalysisConfig, CalibrationMethod, ForceRecompute, RawInputs};
    pub use crate::context::StageContext;
    pub use crate::errors::{ConfigurationError, GraphValidationError, PipelineError};
    pub use crate::graph::{standard_pipeline, GraphBuilder, PipelineGraph};
    pub use crate::run::{Orchestrator, RunReport, RunState, StageState};
    pub use crate::stage::{Stage, StageDescriptor};
    pub use crate::toolkit::{CommandToolkit, ToolOutcome, ToolPrograms, Toolkit};
    pub use crate::workspace::Workspace;
}
