//! Error types for the aslflow pipeline core.
//!
//! Per-stage failures (`StageExecution`, `StageValidation`, `IoWrite`) are
//! caught at the orchestrator boundary and recorded in the run state; only
//! configuration and graph-construction errors abort a run before any stage
//! executes.

use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required artifact was requested but never produced.
    ///
    /// Indicates an internal invariant breach: a stage ran despite
    /// `is_runnable` being false.
    #[error("artifact not found: '{name}'")]
    ArtifactNotFound {
        /// The logical artifact name.
        name: String,
    },

    /// The output tree could not be created or written.
    #[error("failed to write artifact '{name}': {source}")]
    IoWrite {
        /// The logical artifact name (or path description).
        name: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An external tool terminated with a non-zero exit status.
    #[error("external tool '{tool}' failed ({status}): {diagnostics}")]
    StageExecution {
        /// The external program that failed.
        tool: String,
        /// Exit status description.
        status: String,
        /// Diagnostic text captured from the tool.
        diagnostics: String,
    },

    /// An external tool exited zero but a declared output is missing or
    /// malformed.
    #[error("stage '{stage}' declared output '{output}' but no usable file was produced")]
    StageValidation {
        /// The stage whose output is missing.
        stage: String,
        /// The missing output artifact name.
        output: String,
    },

    /// Invalid or contradictory analysis options. Fails fast before any
    /// stage runs.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The pipeline graph could not be constructed.
    #[error("{0}")]
    Graph(#[from] GraphValidationError),

    /// The workspace directory already exists.
    #[error("workspace directory already exists: {path}")]
    WorkspaceExists {
        /// The offending path.
        path: String,
    },

    /// Another run holds the workspace lock.
    #[error("workspace is locked by another run: {path}")]
    WorkspaceLocked {
        /// The lock file path.
        path: String,
    },

    /// The run was cancelled between stages.
    #[error("run cancelled: {0}")]
    Cancelled(String),
}

impl PipelineError {
    /// Creates an artifact-not-found error.
    #[must_use]
    pub fn artifact_not_found(name: impl Into<String>) -> Self {
        Self::ArtifactNotFound { name: name.into() }
    }

    /// Creates an I/O write error.
    #[must_use]
    pub fn io_write(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoWrite {
            name: name.into(),
            source,
        }
    }

    /// Creates a stage execution error from an external tool failure.
    #[must_use]
    pub fn stage_execution(
        tool: impl Into<String>,
        status: impl Into<String>,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self::StageExecution {
            tool: tool.into(),
            status: status.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Creates a stage validation error for a missing declared output.
    #[must_use]
    pub fn stage_validation(stage: impl Into<String>, output: impl Into<String>) -> Self {
        Self::StageValidation {
            stage: stage.into(),
            output: output.into(),
        }
    }

    /// Returns true if the error should abort the whole run rather than
    /// fail a single stage.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Graph(_)
                | Self::WorkspaceExists { .. }
                | Self::WorkspaceLocked { .. }
        )
    }
}

/// Error raised by pre-flight validation of the analysis configuration.
#[derive(Debug, Clone, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigurationError {
    /// Description of the contradiction.
    pub message: String,
    /// Hint for fixing the configuration.
    pub fix_hint: Option<String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when pipeline graph construction fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for GraphValidationError {
    fn from(err: CycleDetectedError) -> Self {
        GraphValidationError {
            message: err.to_string(),
            stages: err.cycle_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_message() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_configuration_error_is_fatal() {
        let err: PipelineError = ConfigurationError::new("bad options").into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_stage_execution_is_not_fatal() {
        let err = PipelineError::stage_execution("flirt", "exit code 1", "boom");
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("flirt"));
    }

    #[test]
    fn test_graph_error_carries_stages() {
        let err = GraphValidationError::new("duplicate stage")
            .with_stages(vec!["moco".to_string()]);
        assert_eq!(err.stages, vec!["moco"]);
    }
}
