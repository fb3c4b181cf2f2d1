//! Immutable stage context.
//!
//! A [`StageContext`] is a snapshot of the analysis configuration plus every
//! artifact produced so far. Stages never mutate it; after each successful
//! stage the orchestrator derives a new context with the fresh outputs
//! added, which fixes the causal order of artifact visibility.

use crate::artifact::Artifact;
use crate::config::AnalysisConfig;
use crate::errors::PipelineError;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable bundle of configuration and visible artifacts.
#[derive(Debug, Clone)]
pub struct StageContext {
    config: Arc<AnalysisConfig>,
    artifacts: Arc<HashMap<String, Artifact>>,
}

impl StageContext {
    /// Creates a context with no artifacts.
    #[must_use]
    pub fn new(config: Arc<AnalysisConfig>) -> Self {
        Self {
            config,
            artifacts: Arc::new(HashMap::new()),
        }
    }

    /// The analysis configuration.
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Returns true if an artifact with the given name is visible.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }

    /// Looks up an artifact by name.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// Looks up a required artifact.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ArtifactNotFound`]; reaching this from a
    /// stage body means `is_runnable` was not honoured.
    pub fn require(&self, name: &str) -> Result<&Artifact, PipelineError> {
        self.artifacts
            .get(name)
            .ok_or_else(|| PipelineError::artifact_not_found(name))
    }

    /// Number of visible artifacts.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Derives a new context with additional artifacts visible.
    /// The original context is unchanged.
    #[must_use]
    pub fn with_artifacts(&self, new: impl IntoIterator<Item = Artifact>) -> Self {
        let mut artifacts: HashMap<String, Artifact> = (*self.artifacts).clone();
        for artifact in new {
            artifacts.insert(artifact.name.clone(), artifact);
        }
        Self {
            config: Arc::clone(&self.config),
            artifacts: Arc::new(artifacts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactKind, Category, Provenance};
    use pretty_assertions::assert_eq;

    fn artifact(name: &str) -> Artifact {
        Artifact {
            name: name.to_string(),
            category: Category::Input,
            kind: ArtifactKind::Volume,
            path: format!("/tmp/{name}.nii.gz").into(),
            provenance: Provenance::RawInput,
        }
    }

    #[test]
    fn test_empty_context() {
        let ctx = StageContext::new(Arc::new(AnalysisConfig::default()));
        assert_eq!(ctx.artifact_count(), 0);
        assert!(!ctx.has("asl"));
        assert!(ctx.require("asl").is_err());
    }

    #[test]
    fn test_with_artifacts_extends_a_copy() {
        let base = StageContext::new(Arc::new(AnalysisConfig::default()));
        let extended = base.with_artifacts([artifact("asl")]);

        assert!(extended.has("asl"));
        assert_eq!(extended.artifact_count(), 1);
        // The original snapshot is untouched.
        assert!(!base.has("asl"));
    }

    #[test]
    fn test_require_returns_artifact() {
        let ctx = StageContext::new(Arc::new(AnalysisConfig::default()))
            .with_artifacts([artifact("asl")]);
        assert_eq!(ctx.require("asl").unwrap().name, "asl");
    }
}
