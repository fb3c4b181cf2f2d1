//! Pipeline graph construction and validation.
//!
//! Dependency edges are implied by matching each stage's input artifact
//! names against prior stages' declared outputs. The graph is validated to
//! be acyclic at construction and a single topological order is computed
//! once; when several stages are simultaneously runnable the declared
//! construction order decides, so execution is deterministic.

mod standard;

pub use standard::{raw_input_names, standard_pipeline};

use crate::errors::{CycleDetectedError, GraphValidationError};
use crate::stage::Stage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A validated, ordered DAG of stages.
#[derive(Debug)]
pub struct PipelineGraph {
    name: String,
    stages: HashMap<String, Arc<dyn Stage>>,
    /// Topological execution order.
    order: Vec<String>,
    /// Artifact name to producing stage.
    producers: HashMap<String, String>,
    /// Stage to upstream stages, over required and optional inputs.
    dependencies: HashMap<String, Vec<String>>,
    /// Stage to required inputs that nothing can ever produce.
    unavailable: HashMap<String, Vec<String>>,
}

impl PipelineGraph {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// The topological execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name)
    }

    /// The stage producing the named artifact, if any.
    #[must_use]
    pub fn producer(&self, artifact: &str) -> Option<&str> {
        self.producers.get(artifact).map(String::as_str)
    }

    /// Upstream stages of `stage`, over required and optional inputs.
    #[must_use]
    pub fn dependencies(&self, stage: &str) -> &[String] {
        self.dependencies.get(stage).map_or(&[], Vec::as_slice)
    }

    /// Required inputs of `stage` that no raw input or upstream stage can
    /// supply. Non-empty means the stage is permanently unrunnable.
    #[must_use]
    pub fn unavailable_inputs(&self, stage: &str) -> &[String] {
        self.unavailable.get(stage).map_or(&[], Vec::as_slice)
    }
}

/// Builder for [`PipelineGraph`] with validation.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl GraphBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage in construction order.
    ///
    /// # Errors
    ///
    /// Returns an error on a duplicate stage name.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Result<Self, GraphValidationError> {
        let name = stage.name().to_string();
        if self.stages.iter().any(|s| s.name() == name) {
            return Err(GraphValidationError::new(format!(
                "duplicate stage '{name}'"
            ))
            .with_stages(vec![name]));
        }
        self.stages.push(stage);
        Ok(self)
    }

    /// Builds the graph, resolving edges against the raw input names.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty, two stages declare the
    /// same output, or the dependency edges form a cycle.
    pub fn build(self, raw_inputs: &HashSet<String>) -> Result<PipelineGraph, GraphValidationError> {
        if self.stages.is_empty() {
            return Err(GraphValidationError::new("pipeline has no stages"));
        }

        // Map each declared output to its producing stage.
        let mut producers: HashMap<String, String> = HashMap::new();
        for stage in &self.stages {
            for output in &stage.descriptor().outputs {
                if raw_inputs.contains(&output.name) {
                    return Err(GraphValidationError::new(format!(
                        "stage '{}' output '{}' collides with a raw input",
                        stage.name(),
                        output.name
                    ))
                    .with_stages(vec![stage.name().to_string()]));
                }
                if let Some(previous) = producers.insert(output.name.clone(), stage.name().to_string())
                {
                    return Err(GraphValidationError::new(format!(
                        "output '{}' declared by both '{}' and '{}'",
                        output.name,
                        previous,
                        stage.name()
                    ))
                    .with_stages(vec![previous, stage.name().to_string()]));
                }
            }
        }

        // Derive edges and spot required inputs nothing can produce.
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut unavailable: HashMap<String, Vec<String>> = HashMap::new();
        for stage in &self.stages {
            let descriptor = stage.descriptor();
            let mut deps: Vec<String> = Vec::new();
            for input in descriptor.required.iter().chain(&descriptor.optional) {
                if let Some(producer) = producers.get(input) {
                    if !deps.contains(producer) {
                        deps.push(producer.clone());
                    }
                }
            }
            for input in &descriptor.required {
                if !raw_inputs.contains(input) && !producers.contains_key(input) {
                    unavailable
                        .entry(descriptor.name.clone())
                        .or_default()
                        .push(input.clone());
                }
            }
            dependencies.insert(descriptor.name.clone(), deps);
        }

        detect_cycles(&self.stages, &dependencies)?;
        let order = topological_sort(&self.stages, &dependencies);

        Ok(PipelineGraph {
            name: self.name,
            stages: self
                .stages
                .into_iter()
                .map(|s| (s.name().to_string(), s))
                .collect(),
            order,
            producers,
            dependencies,
            unavailable,
        })
    }
}

fn detect_cycles(
    stages: &[Arc<dyn Stage>],
    dependencies: &HashMap<String, Vec<String>>,
) -> Result<(), GraphValidationError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for stage in stages {
        if !visited.contains(stage.name()) {
            if let Some(cycle) =
                dfs_cycle(stage.name(), dependencies, &mut visited, &mut rec_stack, &mut path)
            {
                return Err(CycleDetectedError::new(cycle).into());
            }
        }
    }
    Ok(())
}

fn dfs_cycle(
    node: &str,
    dependencies: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(deps) = dependencies.get(node) {
        for dep in deps {
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(dep, dependencies, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

/// Depth-first topological sort, visiting in construction order for a
/// deterministic tie-break.
fn topological_sort(
    stages: &[Arc<dyn Stage>],
    dependencies: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();

    fn visit(
        node: &str,
        dependencies: &HashMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) {
            return;
        }
        visited.insert(node.to_string());
        if let Some(deps) = dependencies.get(node) {
            for dep in deps {
                visit(dep, dependencies, visited, result);
            }
        }
        result.push(node.to_string());
    }

    for stage in stages {
        visit(stage.name(), dependencies, &mut visited, &mut result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, Category};
    use crate::context::StageContext;
    use crate::errors::PipelineError;
    use crate::stage::{Operation, OutputSpec, StageDescriptor};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Minimal stage that only carries a descriptor.
    #[derive(Debug)]
    struct Decl(StageDescriptor);

    impl Decl {
        fn stage(
            name: &str,
            required: &[&str],
            outputs: &[&str],
        ) -> Arc<dyn Stage> {
            let mut descriptor = StageDescriptor::new(name, Operation::InProcess)
                .with_required(required.iter().copied());
            for out in outputs {
                descriptor = descriptor.with_output(OutputSpec::new(
                    *out,
                    Category::Corrected,
                    ArtifactKind::Volume,
                ));
            }
            Arc::new(Decl(descriptor))
        }
    }

    #[async_trait]
    impl Stage for Decl {
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

    fn raw(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let graph = GraphBuilder::new("test")
            .stage(Decl::stage("c", &["b_out"], &["c_out"]))
            .unwrap()
            .stage(Decl::stage("a", &["raw"], &["a_out"]))
            .unwrap()
            .stage(Decl::stage("b", &["a_out"], &["b_out"]))
            .unwrap()
            .build(&raw(&["raw"]))
            .unwrap();

        let order = graph.execution_order();
        for (artifact, consumer) in [("a_out", "b"), ("b_out", "c")] {
            let producer = graph.producer(artifact).unwrap();
            let p = order.iter().position(|n| n == producer).unwrap();
            let c = order.iter().position(|n| n == consumer).unwrap();
            assert!(p < c, "{producer} must precede {consumer}");
        }
    }

    #[test]
    fn test_construction_order_breaks_ties() {
        // Two independent stages; declared order decides.
        let graph = GraphBuilder::new("test")
            .stage(Decl::stage("second", &["raw"], &["s_out"]))
            .unwrap()
            .stage(Decl::stage("first", &["raw"], &["f_out"]))
            .unwrap()
            .build(&raw(&["raw"]))
            .unwrap();

        assert_eq!(graph.execution_order(), ["second", "first"]);
    }

    #[test]
    fn test_cycle_detection() {
        let err = GraphBuilder::new("test")
            .stage(Decl::stage("a", &["b_out"], &["a_out"]))
            .unwrap()
            .stage(Decl::stage("b", &["a_out"], &["b_out"]))
            .unwrap()
            .build(&raw(&[]))
            .unwrap_err();

        assert!(err.message.contains("cycle"));
        assert!(!err.stages.is_empty());
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = GraphBuilder::new("test")
            .stage(Decl::stage("a", &[], &["a_out"]))
            .unwrap()
            .stage(Decl::stage("a", &[], &["other"]))
            .map(|_| ())
            .unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let err = GraphBuilder::new("test")
            .stage(Decl::stage("a", &[], &["out"]))
            .unwrap()
            .stage(Decl::stage("b", &[], &["out"]))
            .unwrap()
            .build(&raw(&[]))
            .unwrap_err();
        assert!(err.message.contains("declared by both"));
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = GraphBuilder::new("test").build(&raw(&[])).unwrap_err();
        assert!(err.message.contains("no stages"));
    }

    #[test]
    fn test_unavailable_required_inputs_reported() {
        let graph = GraphBuilder::new("test")
            .stage(Decl::stage("a", &["missing"], &["a_out"]))
            .unwrap()
            .build(&raw(&["raw"]))
            .unwrap();

        assert_eq!(graph.unavailable_inputs("a"), ["missing"]);
    }
}
