//! Input variable resolution
//!
//! A step's inputs are resolved against the global environment and the
//! output maps of the stages visible at that point. Global references are
//! best effort; stage references must exist.

use std::collections::BTreeMap;

use crate::pipeline::{
    GlobalEnv, PipelineError, PipelineResult, StepRef, Variable, VariableSource,
};

/// Outputs of one stage, `step index -> (name -> variable)`
///
/// Entries are append-only: once a step's outputs are recorded they cannot
/// be rewritten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutputs {
    steps: BTreeMap<usize, BTreeMap<String, Variable>>,
}

impl StageOutputs {
    /// Creates an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outputs of the step at `step_index`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateStepOutput`] if outputs were already
    /// recorded for that index.
    pub fn record(&mut self, step_index: usize, outputs: Vec<Variable>) -> PipelineResult {
        if self.steps.contains_key(&step_index) {
            return Err(PipelineError::DuplicateStepOutput { step_index });
        }
        let by_name = outputs
            .into_iter()
            .map(|var| (var.name.clone(), var))
            .collect();
        self.steps.insert(step_index, by_name);
        Ok(())
    }

    /// Output `name` of the step at `step_index`
    #[must_use]
    pub fn get(&self, step_index: usize, name: &str) -> Option<&Variable> {
        self.steps.get(&step_index)?.get(name)
    }

    /// Number of steps with recorded outputs
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no step recorded outputs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Stage output maps visible to a step
#[derive(Debug, Clone, Copy, Default)]
pub struct Scopes<'a> {
    /// Pre-CI outputs
    pub pre_ci: Option<&'a StageOutputs>,
    /// Post-CI outputs
    pub post_ci: Option<&'a StageOutputs>,
    /// Outputs of sibling plugin sub-steps
    pub plugin: Option<&'a StageOutputs>,
}

/// Resolves `inputs` in declaration order
///
/// Literal inputs pass through untouched. Every other input is filled from
/// its scope and then type checked.
///
/// # Errors
///
/// Returns [`PipelineError::ReferenceNotFound`] when a stage reference is
/// missing, or [`PipelineError::TypeMismatch`] when a resolved value does not
/// match the declared format.
pub fn resolve_inputs(
    inputs: &[Variable],
    global: &GlobalEnv,
    scopes: Scopes<'_>,
) -> PipelineResult<Vec<Variable>> {
    inputs
        .iter()
        .map(|input| resolve_one(input, global, scopes))
        .collect()
}

fn resolve_one(input: &Variable, global: &GlobalEnv, scopes: Scopes<'_>) -> PipelineResult<Variable> {
    let value = match &input.source {
        VariableSource::Literal => return Ok(input.clone()),
        VariableSource::Global { name } => global.get(name).unwrap_or_default().to_string(),
        VariableSource::PreCi(reference) => lookup(scopes.pre_ci, reference, &input.name)?,
        VariableSource::PostCi(reference) => lookup(scopes.post_ci, reference, &input.name)?,
        VariableSource::Plugin(reference) => lookup(scopes.plugin, reference, &input.name)?,
    };

    let mut resolved = input.clone();
    resolved.value = value;
    resolved.type_check()?;
    tracing::debug!(variable = %resolved.name, value = %resolved.value, "Resolved input");
    Ok(resolved)
}

fn lookup(
    scope: Option<&StageOutputs>,
    reference: &StepRef,
    variable: &str,
) -> PipelineResult<String> {
    scope
        .and_then(|outputs| outputs.get(reference.step_index, &reference.name))
        .map(|found| found.value.clone())
        .ok_or_else(|| PipelineError::ReferenceNotFound {
            variable: variable.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Format;
    use pretty_assertions::assert_eq;

    fn pre_outputs() -> StageOutputs {
        let mut outputs = StageOutputs::new();
        outputs
            .record(1, vec![Variable::literal("VERSION", "1.4.2")])
            .unwrap();
        outputs
    }

    #[test]
    fn test_literal_and_global() {
        let global = GlobalEnv::from_pairs([("DOCKER_REGISTRY_URL", "registry.example.com")]);
        let inputs = vec![
            Variable::literal("TAG", "v1"),
            Variable::global("REGISTRY", "DOCKER_REGISTRY_URL"),
        ];
        let resolved = resolve_inputs(&inputs, &global, Scopes::default()).unwrap();
        let values: Vec<_> = resolved
            .iter()
            .map(|v| (v.name.as_str(), v.value.as_str()))
            .collect();
        assert_eq!(values, vec![("TAG", "v1"), ("REGISTRY", "registry.example.com")]);
    }

    #[test]
    fn test_missing_global_is_empty() {
        let inputs = vec![Variable::global("X", "NOT_SET").with_format(Format::Number)];
        let resolved = resolve_inputs(&inputs, &GlobalEnv::default(), Scopes::default()).unwrap();
        assert_eq!(resolved[0].value, "");
    }

    #[test]
    fn test_pre_ci_reference() {
        let pre = pre_outputs();
        let scopes = Scopes {
            pre_ci: Some(&pre),
            ..Scopes::default()
        };
        let inputs = vec![Variable::pre_ci("APP_VERSION", 1, "VERSION")];
        let resolved = resolve_inputs(&inputs, &GlobalEnv::default(), scopes).unwrap();
        assert_eq!(resolved[0].value, "1.4.2");
    }

    #[test]
    fn test_missing_step_index_is_fatal() {
        let pre = pre_outputs();
        let scopes = Scopes {
            pre_ci: Some(&pre),
            ..Scopes::default()
        };
        let inputs = vec![Variable::pre_ci("APP_VERSION", 2, "VERSION")];
        let err = resolve_inputs(&inputs, &GlobalEnv::default(), scopes).unwrap_err();
        assert_eq!(err.to_string(), "RUNTIME_ERROR_APP_VERSION_not_found");
    }

    #[test]
    fn test_missing_name_is_fatal() {
        let pre = pre_outputs();
        let scopes = Scopes {
            pre_ci: Some(&pre),
            ..Scopes::default()
        };
        let inputs = vec![Variable::pre_ci("APP_VERSION", 1, "OTHER")];
        assert!(resolve_inputs(&inputs, &GlobalEnv::default(), scopes).is_err());
    }

    #[test]
    fn test_absent_scope_is_fatal() {
        let inputs = vec![Variable::post_ci("X", 1, "VERSION")];
        let err = resolve_inputs(&inputs, &GlobalEnv::default(), Scopes::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ReferenceNotFound { .. }));
    }

    #[test]
    fn test_coercion_failure_is_fatal() {
        let pre = pre_outputs();
        let scopes = Scopes {
            pre_ci: Some(&pre),
            ..Scopes::default()
        };
        let inputs = vec![Variable::pre_ci("N", 1, "VERSION").with_format(Format::Number)];
        let err = resolve_inputs(&inputs, &GlobalEnv::default(), scopes).unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
    }

    #[test]
    fn test_outputs_are_append_only() {
        let mut outputs = pre_outputs();
        let err = outputs.record(1, vec![]).unwrap_err();
        assert_eq!(err, PipelineError::DuplicateStepOutput { step_index: 1 });
        assert_eq!(outputs.get(1, "VERSION").unwrap().value, "1.4.2");
    }
}
