//! Referenced plugin registry
//!
//! Plugins are reusable step sequences addressed by id. The registry is
//! built once per invocation and validated up front: every plugin a step
//! references must exist and plugins must not reference each other in a
//! cycle. Expansion at execution time can then recurse without bounds
//! checks.

use std::collections::HashMap;

use super::errors::{PipelineError, ValidationError};
use super::request::RefPluginDefinition;
use super::steps::Step;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Read-only map from plugin id to its steps
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<u32, Vec<Step>>,
}

impl PluginRegistry {
    /// Builds and validates the registry
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownPlugin`] if a plugin step references
    /// an undefined plugin and [`ValidationError::PluginCycle`] if plugins
    /// reference each other in a cycle.
    pub fn new(definitions: Vec<RefPluginDefinition>) -> Result<Self, ValidationError> {
        let plugins = definitions
            .into_iter()
            .map(|def| (def.id, def.steps))
            .collect::<HashMap<_, _>>();
        let registry = Self { plugins };
        registry.check_graph()?;
        Ok(registry)
    }

    /// Creates an empty registry
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of registered plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns true if no plugins are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Checks that every plugin step in `steps` names a registered plugin
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownPlugin`] for the first unknown id.
    pub fn validate_steps(&self, steps: &[Step]) -> Result<(), ValidationError> {
        for plugin_id in steps.iter().filter_map(Step::plugin_id) {
            if !self.plugins.contains_key(&plugin_id) {
                return Err(ValidationError::UnknownPlugin { plugin_id });
            }
        }
        Ok(())
    }

    /// Owned copy of the steps of `plugin_id`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PluginNotFound`] if the id is unknown.
    pub fn expand(&self, plugin_id: u32) -> Result<Vec<Step>, PipelineError> {
        self.plugins
            .get(&plugin_id)
            .cloned()
            .ok_or(PipelineError::PluginNotFound { plugin_id })
    }

    fn check_graph(&self) -> Result<(), ValidationError> {
        let mut marks = HashMap::new();
        let mut ids: Vec<u32> = self.plugins.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let mut path = Vec::new();
            self.visit(id, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        id: u32,
        marks: &mut HashMap<u32, Mark>,
        path: &mut Vec<u32>,
    ) -> Result<(), ValidationError> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(id);
                return Err(ValidationError::PluginCycle { cycle });
            }
            None => {}
        }

        let steps = self
            .plugins
            .get(&id)
            .ok_or(ValidationError::UnknownPlugin { plugin_id: id })?;

        marks.insert(id, Mark::Visiting);
        path.push(id);
        for child in steps.iter().filter_map(Step::plugin_id) {
            self.visit(child, marks, path)?;
        }
        path.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }
}
