//! In-memory definition and result stores.
//!
//! Both are `DashMap`-backed so the engine can be shared across tasks without
//! an outer lock. Neither is persisted; contents live for the process.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowgate_types::workflow::{StepResult, WorkflowStatus};

use super::definition::{WorkflowDefinition, WorkflowError, validate_definition};

/// Registered workflow definitions, keyed by name.
#[derive(Default)]
pub struct DefinitionStore {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a definition under `name`.
    ///
    /// Names are write-once: a second registration under the same name fails
    /// with `DuplicateWorkflowName` and leaves the first one in place.
    pub fn register(
        &self,
        name: &str,
        mut definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        if self.definitions.contains_key(name) {
            return Err(WorkflowError::DuplicateWorkflowName(name.to_string()));
        }

        definition.name = name.to_string();
        validate_definition(&definition)?;

        match self.definitions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(WorkflowError::DuplicateWorkflowName(name.to_string())),
            Entry::Vacant(slot) => {
                let definition = Arc::new(definition);
                slot.insert(Arc::clone(&definition));
                tracing::debug!(
                    workflow = %name,
                    steps = definition.steps.len(),
                    "registered workflow"
                );
                Ok(definition)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(name).map(|e| Arc::clone(e.value()))
    }

    /// All definitions, sorted by name.
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut all: Vec<_> = self
            .definitions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Step outcomes of the most recent completed run per workflow.
#[derive(Default)]
pub struct ResultStore {
    results: DashMap<String, Vec<StepResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored outcomes for `workflow`.
    pub fn record(&self, workflow: &str, results: Vec<StepResult>) {
        self.results.insert(workflow.to_string(), results);
    }

    pub fn status(&self, workflow: &str) -> WorkflowStatus {
        match self.results.get(workflow) {
            Some(entry) => WorkflowStatus::Last(entry.value().clone()),
            None => WorkflowStatus::NoHistory,
        }
    }
}
