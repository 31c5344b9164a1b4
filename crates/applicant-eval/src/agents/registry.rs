use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::capability::StepCapability;
use crate::domain::StepId;

/// Step id → capability map, checked when capabilities are registered.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    capabilities: BTreeMap<StepId, Arc<dyn StepCapability>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        step: impl Into<StepId>,
        capability: Arc<dyn StepCapability>,
    ) -> Result<(), RegistryError> {
        let step = step.into();
        if step.as_str().trim().is_empty() {
            return Err(RegistryError::EmptyStepId);
        }
        if self.capabilities.contains_key(&step) {
            return Err(RegistryError::Duplicate(step));
        }
        self.capabilities.insert(step, capability);
        Ok(())
    }

    /// Builder form of [`Self::register`].
    pub fn with(
        mut self,
        step: impl Into<StepId>,
        capability: Arc<dyn StepCapability>,
    ) -> Result<Self, RegistryError> {
        self.register(step, capability)?;
        Ok(self)
    }

    pub fn get(&self, step: &StepId) -> Option<Arc<dyn StepCapability>> {
        self.capabilities.get(step).cloned()
    }

    pub fn contains(&self, step: &StepId) -> bool {
        self.capabilities.contains_key(step)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepId> {
        self.capabilities.keys()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("steps", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("step id must not be empty")]
    EmptyStepId,
    #[error("step '{0}' is already registered")]
    Duplicate(StepId),
    #[error("no capability registered for step(s): {}", .0.iter().map(StepId::as_str).collect::<Vec<_>>().join(", "))]
    Unregistered(Vec<StepId>),
    #[error("step '{0}' is scheduled more than once")]
    DuplicatePlanned(StepId),
}
