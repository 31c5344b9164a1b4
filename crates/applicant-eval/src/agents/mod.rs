//! Step capabilities and the registry mapping step ids to them.

mod capability;
mod registry;

pub use capability::{StepCapability, StepContext, StepError, StepOutput};
pub use registry::{AgentRegistry, RegistryError};
