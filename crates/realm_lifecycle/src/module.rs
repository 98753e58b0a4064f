//! Composition units that register and start cohesive groups of components.

use crate::error::ComponentError;
use crate::registry::{ModuleRegistrar, ServiceRegistry};
use async_trait::async_trait;

/// A named group of components.
///
/// The order modules are added to the orchestrator is advisory only; the
/// order components actually start in comes from their declared
/// dependencies, which may cross module boundaries.
#[async_trait]
pub trait Module: Send + Sync {
    /// Stable, unique module name.
    fn name(&self) -> &str;

    /// Constructs the module's components and registers them, with their
    /// dependency lists, into the registrar. Nothing registered here survives
    /// if this returns an error.
    async fn configure(&mut self, registrar: &mut ModuleRegistrar<'_>) -> Result<(), ComponentError>;

    /// Called after every component has been initialized.
    async fn start(&mut self, _registry: &ServiceRegistry) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called before any component is shut down.
    async fn stop(&mut self, _registry: &ServiceRegistry) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// Per-module state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unconfigured,
    Configured,
    Started,
    Stopped,
    /// Permanently failed; skipped by later phases
    Failed,
}
