//! Error taxonomy for component registration and lifecycle management.

use crate::component::ComponentId;

/// Errors raised while wiring components together.
///
/// Configuration errors are fatal to the module or component they name and
/// are always logged with full identity context by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The same identity was bound twice
    #[error("Service {0} is already registered")]
    DuplicateRegistration(ComponentId),
    /// A lookup targeted an identity that was never bound
    #[error("Unregistered service: {0}")]
    UnregisteredService(ComponentId),
    /// A declared dependency was never registered
    #[error("Component {dependent} depends on {missing}, which was never registered")]
    MissingDependency {
        dependent: ComponentId,
        missing: ComponentId,
    },
    /// A set of components depend on each other
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    DependencyCycle { cycle: Vec<ComponentId> },
}

fn format_cycle(cycle: &[ComponentId]) -> String {
    cycle
        .iter()
        .map(|id| id.name())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error type returned by component `init`/`shutdown` implementations.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// Component failed to initialize
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
    /// Component failed to release its resources
    #[error("Shutdown failed: {0}")]
    ShutdownFailed(String),
    /// A wiring problem surfaced while the component was running
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Any other failure reported by the component
    #[error("{0}")]
    Other(String),
}

/// Errors describing what happened to a component or module during a
/// lifecycle transition.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Component {component} failed to initialize: {source}")]
    InitFailed {
        component: ComponentId,
        #[source]
        source: ComponentError,
    },
    #[error("Component {component} failed to shut down: {source}")]
    ShutdownFailed {
        component: ComponentId,
        #[source]
        source: ComponentError,
    },
    #[error("Component {component} skipped: dependency {dependency} is unavailable")]
    DependencyUnavailable {
        component: ComponentId,
        dependency: ComponentId,
    },
    #[error("Module {module} failed: {reason}")]
    ModuleFailed { module: String, reason: String },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
