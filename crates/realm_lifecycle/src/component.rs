//! The component contract every long-lived server subsystem implements.

use crate::error::ComponentError;
use async_trait::async_trait;
use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity token for a singleton component or service.
///
/// Identities are derived from the concrete Rust type, so two registrations
/// of the same type always collide and lookups are checked at compile time
/// through generics rather than through runtime reflection.
#[derive(Clone, Copy)]
pub struct ComponentId {
    type_id: TypeId,
    name: &'static str,
}

impl ComponentId {
    /// Returns the identity of type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Fully qualified type name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for ComponentId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ComponentId {}

impl Hash for ComponentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Lifecycle state of a registered component.
///
/// A component that has not been registered has no state at all; the
/// orchestrator reports `None` for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Registered during a module's configure phase
    Configured,
    /// `init` completed successfully
    Initialized,
    /// `init` failed; terminal
    Failed,
    /// Not started because a dependency failed or was skipped; terminal
    Skipped,
    /// `shutdown` is in progress
    ShuttingDown,
    /// `shutdown` has been invoked (successfully or not)
    Shutdown,
}

/// A named, singleton, stateful unit with an init/shutdown lifecycle.
///
/// Components are shared as `Arc<Self>` once registered, so both hooks take
/// `&self` and any mutable state lives behind interior mutability.
///
/// # Lifecycle
///
/// 1. **Configure**: the owning module constructs the instance and registers
///    it together with the identities it depends on
/// 2. **Init**: called once every dependency has reached `Initialized`
/// 3. **Shutdown**: called in reverse start order, after every dependent
///    has already stopped
///
/// `init` and `shutdown` run on the game-logic context and must not perform
/// blocking I/O directly.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Human readable name for logs. Defaults to the type name.
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// Brings the component up. Dependencies are guaranteed initialized.
    async fn init(&self) -> Result<(), ComponentError>;

    /// Releases the component's resources.
    async fn shutdown(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
