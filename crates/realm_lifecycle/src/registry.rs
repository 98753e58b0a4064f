//! Typed, write-once service registry.
//!
//! Services are keyed by a [`ComponentId`] derived from the type (or trait
//! object type) they are registered under. The registry is filled during the
//! configure phase and then frozen behind an `Arc`, after which it is shared
//! read-only without any locking.

use crate::component::{Component, ComponentId};
use crate::error::ConfigurationError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type ErasedService = Arc<dyn Any + Send + Sync>;

/// Write-once map from identity to singleton instance.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<ComponentId, ErasedService>,
    /// Registration order, kept for deterministic iteration
    order: Vec<ComponentId>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `instance` under the identity of `T`.
    ///
    /// `T` may be a trait object (`dyn Trait`) so capabilities can be looked
    /// up by interface rather than by concrete type.
    pub fn register<T>(&mut self, instance: Arc<T>) -> Result<(), ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let id = ComponentId::of::<T>();
        if self.services.contains_key(&id) {
            return Err(ConfigurationError::DuplicateRegistration(id));
        }
        self.insert_erased(id, Arc::new(instance));
        Ok(())
    }

    /// Returns the instance bound under `T` or a named error.
    pub fn get<T>(&self) -> Result<Arc<T>, ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let id = ComponentId::of::<T>();
        self.services
            .get(&id)
            .and_then(|service| service.downcast_ref::<Arc<T>>())
            .cloned()
            .ok_or(ConfigurationError::UnregisteredService(id))
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.services.contains_key(id)
    }

    /// Identities in registration order.
    pub fn ids(&self) -> &[ComponentId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn insert_erased(&mut self, id: ComponentId, service: ErasedService) {
        debug!(service = %id, "Registered service");
        self.services.insert(id, service);
        self.order.push(id);
    }
}

/// A component as it was handed to the registrar, with its declared
/// dependency list.
#[derive(Clone)]
pub struct ComponentRegistration {
    pub id: ComponentId,
    pub instance: Arc<dyn Component>,
    pub dependencies: Vec<ComponentId>,
}

/// Module-scoped view of the registry used during `configure`.
///
/// Registrations are visible to [`ModuleRegistrar::get`] immediately, which
/// lets a module wire a component it just registered into the next one. They
/// only reach the shared registry when the module's configure succeeds, so a
/// failing module leaves nothing behind.
pub struct ModuleRegistrar<'a> {
    module: String,
    committed: &'a ServiceRegistry,
    staged: ServiceRegistry,
    components: Vec<ComponentRegistration>,
}

impl<'a> ModuleRegistrar<'a> {
    pub(crate) fn new(module: impl Into<String>, committed: &'a ServiceRegistry) -> Self {
        Self {
            module: module.into(),
            committed,
            staged: ServiceRegistry::new(),
            components: Vec::new(),
        }
    }

    /// Name of the module this registrar belongs to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Binds a plain service (no lifecycle) under the identity of `T`.
    pub fn register<T>(&mut self, instance: Arc<T>) -> Result<(), ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let id = ComponentId::of::<T>();
        if self.committed.contains(&id) {
            return Err(ConfigurationError::DuplicateRegistration(id));
        }
        self.staged.register(instance)
    }

    /// Binds a lifecycle component together with the identities that must be
    /// initialized before it.
    pub fn register_component<T: Component>(
        &mut self,
        instance: Arc<T>,
        dependencies: Vec<ComponentId>,
    ) -> Result<(), ConfigurationError> {
        self.register(instance.clone())?;
        self.components.push(ComponentRegistration {
            id: ComponentId::of::<T>(),
            instance,
            dependencies,
        });
        Ok(())
    }

    /// Looks up a service registered by this module or any module that was
    /// configured before it.
    pub fn get<T>(&self) -> Result<Arc<T>, ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.staged.get::<T>().or_else(|_| self.committed.get::<T>())
    }

    pub(crate) fn into_parts(self) -> (ServiceRegistry, Vec<ComponentRegistration>) {
        (self.staged, self.components)
    }
}

impl ServiceRegistry {
    /// Moves every binding out of `staged` into this registry.
    pub(crate) fn commit(&mut self, mut staged: ServiceRegistry) {
        for id in std::mem::take(&mut staged.order) {
            if let Some(service) = staged.services.remove(&id) {
                self.insert_erased(id, service);
            }
        }
    }
}
