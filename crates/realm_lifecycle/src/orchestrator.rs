//! Module orchestration: configure → start → stop across every module, with
//! component init/shutdown ordered by the dependency graph.

use crate::component::{ComponentId, ComponentState};
use crate::error::{ConfigurationError, LifecycleError};
use crate::module::{Module, ModuleState};
use crate::registry::{ComponentRegistration, ModuleRegistrar, ServiceRegistry};
use crate::resolver::DependencyGraph;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Overall phase of the orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Configured,
    Started,
    Stopped,
}

struct ModuleSlot {
    module: Box<dyn Module>,
    name: String,
    state: ModuleState,
    components: Vec<ComponentId>,
}

struct ComponentSlot {
    registration: ComponentRegistration,
    module: usize,
    state: ComponentState,
}

/// Summary of a start attempt, suitable for a startup log line.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorReport {
    pub modules_started: Vec<String>,
    pub modules_failed: Vec<String>,
    pub initialized: Vec<ComponentId>,
    pub failed: Vec<ComponentId>,
    pub skipped: Vec<ComponentId>,
}

/// Owns every module and component instance and drives their lifecycle.
///
/// # Phases
///
/// 1. `configure()`: each module registers its components. A failing module
///    is marked [`ModuleState::Failed`] and its registrations are discarded;
///    the remaining modules carry on.
/// 2. `start()`: the dependency graph across all configured components is
///    resolved and `init` runs in that order. A failing component takes its
///    dependents down with it; unrelated components still start.
/// 3. `stop()`: modules stop in reverse order, then every initialized
///    component shuts down in exact reverse start order, best-effort.
pub struct ModuleOrchestrator {
    modules: Vec<ModuleSlot>,
    components: HashMap<ComponentId, ComponentSlot>,
    /// Component identities in registration order
    registration_order: Vec<ComponentId>,
    building: ServiceRegistry,
    registry: Option<Arc<ServiceRegistry>>,
    start_order: Vec<ComponentId>,
    initialized: Vec<ComponentId>,
    phase: Phase,
}

impl Default for ModuleOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleOrchestrator {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            components: HashMap::new(),
            registration_order: Vec::new(),
            building: ServiceRegistry::new(),
            registry: None,
            start_order: Vec::new(),
            initialized: Vec::new(),
            phase: Phase::Idle,
        }
    }

    /// Adds a module. Must be called before [`configure`](Self::configure).
    pub fn add_module<M: Module + 'static>(&mut self, module: M) -> &mut Self {
        let name = module.name().to_string();
        if self.phase != Phase::Idle {
            warn!("Module {} added after configure; it will be ignored", name);
        }
        self.modules.push(ModuleSlot {
            module: Box::new(module),
            name,
            state: ModuleState::Unconfigured,
            components: Vec::new(),
        });
        self
    }

    /// Runs every module's configure phase, then freezes the registry.
    pub async fn configure(&mut self) -> Result<(), LifecycleError> {
        if self.phase != Phase::Idle {
            warn!("configure() called more than once; ignoring");
            return Ok(());
        }

        info!("Configuring {} modules", self.modules.len());

        for (index, slot) in self.modules.iter_mut().enumerate() {
            let mut registrar = ModuleRegistrar::new(slot.name.clone(), &self.building);
            let outcome = slot.module.configure(&mut registrar).await;
            let (staged, registrations) = registrar.into_parts();

            if let Err(e) = outcome {
                error!(
                    module = %slot.name,
                    "Module {} failed to configure: {}", slot.name, e
                );
                slot.state = ModuleState::Failed;
                continue;
            }

            self.building.commit(staged);
            for registration in registrations {
                let id = registration.id;
                debug!("Module {} registered component {}", slot.name, id);
                slot.components.push(id);
                self.registration_order.push(id);
                self.components.insert(
                    id,
                    ComponentSlot {
                        registration,
                        module: index,
                        state: ComponentState::Configured,
                    },
                );
            }
            slot.state = ModuleState::Configured;
            info!(
                "Module {} configured with {} components",
                slot.name,
                slot.components.len()
            );
        }

        self.registry = Some(Arc::new(std::mem::take(&mut self.building)));
        self.phase = Phase::Configured;
        Ok(())
    }

    /// Initializes every configured component in dependency order, then
    /// starts each healthy module.
    ///
    /// Returns an error without initializing anything if the dependency
    /// graph contains a cycle.
    pub async fn start(&mut self) -> Result<OrchestratorReport, LifecycleError> {
        if self.phase == Phase::Idle {
            self.configure().await?;
        }
        if self.phase != Phase::Configured {
            warn!("start() called in phase {:?}; ignoring", self.phase);
            return Ok(self.report());
        }
        let registry = self.frozen_registry();

        let order = self.resolve_start_order()?;
        info!("Resolved start order for {} components", order.len());

        for id in &order {
            let dependencies = self.components[id].registration.dependencies.clone();
            let unavailable = dependencies.iter().find(|dependency| {
                self.components.get(dependency).map(|slot| slot.state)
                    != Some(ComponentState::Initialized)
            });
            if let Some(dependency) = unavailable {
                let e = LifecycleError::DependencyUnavailable {
                    component: *id,
                    dependency: *dependency,
                };
                warn!(component = %id, "{}", e);
                self.set_component_state(id, ComponentState::Skipped);
                continue;
            }

            let instance = self.components[id].registration.instance.clone();
            match instance.init().await {
                Ok(()) => {
                    info!("Component {} initialized", instance.name());
                    self.set_component_state(id, ComponentState::Initialized);
                    self.initialized.push(*id);
                }
                Err(source) => {
                    let e = LifecycleError::InitFailed {
                        component: *id,
                        source,
                    };
                    error!(component = %id, "{}", e);
                    self.set_component_state(id, ComponentState::Failed);
                }
            }
        }
        self.start_order = order;

        for slot in self.modules.iter_mut() {
            if slot.state != ModuleState::Configured {
                continue;
            }
            match slot.module.start(&registry).await {
                Ok(()) => {
                    slot.state = ModuleState::Started;
                    info!("Module {} started", slot.name);
                }
                Err(e) => {
                    slot.state = ModuleState::Failed;
                    error!(module = %slot.name, "Module {} failed to start: {}", slot.name, e);
                }
            }
        }

        self.phase = Phase::Started;
        let report = self.report();
        info!(
            "Startup complete: {} initialized, {} failed, {} skipped, {} modules failed",
            report.initialized.len(),
            report.failed.len(),
            report.skipped.len(),
            report.modules_failed.len()
        );
        Ok(report)
    }

    /// Stops modules in reverse order, then shuts every initialized component
    /// down in reverse start order. Failures are logged and collected but
    /// never stop the drain. Calling this twice is harmless.
    pub async fn stop(&mut self) -> Vec<LifecycleError> {
        let mut failures = Vec::new();
        if self.phase == Phase::Stopped {
            return failures;
        }
        let registry = self.frozen_registry();

        info!("Stopping modules");
        for slot in self.modules.iter_mut().rev() {
            if slot.state != ModuleState::Started {
                continue;
            }
            if let Err(e) = slot.module.stop(&registry).await {
                error!(module = %slot.name, "Module {} failed to stop: {}", slot.name, e);
                failures.push(LifecycleError::ModuleFailed {
                    module: slot.name.clone(),
                    reason: e.to_string(),
                });
            }
            slot.state = ModuleState::Stopped;
        }

        let shutdown_order: Vec<ComponentId> = std::mem::take(&mut self.initialized)
            .into_iter()
            .rev()
            .collect();
        info!("Shutting down {} components", shutdown_order.len());

        for id in shutdown_order {
            self.set_component_state(&id, ComponentState::ShuttingDown);
            let instance = self.components[&id].registration.instance.clone();
            if let Err(source) = instance.shutdown().await {
                let e = LifecycleError::ShutdownFailed {
                    component: id,
                    source,
                };
                error!(component = %id, "{}", e);
                failures.push(e);
            } else {
                debug!("Component {} shut down", instance.name());
            }
            self.set_component_state(&id, ComponentState::Shutdown);
        }

        self.phase = Phase::Stopped;
        info!("All components shut down");
        failures
    }

    /// The frozen registry, available once configure has run.
    pub fn registry(&self) -> Option<Arc<ServiceRegistry>> {
        self.registry.clone()
    }

    pub fn component_state(&self, id: &ComponentId) -> Option<ComponentState> {
        self.components.get(id).map(|slot| slot.state)
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.modules
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.state)
    }

    /// Order `init` was attempted in during the last start.
    pub fn start_order(&self) -> &[ComponentId] {
        &self.start_order
    }

    pub fn report(&self) -> OrchestratorReport {
        let mut report = OrchestratorReport::default();
        for slot in &self.modules {
            match slot.state {
                ModuleState::Failed => report.modules_failed.push(slot.name.clone()),
                ModuleState::Started => report.modules_started.push(slot.name.clone()),
                _ => {}
            }
        }
        for id in &self.registration_order {
            match self.components[id].state {
                ComponentState::Initialized => report.initialized.push(*id),
                ComponentState::Failed => report.failed.push(*id),
                ComponentState::Skipped => report.skipped.push(*id),
                _ => {}
            }
        }
        report
    }

    fn frozen_registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone().unwrap_or_default()
    }

    fn set_component_state(&mut self, id: &ComponentId, state: ComponentState) {
        if let Some(slot) = self.components.get_mut(id) {
            slot.state = state;
        }
    }

    /// Builds the graph over every configured component and resolves it.
    ///
    /// A dependency that was never registered aborts the dependent's whole
    /// module. A dependency that was registered but dropped from the graph
    /// (because its own module was aborted) only skips the dependent. Both
    /// are repeated until the graph is consistent; a cycle is fatal.
    fn resolve_start_order(&mut self) -> Result<Vec<ComponentId>, LifecycleError> {
        let mut graph = DependencyGraph::new();
        for id in &self.registration_order {
            graph.add(*id, &self.components[id].registration.dependencies);
        }

        loop {
            match graph.resolve() {
                Ok(order) => return Ok(order),
                Err(ConfigurationError::MissingDependency { dependent, missing }) => {
                    if self.components.contains_key(&missing) {
                        let e = LifecycleError::DependencyUnavailable {
                            component: dependent,
                            dependency: missing,
                        };
                        warn!(component = %dependent, "{}", e);
                        graph.remove(&dependent);
                        self.set_component_state(&dependent, ComponentState::Skipped);
                        continue;
                    }

                    let module = self.components[&dependent].module;
                    let slot = &mut self.modules[module];
                    error!(
                        module = %slot.name,
                        "Aborting module {}: {}",
                        slot.name,
                        ConfigurationError::MissingDependency { dependent, missing }
                    );
                    slot.state = ModuleState::Failed;
                    let aborted = slot.components.clone();
                    for id in aborted {
                        graph.remove(&id);
                        self.set_component_state(&id, ComponentState::Skipped);
                    }
                }
                Err(e) => {
                    error!("Refusing to start: {}", e);
                    return Err(e.into());
                }
            }
        }
    }
}
