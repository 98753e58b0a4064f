//! # Realm Lifecycle
//!
//! Dependency-ordered lifecycle management for the long-lived components
//! that make up a realm server (item systems, economy, quests, player data
//! and so on).
//!
//! ## Architecture Overview
//!
//! * [`Component`]: the `init`/`shutdown` contract every subsystem implements
//! * [`ServiceRegistry`]: typed, write-once store of singleton instances
//! * [`DependencyGraph`]: Kahn's-algorithm resolver producing start order
//! * [`Module`]: a composition unit that registers a group of components
//! * [`ModuleOrchestrator`]: sequences configure → start → stop
//!
//! Components never reach each other through global state. A module fetches
//! whatever it needs from the [`ModuleRegistrar`] while configuring, hands
//! the references to constructors, and declares the matching dependency
//! edges so the orchestrator can enforce initialization order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use realm_lifecycle::*;
//! use std::sync::Arc;
//!
//! struct Database;
//! struct Economy { db: Arc<Database> }
//!
//! #[async_trait]
//! impl Component for Database {
//!     async fn init(&self) -> Result<(), ComponentError> { Ok(()) }
//! }
//!
//! #[async_trait]
//! impl Component for Economy {
//!     async fn init(&self) -> Result<(), ComponentError> { Ok(()) }
//! }
//!
//! struct EconomyModule;
//!
//! #[async_trait]
//! impl Module for EconomyModule {
//!     fn name(&self) -> &str { "economy" }
//!
//!     async fn configure(&mut self, registrar: &mut ModuleRegistrar<'_>) -> Result<(), ComponentError> {
//!         registrar.register_component(Arc::new(Database), vec![])?;
//!         let db = registrar.get::<Database>()?;
//!         registrar.register_component(
//!             Arc::new(Economy { db }),
//!             vec![ComponentId::of::<Database>()],
//!         )?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), LifecycleError> {
//! let mut orchestrator = ModuleOrchestrator::new();
//! orchestrator.add_module(EconomyModule);
//! orchestrator.configure().await?;
//! orchestrator.start().await?;
//! orchestrator.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod error;
pub mod module;
pub mod orchestrator;
pub mod registry;
pub mod resolver;

pub use component::{Component, ComponentId, ComponentState};
pub use error::{ComponentError, ConfigurationError, LifecycleError};
pub use module::{Module, ModuleState};
pub use orchestrator::{ModuleOrchestrator, OrchestratorReport};
pub use registry::{ComponentRegistration, ModuleRegistrar, ServiceRegistry};
pub use resolver::{shutdown_order, DependencyGraph};

// Re-exported so implementors don't need a direct dependency.
pub use async_trait::async_trait;
