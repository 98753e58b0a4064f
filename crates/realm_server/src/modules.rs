//! The server's composition units.
//!
//! Each module registers its components during configure and, once every
//! component is initialized, hands its domains to the player data service in
//! `start`. Modules run in the order they are added, which fixes the domain
//! save order: persistence first, then character data, then activities.

use crate::domains::{AttributesDomain, DailyTasksDomain, ProgressionDomain, StatsDomain};
use crate::storage::PersistenceBackend;
use realm_lifecycle::{async_trait, ComponentError, ComponentId, Module, ModuleRegistrar, ServiceRegistry};
use realm_player_data::{DomainOptions, PlayerDataConfig, PlayerDataError, PlayerDataService, SessionHooks};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn domain_error(e: PlayerDataError) -> ComponentError {
    ComponentError::Other(e.to_string())
}

/// Storage backend plus the player data service that writes through it.
pub struct PersistenceModule {
    data_dir: PathBuf,
    pool_size: usize,
    player_data: PlayerDataConfig,
}

impl PersistenceModule {
    pub fn new(data_dir: impl Into<PathBuf>, pool_size: usize, player_data: PlayerDataConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            pool_size,
            player_data,
        }
    }
}

#[async_trait]
impl Module for PersistenceModule {
    fn name(&self) -> &str {
        "persistence"
    }

    async fn configure(&mut self, registrar: &mut ModuleRegistrar<'_>) -> Result<(), ComponentError> {
        let backend = PersistenceBackend::open(&self.data_dir, self.pool_size)
            .map_err(|e| ComponentError::InitializationFailed(e.to_string()))?;
        registrar.register_component(Arc::new(backend), vec![])?;

        // Depending on the backend means the service drains before the
        // backend closes at shutdown.
        let service = Arc::new(PlayerDataService::new(self.player_data.clone()));
        registrar.register_component(service.clone(), vec![ComponentId::of::<PersistenceBackend>()])?;
        registrar.register::<dyn SessionHooks>(service)?;
        Ok(())
    }
}

/// Attributes, derived stats and progression.
#[derive(Default)]
pub struct CharacterModule;

#[async_trait]
impl Module for CharacterModule {
    fn name(&self) -> &str {
        "character"
    }

    async fn configure(&mut self, registrar: &mut ModuleRegistrar<'_>) -> Result<(), ComponentError> {
        let backend = registrar.get::<PersistenceBackend>()?;

        let attributes = Arc::new(AttributesDomain::new(backend.clone()));
        registrar.register_component(attributes.clone(), vec![ComponentId::of::<PersistenceBackend>()])?;

        registrar.register_component(
            Arc::new(StatsDomain::new(backend.clone(), attributes)),
            vec![
                ComponentId::of::<PersistenceBackend>(),
                ComponentId::of::<AttributesDomain>(),
            ],
        )?;

        registrar.register_component(
            Arc::new(ProgressionDomain::new(backend)),
            vec![ComponentId::of::<PersistenceBackend>()],
        )?;
        Ok(())
    }

    async fn start(&mut self, registry: &ServiceRegistry) -> Result<(), ComponentError> {
        let service = registry.get::<PlayerDataService>()?;
        service
            .register_domain(registry.get::<AttributesDomain>()?, DomainOptions::required())
            .map_err(domain_error)?;
        service
            .register_domain(registry.get::<StatsDomain>()?, DomainOptions::required())
            .map_err(domain_error)?;
        service
            .register_domain(registry.get::<ProgressionDomain>()?, DomainOptions::optional())
            .map_err(domain_error)?;
        info!("Character domains registered");
        Ok(())
    }
}

/// Daily tasks.
#[derive(Default)]
pub struct ActivitiesModule;

#[async_trait]
impl Module for ActivitiesModule {
    fn name(&self) -> &str {
        "activities"
    }

    async fn configure(&mut self, registrar: &mut ModuleRegistrar<'_>) -> Result<(), ComponentError> {
        let backend = registrar.get::<PersistenceBackend>()?;
        registrar.register_component(
            Arc::new(DailyTasksDomain::new(backend)),
            vec![ComponentId::of::<PersistenceBackend>()],
        )?;
        Ok(())
    }

    async fn start(&mut self, registry: &ServiceRegistry) -> Result<(), ComponentError> {
        let service = registry.get::<PlayerDataService>()?;
        service
            .register_domain(
                registry.get::<DailyTasksDomain>()?,
                DomainOptions::optional().deferred(),
            )
            .map_err(domain_error)?;
        Ok(())
    }
}
