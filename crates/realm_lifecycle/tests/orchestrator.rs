//! End-to-end tests for module configuration, dependency-ordered startup and
//! reverse-order shutdown.

use realm_lifecycle::*;
use std::sync::{Arc, Mutex};

type Journal = Arc<Mutex<Vec<String>>>;

/// Records init/shutdown calls into a shared journal, optionally failing.
struct Recorder {
    label: &'static str,
    journal: Journal,
    fail_init: bool,
    fail_shutdown: bool,
}

impl Recorder {
    fn new(label: &'static str, journal: &Journal) -> Self {
        Self {
            label,
            journal: journal.clone(),
            fail_init: false,
            fail_shutdown: false,
        }
    }
}

#[async_trait]
impl Component for Recorder {
    fn name(&self) -> &str {
        self.label
    }

    async fn init(&self) -> Result<(), ComponentError> {
        self.journal.lock().unwrap().push(format!("init:{}", self.label));
        if self.fail_init {
            return Err(ComponentError::InitializationFailed(format!(
                "{} refused to start",
                self.label
            )));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ComponentError> {
        self.journal.lock().unwrap().push(format!("shutdown:{}", self.label));
        if self.fail_shutdown {
            return Err(ComponentError::ShutdownFailed(format!(
                "{} refused to stop",
                self.label
            )));
        }
        Ok(())
    }
}

// Distinct identities for the graph; each wraps a Recorder.
macro_rules! recorder_component {
    ($name:ident) => {
        struct $name(Recorder);

        #[async_trait]
        impl Component for $name {
            fn name(&self) -> &str {
                self.0.label
            }
            async fn init(&self) -> Result<(), ComponentError> {
                self.0.init().await
            }
            async fn shutdown(&self) -> Result<(), ComponentError> {
                self.0.shutdown().await
            }
        }
    };
}

recorder_component!(Accounts);
recorder_component!(Bank);
recorder_component!(Market);
recorder_component!(Chat);

/// Module built from a closure so each test can describe its wiring inline.
struct ClosureModule<F> {
    name: &'static str,
    configure: F,
    journal: Journal,
}

#[async_trait]
impl<F> Module for ClosureModule<F>
where
    F: FnMut(&mut ModuleRegistrar<'_>) -> Result<(), ComponentError> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn configure(&mut self, registrar: &mut ModuleRegistrar<'_>) -> Result<(), ComponentError> {
        (self.configure)(registrar)
    }

    async fn start(&mut self, _registry: &ServiceRegistry) -> Result<(), ComponentError> {
        self.journal.lock().unwrap().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn stop(&mut self, _registry: &ServiceRegistry) -> Result<(), ComponentError> {
        self.journal.lock().unwrap().push(format!("stop:{}", self.name));
        Ok(())
    }
}

fn module<F>(name: &'static str, journal: &Journal, configure: F) -> ClosureModule<F>
where
    F: FnMut(&mut ModuleRegistrar<'_>) -> Result<(), ComponentError> + Send + Sync,
{
    ClosureModule {
        name,
        configure,
        journal: journal.clone(),
    }
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn position(journal: &[String], entry: &str) -> usize {
    journal
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry} not found in {journal:?}"))
}

#[tokio::test]
async fn dependency_initializes_before_dependent() {
    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();

    let j = journal.clone();
    orchestrator.add_module(module("bank", &journal, move |registrar| {
        // Registered before its dependency on purpose.
        registrar.register_component(
            Arc::new(Bank(Recorder::new("bank", &j))),
            vec![ComponentId::of::<Accounts>()],
        )?;
        registrar.register_component(Arc::new(Accounts(Recorder::new("accounts", &j))), vec![])?;
        Ok(())
    }));

    orchestrator.configure().await.unwrap();
    let report = orchestrator.start().await.unwrap();

    let log = entries(&journal);
    assert!(position(&log, "init:accounts") < position(&log, "init:bank"));
    assert_eq!(report.initialized.len(), 2);
    assert_eq!(
        orchestrator.start_order(),
        &[ComponentId::of::<Accounts>(), ComponentId::of::<Bank>()]
    );
}

#[tokio::test]
async fn dependencies_cross_module_boundaries() {
    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();

    let j = journal.clone();
    orchestrator.add_module(module("market", &journal, move |registrar| {
        registrar.register_component(
            Arc::new(Market(Recorder::new("market", &j))),
            vec![ComponentId::of::<Bank>()],
        )?;
        Ok(())
    }));
    let j = journal.clone();
    orchestrator.add_module(module("bank", &journal, move |registrar| {
        registrar.register_component(Arc::new(Bank(Recorder::new("bank", &j))), vec![])?;
        Ok(())
    }));

    orchestrator.start().await.unwrap();
    let log = entries(&journal);
    assert!(position(&log, "init:bank") < position(&log, "init:market"));
    assert_eq!(orchestrator.module_state("market"), Some(ModuleState::Started));
}

#[tokio::test]
async fn cycle_is_rejected_before_any_init() {
    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();

    let j = journal.clone();
    orchestrator.add_module(module("loop", &journal, move |registrar| {
        registrar.register_component(Arc::new(Chat(Recorder::new("chat", &j))), vec![])?;
        registrar.register_component(
            Arc::new(Accounts(Recorder::new("accounts", &j))),
            vec![ComponentId::of::<Bank>()],
        )?;
        registrar.register_component(
            Arc::new(Bank(Recorder::new("bank", &j))),
            vec![ComponentId::of::<Accounts>()],
        )?;
        Ok(())
    }));

    orchestrator.configure().await.unwrap();
    let err = orchestrator.start().await.unwrap_err();
    match err {
        LifecycleError::Configuration(ConfigurationError::DependencyCycle { cycle }) => {
            assert!(cycle.contains(&ComponentId::of::<Accounts>()));
            assert!(cycle.contains(&ComponentId::of::<Bank>()));
            assert!(!cycle.contains(&ComponentId::of::<Chat>()));
        }
        other => panic!("expected a dependency cycle, got {other}"),
    }

    assert!(entries(&journal).iter().all(|e| !e.starts_with("init:")));
    assert!(orchestrator.stop().await.is_empty());
}

#[tokio::test]
async fn failed_configure_is_isolated_to_its_module() {
    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();

    let j = journal.clone();
    orchestrator.add_module(module("broken", &journal, move |registrar| {
        registrar.register_component(Arc::new(Chat(Recorder::new("chat", &j))), vec![])?;
        Err(ComponentError::Other("config file unreadable".to_string()))
    }));
    let j = journal.clone();
    orchestrator.add_module(module("bank", &journal, move |registrar| {
        registrar.register_component(Arc::new(Bank(Recorder::new("bank", &j))), vec![])?;
        Ok(())
    }));

    orchestrator.configure().await.unwrap();
    let report = orchestrator.start().await.unwrap();
    let registry = orchestrator.registry().unwrap();

    assert_eq!(orchestrator.module_state("broken"), Some(ModuleState::Failed));
    assert_eq!(orchestrator.module_state("bank"), Some(ModuleState::Started));
    assert!(registry.get::<Bank>().is_ok());
    assert!(matches!(
        registry.get::<Chat>(),
        Err(ConfigurationError::UnregisteredService(_))
    ));
    assert_eq!(report.modules_failed, vec!["broken".to_string()]);
    assert_eq!(entries(&journal).iter().filter(|e| e.starts_with("init:")).count(), 1);
}

#[tokio::test]
async fn missing_dependency_aborts_only_the_dependent_module() {
    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();

    let j = journal.clone();
    orchestrator.add_module(module("market", &journal, move |registrar| {
        registrar.register_component(Arc::new(Chat(Recorder::new("chat", &j))), vec![])?;
        registrar.register_component(
            Arc::new(Market(Recorder::new("market", &j))),
            vec![ComponentId::of::<Bank>()],
        )?;
        Ok(())
    }));
    let j = journal.clone();
    orchestrator.add_module(module("accounts", &journal, move |registrar| {
        registrar.register_component(Arc::new(Accounts(Recorder::new("accounts", &j))), vec![])?;
        Ok(())
    }));

    let report = orchestrator.start().await.unwrap();

    assert_eq!(orchestrator.module_state("market"), Some(ModuleState::Failed));
    assert_eq!(
        orchestrator.component_state(&ComponentId::of::<Chat>()),
        Some(ComponentState::Skipped)
    );
    assert_eq!(
        orchestrator.component_state(&ComponentId::of::<Accounts>()),
        Some(ComponentState::Initialized)
    );
    assert_eq!(report.initialized, vec![ComponentId::of::<Accounts>()]);
}

#[tokio::test]
async fn init_failure_skips_dependents_but_not_bystanders() {
    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();

    let j = journal.clone();
    orchestrator.add_module(module("economy", &journal, move |registrar| {
        let mut accounts = Recorder::new("accounts", &j);
        accounts.fail_init = true;
        registrar.register_component(Arc::new(Accounts(accounts)), vec![])?;
        registrar.register_component(
            Arc::new(Bank(Recorder::new("bank", &j))),
            vec![ComponentId::of::<Accounts>()],
        )?;
        registrar.register_component(
            Arc::new(Market(Recorder::new("market", &j))),
            vec![ComponentId::of::<Bank>()],
        )?;
        registrar.register_component(Arc::new(Chat(Recorder::new("chat", &j))), vec![])?;
        Ok(())
    }));

    let report = orchestrator.start().await.unwrap();

    assert_eq!(report.failed, vec![ComponentId::of::<Accounts>()]);
    assert_eq!(
        report.skipped,
        vec![ComponentId::of::<Bank>(), ComponentId::of::<Market>()]
    );
    assert_eq!(report.initialized, vec![ComponentId::of::<Chat>()]);

    let log = entries(&journal);
    assert!(!log.contains(&"init:bank".to_string()));
    assert!(!log.contains(&"init:market".to_string()));

    // Only the component that actually came up is shut down.
    orchestrator.stop().await;
    let log = entries(&journal);
    let shutdowns: Vec<_> = log.iter().filter(|e| e.starts_with("shutdown:")).collect();
    assert_eq!(shutdowns, vec!["shutdown:chat"]);
}

#[tokio::test]
async fn shutdown_runs_in_reverse_and_survives_failures() {
    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();

    let j = journal.clone();
    orchestrator.add_module(module("economy", &journal, move |registrar| {
        registrar.register_component(Arc::new(Accounts(Recorder::new("accounts", &j))), vec![])?;
        let mut bank = Recorder::new("bank", &j);
        bank.fail_shutdown = true;
        registrar.register_component(Arc::new(Bank(bank)), vec![ComponentId::of::<Accounts>()])?;
        registrar.register_component(
            Arc::new(Market(Recorder::new("market", &j))),
            vec![ComponentId::of::<Bank>()],
        )?;
        Ok(())
    }));

    orchestrator.start().await.unwrap();
    let failures = orchestrator.stop().await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        LifecycleError::ShutdownFailed { component, .. } if component == ComponentId::of::<Bank>()
    ));

    let log = entries(&journal);
    let stop_module = position(&log, "stop:economy");
    let market = position(&log, "shutdown:market");
    let bank = position(&log, "shutdown:bank");
    let accounts = position(&log, "shutdown:accounts");
    assert!(stop_module < market);
    assert!(market < bank && bank < accounts);

    assert_eq!(
        orchestrator.component_state(&ComponentId::of::<Accounts>()),
        Some(ComponentState::Shutdown)
    );
    assert_eq!(orchestrator.module_state("economy"), Some(ModuleState::Stopped));

    // A second stop is a no-op.
    assert!(orchestrator.stop().await.is_empty());
    assert_eq!(
        entries(&journal).iter().filter(|e| e.starts_with("shutdown:")).count(),
        3
    );
}

#[tokio::test]
async fn same_phase_wiring_sees_earlier_registrations() {
    struct Settings {
        motd: String,
    }

    let journal = Journal::default();
    let mut orchestrator = ModuleOrchestrator::new();
    orchestrator.add_module(module("settings", &journal, |registrar| {
        registrar.register(Arc::new(Settings {
            motd: "welcome".to_string(),
        }))?;
        Ok(())
    }));
    orchestrator.add_module(module("greeter", &journal, |registrar| {
        let settings = registrar.get::<Settings>()?;
        assert_eq!(settings.motd, "welcome");
        Ok(())
    }));

    orchestrator.configure().await.unwrap();
    assert_eq!(orchestrator.module_state("greeter"), Some(ModuleState::Configured));
}
