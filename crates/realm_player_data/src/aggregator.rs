//! The player data service: one join / leave flow over every registered
//! fragment domain.

use crate::cache::{SessionCache, SessionEntry, SessionPhase};
use crate::config::PlayerDataConfig;
use crate::error::{PersistenceError, PlayerDataError, SessionError};
use crate::executor::WorkExecutor;
use crate::fragment::{DomainOptions, Fragment, FragmentDomain, PlayerData, Requirement, SaveMode};
use crate::pending::{PendingSaveToken, PendingSaves};
use crate::PlayerId;
use async_trait::async_trait;
use realm_lifecycle::{Component, ComponentError};
use serde::Serialize;
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Point-in-time counters for status logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerDataStats {
    pub active_sessions: usize,
    pub pending_saves: usize,
    pub domains: usize,
}

/// A save job built from a snapshot taken at dispatch time.
struct PreparedSave {
    kind: &'static str,
    snapshot: String,
    job: Arc<dyn Fn() -> Result<(), PersistenceError> + Send + Sync>,
}

/// Type-erased view of a registered [`FragmentDomain`].
#[async_trait]
trait DomainBinding: Send + Sync {
    fn kind(&self) -> &'static str;
    fn fragment_type(&self) -> TypeId;
    fn options(&self) -> DomainOptions;
    async fn load_into(&self, executor: &WorkExecutor, entry: &SessionEntry) -> Result<(), PersistenceError>;
    fn insert_default(&self, entry: &SessionEntry);
    fn prepare_save(&self, entry: &SessionEntry) -> Option<PreparedSave>;
    fn notify_updated(&self, player: PlayerId);
}

struct Bound<D: FragmentDomain> {
    domain: Arc<D>,
    options: DomainOptions,
}

#[async_trait]
impl<D: FragmentDomain> DomainBinding for Bound<D> {
    fn kind(&self) -> &'static str {
        <D::Fragment as Fragment>::KIND
    }

    fn fragment_type(&self) -> TypeId {
        TypeId::of::<D::Fragment>()
    }

    fn options(&self) -> DomainOptions {
        self.options
    }

    async fn load_into(&self, executor: &WorkExecutor, entry: &SessionEntry) -> Result<(), PersistenceError> {
        let domain = self.domain.clone();
        let player = entry.player_id();
        let fragment = executor.run(self.kind(), move || domain.load(player)).await??;
        entry.insert(fragment);
        Ok(())
    }

    fn insert_default(&self, entry: &SessionEntry) {
        entry.insert(D::Fragment::default());
    }

    fn prepare_save(&self, entry: &SessionEntry) -> Option<PreparedSave> {
        // A degraded fragment holds defaults, not the player's stored state.
        if entry.is_degraded(self.kind()) {
            warn!(
                "Not saving degraded fragment {} for player {}",
                self.kind(),
                entry.player_id()
            );
            return None;
        }

        let fragment = entry.try_read::<D::Fragment>()?;
        let snapshot = render_snapshot(self.kind(), entry.player_id(), &fragment);
        let domain = self.domain.clone();
        let player = entry.player_id();

        Some(PreparedSave {
            kind: self.kind(),
            snapshot,
            job: Arc::new(move || domain.save(player, &fragment)),
        })
    }

    fn notify_updated(&self, player: PlayerId) {
        self.domain.on_update(player);
    }
}

/// JSON text of a fragment for the operator alert. A fragment that cannot
/// be serialized is logged and described instead.
fn render_snapshot<F: Serialize>(kind: &str, player: PlayerId, fragment: &F) -> String {
    match serde_json::to_string(fragment) {
        Ok(json) => json,
        Err(e) => {
            warn!("Fragment {} for player {} has no JSON snapshot: {}", kind, player, e);
            format!("<unserializable {}: {}>", kind, e)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

/// Runs a save with retries. The final failure is raised as an operator
/// alert carrying the fragment snapshot.
async fn save_with_retry(
    executor: Arc<WorkExecutor>,
    policy: RetryPolicy,
    player: PlayerId,
    save: PreparedSave,
) -> Result<(), PersistenceError> {
    let mut delay = policy.backoff;
    let mut attempt = 0;
    loop {
        let job = save.job.clone();
        let error = match executor.run(save.kind, move || job()).await {
            Ok(Ok(())) => {
                debug!("Saved {} for player {}", save.kind, player);
                return Ok(());
            }
            Ok(Err(e)) | Err(e) => e,
        };

        let retryable = !matches!(error, PersistenceError::ExecutorClosed);
        if retryable && attempt < policy.attempts {
            attempt += 1;
            warn!(
                "Save of {} for player {} failed (attempt {}/{}): {}",
                save.kind,
                player,
                attempt,
                policy.attempts + 1,
                error
            );
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
            continue;
        }

        error!(
            target: "operator_alert",
            player = %player,
            fragment = save.kind,
            data = %save.snapshot,
            "🚨 Save of {} for player {} failed after {} attempt(s): {}",
            save.kind,
            player,
            attempt + 1,
            error
        );
        return Err(error);
    }
}

/// Aggregates every registered domain into one load / save / unload flow
/// and owns the session cache those flows feed.
///
/// Also a lifecycle [`Component`]: shutting it down unloads every cached
/// player and drains outstanding saves, so it must be registered with a
/// dependency on whatever backend the domains write to.
pub struct PlayerDataService {
    config: PlayerDataConfig,
    cache: Arc<SessionCache>,
    executor: Arc<WorkExecutor>,
    pending: Arc<PendingSaves>,
    domains: RwLock<Vec<Arc<dyn DomainBinding>>>,
    drained: AtomicBool,
    /// Held shared by saves and unloads while they dispatch and track their
    /// tokens; `drain` takes it exclusively before waiting on them.
    gate: tokio::sync::RwLock<()>,
}

impl PlayerDataService {
    pub fn new(config: PlayerDataConfig) -> Self {
        let executor = Arc::new(WorkExecutor::new(&config));
        Self {
            config,
            cache: Arc::new(SessionCache::new()),
            executor,
            pending: Arc::new(PendingSaves::new()),
            domains: RwLock::new(Vec::new()),
            drained: AtomicBool::new(false),
            gate: tokio::sync::RwLock::new(()),
        }
    }

    /// Adds a domain. Save order is registration order.
    pub fn register_domain<D: FragmentDomain>(
        &self,
        domain: Arc<D>,
        options: DomainOptions,
    ) -> Result<(), PlayerDataError> {
        let kind = <D::Fragment as Fragment>::KIND;
        let mut domains = self.domains.write().unwrap_or_else(PoisonError::into_inner);
        if domains
            .iter()
            .any(|d| d.kind() == kind || d.fragment_type() == TypeId::of::<D::Fragment>())
        {
            return Err(PlayerDataError::DuplicateDomain(kind));
        }
        if !self.cache.is_empty() {
            warn!(
                "Domain {} registered with {} session(s) already cached; they will not have this fragment",
                kind,
                self.cache.len()
            );
        }

        domains.push(Arc::new(Bound { domain, options }));
        info!(
            "Registered player data domain {} ({:?}, {:?})",
            kind, options.requirement, options.save_mode
        );
        Ok(())
    }

    /// Fragment kinds in registration order.
    pub fn domain_kinds(&self) -> Vec<&'static str> {
        self.domains().iter().map(|d| d.kind()).collect()
    }

    fn domains(&self) -> Vec<Arc<dyn DomainBinding>> {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_open(&self) -> Result<(), PlayerDataError> {
        if self.is_drained() {
            Err(PlayerDataError::Drained)
        } else {
            Ok(())
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.config.save_retry_attempts,
            backoff: self.config.save_retry_backoff,
        }
    }

    /// Loads every domain's fragment for `player` into a fresh cache entry.
    ///
    /// Outstanding saves from the player's previous session are awaited
    /// first, so a quick reconnect always reads what the last session wrote.
    /// Optional domains that fail are reset to their default; a required
    /// domain failing evicts the entry and fails the join.
    pub async fn load_data(&self, player: PlayerId) -> Result<PlayerData, PlayerDataError> {
        self.ensure_open()?;

        let waited = self.pending.wait_for(player).await;
        if waited > 0 {
            debug!("Waited for {} pending save(s) before loading player {}", waited, player);
        }

        // Every path that marks an entry Unloading either evicts it or tracks
        // an eviction token, and those tokens were awaited above. An entry
        // still Unloading here belongs to a leave whose blocking saves are
        // running, so the rejoin has to wait for them.
        if let Ok(previous) = self.cache.get(player) {
            if previous.phase() == SessionPhase::Unloading {
                return Err(SessionError::StillSaving(player).into());
            }
        }

        let entry = self.cache.get_or_create(player);
        if entry.is_ready() {
            return Ok(self.snapshot(&entry));
        }
        if !entry.claim_load() {
            return Err(SessionError::StillLoading(player).into());
        }

        let domains = self.domains();
        let results = futures::future::join_all(
            domains
                .iter()
                .map(|domain| domain.load_into(&self.executor, &entry)),
        )
        .await;

        let mut failure = None;
        for (domain, result) in domains.iter().zip(results) {
            let Err(e) = result else { continue };
            match domain.options().requirement {
                Requirement::Optional => {
                    warn!(
                        "Optional fragment {} failed to load for player {}, using defaults: {}",
                        domain.kind(),
                        player,
                        e
                    );
                    domain.insert_default(&entry);
                    entry.mark_degraded(domain.kind());
                }
                Requirement::Required => {
                    error!(
                        "Required fragment {} failed to load for player {}: {}",
                        domain.kind(),
                        player,
                        e
                    );
                    if failure.is_none() {
                        failure = Some(SessionError::LoadFailed {
                            player,
                            domain: domain.kind(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(err) = failure {
            entry.set_phase(SessionPhase::Unloading);
            self.cache.remove_if_generation(player, entry.generation());
            return Err(err.into());
        }

        if !entry.transition(SessionPhase::Loading, SessionPhase::Ready) {
            // The session ended while its fragments were loading.
            debug!("Player {} left before loading finished", player);
            return Err(SessionError::NoActiveSession(player).into());
        }

        info!(
            "Loaded {} fragment(s) for player {} (session {})",
            entry.fragment_count(),
            player,
            entry.generation()
        );
        Ok(self.snapshot(&entry))
    }

    /// Saves the player's cached fragments without evicting them.
    ///
    /// Blocking domains are saved in registration order and awaited.
    /// Deferred domains are dispatched to the executor and returned as
    /// tokens, which are also tracked internally. A player with no entry, or
    /// whose entry is still loading, is a no-op.
    pub async fn save_data(&self, player: PlayerId) -> Result<Vec<PendingSaveToken>, PlayerDataError> {
        let _gate = self.gate.read().await;
        self.ensure_open()?;
        let entry = match self.cache.get(player) {
            Ok(entry) => entry,
            Err(_) => {
                debug!("save_data for player {} with no cached session; nothing to do", player);
                return Ok(Vec::new());
            }
        };
        if entry.phase() == SessionPhase::Loading {
            return Ok(Vec::new());
        }

        let (tokens, failed) = self.save_entry(&entry).await;
        if failed.is_empty() {
            Ok(tokens)
        } else {
            Err(PlayerDataError::SaveFailed { player, domains: failed })
        }
    }

    async fn save_entry(&self, entry: &SessionEntry) -> (Vec<PendingSaveToken>, Vec<&'static str>) {
        let player = entry.player_id();
        let policy = self.retry_policy();
        let mut tokens = Vec::new();
        let mut failed = Vec::new();

        for domain in self.domains() {
            let Some(save) = domain.prepare_save(entry) else { continue };
            let kind = save.kind;
            match domain.options().save_mode {
                SaveMode::Blocking => {
                    if save_with_retry(self.executor.clone(), policy, player, save)
                        .await
                        .is_err()
                    {
                        failed.push(kind);
                    }
                }
                SaveMode::Deferred => {
                    let token = PendingSaveToken::spawn(
                        player,
                        kind,
                        save_with_retry(self.executor.clone(), policy, player, save),
                    );
                    self.pending.track(token.clone());
                    tokens.push(token);
                }
            }
        }

        (tokens, failed)
    }

    /// Saves and evicts the player's session.
    ///
    /// The entry stays cached until every deferred save it started has
    /// resolved; a later [`load_data`](Self::load_data) for the same player
    /// waits for that. Repeated calls are no-ops.
    pub async fn unload_data(&self, player: PlayerId) -> Result<(), PlayerDataError> {
        let _gate = self.gate.read().await;
        let entry = match self.cache.get(player) {
            Ok(entry) => entry,
            Err(_) => return Ok(()),
        };

        if entry.transition(SessionPhase::Loading, SessionPhase::Unloading) {
            // Nothing has touched the fragments yet, so there is nothing to save.
            self.cache.remove_if_generation(player, entry.generation());
            debug!("Player {} unloaded before loading finished", player);
            return Ok(());
        }
        if !entry.transition(SessionPhase::Ready, SessionPhase::Unloading) {
            debug!("Player {} is already unloading", player);
            return Ok(());
        }
        if self.is_drained() {
            error!(
                target: "operator_alert",
                "🚨 Player {} unloaded after drain; {} fragment(s) not saved",
                player,
                entry.fragment_count()
            );
            self.cache.remove_if_generation(player, entry.generation());
            return Err(PlayerDataError::Drained);
        }

        let (tokens, failed) = self.save_entry(&entry).await;
        let generation = entry.generation();

        if tokens.is_empty() {
            self.cache.remove_if_generation(player, generation);
            debug!("Evicted session {} for player {}", generation, player);
        } else {
            let cache = self.cache.clone();
            let eviction = PendingSaveToken::spawn(player, "evict", async move {
                for token in &tokens {
                    let _ = token.wait().await;
                }
                if cache.remove_if_generation(player, generation) {
                    debug!("Evicted session {} for player {}", generation, player);
                }
                Ok(())
            });
            self.pending.track(eviction);
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(PlayerDataError::SaveFailed { player, domains: failed })
        }
    }

    /// Waits for every outstanding save, then closes the executor.
    /// Returns how many tracked saves were awaited.
    pub async fn drain(&self) -> usize {
        if self.drained.swap(true, Ordering::AcqRel) {
            return 0;
        }
        info!("Draining player data saves...");
        // Saves and unloads that started before the flag flipped finish
        // tracking their tokens before the snapshot below is taken.
        let _gate = self.gate.write().await;
        let waited = self.pending.drain_all().await;
        self.executor.close();
        info!("Player data drained ({} pending save(s) awaited)", waited);
        waited
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    fn ready_entry(&self, player: PlayerId) -> Result<Arc<SessionEntry>, SessionError> {
        let entry = self.cache.get(player)?;
        match entry.phase() {
            SessionPhase::Ready => Ok(entry),
            SessionPhase::Loading => Err(SessionError::StillLoading(player)),
            SessionPhase::Unloading => Err(SessionError::NoActiveSession(player)),
        }
    }

    /// Current value of one fragment. Fails with
    /// [`SessionError::StillLoading`] while the join is in progress.
    pub fn fragment<F: Fragment>(&self, player: PlayerId) -> Result<F, SessionError> {
        Ok(self.ready_entry(player)?.read::<F>())
    }

    pub fn fragment_or_default<F: Fragment>(&self, player: PlayerId) -> F {
        self.ready_entry(player)
            .map(|entry| entry.read::<F>())
            .unwrap_or_default()
    }

    pub fn update_fragment<F: Fragment, R>(
        &self,
        player: PlayerId,
        mutate: impl FnOnce(&mut F) -> R,
    ) -> Result<R, SessionError> {
        let result = self.ready_entry(player)?.update(mutate);
        let fragment_type = TypeId::of::<F>();
        if let Some(domain) = self.domains().into_iter().find(|d| d.fragment_type() == fragment_type) {
            domain.notify_updated(player);
        }
        Ok(result)
    }

    /// Merged view of a ready session.
    pub fn player_data(&self, player: PlayerId) -> Result<PlayerData, SessionError> {
        let entry = self.ready_entry(player)?;
        Ok(self.snapshot(&entry))
    }

    fn snapshot(&self, entry: &SessionEntry) -> PlayerData {
        let mut data = PlayerData::new(entry.player_id());
        for domain in self.domains() {
            if let Some(value) = entry.json_of(domain.fragment_type()) {
                data.push(domain.kind(), value);
            }
        }
        data
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn pending(&self) -> &PendingSaves {
        &self.pending
    }

    pub fn stats(&self) -> PlayerDataStats {
        PlayerDataStats {
            active_sessions: self.cache.len(),
            pending_saves: self.pending.count(),
            domains: self.domains().len(),
        }
    }
}

impl Default for PlayerDataService {
    fn default() -> Self {
        Self::new(PlayerDataConfig::default())
    }
}

#[async_trait]
impl Component for PlayerDataService {
    fn name(&self) -> &str {
        "PlayerDataService"
    }

    async fn init(&self) -> Result<(), ComponentError> {
        if self.is_drained() {
            return Err(ComponentError::InitializationFailed(
                "player data service was already drained".to_string(),
            ));
        }
        info!(
            "Player data service ready (max {} concurrent I/O task(s))",
            self.config.max_concurrent_io
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ComponentError> {
        let players = self.cache.players();
        if !players.is_empty() {
            info!("Unloading {} cached player(s) before shutdown", players.len());
        }
        for player in players {
            if let Err(e) = self.unload_data(player).await {
                error!("Failed to unload player {} during shutdown: {}", player, e);
            }
        }
        self.drain().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Level {
        level: u32,
    }

    impl Fragment for Level {
        const KIND: &'static str = "level";
    }

    #[derive(Default)]
    struct FlakyLevels {
        stored: Mutex<HashMap<PlayerId, Level>>,
        failures_left: AtomicUsize,
        updates: AtomicUsize,
    }

    impl FragmentDomain for FlakyLevels {
        type Fragment = Level;

        fn load(&self, player: PlayerId) -> Result<Level, PersistenceError> {
            Ok(self.stored.lock().unwrap().get(&player).cloned().unwrap_or_default())
        }

        fn save(&self, player: PlayerId, fragment: &Level) -> Result<(), PersistenceError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PersistenceError::Backend("write refused".to_string()));
            }
            self.stored.lock().unwrap().insert(player, fragment.clone());
            Ok(())
        }

        fn on_update(&self, _player: PlayerId) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config(retries: u32) -> PlayerDataConfig {
        PlayerDataConfig {
            save_retry_attempts: retries,
            save_retry_backoff: Duration::from_millis(1),
            ..PlayerDataConfig::default()
        }
    }

    #[tokio::test]
    async fn duplicate_domain_is_rejected() {
        let service = PlayerDataService::default();
        let domain = Arc::new(FlakyLevels::default());
        service.register_domain(domain.clone(), DomainOptions::required()).unwrap();
        let err = service
            .register_domain(domain, DomainOptions::optional())
            .unwrap_err();
        assert!(matches!(err, PlayerDataError::DuplicateDomain("level")));
    }

    #[tokio::test]
    async fn transient_save_failures_are_retried() {
        let service = PlayerDataService::new(fast_config(2));
        let domain = Arc::new(FlakyLevels::default());
        service.register_domain(domain.clone(), DomainOptions::required()).unwrap();

        let player = PlayerId::new();
        service.load_data(player).await.unwrap();
        service.update_fragment(player, |l: &mut Level| l.level = 7).unwrap();
        domain.failures_left.store(2, Ordering::SeqCst);

        service.unload_data(player).await.unwrap();
        assert_eq!(domain.stored.lock().unwrap()[&player], Level { level: 7 });
    }

    #[tokio::test]
    async fn exhausted_retries_surface_save_failed() {
        let service = PlayerDataService::new(fast_config(1));
        let domain = Arc::new(FlakyLevels::default());
        service.register_domain(domain.clone(), DomainOptions::required()).unwrap();

        let player = PlayerId::new();
        service.load_data(player).await.unwrap();
        domain.failures_left.store(5, Ordering::SeqCst);

        let err = service.save_data(player).await.unwrap_err();
        match err {
            PlayerDataError::SaveFailed { domains, .. } => assert_eq!(domains, vec!["level"]),
            other => panic!("unexpected error: {other}"),
        }
        // The session itself is untouched by a failed save.
        assert!(service.fragment::<Level>(player).is_ok());
    }

    #[tokio::test]
    async fn updates_notify_the_owning_domain() {
        let service = PlayerDataService::default();
        let domain = Arc::new(FlakyLevels::default());
        service.register_domain(domain.clone(), DomainOptions::required()).unwrap();

        let player = PlayerId::new();
        assert!(service.update_fragment(player, |l: &mut Level| l.level = 1).is_err());
        assert_eq!(domain.updates.load(Ordering::SeqCst), 0);

        service.load_data(player).await.unwrap();
        service.update_fragment(player, |l: &mut Level| l.level = 4).unwrap();
        service.update_fragment(player, |l: &mut Level| l.level += 1).unwrap();
        assert_eq!(domain.updates.load(Ordering::SeqCst), 2);
        assert_eq!(service.fragment::<Level>(player).unwrap().level, 5);
    }

    #[test]
    fn snapshot_of_unserializable_fragment_names_the_error() {
        let player = PlayerId::new();
        assert_eq!(render_snapshot("level", player, &Level { level: 9 }), r#"{"level":9}"#);

        // JSON object keys must be strings.
        let mut by_cell: HashMap<(u8, u8), u32> = HashMap::new();
        by_cell.insert((1, 2), 3);
        let rendered = render_snapshot("map", player, &by_cell);
        assert!(rendered.starts_with("<unserializable map:"), "{rendered}");
        assert!(rendered.contains("key must be a string"), "{rendered}");
    }

    #[tokio::test]
    async fn drained_service_rejects_loads() {
        let service = PlayerDataService::default();
        assert_eq!(service.drain().await, 0);
        assert_eq!(service.drain().await, 0);
        assert!(matches!(
            service.load_data(PlayerId::new()).await,
            Err(PlayerDataError::Drained)
        ));
    }

    #[tokio::test]
    async fn shutdown_saves_cached_players() {
        let service = PlayerDataService::default();
        let domain = Arc::new(FlakyLevels::default());
        service.register_domain(domain.clone(), DomainOptions::required()).unwrap();

        let player = PlayerId::new();
        service.load_data(player).await.unwrap();
        service.update_fragment(player, |l: &mut Level| l.level = 3).unwrap();

        Component::shutdown(&service).await.unwrap();
        assert!(service.cache().is_empty());
        assert!(service.is_drained());
        assert_eq!(domain.stored.lock().unwrap()[&player].level, 3);
    }
}
