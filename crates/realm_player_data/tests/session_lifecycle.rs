use realm_player_data::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Wallet {
    gold: u64,
}

impl Fragment for Wallet {
    const KIND: &'static str = "wallet";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct QuestLog {
    completed: Vec<String>,
    counter: u64,
}

impl Fragment for QuestLog {
    const KIND: &'static str = "quests";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Badges {
    earned: Vec<String>,
}

impl Fragment for Badges {
    const KIND: &'static str = "badges";
}

/// Shared in-memory backing store with knobs for slow or failing I/O.
#[derive(Default)]
struct MemoryStore {
    documents: Mutex<HashMap<(PlayerId, &'static str), serde_json::Value>>,
    save_log: Mutex<Vec<&'static str>>,
    failing_loads: Mutex<HashSet<&'static str>>,
    slow_saves: Mutex<HashMap<&'static str, Duration>>,
    slow_loads: Mutex<HashMap<&'static str, Duration>>,
}

impl MemoryStore {
    fn put<F: Fragment>(&self, player: PlayerId, fragment: &F) {
        self.documents
            .lock()
            .unwrap()
            .insert((player, F::KIND), serde_json::to_value(fragment).unwrap());
    }

    fn get<F: Fragment>(&self, player: PlayerId) -> Option<F> {
        self.documents
            .lock()
            .unwrap()
            .get(&(player, F::KIND))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }
}

struct StoreDomain<F> {
    store: Arc<MemoryStore>,
    _fragment: PhantomData<fn() -> F>,
}

impl<F> StoreDomain<F> {
    fn new(store: &Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            store: store.clone(),
            _fragment: PhantomData,
        })
    }
}

impl<F: Fragment> FragmentDomain for StoreDomain<F> {
    type Fragment = F;

    fn load(&self, player: PlayerId) -> Result<F, PersistenceError> {
        let delay = self.store.slow_loads.lock().unwrap().get(F::KIND).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.store.failing_loads.lock().unwrap().contains(F::KIND) {
            return Err(PersistenceError::Backend(format!("{} table unavailable", F::KIND)));
        }
        Ok(self.store.get::<F>(player).unwrap_or_default())
    }

    fn save(&self, player: PlayerId, fragment: &F) -> Result<(), PersistenceError> {
        let delay = self.store.slow_saves.lock().unwrap().get(F::KIND).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.store.put(player, fragment);
        self.store.save_log.lock().unwrap().push(F::KIND);
        Ok(())
    }
}

fn service_with(store: &Arc<MemoryStore>) -> Arc<PlayerDataService> {
    let service = PlayerDataService::new(PlayerDataConfig {
        max_concurrent_io: 4,
        save_retry_backoff: Duration::from_millis(1),
        ..PlayerDataConfig::default()
    });
    service
        .register_domain(StoreDomain::<Wallet>::new(store), DomainOptions::required())
        .unwrap();
    service
        .register_domain(StoreDomain::<QuestLog>::new(store), DomainOptions::optional().deferred())
        .unwrap();
    service
        .register_domain(StoreDomain::<Badges>::new(store), DomainOptions::optional())
        .unwrap();
    Arc::new(service)
}

#[tokio::test]
async fn load_then_unload_writes_back_what_was_loaded() {
    let store = Arc::new(MemoryStore::default());
    let player = PlayerId::new();
    store.put(player, &Wallet { gold: 42 });
    store.put(
        player,
        &QuestLog {
            completed: vec!["rat_cellar".into()],
            counter: 3,
        },
    );
    store.put(player, &Badges { earned: vec!["first_blood".into()] });
    let service = service_with(&store);

    let loaded = service.load_data(player).await.unwrap();
    service.unload_data(player).await.unwrap();
    service.drain().await;

    assert_eq!(loaded.kinds().collect::<Vec<_>>(), vec!["wallet", "quests", "badges"]);
    assert_eq!(store.get::<Wallet>(player), loaded.get::<Wallet>());
    assert_eq!(store.get::<QuestLog>(player), loaded.get::<QuestLog>());
    assert_eq!(store.get::<Badges>(player), loaded.get::<Badges>());
}

#[tokio::test]
async fn quick_rejoin_sees_deferred_save() {
    let store = Arc::new(MemoryStore::default());
    store
        .slow_saves
        .lock()
        .unwrap()
        .insert(QuestLog::KIND, Duration::from_millis(150));
    let service = service_with(&store);
    let player = PlayerId::new();

    service.load_data(player).await.unwrap();
    service
        .update_fragment(player, |q: &mut QuestLog| q.counter += 100)
        .unwrap();
    service.unload_data(player).await.unwrap();
    assert!(service.stats().pending_saves > 0);

    let rejoined = service.load_data(player).await.unwrap();
    assert_eq!(rejoined.get::<QuestLog>().unwrap().counter, 100);
    assert_eq!(service.fragment::<QuestLog>(player).unwrap().counter, 100);
}

#[tokio::test]
async fn drain_applies_every_pending_save() {
    let store = Arc::new(MemoryStore::default());
    store
        .slow_saves
        .lock()
        .unwrap()
        .insert(QuestLog::KIND, Duration::from_millis(20));
    let service = service_with(&store);

    let players: Vec<PlayerId> = (0..10).map(|_| PlayerId::new()).collect();
    for (i, player) in players.iter().enumerate() {
        service.load_data(*player).await.unwrap();
        service
            .update_fragment(*player, |q: &mut QuestLog| q.counter = i as u64 + 1)
            .unwrap();
        service.unload_data(*player).await.unwrap();
    }

    service.drain().await;

    assert_eq!(service.stats().pending_saves, 0);
    assert!(service.cache().is_empty());
    for (i, player) in players.iter().enumerate() {
        assert_eq!(store.get::<QuestLog>(*player).unwrap().counter, i as u64 + 1);
    }
}

#[tokio::test]
async fn optional_load_failure_degrades_to_default() {
    let store = Arc::new(MemoryStore::default());
    let player = PlayerId::new();
    store.put(player, &Badges { earned: vec!["stored".into()] });
    store.failing_loads.lock().unwrap().insert(Badges::KIND);
    let service = service_with(&store);

    let data = service.load_data(player).await.unwrap();
    assert_eq!(data.get::<Badges>(), Some(Badges::default()));
    assert!(service.cache().get(player).unwrap().is_degraded(Badges::KIND));

    // The degraded default never overwrites what is stored.
    service.unload_data(player).await.unwrap();
    service.drain().await;
    assert_eq!(store.get::<Badges>(player).unwrap().earned, vec!["stored".to_string()]);
}

#[tokio::test]
async fn required_load_failure_fails_join_and_evicts() {
    let store = Arc::new(MemoryStore::default());
    store.failing_loads.lock().unwrap().insert(Wallet::KIND);
    let service = service_with(&store);
    let player = PlayerId::new();

    let err = service.load_data(player).await.unwrap_err();
    assert!(matches!(
        err,
        PlayerDataError::Session(SessionError::LoadFailed { domain: "wallet", .. })
    ));
    assert!(!service.cache().contains(player));
}

#[tokio::test]
async fn repeated_unload_is_harmless() {
    let store = Arc::new(MemoryStore::default());
    let service = service_with(&store);
    let player = PlayerId::new();

    service.load_data(player).await.unwrap();
    service.unload_data(player).await.unwrap();
    service.unload_data(player).await.unwrap();
    service.drain().await;
    service.unload_data(player).await.unwrap();

    assert!(service.save_data(PlayerId::new()).await.is_err());
}

#[tokio::test]
async fn save_data_without_session_is_a_no_op() {
    let store = Arc::new(MemoryStore::default());
    let service = service_with(&store);

    let tokens = service.save_data(PlayerId::new()).await.unwrap();
    assert!(tokens.is_empty());
    assert!(store.save_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn blocking_saves_follow_registration_order() {
    let store = Arc::new(MemoryStore::default());
    let service = service_with(&store);
    let player = PlayerId::new();

    service.load_data(player).await.unwrap();
    let tokens = service.save_data(player).await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].label(), "quests");
    for token in &tokens {
        token.wait().await.unwrap();
    }

    let log = store.save_log.lock().unwrap().clone();
    let wallet = log.iter().position(|k| *k == "wallet").unwrap();
    let badges = log.iter().position(|k| *k == "badges").unwrap();
    assert!(wallet < badges);
    // Saving does not end the session.
    assert!(service.fragment::<Wallet>(player).is_ok());
}

#[tokio::test]
async fn gameplay_is_told_to_wait_while_loading() {
    let store = Arc::new(MemoryStore::default());
    store
        .slow_loads
        .lock()
        .unwrap()
        .insert(Wallet::KIND, Duration::from_millis(200));
    let service = service_with(&store);
    let player = PlayerId::new();

    assert_eq!(
        service.fragment::<Wallet>(player).unwrap_err(),
        SessionError::NoActiveSession(player)
    );

    let join = service.clone().on_session_start(player);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        service.fragment::<Wallet>(player).unwrap_err(),
        SessionError::StillLoading(player)
    );
    assert_eq!(service.fragment_or_default::<Wallet>(player), Wallet::default());

    join.await.unwrap().unwrap();
    assert_eq!(service.fragment::<Wallet>(player).unwrap(), Wallet::default());
}

#[tokio::test]
async fn leaving_during_load_discards_the_session() {
    let store = Arc::new(MemoryStore::default());
    store
        .slow_loads
        .lock()
        .unwrap()
        .insert(Wallet::KIND, Duration::from_millis(150));
    let service = service_with(&store);
    let player = PlayerId::new();

    let join = service.clone().on_session_start(player);
    tokio::time::sleep(Duration::from_millis(30)).await;
    service.on_session_end(player).await.unwrap();

    let result = join.await.unwrap();
    assert!(matches!(
        result,
        Err(PlayerDataError::Session(SessionError::NoActiveSession(_)))
    ));
    assert!(service.cache().is_empty());
    assert!(store.save_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejoin_during_blocking_save_is_told_to_wait() {
    let store = Arc::new(MemoryStore::default());
    store
        .slow_saves
        .lock()
        .unwrap()
        .insert(Wallet::KIND, Duration::from_millis(200));
    let service = service_with(&store);
    let player = PlayerId::new();

    service.load_data(player).await.unwrap();
    service
        .update_fragment(player, |w: &mut Wallet| w.gold = 75)
        .unwrap();

    let leave = {
        let service = service.clone();
        tokio::spawn(async move { service.unload_data(player).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = service.load_data(player).await.unwrap_err();
    assert!(matches!(
        err,
        PlayerDataError::Session(SessionError::StillSaving(p)) if p == player
    ));

    leave.await.unwrap().unwrap();
    let rejoined = service.load_data(player).await.unwrap();
    assert_eq!(rejoined.get::<Wallet>().unwrap().gold, 75);
}

#[tokio::test]
async fn drain_waits_for_a_leave_still_in_progress() {
    let store = Arc::new(MemoryStore::default());
    store
        .slow_saves
        .lock()
        .unwrap()
        .insert(Wallet::KIND, Duration::from_millis(200));
    let service = service_with(&store);
    let player = PlayerId::new();

    service.load_data(player).await.unwrap();
    service
        .update_fragment(player, |q: &mut QuestLog| q.counter = 9)
        .unwrap();

    let leave = {
        let service = service.clone();
        tokio::spawn(async move { service.unload_data(player).await })
    };
    // The leave is inside its blocking wallet save and has not dispatched
    // the deferred quest log save yet.
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.drain().await;

    leave.await.unwrap().unwrap();
    assert_eq!(store.get::<QuestLog>(player).unwrap().counter, 9);
    assert_eq!(service.stats().pending_saves, 0);
    assert!(service.cache().is_empty());
}
