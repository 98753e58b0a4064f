//! Session cache: one entry per connected player, alive for the span of the
//! session.

use crate::error::SessionError;
use crate::fragment::{ErasedFragment, Fragment};
use crate::PlayerId;
use dashmap::{DashMap, DashSet};
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Where a session entry is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Fragments are still being loaded
    Loading,
    /// Every fragment is present; gameplay may read and mutate
    Ready,
    /// A disconnect save is in flight; the entry is waiting for eviction
    Unloading,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::Loading,
            1 => SessionPhase::Ready,
            _ => SessionPhase::Unloading,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionPhase::Loading => 0,
            SessionPhase::Ready => 1,
            SessionPhase::Unloading => 2,
        }
    }
}

/// Container for one player's fragments, keyed by fragment type.
///
/// At most one fragment of each type exists per entry. Mutation of a given
/// fragment is the owning domain's business; the entry only guarantees that
/// individual reads and writes are atomic.
pub struct SessionEntry {
    player_id: PlayerId,
    generation: u64,
    phase: AtomicU8,
    load_claimed: AtomicBool,
    fragments: DashMap<TypeId, Box<dyn ErasedFragment>>,
    /// Fragments that were reset to default after a failed load
    degraded: DashSet<&'static str>,
}

impl SessionEntry {
    fn new(player_id: PlayerId, generation: u64) -> Self {
        Self {
            player_id,
            generation,
            phase: AtomicU8::new(SessionPhase::Loading.as_u8()),
            load_claimed: AtomicBool::new(false),
            fragments: DashMap::new(),
            degraded: DashSet::new(),
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Monotonically increasing across all sessions handled by one cache.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    /// Moves from `from` to `to` only if the entry is currently in `from`.
    pub fn transition(&self, from: SessionPhase, to: SessionPhase) -> bool {
        self.phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True for exactly one caller per entry: the one that runs the load.
    pub(crate) fn claim_load(&self) -> bool {
        !self.load_claimed.swap(true, Ordering::AcqRel)
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == SessionPhase::Ready
    }

    /// Stores (or replaces) the fragment of type `F`.
    pub fn insert<F: Fragment>(&self, fragment: F) {
        self.fragments.insert(TypeId::of::<F>(), Box::new(fragment));
    }

    pub fn contains<F: Fragment>(&self) -> bool {
        self.fragments.contains_key(&TypeId::of::<F>())
    }

    /// Clone of the fragment, if it has been loaded.
    pub fn try_read<F: Fragment>(&self) -> Option<F> {
        self.fragments
            .get(&TypeId::of::<F>())
            .and_then(|slot| slot.as_any().downcast_ref::<F>().cloned())
    }

    /// Clone of the fragment, or its default when absent.
    pub fn read<F: Fragment>(&self) -> F {
        self.try_read::<F>().unwrap_or_default()
    }

    /// Mutates the fragment in place, inserting its default first if absent.
    pub fn update<F: Fragment, R>(&self, mutate: impl FnOnce(&mut F) -> R) -> R {
        let mut slot = self
            .fragments
            .entry(TypeId::of::<F>())
            .or_insert_with(|| Box::new(F::default()));
        match slot.as_any_mut().downcast_mut::<F>() {
            Some(fragment) => mutate(fragment),
            None => {
                // Keys are derived from the stored type, so this cannot
                // happen; rebuild the slot rather than panic.
                let mut fragment = F::default();
                let result = mutate(&mut fragment);
                *slot = Box::new(fragment);
                result
            }
        }
    }

    pub(crate) fn json_of(&self, type_id: TypeId) -> Option<serde_json::Value> {
        self.fragments
            .get(&type_id)
            .and_then(|slot| slot.to_json().ok())
    }

    /// JSON snapshot of the fragment whose kind is `kind`.
    pub fn snapshot(&self, kind: &str) -> Option<serde_json::Value> {
        self.fragments
            .iter()
            .find(|slot| slot.kind() == kind)
            .and_then(|slot| slot.to_json().ok())
    }

    pub(crate) fn mark_degraded(&self, kind: &'static str) {
        self.degraded.insert(kind);
    }

    /// True if `kind` was reset to its default because its load failed.
    pub fn is_degraded(&self, kind: &str) -> bool {
        self.degraded.contains(kind)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("player_id", &self.player_id)
            .field("generation", &self.generation)
            .field("phase", &self.phase())
            .field("fragments", &self.fragments.len())
            .finish()
    }
}

/// Concurrent map from player identity to that player's session entry.
///
/// The cache is purely mechanical: it knows nothing about persistence.
/// Whoever calls [`remove`](Self::remove) is responsible for having saved
/// the entry first.
#[derive(Default)]
pub struct SessionCache {
    entries: DashMap<PlayerId, Arc<SessionEntry>>,
    next_generation: AtomicU64,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the player's entry, creating it if absent. Concurrent first
    /// accesses for the same player all observe the same entry.
    pub fn get_or_create(&self, player: PlayerId) -> Arc<SessionEntry> {
        self.entries
            .entry(player)
            .or_insert_with(|| {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Created session entry for player {} (generation {})", player, generation);
                Arc::new(SessionEntry::new(player, generation))
            })
            .clone()
    }

    pub fn get(&self, player: PlayerId) -> Result<Arc<SessionEntry>, SessionError> {
        self.entries
            .get(&player)
            .map(|entry| entry.clone())
            .ok_or(SessionError::NoActiveSession(player))
    }

    /// Unconditionally evicts the player's entry.
    pub fn remove(&self, player: PlayerId) -> Option<Arc<SessionEntry>> {
        self.entries.remove(&player).map(|(_, entry)| entry)
    }

    /// Evicts the entry only if it still belongs to session `generation`, so
    /// a late eviction can never remove a newer session's entry.
    pub fn remove_if_generation(&self, player: PlayerId, generation: u64) -> bool {
        self.entries
            .remove_if(&player, |_, entry| entry.generation() == generation)
            .is_some()
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.entries.contains_key(&player)
    }

    pub fn players(&self) -> Vec<PlayerId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
