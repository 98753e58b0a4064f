//! Fragment contracts: the domain-owned slices of a player's state and the
//! components that persist them.

use crate::error::PersistenceError;
use crate::PlayerId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;

/// One domain's slice of a player's persistent state.
///
/// The aggregator never looks inside a fragment; it only moves it between
/// the owning domain and the session cache and serializes it for snapshots.
pub trait Fragment: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name of the fragment type, used in logs and snapshots.
    const KIND: &'static str;
}

/// Persistence contract a domain component exposes for its fragment.
///
/// Both methods are synchronous and run on the work executor, never on the
/// game-logic context. They may only touch the persistent store, never game
/// world state. `save` must be idempotent.
pub trait FragmentDomain: Send + Sync + 'static {
    type Fragment: Fragment;

    /// Reads the player's fragment. A player with no stored state should
    /// yield `Ok(Default::default())`, not an error.
    fn load(&self, player: PlayerId) -> Result<Self::Fragment, PersistenceError>;

    /// Writes the fragment as a single all-or-nothing operation.
    fn save(&self, player: PlayerId, fragment: &Self::Fragment) -> Result<(), PersistenceError>;

    /// Called on the game-logic context after gameplay code changed the
    /// player's cached fragment through the service. Domains that skip
    /// unchanged players at save time track their dirty set here.
    fn on_update(&self, _player: PlayerId) {}
}

/// Whether a failed load should fail the whole join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Join fails if this fragment cannot be loaded
    Required,
    /// Fragment falls back to its default on load failure
    Optional,
}

/// How a domain's save is scheduled at disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Saved in declared order; the disconnect waits for it
    Blocking,
    /// Handed to the executor; tracked by a pending save token
    Deferred,
}

/// Registration options for a domain.
#[derive(Debug, Clone, Copy)]
pub struct DomainOptions {
    pub requirement: Requirement,
    pub save_mode: SaveMode,
}

impl DomainOptions {
    pub fn required() -> Self {
        Self {
            requirement: Requirement::Required,
            save_mode: SaveMode::Blocking,
        }
    }

    pub fn optional() -> Self {
        Self {
            requirement: Requirement::Optional,
            save_mode: SaveMode::Blocking,
        }
    }

    pub fn deferred(mut self) -> Self {
        self.save_mode = SaveMode::Deferred;
        self
    }
}

/// Object-safe view of a fragment stored in a session entry.
pub(crate) trait ErasedFragment: Send + Sync {
    fn kind(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<F: Fragment> ErasedFragment for F {
    fn kind(&self) -> &'static str {
        F::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Read-time merge of every fragment in a player's session entry, in domain
/// registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerData {
    player: Option<PlayerId>,
    fragments: Vec<(&'static str, serde_json::Value)>,
}

impl PlayerData {
    pub(crate) fn new(player: PlayerId) -> Self {
        Self {
            player: Some(player),
            fragments: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, kind: &'static str, value: serde_json::Value) {
        self.fragments.push((kind, value));
    }

    pub fn player(&self) -> Option<PlayerId> {
        self.player
    }

    /// Decodes one fragment from the snapshot.
    pub fn get<F: Fragment>(&self) -> Option<F> {
        self.raw(F::KIND)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn raw(&self, kind: &str) -> Option<&serde_json::Value> {
        self.fragments
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, value)| value)
    }

    /// Fragment kinds in merge order.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fragments.iter().map(|(kind, _)| *kind)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Mana {
        current: u32,
        max: u32,
    }

    impl Fragment for Mana {
        const KIND: &'static str = "mana";
    }

    #[test]
    fn player_data_decodes_fragments_by_kind() {
        let mut data = PlayerData::new(PlayerId::new());
        data.push("mana", serde_json::json!({ "current": 5, "max": 20 }));
        data.push("level", serde_json::json!({ "level": 3 }));

        assert_eq!(data.get::<Mana>(), Some(Mana { current: 5, max: 20 }));
        assert_eq!(data.kinds().collect::<Vec<_>>(), vec!["mana", "level"]);
        assert!(data.raw("quests").is_none());
    }

    #[test]
    fn deferred_options_keep_requirement() {
        let options = DomainOptions::optional().deferred();
        assert_eq!(options.requirement, Requirement::Optional);
        assert_eq!(options.save_mode, SaveMode::Deferred);
    }
}
