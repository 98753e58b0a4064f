//! Derived combat stats. They are computed from attributes, so this domain
//! is registered (and therefore saved) after the attributes domain.

use super::attributes::{Attributes, AttributesDomain};
use crate::storage::PersistenceBackend;
use realm_lifecycle::{async_trait, Component, ComponentError};
use realm_player_data::{Fragment, FragmentDomain, PersistenceError, PlayerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStats {
    pub max_health: u32,
    pub attack_power: u32,
    pub spell_power: u32,
    pub dodge_rating: u32,
    /// Attribute total these stats were derived from
    pub derived_from: u32,
}

impl Fragment for CharacterStats {
    const KIND: &'static str = "stats";
}

impl CharacterStats {
    pub fn derive(attributes: &Attributes) -> Self {
        Self {
            max_health: 50 + attributes.vitality * 10,
            attack_power: attributes.strength * 2,
            spell_power: attributes.intellect * 2,
            dodge_rating: attributes.agility,
            derived_from: attributes.total(),
        }
    }

    /// True when the attributes have changed since these stats were derived.
    pub fn is_stale(&self, attributes: &Attributes) -> bool {
        self.derived_from != attributes.total()
    }
}

pub struct StatsDomain {
    backend: Arc<PersistenceBackend>,
    attributes: Arc<AttributesDomain>,
}

impl StatsDomain {
    pub fn new(backend: Arc<PersistenceBackend>, attributes: Arc<AttributesDomain>) -> Self {
        Self { backend, attributes }
    }
}

impl FragmentDomain for StatsDomain {
    type Fragment = CharacterStats;

    /// Stored stats if present, otherwise derived from the stored attributes.
    fn load(&self, player: PlayerId) -> Result<CharacterStats, PersistenceError> {
        match self.backend.try_load::<CharacterStats>(player)? {
            Some(stats) => Ok(stats),
            None => Ok(CharacterStats::derive(&self.attributes.load(player)?)),
        }
    }

    fn save(&self, player: PlayerId, fragment: &CharacterStats) -> Result<(), PersistenceError> {
        self.backend.save(player, fragment)
    }
}

#[async_trait]
impl Component for StatsDomain {
    fn name(&self) -> &str {
        "StatsDomain"
    }

    async fn init(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
