//! Level, experience and mana. Optional: a player whose progression fails to
//! load still joins, starting from level 1 for the session.

use crate::storage::PersistenceBackend;
use realm_lifecycle::{async_trait, Component, ComponentError};
use realm_player_data::{Fragment, FragmentDomain, PersistenceError, PlayerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MAX_LEVEL: u32 = 60;
const MANA_PER_LEVEL: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progression {
    pub level: u32,
    pub experience: u64,
    pub mana: u32,
    pub max_mana: u32,
}

impl Default for Progression {
    fn default() -> Self {
        Self {
            level: 1,
            experience: 0,
            mana: MANA_PER_LEVEL,
            max_mana: MANA_PER_LEVEL,
        }
    }
}

impl Fragment for Progression {
    const KIND: &'static str = "progression";
}

impl Progression {
    /// Experience needed to go from `level` to `level + 1`.
    pub fn experience_for(level: u32) -> u64 {
        100 * u64::from(level) * u64::from(level)
    }

    /// Adds experience and returns how many levels were gained. Each level
    /// raises max mana and refills it.
    pub fn grant_experience(&mut self, amount: u64) -> u32 {
        if self.level >= MAX_LEVEL {
            return 0;
        }
        self.experience += amount;
        let mut gained = 0;
        while self.level < MAX_LEVEL && self.experience >= Self::experience_for(self.level) {
            self.experience -= Self::experience_for(self.level);
            self.level += 1;
            gained += 1;
        }
        if self.level >= MAX_LEVEL {
            self.experience = 0;
        }
        if gained > 0 {
            self.max_mana = self.level * MANA_PER_LEVEL;
            self.mana = self.max_mana;
        }
        gained
    }

    /// Spends mana if enough is available.
    pub fn spend_mana(&mut self, amount: u32) -> bool {
        if amount > self.mana {
            return false;
        }
        self.mana -= amount;
        true
    }

    pub fn restore_mana(&mut self, amount: u32) {
        self.mana = self.mana.saturating_add(amount).min(self.max_mana);
    }
}

pub struct ProgressionDomain {
    backend: Arc<PersistenceBackend>,
}

impl ProgressionDomain {
    pub fn new(backend: Arc<PersistenceBackend>) -> Self {
        Self { backend }
    }
}

impl FragmentDomain for ProgressionDomain {
    type Fragment = Progression;

    fn load(&self, player: PlayerId) -> Result<Progression, PersistenceError> {
        self.backend.load(player)
    }

    fn save(&self, player: PlayerId, fragment: &Progression) -> Result<(), PersistenceError> {
        self.backend.save(player, fragment)
    }
}

#[async_trait]
impl Component for ProgressionDomain {
    fn name(&self) -> &str {
        "ProgressionDomain"
    }

    async fn init(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
