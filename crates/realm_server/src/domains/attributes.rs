//! Base character attributes. Required: a player cannot join without them.

use crate::storage::PersistenceBackend;
use realm_lifecycle::{async_trait, Component, ComponentError};
use realm_player_data::{Fragment, FragmentDomain, PersistenceError, PlayerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const STARTING_POINTS: u32 = 5;
const BASE_VALUE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Strength,
    Agility,
    Intellect,
    Vitality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub strength: u32,
    pub agility: u32,
    pub intellect: u32,
    pub vitality: u32,
    pub unspent_points: u32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            strength: BASE_VALUE,
            agility: BASE_VALUE,
            intellect: BASE_VALUE,
            vitality: BASE_VALUE,
            unspent_points: STARTING_POINTS,
        }
    }
}

impl Fragment for Attributes {
    const KIND: &'static str = "attributes";
}

impl Attributes {
    pub fn value(&self, attribute: Attribute) -> u32 {
        match attribute {
            Attribute::Strength => self.strength,
            Attribute::Agility => self.agility,
            Attribute::Intellect => self.intellect,
            Attribute::Vitality => self.vitality,
        }
    }

    /// Moves `points` from the unspent pool into `attribute`. Returns false
    /// and changes nothing if there are not enough points.
    pub fn allocate(&mut self, attribute: Attribute, points: u32) -> bool {
        if points == 0 || points > self.unspent_points {
            return false;
        }
        self.unspent_points -= points;
        let slot = match attribute {
            Attribute::Strength => &mut self.strength,
            Attribute::Agility => &mut self.agility,
            Attribute::Intellect => &mut self.intellect,
            Attribute::Vitality => &mut self.vitality,
        };
        *slot += points;
        true
    }

    pub fn total(&self) -> u32 {
        self.strength + self.agility + self.intellect + self.vitality
    }
}

pub struct AttributesDomain {
    backend: Arc<PersistenceBackend>,
}

impl AttributesDomain {
    pub fn new(backend: Arc<PersistenceBackend>) -> Self {
        Self { backend }
    }
}

impl FragmentDomain for AttributesDomain {
    type Fragment = Attributes;

    fn load(&self, player: PlayerId) -> Result<Attributes, PersistenceError> {
        self.backend.load(player)
    }

    fn save(&self, player: PlayerId, fragment: &Attributes) -> Result<(), PersistenceError> {
        self.backend.save(player, fragment)
    }
}

#[async_trait]
impl Component for AttributesDomain {
    fn name(&self) -> &str {
        "AttributesDomain"
    }

    async fn init(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
