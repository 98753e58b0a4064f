//! # Realm Player Data
//!
//! Per-player state for a realm server, split into fragments owned by the
//! domains that understand them (attributes, stats, progression, quests...).
//!
//! ## Architecture Overview
//!
//! * [`Fragment`] / [`FragmentDomain`]: a domain's slice of state and the
//!   component that persists it
//! * [`SessionCache`]: one [`SessionEntry`] per connected player
//! * [`WorkExecutor`]: bounded blocking pool that keeps persistence off the
//!   game-logic context
//! * [`PendingSaves`]: tracked deferred saves, awaited before a rejoining
//!   player is loaded and again at shutdown
//! * [`PlayerDataService`]: aggregates every domain into one join / leave
//!   flow and is itself a lifecycle [`Component`](realm_lifecycle::Component)
//!
//! The service is the only place that knows about every domain. Domains know
//! nothing about each other, and gameplay code reads fragments through the
//! cache rather than touching storage.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod fragment;
pub mod pending;
pub mod pool;
pub mod session;

pub use aggregator::{PlayerDataService, PlayerDataStats};
pub use cache::{SessionCache, SessionEntry, SessionPhase};
pub use config::PlayerDataConfig;
pub use error::{PersistenceError, PlayerDataError, SessionError};
pub use executor::WorkExecutor;
pub use fragment::{DomainOptions, Fragment, FragmentDomain, PlayerData, Requirement, SaveMode};
pub use pending::{PendingSaveToken, PendingSaves};
pub use pool::{ConnectionPool, PooledConnection};
pub use session::SessionHooks;

/// Unique identifier for players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::str::FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
