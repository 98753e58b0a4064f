//! Player data domains hosted by this server. Each one owns a fragment type
//! and persists it through the shared [`PersistenceBackend`](crate::storage::PersistenceBackend).

pub mod attributes;
pub mod daily_tasks;
pub mod progression;
pub mod stats;

pub use attributes::{Attribute, Attributes, AttributesDomain};
pub use daily_tasks::{DailyTasks, DailyTasksDomain};
pub use progression::{Progression, ProgressionDomain};
pub use stats::{CharacterStats, StatsDomain};
