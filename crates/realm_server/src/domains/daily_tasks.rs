//! Daily tasks. Saved in the background: the domain tracks which players
//! actually changed and skips the write for everyone else. Changes made
//! through the player data service mark the player automatically.

use crate::storage::PersistenceBackend;
use dashmap::DashSet;
use realm_lifecycle::{async_trait, Component, ComponentError};
use realm_player_data::{Fragment, FragmentDomain, PersistenceError, PlayerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

const SECONDS_PER_DAY: u64 = 86_400;

/// Days since the Unix epoch, used as the reset key.
pub fn current_day() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / SECONDS_PER_DAY)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTasks {
    pub day: u64,
    pub completed: Vec<String>,
    /// Consecutive days with at least one completed task
    pub streak: u32,
}

impl Fragment for DailyTasks {
    const KIND: &'static str = "daily_tasks";
}

impl DailyTasks {
    /// Records a completed task for `today`. Returns false if it was already
    /// completed today.
    pub fn complete(&mut self, task: &str, today: u64) -> bool {
        self.roll_over(today);
        if self.completed.iter().any(|t| t == task) {
            return false;
        }
        if self.completed.is_empty() {
            self.streak += 1;
        }
        self.completed.push(task.to_string());
        true
    }

    fn roll_over(&mut self, today: u64) {
        if self.day == today {
            return;
        }
        let kept_streak = !self.completed.is_empty() && self.day + 1 == today;
        if !kept_streak {
            self.streak = 0;
        }
        self.day = today;
        self.completed.clear();
    }
}

pub struct DailyTasksDomain {
    backend: Arc<PersistenceBackend>,
    dirty: DashSet<PlayerId>,
}

impl DailyTasksDomain {
    pub fn new(backend: Arc<PersistenceBackend>) -> Self {
        Self {
            backend,
            dirty: DashSet::new(),
        }
    }

    /// Flags the player's tasks as changed so the next save writes them.
    /// Only needed for edits that bypass the player data service.
    pub fn mark_dirty(&self, player: PlayerId) {
        self.dirty.insert(player);
    }

    pub fn is_dirty(&self, player: PlayerId) -> bool {
        self.dirty.contains(&player)
    }
}

impl FragmentDomain for DailyTasksDomain {
    type Fragment = DailyTasks;

    fn load(&self, player: PlayerId) -> Result<DailyTasks, PersistenceError> {
        self.dirty.remove(&player);
        self.backend.load(player)
    }

    fn save(&self, player: PlayerId, fragment: &DailyTasks) -> Result<(), PersistenceError> {
        if self.dirty.remove(&player).is_none() {
            debug!("Daily tasks for player {} unchanged; skipping write", player);
            return Ok(());
        }
        self.backend.save(player, fragment).inspect_err(|_| {
            // Keep the flag so a retry writes again.
            self.dirty.insert(player);
        })
    }

    fn on_update(&self, player: PlayerId) {
        self.mark_dirty(player);
    }
}

#[async_trait]
impl Component for DailyTasksDomain {
    fn name(&self) -> &str {
        "DailyTasksDomain"
    }

    async fn init(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
