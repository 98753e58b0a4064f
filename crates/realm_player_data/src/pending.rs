//! Tracking for deferred saves that outlive the call that started them.

use crate::error::PersistenceError;
use crate::PlayerId;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a tracked save; the error is shared between every waiter.
pub type SaveOutcome = Result<(), Arc<PersistenceError>>;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to an in-flight save.
///
/// The save runs on its own task and makes progress whether or not anyone
/// awaits the token. Any number of clones may wait on it.
#[derive(Clone)]
pub struct PendingSaveToken {
    id: u64,
    player: PlayerId,
    label: Arc<str>,
    done: Arc<AtomicBool>,
    completion: Shared<BoxFuture<'static, SaveOutcome>>,
}

impl PendingSaveToken {
    /// Spawns `work` and returns a token that resolves when it finishes.
    pub fn spawn<Fut>(player: PlayerId, label: impl Into<Arc<str>>, work: Fut) -> Self
    where
        Fut: Future<Output = Result<(), PersistenceError>> + Send + 'static,
    {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let handle = tokio::spawn(async move {
            let result = work.await;
            flag.store(true, Ordering::Release);
            result
        });

        let completion = async move {
            match handle.await {
                Ok(result) => result.map_err(Arc::new),
                Err(e) => Err(Arc::new(PersistenceError::TaskFailed(e.to_string()))),
            }
        }
        .boxed()
        .shared();

        Self {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            player,
            label: label.into(),
            done,
            completion,
        }
    }

    /// A token that is already resolved successfully.
    pub fn completed(player: PlayerId, label: impl Into<Arc<str>>) -> Self {
        let completion = futures::future::ready(Ok(())).boxed().shared();
        Self {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            player,
            label: label.into(),
            done: Arc::new(AtomicBool::new(true)),
            completion,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_resolved(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Waits for the save to finish.
    pub async fn wait(&self) -> SaveOutcome {
        self.completion.clone().await
    }
}

impl std::fmt::Debug for PendingSaveToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSaveToken")
            .field("id", &self.id)
            .field("player", &self.player)
            .field("label", &self.label)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Registry of unresolved save tokens, grouped by player.
#[derive(Default)]
pub struct PendingSaves {
    tokens: DashMap<PlayerId, Vec<PendingSaveToken>>,
}

impl PendingSaves {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, token: PendingSaveToken) {
        let mut list = self.tokens.entry(token.player()).or_default();
        list.retain(|t| !t.is_resolved());
        list.push(token);
    }

    /// Waits until the player has no unresolved tokens, including any that
    /// are tracked while waiting. Returns how many tokens were awaited.
    pub async fn wait_for(&self, player: PlayerId) -> usize {
        let mut waited = 0;
        loop {
            let outstanding: Vec<PendingSaveToken> = match self.tokens.get(&player) {
                Some(list) => list.iter().filter(|t| !t.is_resolved()).cloned().collect(),
                None => Vec::new(),
            };
            if outstanding.is_empty() {
                self.prune(player);
                return waited;
            }

            debug!(
                "Waiting for {} pending save(s) of player {}",
                outstanding.len(),
                player
            );
            for token in &outstanding {
                let _ = token.wait().await;
            }
            waited += outstanding.len();
            self.prune(player);
        }
    }

    /// Waits for every tracked token across all players until none remain.
    pub async fn drain_all(&self) -> usize {
        let mut waited = 0;
        loop {
            let outstanding: Vec<PendingSaveToken> = self
                .tokens
                .iter()
                .flat_map(|list| list.value().clone())
                .filter(|t| !t.is_resolved())
                .collect();
            if outstanding.is_empty() {
                self.tokens.retain(|_, list| {
                    list.retain(|t| !t.is_resolved());
                    !list.is_empty()
                });
                if waited > 0 {
                    info!("💾 Drained {} pending save(s)", waited);
                }
                return waited;
            }

            futures::future::join_all(outstanding.iter().map(|t| t.wait())).await;
            waited += outstanding.len();
        }
    }

    /// Number of unresolved tokens across all players.
    pub fn count(&self) -> usize {
        self.tokens
            .iter()
            .map(|list| list.iter().filter(|t| !t.is_resolved()).count())
            .sum()
    }

    pub fn count_for(&self, player: PlayerId) -> usize {
        self.tokens
            .get(&player)
            .map(|list| list.iter().filter(|t| !t.is_resolved()).count())
            .unwrap_or(0)
    }

    fn prune(&self, player: PlayerId) {
        if let Some(mut list) = self.tokens.get_mut(&player) {
            list.retain(|t| !t.is_resolved());
        }
        self.tokens.remove_if(&player, |_, list| list.is_empty());
    }
}
