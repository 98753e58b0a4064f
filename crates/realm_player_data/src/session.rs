//! Callbacks the host integration layer invokes at connect and disconnect.

use crate::aggregator::PlayerDataService;
use crate::error::PlayerDataError;
use crate::fragment::PlayerData;
use crate::PlayerId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Session boundary events for one player identity.
///
/// Both are invoked exactly once per connect / disconnect, start before end,
/// and never overlap for the same player.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Starts loading the player's data and returns the join task. The
    /// caller attaches whatever continuation it needs to the handle; the
    /// load itself never runs on the caller's context.
    fn on_session_start(self: Arc<Self>, player: PlayerId) -> JoinHandle<Result<PlayerData, PlayerDataError>>;

    /// Saves and evicts the player's session.
    async fn on_session_end(&self, player: PlayerId) -> Result<(), PlayerDataError>;
}

#[async_trait]
impl SessionHooks for PlayerDataService {
    fn on_session_start(self: Arc<Self>, player: PlayerId) -> JoinHandle<Result<PlayerData, PlayerDataError>> {
        tokio::spawn(async move {
            let result = self.load_data(player).await;
            match &result {
                Ok(data) => info!("Player {} joined with {} fragment(s)", player, data.len()),
                Err(e) => error!("Join for player {} failed: {}", player, e),
            }
            result
        })
    }

    async fn on_session_end(&self, player: PlayerId) -> Result<(), PlayerDataError> {
        let result = self.unload_data(player).await;
        if let Err(e) = &result {
            error!("Leave for player {} did not save cleanly: {}", player, e);
        }
        result
    }
}
