//! Sources of completed games for the training scan.

pub mod inbox;
pub mod queue;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::models::CompletedGame;

pub use inbox::InboxFeed;
pub use queue::DatabaseFeed;

/// Trait that every completed-game source must implement.
#[async_trait]
pub trait GameFeed: Send + Sync {
    /// Completed games this source currently knows about. Returning games
    /// that were already trained on is fine; the engine skips them.
    async fn fetch_completed_games(&self) -> Result<Vec<CompletedGame>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
