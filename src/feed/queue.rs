use anyhow::Result;
use async_trait::async_trait;

use super::GameFeed;
use crate::db::models::CompletedGame;
use crate::db::Database;

/// Games queued in the `completed_games` table that have not been trained on.
pub struct DatabaseFeed {
    db: Database,
    limit: i64,
}

impl DatabaseFeed {
    pub fn new(db: Database, limit: i64) -> Self {
        DatabaseFeed { db, limit }
    }
}

#[async_trait]
impl GameFeed for DatabaseFeed {
    async fn fetch_completed_games(&self) -> Result<Vec<CompletedGame>> {
        let db = self.db.clone();
        let limit = self.limit;
        tokio::task::spawn_blocking(move || db.list_unprocessed_games(limit)).await?
    }

    fn name(&self) -> &str {
        "db-queue"
    }
}
