use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::GameFeed;
use crate::db::models::CompletedGame;

/// A directory of `*.json` files, each holding one completed game or an
/// array of them. Files are left in place; re-reading them is harmless.
pub struct InboxFeed {
    dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InboxFile {
    Many(Vec<CompletedGame>),
    One(CompletedGame),
}

impl InboxFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        InboxFeed { dir: dir.into() }
    }
}

/// Parse one inbox file.
pub fn parse_games(json: &str) -> Result<Vec<CompletedGame>> {
    Ok(match serde_json::from_str::<InboxFile>(json)? {
        InboxFile::Many(games) => games,
        InboxFile::One(game) => vec![game],
    })
}

#[async_trait]
impl GameFeed for InboxFeed {
    async fn fetch_completed_games(&self) -> Result<Vec<CompletedGame>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading inbox {}", self.dir.display()))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut games = Vec::new();
        for path in paths {
            let body = match tokio::fs::read_to_string(&path).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Skipping unreadable inbox file {}: {}", path.display(), e);
                    continue;
                }
            };
            match parse_games(&body) {
                Ok(mut parsed) => {
                    debug!("{}: {} games", path.display(), parsed.len());
                    games.append(&mut parsed);
                }
                Err(e) => warn!("Skipping malformed inbox file {}: {}", path.display(), e),
            }
        }
        Ok(games)
    }

    fn name(&self) -> &str {
        "inbox"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAME: &str = r#"{
        "game_id": "2025020101",
        "game_date": "2025-11-03",
        "home": {"team_code": "TOR", "score": 3, "shots": 31, "power_play_pct": 25.0},
        "away": {"team_code": "BOS", "score": 2, "shots": 27},
        "overtime": true
    }"#;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("inbox-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn single_and_array_files_parse() {
        let one = parse_games(GAME).unwrap();
        assert_eq!(one.len(), 1);
        assert!(one[0].overtime);
        assert_eq!(one[0].away.penalty_kill_pct, 0.0);
        let many = parse_games(&format!("[{GAME},{GAME}]")).unwrap();
        assert_eq!(many.len(), 2);
    }

    #[tokio::test]
    async fn reads_json_files_and_skips_garbage() {
        let dir = scratch_dir("read");
        std::fs::write(dir.join("a.json"), GAME).unwrap();
        std::fs::write(dir.join("b.json"), "{ not json").unwrap();
        std::fs::write(dir.join("notes.txt"), GAME).unwrap();

        let games = InboxFeed::new(&dir).fetch_completed_games().await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].home.team_code, "TOR");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let feed = InboxFeed::new("/nonexistent/inbox/dir");
        assert!(feed.fetch_completed_games().await.is_err());
    }
}
