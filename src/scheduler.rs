//! Background workers: the periodic training scan and weight recalibration.
//!
//! Both run on a `tokio::time::interval` and stop when the shutdown channel
//! flips to `true`. Neither interrupts a step in progress.

use crate::db::models::CompletedGame;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::feed::GameFeed;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counts from one training scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub fetched: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// The scan stopped early on a persistence failure.
    pub persistence_failed: bool,
}

/// Poll every feed concurrently and merge the results, one entry per game
/// id, oldest first. A feed that errors or overruns `timeout` is skipped.
pub async fn collect_games(feeds: &[Arc<dyn GameFeed>], timeout: Duration) -> Vec<CompletedGame> {
    let fetches = feeds.iter().map(|feed| {
        let feed = Arc::clone(feed);
        async move {
            let out = match tokio::time::timeout(timeout, feed.fetch_completed_games()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {:?}", timeout)),
            };
            (feed.name().to_string(), out)
        }
    });

    let mut by_id: HashMap<String, CompletedGame> = HashMap::new();
    for (name, result) in join_all(fetches).await {
        match result {
            Ok(games) => {
                debug!("Feed {} returned {} games", name, games.len());
                for game in games {
                    by_id.entry(game.game_id.clone()).or_insert(game);
                }
            }
            Err(e) => warn!("Feed {} failed: {}", name, e),
        }
    }

    let mut games: Vec<CompletedGame> = by_id.into_values().collect();
    games.sort_by(|a, b| (a.game_date, &a.game_id).cmp(&(b.game_date, &b.game_id)));
    games
}

/// Ingest everything the feeds report, in date order.
pub async fn run_training_scan(engine: &Engine, feeds: &[Arc<dyn GameFeed>], timeout: Duration) -> ScanSummary {
    let games = collect_games(feeds, timeout).await;
    let mut summary = ScanSummary {
        fetched: games.len(),
        ..ScanSummary::default()
    };
    for game in games {
        let id = game.game_id.clone();
        match engine.ingest_completed_game(game).await {
            Ok(_) => summary.ingested += 1,
            Err(EngineError::AlreadyProcessed(_)) => summary.duplicates += 1,
            Err(EngineError::MalformedInput(reason)) => {
                warn!("Rejected game {}: {}", id, reason);
                summary.rejected += 1;
            }
            Err(e) if e.is_retryable() => {
                error!("Training scan stopped at {}: {}", id, e);
                summary.persistence_failed = true;
                break;
            }
            Err(e) => {
                warn!("Could not ingest {}: {}", id, e);
                summary.rejected += 1;
            }
        }
    }
    if summary.ingested > 0 || summary.rejected > 0 {
        info!(
            "Training scan: {} fetched, {} ingested, {} already processed, {} rejected",
            summary.fetched, summary.ingested, summary.duplicates, summary.rejected
        );
    }
    summary
}

/// Spawn the periodic training scan.
pub fn start_training_worker(
    engine: Engine,
    feeds: Vec<Arc<dyn GameFeed>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let names: Vec<&str> = feeds.iter().map(|f| f.name()).collect();
        info!("Training worker started ({} feeds: {:?}, interval={:?})", feeds.len(), names, period);
        let feed_timeout = period.min(Duration::from_secs(30));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut retry_flush = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if retry_flush {
                        match engine.flush_state().await {
                            Ok(()) => {
                                info!("Pending training state persisted");
                                retry_flush = false;
                            }
                            Err(e) => {
                                warn!("Persistence still failing: {}", e);
                                continue;
                            }
                        }
                    }
                    let summary = run_training_scan(&engine, &feeds, feed_timeout).await;
                    retry_flush = summary.persistence_failed;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        if let Err(e) = engine.flush_state().await {
            error!("Final state flush failed: {}", e);
        }
        info!("Training worker stopped");
    })
}

/// Spawn the periodic recalibration of model weights.
pub fn start_recalibration_worker(
    engine: Engine,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Recalibration worker started (interval={:?})", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; weights only move after a full period.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = engine.recalibrate().await {
                        error!("Recalibration failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Recalibration worker stopped");
    })
}
