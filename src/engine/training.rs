//! Training pipeline: one completed game at a time.
//!
//! Each game is scored against the prediction served for it (or an
//! out-of-sample prediction from the pre-update state), then folded into the
//! ratings and the network's pending batch. The step is persisted as a
//! single transaction. A failed save keeps the in-memory step and the pending
//! write, which the next ingest or [`Engine::flush_state`] retries.

use super::{prediction_log_key, validate_game, Engine};
use crate::db::models::{AccuracyRecord, CompletedGame, EnsemblePrediction, Matchup, SituationalContext, ENSEMBLE_NAME};
use crate::db::StateSnapshot;
use crate::engine::network::TrainingExample;
use crate::engine::ratings::EloDelta;
use crate::error::EngineError;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Writes accumulated since the last successful commit.
#[derive(Debug, Default)]
pub(crate) struct PendingCommit {
    teams: BTreeSet<String>,
    processed: Vec<String>,
    records: Vec<AccuracyRecord>,
    resolved_matchups: Vec<(String, NaiveDate)>,
}

impl PendingCommit {
    fn is_empty(&self) -> bool {
        self.teams.is_empty() && self.processed.is_empty() && self.records.is_empty()
    }
}

pub(crate) struct TrainingState {
    batch: Vec<TrainingExample>,
    processed: HashSet<String>,
    pending: PendingCommit,
}

impl TrainingState {
    pub(crate) fn new(batch: Vec<TrainingExample>, processed: HashSet<String>) -> Self {
        TrainingState {
            batch,
            processed,
            pending: PendingCommit::default(),
        }
    }
}

/// What one ingested game changed.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub game_id: String,
    pub elo_delta: EloDelta,
    /// Accuracy records written for this game (models plus ensemble).
    pub records: usize,
    /// Scored against a prediction served before the game.
    pub scored_logged_prediction: bool,
    /// Mean loss of the network update, when this game completed a batch.
    pub batch_loss: Option<f64>,
}

fn record(game: &CompletedGame, model_name: &str, p_home: f64, confidence: f64) -> AccuracyRecord {
    let predicted_winner = if p_home >= 0.5 {
        &game.home.team_code
    } else {
        &game.away.team_code
    };
    AccuracyRecord {
        game_id: game.game_id.clone(),
        model_name: model_name.to_string(),
        home_team: game.home.team_code.clone(),
        predicted_winner: predicted_winner.clone(),
        actual_winner: game.winner().to_string(),
        predicted_probability: p_home,
        confidence,
        recorded_at: Utc::now(),
    }
}

impl Engine {
    /// Train on one completed game. Games already used are rejected with
    /// [`EngineError::AlreadyProcessed`] and change nothing.
    ///
    /// Games are applied in arrival order. One dated before a team's last
    /// processed game is folded into the current ratings with a warning; it
    /// is not replayed in date order. Each training scan sorts its games
    /// oldest first, so this only happens across scans.
    pub async fn ingest_completed_game(&self, game: CompletedGame) -> Result<IngestOutcome, EngineError> {
        validate_game(&game)?;
        let mut state = self.training.lock().await;
        if state.processed.contains(&game.game_id) {
            info!("Game {} already processed; skipping", game.game_id);
            return Err(EngineError::AlreadyProcessed(game.game_id));
        }

        let matchup = Matchup {
            home_team: game.home.team_code.clone(),
            away_team: game.away.team_code.clone(),
            game_date: game.game_date,
            context: SituationalContext {
                playoff: game.playoff,
                ..SituationalContext::default()
            },
        };
        let (ctx, _) = self.context_for(matchup).await;
        for side in [&ctx.home, &ctx.away] {
            if side.last_game_date.is_some_and(|d| d > game.game_date) {
                warn!(
                    "Game {} ({}) predates {}'s last processed game; applying anyway",
                    game.game_id, game.game_date, side.team_code
                );
            }
        }

        // Scoring
        let log_key = prediction_log_key(&game.home.team_code, &game.away.team_code, game.game_date);
        let logged = self.prediction_log.lock().await.resolve(&log_key, game.game_date);
        let scored_logged_prediction = logged.is_some();
        let features = ctx.features();
        let ctx = Arc::new(ctx);
        let prediction: Option<EnsemblePrediction> = match logged {
            Some(p) => Some(p),
            None => match self.run_ensemble(ctx.clone()).await {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Could not score game {}: {}", game.game_id, e);
                    None
                }
            },
        };
        let mut records = Vec::new();
        if let Some(p) = &prediction {
            for r in &p.model_results {
                records.push(record(&game, r.model.name(), r.win_probability, r.confidence));
            }
            records.push(record(&game, ENSEMBLE_NAME, p.raw_win_probability, p.ensemble_confidence));
            let mut weighting = self.weighting.write().await;
            for r in &p.model_results {
                let correct = (r.win_probability >= 0.5) == game.home_won();
                weighting.record(r.model, correct);
            }
        }

        let elo_delta = self.ratings.write().await.apply_game(&game, &self.config);

        state.batch.push(TrainingExample::new(
            &game.game_id,
            features,
            game.home_won(),
            game.home.score,
            game.away.score,
        ));
        let batch_loss = if state.batch.len() >= self.config.nn_batch_size {
            self.train_pending_batch(&mut state.batch).await
        } else {
            None
        };

        state.processed.insert(game.game_id.clone());
        state.pending.teams.insert(game.home.team_code.clone());
        state.pending.teams.insert(game.away.team_code.clone());
        state.pending.processed.push(game.game_id.clone());
        state.pending.records.extend(records.iter().cloned());
        state.pending.resolved_matchups.push((log_key, game.game_date));
        {
            let mut evaluation = self.evaluation.write().await;
            for r in &records {
                evaluation.push(r.clone());
            }
        }

        info!(
            "Trained on {} ({} {}-{} {}): Elo {:+.1}/{:+.1}, {} records",
            game.game_id,
            game.home.team_code,
            game.home.score,
            game.away.score,
            game.away.team_code,
            elo_delta.home,
            elo_delta.away,
            records.len()
        );

        self.commit(&mut state).await?;
        Ok(IngestOutcome {
            game_id: game.game_id,
            elo_delta,
            records: records.len(),
            scored_logged_prediction,
            batch_loss,
        })
    }

    /// Update the network on a full batch. The new weights are swapped in
    /// whole, so concurrent predictions see either the old or the new network.
    async fn train_pending_batch(&self, batch: &mut Vec<TrainingExample>) -> Option<f64> {
        let mut network = (**self.network.read().await).clone();
        let examples = std::mem::take(batch);
        let lr = self.config.nn_learning_rate;
        let handle = tokio::task::spawn_blocking(move || {
            let loss = network.train_batch(&examples, lr);
            (network, examples, loss)
        });
        match handle.await {
            Ok((network, examples, Ok(loss))) => {
                info!(
                    "Network updated on {} examples, loss {:.4} ({} seen)",
                    examples.len(),
                    loss,
                    network.examples_seen
                );
                *self.network.write().await = Arc::new(network);
                Some(loss)
            }
            Ok((_, examples, Err(e))) => {
                warn!("Discarding {} training examples: {}", examples.len(), e);
                None
            }
            Err(e) => {
                error!("Network training task failed: {}", e);
                None
            }
        }
    }

    async fn commit(&self, state: &mut TrainingState) -> Result<(), EngineError> {
        let ratings: Vec<_> = {
            let store = self.ratings.read().await;
            state
                .pending
                .teams
                .iter()
                .filter_map(|code| store.get(code).cloned())
                .collect()
        };
        let network_json = serde_json::to_string(self.network.read().await.as_ref())
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let batch_json =
            serde_json::to_string(&state.batch).map_err(|e| EngineError::Persistence(e.to_string()))?;
        let weights = self.weighting.read().await.rows();

        let snapshot = StateSnapshot {
            ratings: &ratings,
            network_json: &network_json,
            batch_json: &batch_json,
            weights: &weights,
            processed: &state.pending.processed,
            records: &state.pending.records,
            resolved_matchups: &state.pending.resolved_matchups,
            prune_before: self.prediction_log.lock().await.horizon(),
        };
        match self.db.commit_state(&snapshot) {
            Ok(()) => {
                state.pending = Default::default();
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to persist training state ({} games pending): {}",
                    state.pending.processed.len(),
                    e
                );
                Err(EngineError::Persistence(e.to_string()))
            }
        }
    }

    /// Write all in-memory training state, including anything a failed
    /// commit left behind.
    pub async fn flush_state(&self) -> Result<(), EngineError> {
        let mut state = self.training.lock().await;
        if !state.pending.is_empty() {
            info!("Retrying persistence of {} games", state.pending.processed.len());
        }
        self.commit(&mut state).await
    }
}
