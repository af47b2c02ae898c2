//! The prediction engine and its contract with surrounding handlers.
//!
//! [`Engine`] owns every piece of shared state. Ratings and network weights
//! sit behind read/write locks: predictions and simulations take the read
//! side (or copy a snapshot), and only the training pipeline writes. Training
//! itself is serialised by a mutex so games are applied one at a time.

pub mod calibration;
pub mod ensemble;
pub mod evaluation;
pub mod features;
pub mod models;
pub mod network;
pub mod prediction_log;
pub mod ratings;
pub mod season;
pub mod training;
pub mod weighting;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::db::models::{
    CompletedGame, EnsemblePrediction, Matchup, SeasonSchedule, SeasonSimulationResult, SituationalContext,
};
use crate::db::Database;
use crate::error::EngineError;
use anyhow::Context;
use calibration::{fit_platt, PlattCalibration};
use chrono::{Datelike, NaiveDate};
use evaluation::{EvaluationLog, ModelMetrics};
use features::FEATURE_COUNT;
use models::monte_carlo::stable_seed;
use models::{PredictionContext, PredictionModel};
use network::{Network, TrainingExample, OUTPUT_SIZE};
pub use prediction_log::{prediction_log_key, PredictionLog};
use ratings::RatingStore;
use season::{SeasonParams, SeasonSimulator};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use training::TrainingState;
use weighting::{RecalibrationReport, WeightingService};

/// Cache key for ensemble predictions. Carries the rating-store version so a
/// processed game invalidates every earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PredictionKey {
    home: String,
    away: String,
    date: NaiveDate,
    neutral_site: bool,
    playoff: bool,
    home_rest: Option<u32>,
    away_rest: Option<u32>,
    ratings_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeasonKey {
    team: String,
    simulations: usize,
    seed: u64,
    ratings_version: u64,
    schedule_version: u64,
}

/// Result of a manual or scheduled recalibration.
#[derive(Debug, Clone, Serialize)]
pub struct RecalibrationOutcome {
    pub weights: RecalibrationReport,
    /// Platt parameters now applied to ensemble output, if any.
    pub calibration: Option<PlattCalibration>,
}

/// Team codes are 2-4 uppercase ASCII letters.
pub fn validate_team_code(code: &str) -> Result<(), EngineError> {
    if (2..=4).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(EngineError::MalformedInput(format!("invalid team code {code:?}")))
    }
}

fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if (1900..=2200).contains(&date.year()) {
        Ok(())
    } else {
        Err(EngineError::MalformedInput(format!("implausible game date {date}")))
    }
}

pub fn validate_matchup(matchup: &Matchup) -> Result<(), EngineError> {
    validate_team_code(&matchup.home_team)?;
    validate_team_code(&matchup.away_team)?;
    if matchup.home_team == matchup.away_team {
        return Err(EngineError::MalformedInput(format!(
            "{} cannot play itself",
            matchup.home_team
        )));
    }
    validate_date(matchup.game_date)
}

pub fn validate_game(game: &CompletedGame) -> Result<(), EngineError> {
    if game.game_id.trim().is_empty() {
        return Err(EngineError::MalformedInput("empty game id".into()));
    }
    validate_team_code(&game.home.team_code)?;
    validate_team_code(&game.away.team_code)?;
    if game.home.team_code == game.away.team_code {
        return Err(EngineError::MalformedInput(format!(
            "game {} lists {} on both sides",
            game.game_id, game.home.team_code
        )));
    }
    validate_date(game.game_date)?;
    if game.home.score == game.away.score {
        return Err(EngineError::MalformedInput(format!(
            "game {} has no winner ({}-{})",
            game.game_id, game.home.score, game.away.score
        )));
    }
    for side in [&game.home, &game.away] {
        for pct in [side.power_play_pct, side.penalty_kill_pct] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(EngineError::MalformedInput(format!(
                    "game {}: special-teams percentage {pct} out of range",
                    game.game_id
                )));
            }
        }
    }
    Ok(())
}

/// Sets the flag when dropped while armed, so abandoning a simulation future
/// stops the worker threads.
struct CancelOnDrop {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::Relaxed);
        }
    }
}

/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    db: Database,
    models: Arc<Vec<PredictionModel>>,
    ratings: Arc<RwLock<RatingStore>>,
    network: Arc<RwLock<Arc<Network>>>,
    weighting: Arc<RwLock<WeightingService>>,
    evaluation: Arc<RwLock<EvaluationLog>>,
    calibration: Arc<RwLock<Option<PlattCalibration>>>,
    prediction_log: Arc<Mutex<PredictionLog>>,
    training: Arc<Mutex<TrainingState>>,
    season: Arc<RwLock<Option<(Arc<SeasonSchedule>, u64)>>>,
    prediction_cache: TtlCache<PredictionKey, EnsemblePrediction>,
    season_cache: TtlCache<SeasonKey, SeasonSimulationResult>,
}

impl Engine {
    /// Open the database named in the config and restore saved state.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let db = Database::open(&config.database_path)
            .with_context(|| format!("opening {}", config.database_path))?;
        Engine::load(Arc::new(config), db)
    }

    /// Restore ratings, network, pending batch, weights, calibration,
    /// accuracy log, processed ids and the prediction log from `db`.
    pub fn load(config: Arc<Config>, db: Database) -> anyhow::Result<Self> {
        let saved_ratings = db.load_ratings()?;
        let newest_game = saved_ratings.iter().filter_map(|r| r.last_game_date).max();
        let ratings = RatingStore::from_ratings(saved_ratings);
        let topology = network_topology(&config);

        let network = match db.load_network()? {
            Some(json) => {
                let net: Network = serde_json::from_str(&json).context("parsing saved network")?;
                if net.topology() == topology {
                    net
                } else {
                    warn!(
                        "Saved network topology {:?} does not match {:?}; starting fresh",
                        net.topology(),
                        topology
                    );
                    Network::new(&topology, config.nn_seed)
                }
            }
            None => Network::new(&topology, config.nn_seed),
        };
        let batch: Vec<TrainingExample> = match db.load_training_batch()? {
            Some(json) => serde_json::from_str(&json).context("parsing saved training batch")?,
            None => Vec::new(),
        };
        let weighting = WeightingService::restore(&config, &db.load_model_weights()?);
        let evaluation = EvaluationLog::from_records(db.load_accuracy_records()?);
        let calibration = db.load_calibration()?.map(|(a, b)| PlattCalibration { a, b });
        let processed: HashSet<String> = db.load_processed_ids()?.into_iter().collect();

        let mut logged = Vec::new();
        for (key, json) in db.load_pending_predictions()? {
            match serde_json::from_str::<EnsemblePrediction>(&json) {
                Ok(p) => logged.push(p),
                Err(e) => warn!("Dropping unreadable logged prediction {}: {}", key, e),
            }
        }
        let prediction_log = PredictionLog::restore(
            config.prediction_log_retention_days,
            logged,
            db.load_resolved_matchups()?,
            newest_game,
        );

        info!(
            "Engine loaded: {} teams, {} processed games, {} pending examples, {} accuracy records",
            ratings.len(),
            processed.len(),
            batch.len(),
            evaluation.len()
        );

        Ok(Engine {
            models: Arc::new(PredictionModel::pool(&config)),
            prediction_cache: TtlCache::new(Duration::from_secs(config.prediction_cache_ttl_secs)),
            season_cache: TtlCache::new(Duration::from_secs(config.season_cache_ttl_secs)),
            ratings: Arc::new(RwLock::new(ratings)),
            network: Arc::new(RwLock::new(Arc::new(network))),
            weighting: Arc::new(RwLock::new(weighting)),
            evaluation: Arc::new(RwLock::new(evaluation)),
            calibration: Arc::new(RwLock::new(calibration)),
            prediction_log: Arc::new(Mutex::new(prediction_log)),
            training: Arc::new(Mutex::new(TrainingState::new(batch, processed))),
            season: Arc::new(RwLock::new(None)),
            config,
            db,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ── Predictions ──────────────────────────────────────────────────────────

    /// Predict a game with default situational context.
    pub async fn predict_matchup(
        &self,
        home_team: &str,
        away_team: &str,
        game_date: NaiveDate,
    ) -> Result<EnsemblePrediction, EngineError> {
        self.predict(Matchup {
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            game_date,
            context: SituationalContext::default(),
        })
        .await
    }

    /// Blend every model for `matchup`. Served predictions are logged so the
    /// game can be scored against them once it is played.
    pub async fn predict(&self, matchup: Matchup) -> Result<EnsemblePrediction, EngineError> {
        validate_matchup(&matchup)?;
        let (ctx, version) = self.context_for(matchup).await;

        let key = PredictionKey {
            home: ctx.matchup.home_team.clone(),
            away: ctx.matchup.away_team.clone(),
            date: ctx.matchup.game_date,
            neutral_site: ctx.matchup.context.neutral_site,
            playoff: ctx.matchup.context.playoff,
            home_rest: ctx.matchup.context.home_rest_days,
            away_rest: ctx.matchup.context.away_rest_days,
            ratings_version: version,
        };
        if let Some(cached) = self.prediction_cache.get(&key).await {
            return Ok(cached);
        }

        let prediction = self.run_ensemble(Arc::new(ctx)).await?;
        info!(
            "{} @ {} on {}: home {:.1}% ({}), confidence {:.2}, {} models",
            prediction.away_team,
            prediction.home_team,
            prediction.game_date,
            prediction.win_probability * 100.0,
            prediction.predicted_score,
            prediction.ensemble_confidence,
            prediction.model_results.len()
        );

        self.prediction_cache.insert(key, prediction.clone()).await;
        self.log_prediction(&prediction).await;
        Ok(prediction)
    }

    /// Context built from the current rating and network snapshots, and the
    /// rating version it was taken at.
    async fn context_for(&self, matchup: Matchup) -> (PredictionContext, u64) {
        let (home, away, version) = {
            let ratings = self.ratings.read().await;
            (
                ratings.get_or_prior(&matchup.home_team, &self.config),
                ratings.get_or_prior(&matchup.away_team, &self.config),
                ratings.version(),
            )
        };
        let network = self.network.read().await.clone();
        (
            PredictionContext::new(matchup, home, away, self.config.league_avg_goals, network),
            version,
        )
    }

    async fn run_ensemble(&self, ctx: Arc<PredictionContext>) -> Result<EnsemblePrediction, EngineError> {
        let weights = self.weighting.read().await.weights();
        let calibration = *self.calibration.read().await;
        ensemble::run_ensemble(
            &self.models,
            ctx,
            &weights,
            calibration,
            self.config.agreement_share,
            Duration::from_millis(self.config.model_timeout_ms),
        )
        .await
    }

    /// Keep a served forecast for scoring, unless its game is already
    /// played or has fallen out of the retention window.
    async fn log_prediction(&self, prediction: &EnsemblePrediction) {
        let key = prediction_log_key(&prediction.home_team, &prediction.away_team, prediction.game_date);
        let mut log = self.prediction_log.lock().await;
        if !log.record(prediction) {
            debug!("Not logging {}: already played or outside the retention window", key);
            return;
        }
        match serde_json::to_string(prediction) {
            Ok(json) => {
                if let Err(e) = self.db.save_pending_prediction(&key, prediction.game_date, &json) {
                    warn!("Could not persist logged prediction {}: {}", key, e);
                }
            }
            Err(e) => warn!("Could not serialize prediction {}: {}", key, e),
        }
    }

    // ── Season simulation ────────────────────────────────────────────────────

    /// Replace the standings and remaining schedule used for season odds.
    pub async fn load_season(&self, schedule: SeasonSchedule) -> Result<(), EngineError> {
        for row in &schedule.standings {
            validate_team_code(&row.team_code)?;
        }
        for game in &schedule.remaining_games {
            validate_team_code(&game.home_team)?;
            validate_team_code(&game.away_team)?;
        }
        let mut season = self.season.write().await;
        let version = season.as_ref().map_or(1, |(_, v)| v + 1);
        info!(
            "Season loaded: {} teams, {} remaining games",
            schedule.standings.len(),
            schedule.remaining_games.len()
        );
        *season = Some((Arc::new(schedule), version));
        drop(season);
        self.season_cache.clear().await;
        Ok(())
    }

    /// Playoff odds for `team` over `simulations` seasons (0 means the
    /// configured default). The seed is derived from the team and the current
    /// rating and schedule versions, so a snapshot always gives the same odds.
    pub async fn simulate_season(
        &self,
        team: &str,
        simulations: usize,
    ) -> Result<SeasonSimulationResult, EngineError> {
        self.simulate_season_seeded(team, simulations, None).await
    }

    /// As [`Engine::simulate_season`] with an explicit seed. Dropping the
    /// returned future cancels the simulation and discards partial work.
    pub async fn simulate_season_seeded(
        &self,
        team: &str,
        simulations: usize,
        seed: Option<u64>,
    ) -> Result<SeasonSimulationResult, EngineError> {
        validate_team_code(team)?;
        let n = match simulations {
            0 => self.config.season_simulations,
            n if n > self.config.season_max_simulations => {
                warn!(
                    "Capping {} requested simulations at {}",
                    n, self.config.season_max_simulations
                );
                self.config.season_max_simulations
            }
            n => n,
        };

        let (schedule, schedule_version) = self
            .season
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::RatingsUnavailable("no season schedule loaded".into()))?;

        // Copy the ratings out so the lock is not held for the whole run.
        let (elo, ratings_version) = {
            let ratings = self.ratings.read().await;
            let elo: HashMap<String, f64> = schedule
                .standings
                .iter()
                .map(|s| {
                    let r = ratings.get_or_prior(&s.team_code, &self.config);
                    (s.team_code.clone(), r.elo_rating)
                })
                .collect();
            (elo, ratings.version())
        };

        let seed = seed.unwrap_or_else(|| {
            stable_seed(&[team, &ratings_version.to_string(), &schedule_version.to_string()])
        });
        let key = SeasonKey {
            team: team.to_string(),
            simulations: n,
            seed,
            ratings_version,
            schedule_version,
        };
        if let Some(cached) = self.season_cache.get(&key).await {
            return Ok(cached);
        }

        info!("Simulating {} seasons for {} (seed {})", n, team, seed);
        let flag = Arc::new(AtomicBool::new(false));
        let mut guard = CancelOnDrop {
            flag: flag.clone(),
            armed: true,
        };
        let params = SeasonParams::from_config(&self.config);
        let team_code = team.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            let sim = SeasonSimulator::new(&team_code, &schedule, &elo, params)?;
            debug!("{} remaining games per simulated season", sim.game_count());
            sim.run(n, seed, &flag)
        });
        let outcome = handle.await;
        guard.armed = false;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(EngineError::Cancelled)) => {
                info!("Season simulation for {} cancelled", team);
                return Err(EngineError::Cancelled);
            }
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                error!("Season simulation task for {} failed: {}", team, e);
                return Err(EngineError::Cancelled);
            }
        };
        info!(
            "{}: playoff {:.1}%, division {:.1}%, wild card {:.1}%, avg {:.1} pts",
            team,
            result.playoff_odds * 100.0,
            result.division_odds * 100.0,
            result.wild_card_odds * 100.0,
            result.average_points
        );
        self.season_cache.insert(key, result.clone()).await;
        Ok(result)
    }

    // ── Evaluation & weighting ───────────────────────────────────────────────

    /// Accuracy summary per model and for the ensemble, with current weights.
    pub async fn get_model_metrics(&self) -> BTreeMap<String, ModelMetrics> {
        let mut metrics = self.evaluation.read().await.all_metrics();
        let weighting = self.weighting.read().await;
        let weights = weighting.weights();
        for (kind, weight) in weights {
            if let Some(m) = metrics.get_mut(kind.name()) {
                m.weight = Some(weight);
                if let Some(track) = weighting.track(kind) {
                    m.state = Some(track.state.as_str().to_string());
                    m.window_accuracy = track.window_accuracy();
                }
            }
        }
        metrics
    }

    /// Recompute model weights from accuracy history and refit the ensemble
    /// calibration. Never runs implicitly per game.
    pub async fn recalibrate(&self) -> Result<RecalibrationOutcome, EngineError> {
        let (errors, samples) = {
            let evaluation = self.evaluation.read().await;
            (evaluation.calibration_errors(), evaluation.ensemble_samples())
        };
        let (report, rows) = {
            let mut weighting = self.weighting.write().await;
            let report = weighting.recalibrate(&errors);
            (report, weighting.rows())
        };

        let mut calibration = self.calibration.write().await;
        match fit_platt(&samples, self.config.platt_min_samples) {
            Some(fit) if fit.metrics.improved() => {
                info!(
                    "Ensemble calibration a={:.3} b={:.3} from {} games (log-loss {:.4} -> {:.4})",
                    fit.calibration.a,
                    fit.calibration.b,
                    fit.samples,
                    fit.metrics.logloss_before,
                    fit.metrics.logloss_after
                );
                *calibration = Some(fit.calibration);
                self.db
                    .save_calibration(fit.calibration.a, fit.calibration.b, fit.samples)
                    .map_err(|e| EngineError::Persistence(e.to_string()))?;
            }
            Some(_) => debug!("Calibration fit did not improve; keeping current parameters"),
            None => debug!(
                "Calibration skipped: {} resolved ensemble predictions (need {})",
                samples.len(),
                self.config.platt_min_samples
            ),
        }
        let applied = *calibration;
        drop(calibration);

        self.db.save_model_weights(&rows).map_err(|e| {
            error!("Failed to persist recalibrated weights: {}", e);
            EngineError::Persistence(e.to_string())
        })?;
        self.prediction_cache.clear().await;
        Ok(RecalibrationOutcome {
            weights: report,
            calibration: applied,
        })
    }
}

/// `[features, hidden..., outputs]` for the configured network.
pub fn network_topology(config: &Config) -> Vec<usize> {
    let mut topology = vec![FEATURE_COUNT];
    topology.extend(&config.nn_hidden);
    topology.push(OUTPUT_SIZE);
    topology
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::{ModelKind, TeamGameStats, ENSEMBLE_NAME};
    use approx::assert_relative_eq;

    pub(crate) fn engine_with(config: Config) -> Engine {
        let db = Database::open(":memory:").unwrap();
        Engine::load(Arc::new(config), db).unwrap()
    }

    pub(crate) fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    pub(crate) fn game(id: &str, home: &str, away: &str, hs: u32, aws: u32, d: NaiveDate) -> CompletedGame {
        CompletedGame {
            game_id: id.into(),
            game_date: d,
            home: TeamGameStats {
                team_code: home.into(),
                score: hs,
                shots: 30,
                power_play_pct: 20.0,
                penalty_kill_pct: 80.0,
            },
            away: TeamGameStats {
                team_code: away.into(),
                score: aws,
                shots: 28,
                power_play_pct: 10.0,
                penalty_kill_pct: 85.0,
            },
            overtime: false,
            playoff: false,
        }
    }

    #[tokio::test]
    async fn prediction_is_bounded_and_uses_every_model() {
        let engine = engine_with(Config::defaults());
        let p = engine.predict_matchup("TOR", "MTL", date(11, 1)).await.unwrap();
        assert!((0.0..=1.0).contains(&p.win_probability));
        assert_eq!(p.model_results.len(), ModelKind::ALL.len());
        assert!(p.excluded.is_empty());
        assert_relative_eq!(p.weights_used.values().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn malformed_matchups_are_rejected() {
        let engine = engine_with(Config::defaults());
        for (home, away) in [("tor", "MTL"), ("TOR", "TOR"), ("TORONTO", "MTL"), ("", "MTL")] {
            let err = engine.predict_matchup(home, away, date(11, 1)).await.unwrap_err();
            assert!(matches!(err, EngineError::MalformedInput(_)), "{home} vs {away}");
        }
        let far = NaiveDate::from_ymd_opt(1850, 1, 1).unwrap();
        assert!(engine.predict_matchup("TOR", "MTL", far).await.is_err());
    }

    #[tokio::test]
    async fn metrics_cover_models_and_ensemble_after_ingestion() {
        let engine = engine_with(Config::defaults());
        engine.predict_matchup("BOS", "BUF", date(10, 10)).await.unwrap();
        engine
            .ingest_completed_game(game("g1", "BOS", "BUF", 4, 2, date(10, 10)))
            .await
            .unwrap();
        let metrics = engine.get_model_metrics().await;
        assert!(metrics.contains_key(ENSEMBLE_NAME));
        let elo = &metrics[ModelKind::Elo.name()];
        assert_eq!(elo.total_predictions, 1);
        assert!(elo.weight.is_some());
        assert_eq!(elo.state.as_deref(), Some("active"));
    }

    #[tokio::test]
    async fn recalibration_keeps_weights_normalised() {
        let mut config = Config::defaults();
        config.weight_min_samples = 2;
        let engine = engine_with(config);
        let teams = ["NYR", "NJD", "PHI", "PIT"];
        for i in 0..12u32 {
            let home = teams[(i % 4) as usize];
            let away = teams[((i + 1) % 4) as usize];
            engine
                .ingest_completed_game(game(&format!("g{i}"), home, away, 3 + i % 2, 2, date(10, 1 + i)))
                .await
                .unwrap();
        }
        let outcome = engine.recalibrate().await.unwrap();
        assert_relative_eq!(outcome.weights.weights.values().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(outcome.calibration.is_none());
    }

    #[tokio::test]
    async fn season_needs_a_schedule() {
        let engine = engine_with(Config::defaults());
        let err = engine.simulate_season("TOR", 100).await.unwrap_err();
        assert!(matches!(err, EngineError::RatingsUnavailable(_)));
    }

    #[tokio::test]
    async fn seeded_season_odds_are_reproducible_and_cached() {
        let engine = engine_with(Config::defaults());
        let (schedule, _) = season::tests::league();
        engine.load_season(schedule).await.unwrap();

        let a = engine.simulate_season_seeded("CCC", 5000, Some(99)).await.unwrap();
        let b = engine.simulate_season_seeded("CCC", 5000, Some(99)).await.unwrap();
        assert_eq!(a, b);
        let fresh = engine_with(Config::defaults());
        fresh.load_season(season::tests::league().0).await.unwrap();
        let c = fresh.simulate_season_seeded("CCC", 5000, Some(99)).await.unwrap();
        assert_eq!(a.playoff_odds, c.playoff_odds);
        assert_eq!(a.points_distribution, c.points_distribution);

        let err = engine.simulate_season("ZZZ", 10).await.unwrap_err();
        assert!(matches!(err, EngineError::RatingsUnavailable(_)));
    }

    #[tokio::test]
    async fn abandoned_simulation_does_not_block_later_queries() {
        let engine = engine_with(Config::defaults());
        engine.load_season(season::tests::league().0).await.unwrap();
        let background = engine.clone();
        let task = tokio::spawn(async move { background.simulate_season("AAA", 50_000).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        task.abort();
        let r = engine.simulate_season("BBB", 200).await.unwrap();
        assert_eq!(r.simulations, 200);
    }
}
