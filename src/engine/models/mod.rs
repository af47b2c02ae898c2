//! The model pool: a closed set of prediction models behind one contract.
//!
//! Every model is pure with respect to its [`PredictionContext`]: it reads the
//! rating snapshot and network parameters captured for the call and never
//! touches shared state, so the ensemble can run them on blocking threads.

pub mod bayesian;
pub mod elo;
pub mod monte_carlo;
pub mod neural;
pub mod poisson;
pub mod statistical;

use crate::config::Config;
use crate::db::models::{Matchup, ModelKind, ModelResult, PredictedScore, TeamRating};
use crate::engine::features::{feature_vector, resolve_rest};
use crate::engine::network::Network;
use crate::error::ModelError;
use std::sync::Arc;
use std::time::Instant;

pub use bayesian::BayesianModel;
pub use elo::EloModel;
pub use monte_carlo::MonteCarloModel;
pub use neural::NeuralModel;
pub use poisson::PoissonModel;
pub use statistical::StatisticalModel;

/// Everything a model may read for one matchup, captured at call time.
#[derive(Debug, Clone)]
pub struct PredictionContext {
    pub matchup: Matchup,
    pub home: TeamRating,
    pub away: TeamRating,
    pub home_rest: Option<u32>,
    pub away_rest: Option<u32>,
    pub league_avg_goals: f64,
    pub network: Arc<Network>,
}

impl PredictionContext {
    pub fn new(
        matchup: Matchup,
        home: TeamRating,
        away: TeamRating,
        league_avg_goals: f64,
        network: Arc<Network>,
    ) -> Self {
        let home_rest = resolve_rest(matchup.context.home_rest_days, &home, matchup.game_date);
        let away_rest = resolve_rest(matchup.context.away_rest_days, &away, matchup.game_date);
        PredictionContext {
            matchup,
            home,
            away,
            home_rest,
            away_rest,
            league_avg_goals,
            network,
        }
    }

    pub fn home_advantage(&self) -> bool {
        !self.matchup.context.neutral_site
    }

    pub fn features(&self) -> Vec<f64> {
        feature_vector(
            &self.home,
            &self.away,
            &self.matchup.context,
            self.home_rest,
            self.away_rest,
            self.league_avg_goals,
        )
    }
}

/// A model's answer before the pool stamps name and timing on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrediction {
    pub win_probability: f64,
    pub score: PredictedScore,
    pub confidence: f64,
}

/// Round expected goals to a whole-goal scoreline whose winner agrees with
/// `home_win_probability`.
pub fn round_score(home: f64, away: f64, max_goals: u32, home_win_probability: f64) -> PredictedScore {
    let round = |g: f64| (g.max(0.0).round() as u32).min(max_goals);
    settle_score(
        PredictedScore {
            home: round(home),
            away: round(away),
        },
        home_win_probability,
    )
}

/// Games cannot end level: lift the favoured side one goal clear of the
/// other unless it already leads.
pub fn settle_score(score: PredictedScore, home_win_probability: f64) -> PredictedScore {
    let PredictedScore { home, away } = score;
    if home_win_probability >= 0.5 {
        PredictedScore {
            home: home.max(away + 1),
            away,
        }
    } else {
        PredictedScore {
            home,
            away: away.max(home + 1),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PredictionModel {
    Statistical(StatisticalModel),
    Bayesian(BayesianModel),
    MonteCarlo(MonteCarloModel),
    Elo(EloModel),
    Poisson(PoissonModel),
    NeuralNetwork(NeuralModel),
}

impl PredictionModel {
    /// One instance of every model kind, parameterised from configuration.
    pub fn pool(config: &Config) -> Vec<PredictionModel> {
        vec![
            PredictionModel::Statistical(StatisticalModel::default()),
            PredictionModel::Bayesian(BayesianModel::default()),
            PredictionModel::MonteCarlo(MonteCarloModel::from_config(config)),
            PredictionModel::Elo(EloModel::from_config(config)),
            PredictionModel::Poisson(PoissonModel::from_config(config)),
            PredictionModel::NeuralNetwork(NeuralModel),
        ]
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            PredictionModel::Statistical(_) => ModelKind::Statistical,
            PredictionModel::Bayesian(_) => ModelKind::Bayesian,
            PredictionModel::MonteCarlo(_) => ModelKind::MonteCarlo,
            PredictionModel::Elo(_) => ModelKind::Elo,
            PredictionModel::Poisson(_) => ModelKind::Poisson,
            PredictionModel::NeuralNetwork(_) => ModelKind::NeuralNetwork,
        }
    }

    pub fn predict(&self, ctx: &PredictionContext) -> Result<ModelResult, ModelError> {
        let start = Instant::now();
        let raw = match self {
            PredictionModel::Statistical(m) => m.predict(ctx),
            PredictionModel::Bayesian(m) => m.predict(ctx),
            PredictionModel::MonteCarlo(m) => m.predict(ctx),
            PredictionModel::Elo(m) => m.predict(ctx),
            PredictionModel::Poisson(m) => m.predict(ctx),
            PredictionModel::NeuralNetwork(m) => m.predict(ctx),
        }?;

        if !raw.win_probability.is_finite() || !raw.confidence.is_finite() {
            return Err(ModelError::NonFinite);
        }
        Ok(ModelResult {
            model: self.kind(),
            win_probability: raw.win_probability.clamp(0.0, 1.0),
            predicted_score: raw.score,
            confidence: raw.confidence.clamp(0.0, 1.0),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::context_with;
    use super::*;

    #[test]
    fn every_model_answers_within_bounds() {
        let config = Config::defaults();
        let ctx = context_with(1560.0, 1480.0, false);
        for model in PredictionModel::pool(&config) {
            let result = model.predict(&ctx).unwrap();
            assert_eq!(result.model, model.kind());
            assert!((0.0..=1.0).contains(&result.win_probability), "{}", model.kind());
            assert!((0.0..=1.0).contains(&result.confidence), "{}", model.kind());
        }
    }

    #[test]
    fn no_model_predicts_a_level_or_contrary_scoreline() {
        let config = Config::defaults();
        for (home, away) in [(1600.0, 1500.0), (1500.0, 1500.0), (1420.0, 1580.0)] {
            let ctx = context_with(home, away, false);
            for model in PredictionModel::pool(&config) {
                let r = model.predict(&ctx).unwrap();
                let s = r.predicted_score;
                assert_ne!(s.home, s.away, "{} {}", model.kind(), s);
                assert_eq!(s.home > s.away, r.win_probability >= 0.5, "{} {}", model.kind(), s);
            }
        }
    }

    #[test]
    fn pool_covers_every_kind_once() {
        let kinds: Vec<ModelKind> = PredictionModel::pool(&Config::defaults())
            .iter()
            .map(PredictionModel::kind)
            .collect();
        assert_eq!(kinds, ModelKind::ALL.to_vec());
    }

    #[test]
    fn round_score_is_non_negative_and_capped() {
        assert_eq!(round_score(-0.7, 12.4, 10, 0.2), PredictedScore { home: 0, away: 10 });
        assert_eq!(round_score(2.5, 1.49, 10, 0.6), PredictedScore { home: 3, away: 1 });
    }

    #[test]
    fn level_or_contrary_scorelines_follow_the_favourite() {
        assert_eq!(round_score(3.1, 2.9, 10, 0.57), PredictedScore { home: 4, away: 3 });
        assert_eq!(round_score(3.0, 3.0, 10, 0.41), PredictedScore { home: 3, away: 4 });
        assert_eq!(round_score(0.2, 0.3, 10, 0.5), PredictedScore { home: 1, away: 0 });
        assert_eq!(
            settle_score(PredictedScore { home: 2, away: 4 }, 0.55),
            PredictedScore { home: 5, away: 4 }
        );
    }
}
