use super::{round_score, PredictionContext, RawPrediction};
use crate::config::Config;
use crate::engine::ratings::elo_expected;
use crate::error::ModelError;

/// Logistic win probability from the rating gap plus a home-ice bonus.
#[derive(Debug, Clone)]
pub struct EloModel {
    pub home_advantage: f64,
}

impl EloModel {
    pub fn from_config(config: &Config) -> Self {
        EloModel {
            home_advantage: config.elo_home_advantage,
        }
    }

    pub fn predict(&self, ctx: &PredictionContext) -> Result<RawPrediction, ModelError> {
        let bonus = if ctx.home_advantage() { self.home_advantage } else { 0.0 };
        let home = ctx.home.elo_rating + bonus;
        let away = ctx.away.elo_rating;
        let win_probability = elo_expected(home, away);

        // 200 rating points is worth about one goal of margin.
        let diff = home - away;
        let score = round_score(3.0 + diff / 200.0, 3.0 - diff / 200.0, 10, win_probability);

        let confidence = (0.5 + (ctx.home.elo_rating - away).abs() / 800.0).clamp(0.6, 0.95);
        Ok(RawPrediction {
            win_probability,
            score,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context_with;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn two_hundred_point_gap_without_home_ice() {
        let model = EloModel::from_config(&Config::defaults());
        let ctx = context_with(1600.0, 1400.0, true);
        let p = model.predict(&ctx).unwrap().win_probability;
        assert_relative_eq!(p, 1.0 / (1.0 + 10f64.powf(-0.5)), epsilon = 1e-12);
        assert_relative_eq!(p, 0.76, epsilon = 0.005);
    }

    #[test]
    fn home_ice_bonus_favours_home_side() {
        let model = EloModel::from_config(&Config::defaults());
        let neutral = model.predict(&context_with(1500.0, 1500.0, true)).unwrap();
        let home = model.predict(&context_with(1500.0, 1500.0, false)).unwrap();
        assert_relative_eq!(neutral.win_probability, 0.5, epsilon = 1e-12);
        assert!(home.win_probability > 0.5);
    }

    #[test]
    fn predicted_score_follows_rating_gap() {
        let model = EloModel::from_config(&Config::defaults());
        let r = model.predict(&context_with(1700.0, 1500.0, true)).unwrap();
        assert_eq!((r.score.home, r.score.away), (4, 2));
    }
}
