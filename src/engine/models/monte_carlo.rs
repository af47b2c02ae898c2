use super::poisson::GoalRates;
use super::{round_score, PredictionContext, RawPrediction};
use crate::config::Config;
use crate::error::ModelError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

/// Hard cap on trials per single-game simulation.
pub const MAX_TRIALS: usize = 2000;

/// FNV-1a over the parts, separated, so equal inputs always give equal seeds.
pub fn stable_seed(parts: &[&str]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0x1f)) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}

/// Simulates the game many times from Poisson goal counts.
#[derive(Debug, Clone)]
pub struct MonteCarloModel {
    pub rates: GoalRates,
    pub trials: usize,
}

impl MonteCarloModel {
    pub fn from_config(config: &Config) -> Self {
        MonteCarloModel {
            rates: GoalRates::from_config(config),
            trials: config.game_sim_trials.clamp(1, MAX_TRIALS),
        }
    }

    pub fn predict(&self, ctx: &PredictionContext) -> Result<RawPrediction, ModelError> {
        let (lh, la) = self.rates.expected_goals(ctx)?;
        let home_dist = Poisson::new(lh).map_err(|e| ModelError::InvalidInput(e.to_string()))?;
        let away_dist = Poisson::new(la).map_err(|e| ModelError::InvalidInput(e.to_string()))?;

        let date = ctx.matchup.game_date.to_string();
        let mut rng = StdRng::seed_from_u64(stable_seed(&[
            &ctx.matchup.home_team,
            &ctx.matchup.away_team,
            &date,
        ]));
        let ot_share = lh / (lh + la);

        let (mut home_wins, mut home_goals, mut away_goals) = (0usize, 0.0, 0.0);
        for _ in 0..self.trials {
            let h: f64 = home_dist.sample(&mut rng);
            let a: f64 = away_dist.sample(&mut rng);
            home_goals += h;
            away_goals += a;
            if h > a || (h == a && rng.gen::<f64>() < ot_share) {
                home_wins += 1;
            }
        }

        let n = self.trials as f64;
        let win_probability = home_wins as f64 / n;
        let standard_error = (win_probability * (1.0 - win_probability) / n).sqrt();
        let confidence =
            ((1.0 - standard_error * 4.0).max(0.0) * 0.7 + (win_probability - 0.5).abs() * 0.5).min(1.0);

        Ok(RawPrediction {
            win_probability,
            score: round_score(home_goals / n, away_goals / n, 10, win_probability),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context_with;
    use super::*;

    #[test]
    fn same_matchup_gives_same_answer() {
        let model = MonteCarloModel::from_config(&Config::defaults());
        let ctx = context_with(1500.0, 1500.0, false);
        assert_eq!(model.predict(&ctx).unwrap(), model.predict(&ctx).unwrap());
    }

    #[test]
    fn trials_are_capped() {
        let mut config = Config::defaults();
        config.game_sim_trials = 1_000_000;
        assert_eq!(MonteCarloModel::from_config(&config).trials, MAX_TRIALS);
    }

    #[test]
    fn tracks_poisson_model_closely() {
        let config = Config::defaults();
        let mut ctx = context_with(1500.0, 1500.0, false);
        ctx.home.goal_rate_for = 3.8;
        let mc = MonteCarloModel::from_config(&config).predict(&ctx).unwrap();
        let exact = super::super::PoissonModel::from_config(&config).predict(&ctx).unwrap();
        assert!((mc.win_probability - exact.win_probability).abs() < 0.05);
    }

    #[test]
    fn seeds_differ_by_part_boundaries() {
        assert_ne!(stable_seed(&["AB", "C"]), stable_seed(&["A", "BC"]));
        assert_eq!(stable_seed(&["TOR", "MTL"]), stable_seed(&["TOR", "MTL"]));
    }
}
