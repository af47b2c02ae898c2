//! Independent-Poisson goal model with opponent-adjusted rates.

use super::{settle_score, PredictionContext, RawPrediction};
use crate::config::Config;
use crate::db::models::PredictedScore;
use crate::error::ModelError;

/// Rate parameters shared with the per-game Monte Carlo model.
#[derive(Debug, Clone, Copy)]
pub struct GoalRates {
    pub league_avg: f64,
    pub home_multiplier: f64,
    pub min_rate: f64,
}

impl GoalRates {
    pub fn from_config(config: &Config) -> Self {
        GoalRates {
            league_avg: config.league_avg_goals,
            home_multiplier: config.home_scoring_multiplier,
            min_rate: config.min_goal_rate,
        }
    }

    /// Expected goals `(home, away)`: own attack scaled by the opponent's
    /// defence relative to league average.
    pub fn expected_goals(&self, ctx: &PredictionContext) -> Result<(f64, f64), ModelError> {
        if self.league_avg <= 0.0 {
            return Err(ModelError::InvalidInput("league average must be positive".into()));
        }
        let home_mult = if ctx.home_advantage() { self.home_multiplier } else { 1.0 };
        let home = ctx.home.goal_rate_for * (ctx.away.goal_rate_against / self.league_avg) * home_mult;
        let away = ctx.away.goal_rate_for * (ctx.home.goal_rate_against / self.league_avg);
        if !home.is_finite() || !away.is_finite() {
            return Err(ModelError::NonFinite);
        }
        Ok((home.max(self.min_rate), away.max(self.min_rate)))
    }
}

/// `P(X = k)` for `k = 0..=cutoff`, built by recurrence.
pub fn pmf_table(lambda: f64, cutoff: u32) -> Vec<f64> {
    let mut table = Vec::with_capacity(cutoff as usize + 1);
    let mut p = (-lambda).exp();
    table.push(p);
    for k in 1..=cutoff {
        p *= lambda / k as f64;
        table.push(p);
    }
    table
}

#[derive(Debug, Clone)]
pub struct PoissonModel {
    pub rates: GoalRates,
    pub cutoff: u32,
}

impl PoissonModel {
    pub fn from_config(config: &Config) -> Self {
        PoissonModel {
            rates: GoalRates::from_config(config),
            cutoff: config.scoreline_cutoff,
        }
    }

    pub fn predict(&self, ctx: &PredictionContext) -> Result<RawPrediction, ModelError> {
        let (lh, la) = self.rates.expected_goals(ctx)?;
        let ph = pmf_table(lh, self.cutoff);
        let pa = pmf_table(la, self.cutoff);

        let (mut home_win, mut tie, mut mass) = (0.0, 0.0, 0.0);
        let mut mode = (0.0, PredictedScore { home: 0, away: 0 });
        for (h, p_h) in ph.iter().enumerate() {
            for (a, p_a) in pa.iter().enumerate() {
                let p = p_h * p_a;
                mass += p;
                if h > a {
                    home_win += p;
                } else if h == a {
                    tie += p;
                }
                if p > mode.0 {
                    mode = (p, PredictedScore { home: h as u32, away: a as u32 });
                }
            }
        }
        if mass <= 0.0 {
            return Err(ModelError::NonFinite);
        }

        // Regulation ties go to overtime, split by relative scoring rate.
        let ot_share = lh / (lh + la);
        let win_probability = (home_win + tie * ot_share) / mass;
        let score = settle_score(mode.1, win_probability);

        let confidence = (0.55 + (win_probability - 0.5).abs() * 0.8).min(0.95);
        Ok(RawPrediction {
            win_probability,
            score,
            confidence,
        })
    }
}
