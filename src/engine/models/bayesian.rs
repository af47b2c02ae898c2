use super::{round_score, PredictionContext, RawPrediction};
use crate::db::models::TeamRating;
use crate::error::ModelError;

/// Beta-binomial team strength combined head to head with log5, then
/// shifted by a home-win prior. Confidence comes from the width of the
/// 95% credible interval of the two strengths.
#[derive(Debug, Clone)]
pub struct BayesianModel {
    /// Historical home win rate.
    pub prior_home_win: f64,
    /// Pseudo-games of .500 hockey every team starts with.
    pub prior_games: f64,
}

impl Default for BayesianModel {
    fn default() -> Self {
        BayesianModel {
            prior_home_win: 0.55,
            prior_games: 10.0,
        }
    }
}

/// Beta posterior over a team's win rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaPosterior {
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn variance(&self) -> f64 {
        let s = self.alpha + self.beta;
        self.alpha * self.beta / (s * s * (s + 1.0))
    }
}

impl BayesianModel {
    pub fn posterior(&self, team: &TeamRating) -> BetaPosterior {
        let half = self.prior_games / 2.0;
        BetaPosterior {
            alpha: 1.0 + half + team.wins as f64,
            beta: 1.0 + half + team.losses as f64,
        }
    }

    pub fn predict(&self, ctx: &PredictionContext) -> Result<RawPrediction, ModelError> {
        if !(0.0..1.0).contains(&self.prior_home_win) || self.prior_home_win == 0.0 {
            return Err(ModelError::InvalidInput("home prior must be in (0, 1)".into()));
        }
        let home = self.posterior(&ctx.home);
        let away = self.posterior(&ctx.away);
        let (mh, ma) = (home.mean(), away.mean());

        // log5 head-to-head from the two posterior means.
        let num = mh * (1.0 - ma);
        let neutral = num / (num + ma * (1.0 - mh));

        let win_probability = if ctx.home_advantage() {
            let prior_odds = self.prior_home_win / (1.0 - self.prior_home_win);
            let odds = neutral / (1.0 - neutral) * prior_odds;
            odds / (1.0 + odds)
        } else {
            neutral
        };

        let interval_width = 2.0 * 1.96 * (home.variance() + away.variance()).sqrt();
        let confidence = (1.0 - interval_width).clamp(0.05, 0.95);

        let score = round_score(
            ctx.home.goal_rate_for * (0.8 + win_probability * 0.4),
            ctx.away.goal_rate_for * (0.8 + (1.0 - win_probability) * 0.4),
            8,
            win_probability,
        );
        Ok(RawPrediction {
            win_probability,
            score,
            confidence,
        })
    }
}
