use super::{round_score, PredictionContext, RawPrediction};
use crate::db::models::TeamRating;
use crate::error::ModelError;

/// Minimum form games before the data is considered trustworthy.
const MIN_FORM_GAMES: usize = 3;

/// Fixed weighted formula over recent win rate, goal differential, goal
/// share, home ice and rest. No learned parameters.
#[derive(Debug, Clone)]
pub struct StatisticalModel {
    pub form_weight: f64,
    pub goal_diff_weight: f64,
    pub goal_share_weight: f64,
    pub home_edge: f64,
    pub rest_edge: f64,
}

impl Default for StatisticalModel {
    fn default() -> Self {
        StatisticalModel {
            form_weight: 0.5,
            goal_diff_weight: 0.3,
            goal_share_weight: 0.2,
            home_edge: 0.035,
            rest_edge: 0.02,
        }
    }
}

impl StatisticalModel {
    fn strength(&self, team: &TeamRating) -> f64 {
        let win_pct = team.form_win_pct().unwrap_or(0.5);
        let goal_diff = (0.5 + team.form_goal_diff().unwrap_or(0.0) / 6.0).clamp(0.0, 1.0);
        let goal_share = team.goal_rate_for / (team.goal_rate_for + team.goal_rate_against);
        self.form_weight * win_pct + self.goal_diff_weight * goal_diff + self.goal_share_weight * goal_share
    }

    pub fn predict(&self, ctx: &PredictionContext) -> Result<RawPrediction, ModelError> {
        let home = self.strength(&ctx.home).max(0.01);
        let away = self.strength(&ctx.away).max(0.01);

        let mut p = home / (home + away);
        if ctx.home_advantage() {
            p += self.home_edge;
        }
        let back_to_back = matches!(ctx.home_rest, Some(0)) || matches!(ctx.away_rest, Some(0));
        if let (Some(h), Some(a)) = (ctx.home_rest, ctx.away_rest) {
            p += self.rest_edge * (h as f64 - a as f64).clamp(-1.0, 1.0);
        }
        let win_probability = p.clamp(0.05, 0.95);

        let score = round_score(
            ctx.home.goal_rate_for + (win_probability - 0.5) * 1.5,
            ctx.away.goal_rate_for + (0.5 - win_probability) * 1.5,
            8,
            win_probability,
        );

        let margin = ((win_probability - 0.5).abs() * 2.0).min(1.0);
        let mut data_quality: f64 = 0.8;
        if back_to_back {
            data_quality -= 0.2;
        }
        if ctx.home.rolling_form.len() < MIN_FORM_GAMES || ctx.away.rolling_form.len() < MIN_FORM_GAMES {
            data_quality -= 0.2;
        }

        Ok(RawPrediction {
            win_probability,
            score,
            confidence: (margin + data_quality) / 2.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context_with;
    use super::*;
    use crate::db::models::FormEntry;
    use approx::assert_relative_eq;

    fn push_form(team: &mut TeamRating, won: bool, gf: u32, ga: u32) {
        team.rolling_form.push_back(FormEntry {
            won,
            goals_for: gf,
            goals_against: ga,
            shots_for: 30,
            shots_against: 30,
            power_play_pct: 20.0,
        });
    }

    #[test]
    fn even_teams_on_neutral_ice_are_even() {
        let r = StatisticalModel::default()
            .predict(&context_with(1500.0, 1500.0, true))
            .unwrap();
        assert_relative_eq!(r.win_probability, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn hot_team_is_favoured() {
        let mut ctx = context_with(1500.0, 1500.0, true);
        for _ in 0..5 {
            push_form(&mut ctx.home, true, 4, 1);
            push_form(&mut ctx.away, false, 1, 3);
        }
        let r = StatisticalModel::default().predict(&ctx).unwrap();
        assert!(r.win_probability > 0.7);
        assert!(r.score.home > r.score.away);
    }

    #[test]
    fn thin_history_lowers_confidence() {
        let model = StatisticalModel::default();
        let thin = model.predict(&context_with(1500.0, 1500.0, true)).unwrap();
        let mut ctx = context_with(1500.0, 1500.0, true);
        for _ in 0..3 {
            push_form(&mut ctx.home, true, 3, 2);
            push_form(&mut ctx.away, true, 3, 2);
        }
        let full = model.predict(&ctx).unwrap();
        assert!(full.confidence > thin.confidence);
    }
}
