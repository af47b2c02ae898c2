//! Feature engineering shared by the neural network and its training examples.

use crate::db::models::{SituationalContext, TeamRating};
use chrono::NaiveDate;

pub const FEATURE_COUNT: usize = 12;

/// Rest days for one side: explicit context wins, else days since the last game.
pub fn resolve_rest(explicit: Option<u32>, rating: &TeamRating, game_date: NaiveDate) -> Option<u32> {
    explicit.or_else(|| {
        let last = rating.last_game_date?;
        let days = (game_date - last).num_days();
        // Days between games, not counting the game day itself.
        (days > 0).then(|| (days - 1) as u32)
    })
}

/// Engineered, roughly unit-scaled input vector for one matchup.
pub fn feature_vector(
    home: &TeamRating,
    away: &TeamRating,
    context: &SituationalContext,
    home_rest: Option<u32>,
    away_rest: Option<u32>,
    league: f64,
) -> Vec<f64> {
    let rest_diff = match (home_rest, away_rest) {
        (Some(h), Some(a)) => ((h as f64 - a as f64) / 3.0).clamp(-1.0, 1.0),
        _ => 0.0,
    };
    let shot_share_diff =
        home.form_shot_share().unwrap_or(0.5) - away.form_shot_share().unwrap_or(0.5);

    vec![
        (home.elo_rating - away.elo_rating) / 400.0,
        home.form_win_pct().unwrap_or(0.5),
        away.form_win_pct().unwrap_or(0.5),
        home.goal_rate_for / league,
        home.goal_rate_against / league,
        away.goal_rate_for / league,
        away.goal_rate_against / league,
        (home.form_goal_diff().unwrap_or(0.0) / 3.0).clamp(-1.0, 1.0),
        (away.form_goal_diff().unwrap_or(0.0) / 3.0).clamp(-1.0, 1.0),
        shot_share_diff,
        rest_diff,
        if context.neutral_site { 0.0 } else { 1.0 },
    ]
}
