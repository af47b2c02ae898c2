//! Team rating store: Elo, Poisson goal rates and rolling form per team.
//!
//! Pure data plus update rules. The store is shared behind a read/write lock
//! by the engine; only the training pipeline ever takes the write side.

use crate::config::Config;
use crate::db::models::{CompletedGame, FormEntry, TeamGameStats, TeamRating};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Logistic Elo expectation for the first rating against the second.
pub fn elo_expected(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// Exponential blend of a goal rate toward an observed count, floored.
pub fn blend_goal_rate(old: f64, actual: f64, decay: f64, floor: f64) -> f64 {
    (decay * old + (1.0 - decay) * actual).max(floor)
}

/// Rating changes produced by one game.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloDelta {
    pub home: f64,
    pub away: f64,
    pub k: f64,
}

/// Pure Elo step for one game. `home_delta == -away_delta` before flooring.
pub fn elo_step(home: f64, away: f64, home_won: bool, k: f64) -> EloDelta {
    let expected_home = elo_expected(home, away);
    let actual_home = if home_won { 1.0 } else { 0.0 };
    let delta = k * (actual_home - expected_home);
    EloDelta {
        home: delta,
        away: -delta,
        k,
    }
}

#[derive(Debug, Clone, Default)]
pub struct RatingStore {
    ratings: HashMap<String, TeamRating>,
    /// Bumped on every mutation; keys caches of derived results.
    version: u64,
}

impl RatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ratings(ratings: Vec<TeamRating>) -> Self {
        RatingStore {
            ratings: ratings
                .into_iter()
                .map(|r| (r.team_code.clone(), r))
                .collect(),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, team_code: &str) -> Option<&TeamRating> {
        self.ratings.get(team_code)
    }

    /// The team's rating, or a league-average prior for a team with no history.
    pub fn get_or_prior(&self, team_code: &str, config: &Config) -> TeamRating {
        self.ratings
            .get(team_code)
            .cloned()
            .unwrap_or_else(|| league_prior(team_code, config))
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Apply one completed game: Elo, Poisson rates, form and record.
    pub fn apply_game(&mut self, game: &CompletedGame, config: &Config) -> EloDelta {
        let mut home = self.get_or_prior(&game.home.team_code, config);
        let mut away = self.get_or_prior(&game.away.team_code, config);

        let mut k = config.elo_k_factor;
        if game.playoff {
            k *= config.elo_playoff_k_multiplier;
        }
        if game.overtime {
            k *= config.elo_overtime_k_multiplier;
        }
        let home_won = game.home_won();
        let delta = elo_step(home.elo_rating, away.elo_rating, home_won, k);
        home.elo_rating = (home.elo_rating + delta.home).max(config.elo_floor);
        away.elo_rating = (away.elo_rating + delta.away).max(config.elo_floor);

        update_side(&mut home, &game.home, &game.away, home_won, config);
        update_side(&mut away, &game.away, &game.home, !home_won, config);
        let now = Utc::now();
        for side in [&mut home, &mut away] {
            side.last_game_date = Some(
                side.last_game_date
                    .map_or(game.game_date, |d| d.max(game.game_date)),
            );
            side.last_updated = now;
        }

        debug!(
            "Elo {} {:+.2} -> {:.1}, {} {:+.2} -> {:.1} (k={:.1})",
            home.team_code, delta.home, home.elo_rating, away.team_code, delta.away, away.elo_rating, k
        );
        debug!(
            "Goal rates {} {:.3}/{:.3}, {} {:.3}/{:.3}",
            home.team_code,
            home.goal_rate_for,
            home.goal_rate_against,
            away.team_code,
            away.goal_rate_for,
            away.goal_rate_against
        );

        self.ratings.insert(home.team_code.clone(), home);
        self.ratings.insert(away.team_code.clone(), away);
        self.version += 1;
        delta
    }
}

/// Rating for a team with no history.
pub fn league_prior(team_code: &str, config: &Config) -> TeamRating {
    TeamRating {
        team_code: team_code.to_string(),
        elo_rating: config.elo_initial,
        goal_rate_for: config.league_avg_goals,
        goal_rate_against: config.league_avg_goals,
        rolling_form: VecDeque::new(),
        games_played: 0,
        wins: 0,
        losses: 0,
        last_game_date: None,
        last_updated: Utc::now(),
    }
}

fn update_side(
    rating: &mut TeamRating,
    own: &TeamGameStats,
    opp: &TeamGameStats,
    won: bool,
    config: &Config,
) {
    rating.goal_rate_for = blend_goal_rate(
        rating.goal_rate_for,
        own.score as f64,
        config.poisson_decay,
        config.min_goal_rate,
    );
    rating.goal_rate_against = blend_goal_rate(
        rating.goal_rate_against,
        opp.score as f64,
        config.poisson_decay,
        config.min_goal_rate,
    );
    rating.rolling_form.push_back(FormEntry {
        won,
        goals_for: own.score,
        goals_against: opp.score,
        shots_for: own.shots,
        shots_against: opp.shots,
        power_play_pct: own.power_play_pct,
    });
    while rating.rolling_form.len() > config.form_window {
        rating.rolling_form.pop_front();
    }
    rating.games_played += 1;
    if won {
        rating.wins += 1;
    } else {
        rating.losses += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn game(home_score: u32, away_score: u32) -> CompletedGame {
        CompletedGame {
            game_id: "g1".into(),
            game_date: NaiveDate::from_ymd_opt(2025, 10, 10).unwrap(),
            home: TeamGameStats {
                team_code: "TOR".into(),
                score: home_score,
                shots: 30,
                power_play_pct: 20.0,
                penalty_kill_pct: 80.0,
            },
            away: TeamGameStats {
                team_code: "MTL".into(),
                score: away_score,
                shots: 25,
                power_play_pct: 0.0,
                penalty_kill_pct: 75.0,
            },
            overtime: false,
            playoff: false,
        }
    }

    #[test]
    fn equal_ratings_home_win_moves_ten_points() {
        let config = Config::defaults();
        let mut store = RatingStore::new();
        let delta = store.apply_game(&game(3, 1), &config);
        assert_relative_eq!(delta.home, 10.0, epsilon = 1e-9);
        assert_relative_eq!(store.get("TOR").unwrap().elo_rating, 1510.0, epsilon = 1e-9);
        assert_relative_eq!(store.get("MTL").unwrap().elo_rating, 1490.0, epsilon = 1e-9);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn elo_step_is_zero_sum() {
        for (h, a, won) in [(1600.0, 1400.0, false), (1420.5, 1580.25, true), (1500.0, 1500.0, false)] {
            let d = elo_step(h, a, won, 32.0);
            assert_relative_eq!(d.home + d.away, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn playoff_and_overtime_scale_k() {
        let config = Config::defaults();
        let mut store = RatingStore::new();
        let mut g = game(2, 1);
        g.playoff = true;
        g.overtime = true;
        let delta = store.apply_game(&g, &config);
        assert_relative_eq!(delta.k, 20.0 * 1.5 * 0.8, epsilon = 1e-12);
    }

    #[test]
    fn rating_never_drops_below_floor() {
        let mut config = Config::defaults();
        config.elo_floor = 1495.0;
        let mut store = RatingStore::new();
        store.apply_game(&game(5, 0), &config);
        assert_relative_eq!(store.get("MTL").unwrap().elo_rating, 1495.0);
    }

    #[test]
    fn goal_rates_blend_and_stay_positive() {
        let config = Config::defaults();
        let mut store = RatingStore::new();
        store.apply_game(&game(6, 0), &config);
        let tor = store.get("TOR").unwrap();
        assert_relative_eq!(tor.goal_rate_for, 0.9 * 3.1 + 0.1 * 6.0, epsilon = 1e-12);
        assert_relative_eq!(tor.goal_rate_against, 0.9 * 3.1, epsilon = 1e-12);
        assert_eq!(blend_goal_rate(0.1, 0.0, 0.5, 0.1), 0.1);
    }

    #[test]
    fn form_window_is_bounded() {
        let mut config = Config::defaults();
        config.form_window = 3;
        let mut store = RatingStore::new();
        for i in 0..5 {
            store.apply_game(&game(i, 2), &config);
        }
        let tor = store.get("TOR").unwrap();
        assert_eq!(tor.rolling_form.len(), 3);
        assert_eq!(tor.games_played, 5);
        assert_eq!(tor.wins, 2);
        assert_eq!(tor.rolling_form.back().unwrap().goals_for, 4);
    }

    #[test]
    fn unknown_team_gets_league_prior() {
        let config = Config::defaults();
        let store = RatingStore::new();
        let prior = store.get_or_prior("SEA", &config);
        assert_eq!(prior.elo_rating, 1500.0);
        assert_eq!(prior.goal_rate_for, 3.1);
        assert!(prior.rolling_form.is_empty());
    }
}
