//! Predictions served before their games, kept so training can score the
//! forecast that was actually published.
//!
//! Entries are bounded by a retention window that trails the newest
//! processed game. Matchups already played are remembered for the same
//! window so a late request does not log a forecast that can never be scored.

use crate::db::models::EnsemblePrediction;
use chrono::{Days, NaiveDate};
use std::collections::HashMap;

/// Key of the prediction log: one entry per (home, away, date).
pub fn prediction_log_key(home: &str, away: &str, date: NaiveDate) -> String {
    format!("{home}|{away}|{date}")
}

pub struct PredictionLog {
    pending: HashMap<String, EnsemblePrediction>,
    resolved: HashMap<String, NaiveDate>,
    newest_game: Option<NaiveDate>,
    retention_days: u64,
}

impl PredictionLog {
    pub fn new(retention_days: u64) -> Self {
        PredictionLog {
            pending: HashMap::new(),
            resolved: HashMap::new(),
            newest_game: None,
            retention_days,
        }
    }

    /// Rebuild from persisted rows. `newest_game` is the latest date any
    /// team has played.
    pub fn restore(
        retention_days: u64,
        pending: Vec<EnsemblePrediction>,
        resolved: Vec<(String, NaiveDate)>,
        newest_game: Option<NaiveDate>,
    ) -> Self {
        let mut log = PredictionLog::new(retention_days);
        log.newest_game = resolved.iter().map(|(_, d)| *d).chain(newest_game).max();
        log.resolved = resolved.into_iter().collect();
        for p in pending {
            log.record(&p);
        }
        log.prune();
        log
    }

    /// Games dated before this day are no longer logged.
    pub fn horizon(&self) -> Option<NaiveDate> {
        self.newest_game
            .map(|d| d.checked_sub_days(Days::new(self.retention_days)).unwrap_or(NaiveDate::MIN))
    }

    /// Whether a forecast for this matchup could still be scored.
    pub fn accepts(&self, key: &str, game_date: NaiveDate) -> bool {
        !self.resolved.contains_key(key) && self.horizon().map_or(true, |h| game_date >= h)
    }

    /// Log `prediction`, replacing any earlier forecast for the same matchup.
    /// Returns false when the matchup is already played or too old.
    pub fn record(&mut self, prediction: &EnsemblePrediction) -> bool {
        let key = prediction_log_key(&prediction.home_team, &prediction.away_team, prediction.game_date);
        if !self.accepts(&key, prediction.game_date) {
            return false;
        }
        self.pending.insert(key, prediction.clone());
        true
    }

    /// Mark a matchup played and hand back its logged forecast, if any.
    /// Advances the retention window and drops whatever falls out of it.
    pub fn resolve(&mut self, key: &str, game_date: NaiveDate) -> Option<EnsemblePrediction> {
        let logged = self.pending.remove(key);
        self.resolved.insert(key.to_string(), game_date);
        if self.newest_game.map_or(true, |d| game_date > d) {
            self.newest_game = Some(game_date);
            self.prune();
        }
        logged
    }

    fn prune(&mut self) {
        let Some(horizon) = self.horizon() else {
            return;
        };
        self.pending.retain(|_, p| p.game_date >= horizon);
        self.resolved.retain(|_, d| *d >= horizon);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn resolved_len(&self) -> usize {
        self.resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PredictedScore;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
    }

    fn forecast(home: &str, away: &str, date: NaiveDate) -> EnsemblePrediction {
        EnsemblePrediction {
            home_team: home.into(),
            away_team: away.into(),
            game_date: date,
            win_probability: 0.55,
            raw_win_probability: 0.55,
            predicted_score: PredictedScore { home: 3, away: 2 },
            ensemble_confidence: 0.6,
            model_results: Vec::new(),
            weights_used: BTreeMap::new(),
            excluded: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn played_matchup_is_not_logged_again() {
        let mut log = PredictionLog::new(7);
        let p = forecast("TOR", "MTL", day(10));
        assert!(log.record(&p));
        let key = prediction_log_key("TOR", "MTL", day(10));
        assert!(log.resolve(&key, day(10)).is_some());
        assert!(!log.record(&p));
        assert!(log.is_empty());
        assert!(log.resolve(&key, day(10)).is_none());
    }

    #[test]
    fn window_trails_the_newest_game() {
        let mut log = PredictionLog::new(7);
        assert!(log.record(&forecast("BOS", "NYR", day(1))));
        assert!(log.record(&forecast("EDM", "CGY", day(15))));
        log.resolve(&prediction_log_key("TOR", "MTL", day(5)), day(5));
        assert_eq!(log.len(), 2);
        assert_eq!(log.horizon(), NaiveDate::from_ymd_opt(2025, 10, 29));

        // Nov 20 pushes the horizon to Nov 13.
        log.resolve(&prediction_log_key("OTT", "BUF", day(20)), day(20));
        assert_eq!(log.horizon(), Some(day(13)));
        assert_eq!(log.len(), 1);
        assert_eq!(log.resolved_len(), 1);
        assert!(!log.record(&forecast("BOS", "NYR", day(12))));
        assert!(log.record(&forecast("BOS", "NYR", day(13))));
    }

    #[test]
    fn out_of_order_result_does_not_move_the_window_back() {
        let mut log = PredictionLog::new(3);
        log.resolve(&prediction_log_key("TOR", "MTL", day(20)), day(20));
        log.resolve(&prediction_log_key("OTT", "BUF", day(18)), day(18));
        assert_eq!(log.horizon(), Some(day(17)));
        assert_eq!(log.resolved_len(), 2);
    }

    #[test]
    fn restore_drops_rows_outside_the_window() {
        let log = PredictionLog::restore(
            7,
            vec![forecast("BOS", "NYR", day(2)), forecast("EDM", "CGY", day(25))],
            vec![(prediction_log_key("TOR", "MTL", day(1)), day(1))],
            Some(day(20)),
        );
        assert_eq!(log.horizon(), Some(day(13)));
        assert_eq!(log.len(), 1);
        assert_eq!(log.resolved_len(), 0);
    }
}
