use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Name under which ensemble-level accuracy is tracked.
pub const ENSEMBLE_NAME: &str = "Ensemble";

/// The closed set of prediction models in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    Statistical,
    Bayesian,
    MonteCarlo,
    Elo,
    Poisson,
    NeuralNetwork,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::Statistical,
        ModelKind::Bayesian,
        ModelKind::MonteCarlo,
        ModelKind::Elo,
        ModelKind::Poisson,
        ModelKind::NeuralNetwork,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Statistical => "Statistical",
            ModelKind::Bayesian => "Bayesian Inference",
            ModelKind::MonteCarlo => "Monte Carlo Simulation",
            ModelKind::Elo => "Elo Rating",
            ModelKind::Poisson => "Poisson Regression",
            ModelKind::NeuralNetwork => "Neural Network",
        }
    }

    pub fn from_name(name: &str) -> Option<ModelKind> {
        ModelKind::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Hand-tuned starting weight; the priors sum to 1.
    pub fn prior_weight(self) -> f64 {
        match self {
            ModelKind::Statistical => 0.35,
            ModelKind::Bayesian => 0.15,
            ModelKind::MonteCarlo => 0.10,
            ModelKind::Elo => 0.20,
            ModelKind::Poisson => 0.15,
            ModelKind::NeuralNetwork => 0.05,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One game in a team's rolling form window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormEntry {
    pub won: bool,
    pub goals_for: u32,
    pub goals_against: u32,
    pub shots_for: u32,
    pub shots_against: u32,
    pub power_play_pct: f64,
}

/// Evolving strength signals for one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub team_code: String,
    pub elo_rating: f64,
    /// Expected goals scored per game (exponentially updated, > 0).
    pub goal_rate_for: f64,
    /// Expected goals allowed per game (exponentially updated, > 0).
    pub goal_rate_against: f64,
    /// Most recent game last.
    pub rolling_form: VecDeque<FormEntry>,
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub last_game_date: Option<NaiveDate>,
    pub last_updated: DateTime<Utc>,
}

impl TeamRating {
    /// Win fraction over the rolling form, `None` with no games.
    pub fn form_win_pct(&self) -> Option<f64> {
        if self.rolling_form.is_empty() {
            return None;
        }
        let wins = self.rolling_form.iter().filter(|g| g.won).count();
        Some(wins as f64 / self.rolling_form.len() as f64)
    }

    /// Mean goal differential per game over the rolling form.
    pub fn form_goal_diff(&self) -> Option<f64> {
        if self.rolling_form.is_empty() {
            return None;
        }
        let diff: i64 = self
            .rolling_form
            .iter()
            .map(|g| g.goals_for as i64 - g.goals_against as i64)
            .sum();
        Some(diff as f64 / self.rolling_form.len() as f64)
    }

    /// Mean shot share over the rolling form.
    pub fn form_shot_share(&self) -> Option<f64> {
        let (f, a) = self
            .rolling_form
            .iter()
            .fold((0u64, 0u64), |(f, a), g| (f + g.shots_for as u64, a + g.shots_against as u64));
        if f + a == 0 {
            return None;
        }
        Some(f as f64 / (f + a) as f64)
    }
}

/// Situational context of a single matchup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SituationalContext {
    pub home_rest_days: Option<u32>,
    pub away_rest_days: Option<u32>,
    /// No home-ice advantage is applied when set.
    pub neutral_site: bool,
    pub playoff: bool,
}

/// A future game to predict. Built per request and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matchup {
    pub home_team: String,
    pub away_team: String,
    pub game_date: NaiveDate,
    pub context: SituationalContext,
}

/// A whole-goal scoreline, home first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedScore {
    pub home: u32,
    pub away: u32,
}

impl fmt::Display for PredictedScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

/// Output of a single model for a single matchup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: ModelKind,
    /// Probability that the home team wins, in [0, 1].
    pub win_probability: f64,
    pub predicted_score: PredictedScore,
    /// In [0, 1].
    pub confidence: f64,
    pub processing_time_ms: u64,
}

/// A model that was left out of one ensemble call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedModel {
    pub model: ModelKind,
    pub reason: String,
}

/// Weighted blend of every model that answered for one matchup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub home_team: String,
    pub away_team: String,
    pub game_date: NaiveDate,
    /// Calibrated probability that the home team wins.
    pub win_probability: f64,
    /// Blend before Platt calibration.
    pub raw_win_probability: f64,
    pub predicted_score: PredictedScore,
    pub ensemble_confidence: f64,
    pub model_results: Vec<ModelResult>,
    /// Renormalised weights actually applied, keyed by model name.
    pub weights_used: BTreeMap<String, f64>,
    pub excluded: Vec<ExcludedModel>,
    pub generated_at: DateTime<Utc>,
}

impl EnsemblePrediction {
    pub fn predicted_winner(&self) -> &str {
        if self.win_probability >= 0.5 {
            &self.home_team
        } else {
            &self.away_team
        }
    }
}

/// One side's box score of a completed game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamGameStats {
    pub team_code: String,
    pub score: u32,
    pub shots: u32,
    /// Power-play conversion in percent, [0, 100].
    #[serde(default)]
    pub power_play_pct: f64,
    /// Penalty-kill success in percent, [0, 100].
    #[serde(default)]
    pub penalty_kill_pct: f64,
}

/// A finished game, used exactly once as training input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedGame {
    pub game_id: String,
    pub game_date: NaiveDate,
    pub home: TeamGameStats,
    pub away: TeamGameStats,
    /// Decided in overtime or a shootout.
    #[serde(default)]
    pub overtime: bool,
    #[serde(default)]
    pub playoff: bool,
}

impl CompletedGame {
    pub fn home_won(&self) -> bool {
        self.home.score > self.away.score
    }

    pub fn winner(&self) -> &str {
        if self.home_won() {
            &self.home.team_code
        } else {
            &self.away.team_code
        }
    }
}

/// Outcome bookkeeping for one prediction. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub game_id: String,
    /// A model name, or [`ENSEMBLE_NAME`].
    pub model_name: String,
    pub home_team: String,
    pub predicted_winner: String,
    pub actual_winner: String,
    /// Predicted probability that the home team wins.
    pub predicted_probability: f64,
    pub confidence: f64,
    pub recorded_at: DateTime<Utc>,
}

impl AccuracyRecord {
    pub fn correct(&self) -> bool {
        self.predicted_winner == self.actual_winner
    }

    pub fn home_won(&self) -> bool {
        self.actual_winner == self.home_team
    }

    pub fn predicted_home(&self) -> bool {
        self.predicted_winner == self.home_team
    }
}

/// Persisted weighting state of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeightRow {
    pub model_name: String,
    pub weight: f64,
    pub ema_accuracy: f64,
    /// Correctness of the most recent resolved predictions, oldest first.
    pub window: Vec<bool>,
    pub state: String,
}

/// Current standings line for one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingRow {
    pub team_code: String,
    pub conference: String,
    pub division: String,
    pub games_played: u32,
    pub wins: u32,
    pub regulation_wins: u32,
    /// Regulation plus overtime wins (shootout wins excluded).
    pub regulation_ot_wins: u32,
    pub points: u32,
    #[serde(default)]
    pub goals_for: u32,
    #[serde(default)]
    pub goals_against: u32,
}

/// A game still to be played this season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledGame {
    pub home_team: String,
    pub away_team: String,
    pub game_date: NaiveDate,
}

/// Standings plus remaining schedule, supplied by the surrounding system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonSchedule {
    pub standings: Vec<StandingRow>,
    pub remaining_games: Vec<ScheduledGame>,
}

/// Distribution of outcomes over N simulated seasons for one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonSimulationResult {
    pub team_code: String,
    pub simulations: usize,
    /// Fractions in [0, 1].
    pub playoff_odds: f64,
    pub division_odds: f64,
    pub wild_card_odds: f64,
    pub average_points: f64,
    pub best_case_points: u32,
    pub worst_case_points: u32,
    pub average_conference_rank: f64,
    pub percentile_points: BTreeMap<u8, u32>,
    pub points_distribution: BTreeMap<u32, usize>,
    pub generated_at: DateTime<Utc>,
}
