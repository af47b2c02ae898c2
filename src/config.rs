use clap::{CommandFactory, FromArgMatches, Parser};

/// Ensemble game-outcome prediction engine
#[derive(Parser, Debug, Clone)]
#[command(name = "hockey-ensemble", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "ensemble.db")]
    pub database_path: String,

    // ── Elo ──────────────────────────────────────────────────────────────────
    /// Rating assigned to a team with no history
    #[arg(long, env = "ELO_INITIAL", default_value = "1500.0")]
    pub elo_initial: f64,

    /// Ratings are never allowed below this value
    #[arg(long, env = "ELO_FLOOR", default_value = "1000.0")]
    pub elo_floor: f64,

    /// Base K-factor for rating updates
    #[arg(long, env = "ELO_K_FACTOR", default_value = "20.0")]
    pub elo_k_factor: f64,

    /// K multiplier applied to playoff games
    #[arg(long, env = "ELO_PLAYOFF_K_MULTIPLIER", default_value = "1.5")]
    pub elo_playoff_k_multiplier: f64,

    /// K multiplier applied to games decided in overtime or a shootout
    #[arg(long, env = "ELO_OVERTIME_K_MULTIPLIER", default_value = "0.8")]
    pub elo_overtime_k_multiplier: f64,

    /// Home-ice bonus (Elo points) added to the home team at prediction time
    #[arg(long, env = "ELO_HOME_ADVANTAGE", default_value = "35.0")]
    pub elo_home_advantage: f64,

    // ── Poisson ──────────────────────────────────────────────────────────────
    /// Weight kept on the old goal rate in `decay * old + (1 - decay) * actual`
    #[arg(long, env = "POISSON_DECAY", default_value = "0.9")]
    pub poisson_decay: f64,

    /// League-average goals per team per game (prior for unseen teams)
    #[arg(long, env = "LEAGUE_AVG_GOALS", default_value = "3.1")]
    pub league_avg_goals: f64,

    /// Goal rates are never allowed below this value
    #[arg(long, env = "MIN_GOAL_RATE", default_value = "0.1")]
    pub min_goal_rate: f64,

    /// Multiplier on the home team's expected goals
    #[arg(long, env = "HOME_SCORING_MULTIPLIER", default_value = "1.08")]
    pub home_scoring_multiplier: f64,

    /// Highest per-side goal count summed over by the Poisson model
    #[arg(long, env = "SCORELINE_CUTOFF", default_value = "10")]
    pub scoreline_cutoff: u32,

    /// Number of recent games kept in each team's rolling form
    #[arg(long, env = "FORM_WINDOW", default_value = "10")]
    pub form_window: usize,

    // ── Per-game Monte Carlo ─────────────────────────────────────────────────
    /// Trials per single-game simulation (capped at 2000)
    #[arg(long, env = "GAME_SIM_TRIALS", default_value = "2000")]
    pub game_sim_trials: usize,

    // ── Neural network ───────────────────────────────────────────────────────
    /// Hidden layer sizes
    #[arg(long, env = "NN_HIDDEN", value_delimiter = ',', default_value = "16,8")]
    pub nn_hidden: Vec<usize>,

    /// Gradient-descent step size
    #[arg(long, env = "NN_LEARNING_RATE", default_value = "0.05")]
    pub nn_learning_rate: f64,

    /// Examples accumulated before one backpropagation step
    #[arg(long, env = "NN_BATCH_SIZE", default_value = "16")]
    pub nn_batch_size: usize,

    /// Seed for weight initialisation of a fresh network
    #[arg(long, env = "NN_SEED", default_value = "7")]
    pub nn_seed: u64,

    // ── Dynamic weighting ────────────────────────────────────────────────────
    /// Resolved predictions kept per model for accuracy tracking
    #[arg(long, env = "WEIGHT_WINDOW", default_value = "30")]
    pub weight_window: usize,

    /// Smoothing factor of the accuracy moving average
    #[arg(long, env = "WEIGHT_EMA_ALPHA", default_value = "0.1")]
    pub weight_ema_alpha: f64,

    /// Sensitivity `k` in `base * (1 + k * (accuracy - mean))`
    #[arg(long, env = "WEIGHT_SENSITIVITY", default_value = "2.0")]
    pub weight_sensitivity: f64,

    /// No model weight is allowed below this value
    #[arg(long, env = "WEIGHT_FLOOR", default_value = "0.05")]
    pub weight_floor: f64,

    /// Resolved predictions required before a model's weight may move
    #[arg(long, env = "WEIGHT_MIN_SAMPLES", default_value = "10")]
    pub weight_min_samples: usize,

    /// Penalty applied to a model's calibration error when scoring it
    #[arg(long, env = "CALIBRATION_PENALTY", default_value = "0.5")]
    pub calibration_penalty: f64,

    /// Accuracy gap below the mean at which a model is marked degraded
    #[arg(long, env = "DEGRADED_THRESHOLD", default_value = "0.05")]
    pub degraded_threshold: f64,

    /// Resolved ensemble predictions required before fitting Platt scaling
    #[arg(long, env = "PLATT_MIN_SAMPLES", default_value = "30")]
    pub platt_min_samples: usize,

    // ── Ensemble ─────────────────────────────────────────────────────────────
    /// Share of ensemble confidence that comes from inter-model agreement
    #[arg(long, env = "AGREEMENT_SHARE", default_value = "0.4")]
    pub agreement_share: f64,

    /// Per-model time budget in milliseconds
    #[arg(long, env = "MODEL_TIMEOUT_MS", default_value = "250")]
    pub model_timeout_ms: u64,

    /// Ensemble prediction cache lifetime in seconds
    #[arg(long, env = "PREDICTION_CACHE_TTL_SECS", default_value = "60")]
    pub prediction_cache_ttl_secs: u64,

    /// Days of served predictions kept behind the newest processed game
    #[arg(long, env = "PREDICTION_LOG_RETENTION_DAYS", default_value = "14")]
    pub prediction_log_retention_days: u64,

    // ── Season simulation ────────────────────────────────────────────────────
    /// Default number of simulated seasons
    #[arg(long, env = "SEASON_SIMULATIONS", default_value = "5000")]
    pub season_simulations: usize,

    /// Upper bound on simulated seasons per request
    #[arg(long, env = "SEASON_MAX_SIMULATIONS", default_value = "50000")]
    pub season_max_simulations: usize,

    /// Seasons per independently seeded work unit
    #[arg(long, env = "SEASON_CHUNK_SIZE", default_value = "250")]
    pub season_chunk_size: usize,

    /// Season odds cache lifetime in seconds
    #[arg(long, env = "SEASON_CACHE_TTL_SECS", default_value = "300")]
    pub season_cache_ttl_secs: u64,

    /// Probability shift for rest-day mismatches and back-to-backs
    #[arg(long, env = "REST_PERTURBATION", default_value = "0.03")]
    pub rest_perturbation: f64,

    /// Pull toward 0.5 applied to division games
    #[arg(long, env = "DIVISION_SHRINK", default_value = "0.9")]
    pub division_shrink: f64,

    /// Playoff spots awarded per division
    #[arg(long, env = "DIVISION_SPOTS", default_value = "3")]
    pub division_spots: usize,

    /// Wild-card spots per conference
    #[arg(long, env = "WILD_CARDS", default_value = "2")]
    pub wild_cards: usize,

    // ── Workers ──────────────────────────────────────────────────────────────
    /// Completed-game scan interval in seconds
    #[arg(long, env = "TRAINING_SCAN_SECS", default_value = "300")]
    pub training_scan_secs: u64,

    /// Weight recalibration interval in seconds (0 disables the worker)
    #[arg(long, env = "RECALIBRATION_SECS", default_value = "3600")]
    pub recalibration_secs: u64,

    /// Directory scanned for completed-game JSON files
    #[arg(long, env = "INBOX_DIR")]
    pub inbox_dir: Option<String>,

    /// JSON file with current standings and the remaining schedule
    #[arg(long, env = "SEASON_FILE")]
    pub season_file: Option<String>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.elo_floor >= self.elo_initial {
            anyhow::bail!("elo_floor must be below elo_initial");
        }
        if self.elo_k_factor <= 0.0 {
            anyhow::bail!("elo_k_factor must be positive");
        }
        if !(0.0..1.0).contains(&self.poisson_decay) {
            anyhow::bail!("poisson_decay must be in [0.0, 1.0)");
        }
        if self.min_goal_rate <= 0.0 || self.league_avg_goals <= self.min_goal_rate {
            anyhow::bail!("min_goal_rate must be positive and below league_avg_goals");
        }
        if self.form_window == 0 {
            anyhow::bail!("form_window must be at least 1");
        }
        if self.game_sim_trials == 0 {
            anyhow::bail!("game_sim_trials must be at least 1");
        }
        if self.nn_hidden.len() != 2 || self.nn_hidden.iter().any(|&n| n == 0) {
            anyhow::bail!("nn_hidden must name exactly two non-empty hidden layers");
        }
        if self.nn_batch_size == 0 {
            anyhow::bail!("nn_batch_size must be at least 1");
        }
        if self.nn_learning_rate <= 0.0 {
            anyhow::bail!("nn_learning_rate must be positive");
        }
        if self.weight_window == 0 {
            anyhow::bail!("weight_window must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.weight_ema_alpha) {
            anyhow::bail!("weight_ema_alpha must be between 0.0 and 1.0");
        }
        // Six models must be able to sit at the floor together.
        if !(0.0..(1.0 / 6.0)).contains(&self.weight_floor) || self.weight_floor == 0.0 {
            anyhow::bail!("weight_floor must be in (0.0, 1/6)");
        }
        if !(0.0..=1.0).contains(&self.agreement_share) {
            anyhow::bail!("agreement_share must be between 0.0 and 1.0");
        }
        if self.season_simulations == 0 || self.season_simulations > self.season_max_simulations {
            anyhow::bail!("season_simulations must be in [1, season_max_simulations]");
        }
        if self.season_chunk_size == 0 {
            anyhow::bail!("season_chunk_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.division_shrink) {
            anyhow::bail!("division_shrink must be between 0.0 and 1.0");
        }
        if self.training_scan_secs == 0 {
            anyhow::bail!("training_scan_secs must be at least 1");
        }
        Ok(())
    }

    /// Built-in defaults, ignoring the process environment.
    pub fn defaults() -> Self {
        let command = Config::command().mut_args(|arg| arg.env(None));
        command
            .try_get_matches_from(["hockey-ensemble"])
            .and_then(|matches| Config::from_arg_matches(&matches))
            .unwrap_or_else(|e| e.exit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.nn_hidden, vec![16, 8]);
        assert_eq!(config.season_simulations, 5000);
    }

    #[test]
    fn defaults_ignore_environment() {
        std::env::set_var("PREDICTION_LOG_RETENTION_DAYS", "1");
        let config = Config::defaults();
        std::env::remove_var("PREDICTION_LOG_RETENTION_DAYS");
        assert_eq!(config.prediction_log_retention_days, 14);
    }

    #[test]
    fn rejects_floor_above_initial_rating() {
        let mut config = Config::defaults();
        config.elo_floor = 1600.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_weight_floor_that_cannot_sum_to_one() {
        let mut config = Config::defaults();
        config.weight_floor = 0.2;
        assert!(config.validate().is_err());
    }
}
