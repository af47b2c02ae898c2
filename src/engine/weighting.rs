//! Dynamic model weighting.
//!
//! Each model keeps a rolling window of resolved predictions and an
//! exponential moving average of its accuracy. Weights only move on
//! [`WeightingService::recalibrate`], which is triggered manually or by the
//! scheduler, never per game.

use crate::config::Config;
use crate::db::models::{ModelKind, ModelWeightRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Active,
    Degraded,
}

impl ModelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelState::Active => "active",
            ModelState::Degraded => "degraded",
        }
    }

    pub fn parse(s: &str) -> ModelState {
        match s {
            "degraded" => ModelState::Degraded,
            _ => ModelState::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelTrack {
    pub base_weight: f64,
    pub weight: f64,
    pub ema_accuracy: f64,
    pub window: VecDeque<bool>,
    pub state: ModelState,
}

impl ModelTrack {
    pub fn window_accuracy(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().filter(|c| **c).count() as f64 / self.window.len() as f64)
    }
}

/// Outcome of one recalibration, for logging and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RecalibrationReport {
    pub weights: BTreeMap<String, f64>,
    pub degraded: Vec<String>,
    pub mean_skill: f64,
}

#[derive(Debug, Clone)]
pub struct WeightingService {
    tracks: BTreeMap<ModelKind, ModelTrack>,
    window_size: usize,
    alpha: f64,
    sensitivity: f64,
    floor: f64,
    min_samples: usize,
    calibration_penalty: f64,
    degraded_threshold: f64,
}

/// Clamp every weight to `floor` and renormalise to 1, keeping floored
/// weights pinned so renormalisation cannot push them back under.
pub fn normalize_with_floor(raw: &BTreeMap<ModelKind, f64>, floor: f64) -> BTreeMap<ModelKind, f64> {
    let mut pinned: Vec<ModelKind> = Vec::new();
    loop {
        let free_mass = 1.0 - floor * pinned.len() as f64;
        let free_total: f64 = raw
            .iter()
            .filter(|(k, _)| !pinned.contains(k))
            .map(|(_, w)| w.max(0.0))
            .sum();
        let mut out = BTreeMap::new();
        let mut newly_pinned = false;
        for (kind, w) in raw {
            if pinned.contains(kind) {
                out.insert(*kind, floor);
                continue;
            }
            let free_count = (raw.len() - pinned.len()) as f64;
            let scaled = if free_total > 0.0 {
                w.max(0.0) / free_total * free_mass
            } else {
                free_mass / free_count
            };
            if scaled < floor {
                pinned.push(*kind);
                newly_pinned = true;
            }
            out.insert(*kind, scaled);
        }
        if !newly_pinned || pinned.len() == raw.len() {
            return out;
        }
    }
}

impl WeightingService {
    pub fn new(config: &Config) -> Self {
        let tracks = ModelKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    ModelTrack {
                        base_weight: kind.prior_weight(),
                        weight: kind.prior_weight(),
                        ema_accuracy: 0.5,
                        window: VecDeque::new(),
                        state: ModelState::Active,
                    },
                )
            })
            .collect();
        WeightingService {
            tracks,
            window_size: config.weight_window,
            alpha: config.weight_ema_alpha,
            sensitivity: config.weight_sensitivity,
            floor: config.weight_floor,
            min_samples: config.weight_min_samples,
            calibration_penalty: config.calibration_penalty,
            degraded_threshold: config.degraded_threshold,
        }
    }

    /// Rebuild from persisted rows; unknown names are ignored, missing
    /// models keep their priors.
    pub fn restore(config: &Config, rows: &[ModelWeightRow]) -> Self {
        let mut service = WeightingService::new(config);
        for row in rows {
            let Some(kind) = ModelKind::from_name(&row.model_name) else {
                warn!("Ignoring persisted weight for unknown model {}", row.model_name);
                continue;
            };
            if let Some(track) = service.tracks.get_mut(&kind) {
                track.weight = row.weight;
                track.ema_accuracy = row.ema_accuracy;
                track.window = row.window.iter().copied().collect();
                track.state = ModelState::parse(&row.state);
            }
        }
        service
    }

    pub fn rows(&self) -> Vec<ModelWeightRow> {
        self.tracks
            .iter()
            .map(|(kind, t)| ModelWeightRow {
                model_name: kind.name().to_string(),
                weight: t.weight,
                ema_accuracy: t.ema_accuracy,
                window: t.window.iter().copied().collect(),
                state: t.state.as_str().to_string(),
            })
            .collect()
    }

    pub fn track(&self, kind: ModelKind) -> Option<&ModelTrack> {
        self.tracks.get(&kind)
    }

    /// Record whether a model picked the right winner for one resolved game.
    pub fn record(&mut self, kind: ModelKind, correct: bool) {
        let Some(track) = self.tracks.get_mut(&kind) else {
            return;
        };
        track.window.push_back(correct);
        while track.window.len() > self.window_size {
            track.window.pop_front();
        }
        let x = if correct { 1.0 } else { 0.0 };
        track.ema_accuracy = self.alpha * x + (1.0 - self.alpha) * track.ema_accuracy;
    }

    /// Current weights over all models, summing to 1.
    pub fn weights(&self) -> BTreeMap<ModelKind, f64> {
        let total: f64 = self.tracks.values().map(|t| t.weight).sum();
        self.tracks
            .iter()
            .map(|(k, t)| (*k, t.weight / total))
            .collect()
    }

    /// `new_i = base_i * (1 + k * (skill_i - mean))`, floored and renormalised.
    /// Skill is the accuracy EMA minus a penalty on expected calibration error.
    /// Models with too few resolved predictions sit at the mean and keep
    /// their base weight.
    pub fn recalibrate(&mut self, calibration_errors: &HashMap<ModelKind, f64>) -> RecalibrationReport {
        let skills: BTreeMap<ModelKind, Option<f64>> = self
            .tracks
            .iter()
            .map(|(kind, t)| {
                let eligible = t.window.len() >= self.min_samples;
                let ece = calibration_errors.get(kind).copied().unwrap_or(0.0);
                (*kind, eligible.then(|| t.ema_accuracy - self.calibration_penalty * ece))
            })
            .collect();

        let eligible: Vec<f64> = skills.values().flatten().copied().collect();
        let mean = if eligible.is_empty() {
            0.0
        } else {
            eligible.iter().sum::<f64>() / eligible.len() as f64
        };

        let raw: BTreeMap<ModelKind, f64> = self
            .tracks
            .iter()
            .map(|(kind, t)| {
                let skill = skills[kind].unwrap_or(mean);
                (*kind, t.base_weight * (1.0 + self.sensitivity * (skill - mean)))
            })
            .collect();
        let normalized = normalize_with_floor(&raw, self.floor);

        let mut degraded = Vec::new();
        for (kind, track) in self.tracks.iter_mut() {
            track.weight = normalized[kind];
            let state = match skills[kind] {
                Some(skill) if skill < mean - self.degraded_threshold => ModelState::Degraded,
                _ => ModelState::Active,
            };
            if state != track.state {
                info!("{} is now {}", kind, state.as_str());
            }
            track.state = state;
            if state == ModelState::Degraded {
                degraded.push(kind.name().to_string());
            }
        }

        let report = RecalibrationReport {
            weights: self
                .tracks
                .iter()
                .map(|(k, t)| (k.name().to_string(), t.weight))
                .collect(),
            degraded,
            mean_skill: mean,
        };
        info!("Recalibrated weights: {:?}", report.weights);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sum(w: &BTreeMap<ModelKind, f64>) -> f64 {
        w.values().sum()
    }

    #[test]
    fn initial_weights_are_priors_and_sum_to_one() {
        let service = WeightingService::new(&Config::defaults());
        let w = service.weights();
        assert_relative_eq!(sum(&w), 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[&ModelKind::Elo], 0.20, epsilon = 1e-12);
    }

    #[test]
    fn accurate_model_gains_weight_and_poor_one_degrades() {
        let config = Config::defaults();
        let mut service = WeightingService::new(&config);
        for i in 0..30 {
            for kind in ModelKind::ALL {
                let correct = match kind {
                    ModelKind::Elo => true,
                    ModelKind::Bayesian => false,
                    _ => i % 2 == 0,
                };
                service.record(kind, correct);
            }
        }
        let before = service.weights();
        let report = service.recalibrate(&HashMap::new());
        let after = service.weights();

        assert_relative_eq!(sum(&after), 1.0, epsilon = 1e-12);
        assert!(after[&ModelKind::Elo] > before[&ModelKind::Elo]);
        assert!(after[&ModelKind::Bayesian] < before[&ModelKind::Bayesian]);
        assert!(after.values().all(|w| *w >= config.weight_floor - 1e-12));
        assert_eq!(report.degraded, vec![ModelKind::Bayesian.name().to_string()]);
        assert_eq!(service.track(ModelKind::Bayesian).unwrap().state, ModelState::Degraded);
    }

    #[test]
    fn too_few_samples_keep_weights() {
        let mut service = WeightingService::new(&Config::defaults());
        service.record(ModelKind::Elo, true);
        let before = service.weights();
        service.recalibrate(&HashMap::new());
        let after = service.weights();
        for kind in ModelKind::ALL {
            assert_relative_eq!(before[&kind], after[&kind], epsilon = 1e-12);
        }
    }

    #[test]
    fn floor_is_respected_after_renormalisation() {
        let raw: BTreeMap<ModelKind, f64> = ModelKind::ALL
            .into_iter()
            .enumerate()
            .map(|(i, k)| (k, if i == 0 { 10.0 } else { 0.001 }))
            .collect();
        let w = normalize_with_floor(&raw, 0.05);
        assert_relative_eq!(sum(&w), 1.0, epsilon = 1e-12);
        assert!(w.values().all(|v| *v >= 0.05 - 1e-12));
        assert_relative_eq!(w[&ModelKind::Statistical], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn window_is_bounded_and_rows_round_trip() {
        let config = Config::defaults();
        let mut service = WeightingService::new(&config);
        for _ in 0..40 {
            service.record(ModelKind::Poisson, true);
        }
        assert_eq!(service.track(ModelKind::Poisson).unwrap().window.len(), 30);
        let restored = WeightingService::restore(&config, &service.rows());
        assert_eq!(
            restored.track(ModelKind::Poisson),
            service.track(ModelKind::Poisson)
        );
    }
}
