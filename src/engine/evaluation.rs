//! Prediction outcome bookkeeping and per-model metrics.
//!
//! The log is append-only. Every metric is recomputed from the records on
//! demand, so metrics after a restart match metrics before it.

use crate::db::models::{AccuracyRecord, ModelKind, ENSEMBLE_NAME};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const CALIBRATION_BUCKETS: usize = 10;
const RECENT_WINDOW: usize = 10;

/// Predicted-winner vs actual-winner counts, treating "home wins" as positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted_home: bool, home_won: bool) {
        match (predicted_home, home_won) {
            (true, true) => self.true_positive += 1,
            (true, false) => self.false_positive += 1,
            (false, false) => self.true_negative += 1,
            (false, true) => self.false_negative += 1,
        }
    }

    pub fn precision(&self) -> Option<f64> {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> Option<f64> {
        let (p, r) = (self.precision()?, self.recall()?);
        if p + r == 0.0 {
            return Some(0.0);
        }
        Some(2.0 * p * r / (p + r))
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

/// One decile of stated confidence and how often those picks were right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_confidence: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub model_name: String,
    pub total_predictions: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    pub brier_score: f64,
    pub average_confidence: f64,
    pub confusion: ConfusionMatrix,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub home_pick_accuracy: Option<f64>,
    pub away_pick_accuracy: Option<f64>,
    pub last_10_accuracy: Option<f64>,
    pub calibration_curve: Vec<CalibrationBucket>,
    pub expected_calibration_error: f64,
    /// Current ensemble weight; `None` for the ensemble itself.
    pub weight: Option<f64>,
    pub state: Option<String>,
    /// Accuracy over the weighting window.
    pub window_accuracy: Option<f64>,
}

/// Bucket predictions by decile of confidence and compare the mean
/// confidence in each bucket with the share of correct picks.
pub fn calibration_curve(records: &[&AccuracyRecord]) -> Vec<CalibrationBucket> {
    let mut sums = [(0usize, 0.0f64, 0usize); CALIBRATION_BUCKETS];
    for rec in records {
        let confidence = rec.confidence.clamp(0.0, 1.0);
        let idx = ((confidence * CALIBRATION_BUCKETS as f64) as usize).min(CALIBRATION_BUCKETS - 1);
        sums[idx].0 += 1;
        sums[idx].1 += confidence;
        if rec.correct() {
            sums[idx].2 += 1;
        }
    }
    sums.iter()
        .enumerate()
        .filter(|(_, (count, _, _))| *count > 0)
        .map(|(i, (count, conf_sum, correct))| CalibrationBucket {
            lower: i as f64 / CALIBRATION_BUCKETS as f64,
            upper: (i + 1) as f64 / CALIBRATION_BUCKETS as f64,
            count: *count,
            mean_confidence: conf_sum / *count as f64,
            accuracy: *correct as f64 / *count as f64,
        })
        .collect()
}

/// Count-weighted mean gap between stated confidence and accuracy.
/// Large values mean a model is systematically over- or under-confident.
pub fn expected_calibration_error(curve: &[CalibrationBucket]) -> f64 {
    let total: usize = curve.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    curve
        .iter()
        .map(|b| b.count as f64 / total as f64 * (b.mean_confidence - b.accuracy).abs())
        .sum()
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationLog {
    records: Vec<AccuracyRecord>,
}

impl EvaluationLog {
    pub fn from_records(records: Vec<AccuracyRecord>) -> Self {
        EvaluationLog { records }
    }

    pub fn push(&mut self, record: AccuracyRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn records_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a AccuracyRecord> + 'a {
        self.records.iter().filter(move |r| r.model_name == name)
    }

    pub fn metrics_for(&self, name: &str) -> Option<ModelMetrics> {
        let records: Vec<&AccuracyRecord> = self.records_for(name).collect();
        if records.is_empty() {
            return None;
        }
        let n = records.len() as f64;
        let correct = records.iter().filter(|r| r.correct()).count();
        let brier = records
            .iter()
            .map(|r| {
                let y = if r.home_won() { 1.0 } else { 0.0 };
                (r.predicted_probability - y).powi(2)
            })
            .sum::<f64>()
            / n;
        let avg_conf = records.iter().map(|r| r.confidence).sum::<f64>() / n;

        let mut confusion = ConfusionMatrix::default();
        for r in &records {
            confusion.record(r.predicted_home(), r.home_won());
        }
        let pick_accuracy = |home_pick: bool| {
            let picks: Vec<_> = records.iter().filter(|r| r.predicted_home() == home_pick).collect();
            ratio(picks.iter().filter(|r| r.correct()).count(), picks.len())
        };
        let recent = &records[records.len().saturating_sub(RECENT_WINDOW)..];
        let curve = calibration_curve(&records);
        let ece = expected_calibration_error(&curve);

        Some(ModelMetrics {
            model_name: name.to_string(),
            total_predictions: records.len(),
            correct_predictions: correct,
            accuracy: correct as f64 / n,
            brier_score: brier,
            average_confidence: avg_conf,
            precision: confusion.precision(),
            recall: confusion.recall(),
            f1: confusion.f1(),
            confusion,
            home_pick_accuracy: pick_accuracy(true),
            away_pick_accuracy: pick_accuracy(false),
            last_10_accuracy: ratio(recent.iter().filter(|r| r.correct()).count(), recent.len()),
            calibration_curve: curve,
            expected_calibration_error: ece,
            weight: None,
            state: None,
            window_accuracy: None,
        })
    }

    /// Metrics for every model and the ensemble that has resolved records.
    pub fn all_metrics(&self) -> BTreeMap<String, ModelMetrics> {
        ModelKind::ALL
            .iter()
            .map(|k| k.name())
            .chain(std::iter::once(ENSEMBLE_NAME))
            .filter_map(|name| self.metrics_for(name).map(|m| (name.to_string(), m)))
            .collect()
    }

    /// Expected calibration error per model, consumed by recalibration.
    pub fn calibration_errors(&self) -> HashMap<ModelKind, f64> {
        ModelKind::ALL
            .into_iter()
            .filter_map(|k| {
                self.metrics_for(k.name())
                    .map(|m| (k, m.expected_calibration_error))
            })
            .collect()
    }

    /// `(raw probability, outcome)` pairs of resolved ensemble predictions.
    /// The ensemble records store the raw blend so calibration can be refitted.
    pub fn ensemble_samples(&self) -> Vec<(f64, f64)> {
        self.records_for(ENSEMBLE_NAME)
            .map(|r| (r.predicted_probability, if r.home_won() { 1.0 } else { 0.0 }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn rec(model: &str, p_home: f64, home_won: bool) -> AccuracyRecord {
        rec_with_confidence(model, p_home, home_won, 0.7)
    }

    fn rec_with_confidence(model: &str, p_home: f64, home_won: bool, confidence: f64) -> AccuracyRecord {
        AccuracyRecord {
            game_id: "g".into(),
            model_name: model.into(),
            home_team: "TOR".into(),
            predicted_winner: if p_home >= 0.5 { "TOR".into() } else { "OTT".into() },
            actual_winner: if home_won { "TOR".into() } else { "OTT".into() },
            predicted_probability: p_home,
            confidence,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn brier_and_accuracy() {
        let log = EvaluationLog::from_records(vec![
            rec("Elo Rating", 0.8, true),
            rec("Elo Rating", 0.6, false),
            rec("Elo Rating", 0.3, false),
            rec("Elo Rating", 0.4, true),
        ]);
        let m = log.metrics_for("Elo Rating").unwrap();
        assert_eq!(m.total_predictions, 4);
        assert_eq!(m.correct_predictions, 2);
        assert_relative_eq!(m.accuracy, 0.5);
        assert_relative_eq!(m.brier_score, (0.04 + 0.36 + 0.09 + 0.36) / 4.0, epsilon = 1e-12);
        assert_eq!(
            m.confusion,
            ConfusionMatrix {
                true_positive: 1,
                false_positive: 1,
                true_negative: 1,
                false_negative: 1
            }
        );
        assert_eq!(m.precision, Some(0.5));
        assert_eq!(m.f1, Some(0.5));
        assert_eq!(m.home_pick_accuracy, Some(0.5));
    }

    #[test]
    fn calibration_curve_buckets_by_confidence_decile() {
        let records = vec![
            rec_with_confidence("Ensemble", 0.8, true, 0.72),
            rec_with_confidence("Ensemble", 0.6, false, 0.78),
            rec_with_confidence("Ensemble", 0.3, true, 0.55),
            rec_with_confidence("Ensemble", 0.9, true, 1.0),
        ];
        let refs: Vec<&AccuracyRecord> = records.iter().collect();
        let curve = calibration_curve(&refs);
        assert_eq!(curve.len(), 3);
        assert_relative_eq!(curve[0].lower, 0.5);
        assert_relative_eq!(curve[0].accuracy, 0.0);
        assert_eq!(curve[1].count, 2);
        assert_relative_eq!(curve[1].mean_confidence, 0.75, epsilon = 1e-12);
        assert_relative_eq!(curve[1].accuracy, 0.5);
        assert_relative_eq!(curve[2].lower, 0.9);
        let ece = expected_calibration_error(&curve);
        assert_relative_eq!(ece, (0.55 + 2.0 * 0.25 + 0.0) / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn overconfident_model_has_large_calibration_error() {
        // 95% confident on every pick, right on 55 of 100.
        let records: Vec<AccuracyRecord> = (0..100)
            .map(|i| rec_with_confidence("Elo Rating", 0.55, i < 55, 0.95))
            .collect();
        let log = EvaluationLog::from_records(records);
        let m = log.metrics_for("Elo Rating").unwrap();
        assert_relative_eq!(m.accuracy, 0.55, epsilon = 1e-12);
        assert_relative_eq!(m.expected_calibration_error, 0.40, epsilon = 1e-9);

        let honest: Vec<AccuracyRecord> = (0..100)
            .map(|i| rec_with_confidence("Poisson Regression", 0.55, i < 55, 0.55))
            .collect();
        let log = EvaluationLog::from_records(honest);
        let errors = log.calibration_errors();
        assert!(errors[&ModelKind::Poisson] < 1e-9);
    }

    #[test]
    fn last_ten_uses_most_recent_records() {
        let mut log = EvaluationLog::default();
        for _ in 0..10 {
            log.push(rec("Poisson Regression", 0.7, false));
        }
        for _ in 0..10 {
            log.push(rec("Poisson Regression", 0.7, true));
        }
        let m = log.metrics_for("Poisson Regression").unwrap();
        assert_eq!(m.last_10_accuracy, Some(1.0));
        assert_relative_eq!(m.accuracy, 0.5);
    }

    #[test]
    fn all_metrics_skips_models_without_records() {
        let log = EvaluationLog::from_records(vec![rec(ENSEMBLE_NAME, 0.6, true)]);
        let all = log.all_metrics();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(ENSEMBLE_NAME));
        assert_eq!(log.ensemble_samples(), vec![(0.6, 1.0)]);
    }
}
