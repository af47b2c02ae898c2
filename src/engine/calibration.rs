/// Ensemble probability calibration (Platt scaling).
///
/// The map is `p_calibrated = sigmoid(a * logit(p_raw) + b)`, fitted by
/// gradient descent on the log-loss of resolved ensemble predictions.
use crate::engine::network::sigmoid;
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-6;
const MAX_ITERS: usize = 500;
const LEARNING_RATE: f64 = 0.2;
const L2: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibration {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibration {
    pub const IDENTITY: PlattCalibration = PlattCalibration { a: 1.0, b: 0.0 };

    pub fn apply(&self, raw_prob: f64) -> f64 {
        sigmoid(self.a * logit(raw_prob) + self.b).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitMetrics {
    pub logloss_before: f64,
    pub logloss_after: f64,
    pub brier_before: f64,
    pub brier_after: f64,
}

impl FitMetrics {
    pub fn improved(&self) -> bool {
        self.logloss_after < self.logloss_before || self.brier_after < self.brier_before
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitResult {
    pub calibration: PlattCalibration,
    pub metrics: FitMetrics,
    pub samples: usize,
}

fn clamp_prob(p: f64) -> f64 {
    p.clamp(EPS, 1.0 - EPS)
}

fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    (p / (1.0 - p)).ln()
}

fn logloss(p: f64, y: f64) -> f64 {
    let p = clamp_prob(p);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

/// Fit on `(raw probability, outcome)` pairs. `None` with fewer than
/// `min_samples` pairs, a one-sided outcome set, or a diverging fit.
pub fn fit_platt(samples: &[(f64, f64)], min_samples: usize) -> Option<FitResult> {
    if samples.len() < min_samples.max(2) {
        return None;
    }
    let positives = samples.iter().filter(|(_, y)| *y > 0.5).count();
    if positives == 0 || positives == samples.len() {
        return None;
    }

    let n = samples.len() as f64;
    let mut a = 1.0f64;
    let mut b = 0.0f64;

    for i in 0..MAX_ITERS {
        let lr = LEARNING_RATE / (1.0 + 0.01 * i as f64);
        let (mut grad_a, mut grad_b) = (0.0, 0.0);
        for (raw_p, y) in samples {
            let x = logit(*raw_p);
            let err = sigmoid(a * x + b) - *y;
            grad_a += err * x;
            grad_b += err;
        }
        a -= lr * (grad_a / n + L2 * a);
        b -= lr * (grad_b / n);
        if !a.is_finite() || !b.is_finite() {
            return None;
        }
    }

    let calibration = PlattCalibration { a, b };
    let (mut ll_before, mut ll_after, mut br_before, mut br_after) = (0.0, 0.0, 0.0, 0.0);
    for (raw_p, y) in samples {
        let before = clamp_prob(*raw_p);
        let after = calibration.apply(*raw_p);
        ll_before += logloss(before, *y);
        ll_after += logloss(after, *y);
        br_before += (before - *y).powi(2);
        br_after += (after - *y).powi(2);
    }
    Some(FitResult {
        calibration,
        metrics: FitMetrics {
            logloss_before: ll_before / n,
            logloss_after: ll_after / n,
            brier_before: br_before / n,
            brier_after: br_after / n,
        },
        samples: samples.len(),
    })
}
