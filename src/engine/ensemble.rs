//! Ensemble aggregator: fan out to every model, blend what comes back.
//!
//! Each model runs on a blocking thread under its own time budget. A model
//! that errors, panics or overruns is left out of that one call and the
//! remaining weights are renormalised; the call only fails when no model
//! answers at all.

use crate::db::models::{EnsemblePrediction, ExcludedModel, ModelKind, ModelResult, PredictedScore};
use crate::engine::calibration::PlattCalibration;
use crate::engine::models::{round_score, settle_score, PredictionContext, PredictionModel};
use crate::error::{EngineError, ModelError};
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Weighted blend of the models that answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Blend {
    pub probability: f64,
    pub confidence: f64,
    pub score: PredictedScore,
    pub weights: BTreeMap<ModelKind, f64>,
}

/// Blend results with `weights` renormalised over the models present.
///
/// Confidence mixes the weighted model confidence with inter-model
/// agreement, `1 - 2σ` of the weighted spread of probabilities.
pub fn blend(results: &[ModelResult], weights: &BTreeMap<ModelKind, f64>, agreement_share: f64) -> Option<Blend> {
    let total: f64 = results
        .iter()
        .map(|r| weights.get(&r.model).copied().unwrap_or(0.0))
        .sum();
    if results.is_empty() || total <= 0.0 {
        return None;
    }
    let used: BTreeMap<ModelKind, f64> = results
        .iter()
        .map(|r| (r.model, weights.get(&r.model).copied().unwrap_or(0.0) / total))
        .collect();

    let (mut p, mut conf, mut home, mut away) = (0.0, 0.0, 0.0, 0.0);
    for r in results {
        let w = used[&r.model];
        p += w * r.win_probability;
        conf += w * r.confidence;
        home += w * r.predicted_score.home as f64;
        away += w * r.predicted_score.away as f64;
    }
    let variance: f64 = results
        .iter()
        .map(|r| used[&r.model] * (r.win_probability - p).powi(2))
        .sum();
    let agreement = (1.0 - 2.0 * variance.sqrt()).clamp(0.0, 1.0);

    Some(Blend {
        probability: p.clamp(0.0, 1.0),
        confidence: ((1.0 - agreement_share) * conf + agreement_share * agreement).clamp(0.0, 1.0),
        score: round_score(home, away, u32::MAX, p),
        weights: used,
    })
}

/// Run every model against `ctx` and blend the answers.
pub async fn run_ensemble(
    models: &[PredictionModel],
    ctx: Arc<PredictionContext>,
    weights: &BTreeMap<ModelKind, f64>,
    calibration: Option<PlattCalibration>,
    agreement_share: f64,
    budget: Duration,
) -> Result<EnsemblePrediction, EngineError> {
    let calls = models.iter().cloned().map(|model| {
        let ctx = ctx.clone();
        async move {
            let kind = model.kind();
            let handle = tokio::task::spawn_blocking(move || model.predict(&ctx));
            let outcome = match tokio::time::timeout(budget, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(ModelError::Panicked(join_err.to_string())),
                Err(_) => Err(ModelError::TimedOut(budget.as_millis() as u64)),
            };
            (kind, outcome)
        }
    });

    let mut results = Vec::new();
    let mut excluded = Vec::new();
    for (kind, outcome) in join_all(calls).await {
        match outcome {
            Ok(result) => {
                debug!(
                    "{}: p={:.3} conf={:.2} score={} ({} ms)",
                    kind, result.win_probability, result.confidence, result.predicted_score, result.processing_time_ms
                );
                results.push(result);
            }
            Err(e) => {
                warn!(
                    "Excluding {} for {} @ {}: {}",
                    kind, ctx.matchup.away_team, ctx.matchup.home_team, e
                );
                excluded.push(ExcludedModel {
                    model: kind,
                    reason: e.to_string(),
                });
            }
        }
    }

    let blended = blend(&results, weights, agreement_share).ok_or(EngineError::PredictionUnavailable)?;
    let win_probability = calibration.map_or(blended.probability, |c| c.apply(blended.probability));

    Ok(EnsemblePrediction {
        home_team: ctx.matchup.home_team.clone(),
        away_team: ctx.matchup.away_team.clone(),
        game_date: ctx.matchup.game_date,
        win_probability,
        raw_win_probability: blended.probability,
        // Calibration can move the probability across one half.
        predicted_score: settle_score(blended.score, win_probability),
        ensemble_confidence: blended.confidence,
        model_results: results,
        weights_used: blended
            .weights
            .iter()
            .map(|(k, w)| (k.name().to_string(), *w))
            .collect(),
        excluded,
        generated_at: Utc::now(),
    })
}
