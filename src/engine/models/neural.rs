use super::{round_score, PredictionContext, RawPrediction};
use crate::engine::network::GOAL_SCALE;
use crate::error::ModelError;

/// Reads the shared network snapshot captured in the context.
#[derive(Debug, Clone)]
pub struct NeuralModel;

impl NeuralModel {
    pub fn predict(&self, ctx: &PredictionContext) -> Result<RawPrediction, ModelError> {
        let output = ctx.network.forward(&ctx.features())?;
        let &[win, home_goals, away_goals] = output.as_slice() else {
            return Err(ModelError::ShapeMismatch {
                expected: 3,
                actual: output.len(),
            });
        };
        let max = output.iter().copied().fold(0.0, f64::max);
        Ok(RawPrediction {
            win_probability: win,
            score: round_score(
                home_goals * GOAL_SCALE,
                away_goals * GOAL_SCALE,
                GOAL_SCALE as u32,
                win,
            ),
            confidence: 0.6 + max * 0.35,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context_with;
    use super::*;
    use crate::engine::network::Network;
    use std::sync::Arc;

    #[test]
    fn mismatched_network_is_an_error() {
        let mut ctx = context_with(1500.0, 1500.0, false);
        ctx.network = Arc::new(Network::new(&[5, 4, 4, 3], 1));
        let err = NeuralModel.predict(&ctx).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { expected: 5, .. }));
    }

    #[test]
    fn confidence_stays_in_documented_band() {
        let r = NeuralModel.predict(&context_with(1550.0, 1450.0, false)).unwrap();
        assert!((0.6..=0.95).contains(&r.confidence));
        assert!(r.score.home <= 8 && r.score.away <= 8);
    }
}
