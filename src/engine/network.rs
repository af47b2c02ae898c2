//! Fixed-topology feedforward network with a separate backpropagation routine.
//!
//! Hidden layers use ReLU, the output layer a sigmoid. Outputs are
//! `[home win probability, home goals / 8, away goals / 8]` and the loss is
//! half the squared error summed over outputs, so the output delta is simply
//! `(a - y) * σ'(z)`.
//!
//! Training is split into four steps that are each testable on their own:
//! [`Network::forward_trace`] (forward pass), [`mse_loss`] (loss),
//! [`Network::gradients`] (per-layer chain rule) and [`Network::apply`]
//! (gradient-descent update). [`Network::train_batch`] strings them together
//! over a batch, computing per-example gradients in parallel.

use crate::error::ModelError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const OUTPUT_SIZE: usize = 3;
/// Goal outputs are scaled into [0, 1] by this many goals.
pub const GOAL_SCALE: f64 = 8.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub inputs: usize,
    pub outputs: usize,
    /// Row-major by input: weight from input `i` to output `j` is `i * outputs + j`.
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<Layer>,
    pub examples_seen: u64,
}

/// One labelled example: engineered features and the observed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub game_id: String,
    pub features: Vec<f64>,
    pub target: [f64; OUTPUT_SIZE],
}

impl TrainingExample {
    pub fn new(game_id: &str, features: Vec<f64>, home_won: bool, home_goals: u32, away_goals: u32) -> Self {
        TrainingExample {
            game_id: game_id.to_string(),
            features,
            target: [
                if home_won { 1.0 } else { 0.0 },
                (home_goals as f64 / GOAL_SCALE).min(1.0),
                (away_goals as f64 / GOAL_SCALE).min(1.0),
            ],
        }
    }
}

/// Gradients for every layer, shaped like the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<Vec<f64>>,
}

impl Gradients {
    fn zeros_like(net: &Network) -> Self {
        Gradients {
            weights: net.layers.iter().map(|l| vec![0.0; l.weights.len()]).collect(),
            biases: net.layers.iter().map(|l| vec![0.0; l.biases.len()]).collect(),
        }
    }

    fn add_scaled(&mut self, other: &Gradients, scale: f64) {
        for (dst, src) in self.weights.iter_mut().zip(&other.weights) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s * scale;
            }
        }
        for (dst, src) in self.biases.iter_mut().zip(&other.biases) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s * scale;
            }
        }
    }
}

/// Activations of a forward pass, kept for backpropagation.
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    /// `activations[0]` is the input; the last entry is the output.
    pub activations: Vec<Vec<f64>>,
    /// Pre-activation sums per layer, aligned with `activations[1..]`.
    pub pre_activations: Vec<Vec<f64>>,
}

impl ForwardTrace {
    pub fn output(&self) -> &[f64] {
        self.activations.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Half squared error summed over outputs.
pub fn mse_loss(output: &[f64], target: &[f64]) -> f64 {
    output
        .iter()
        .zip(target)
        .map(|(a, y)| 0.5 * (a - y).powi(2))
        .sum()
}

impl Network {
    /// Xavier-uniform initialised network. `topology` includes input and
    /// output sizes, e.g. `[12, 16, 8, 3]`.
    pub fn new(topology: &[usize], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let layers = topology
            .windows(2)
            .map(|w| {
                let (inputs, outputs) = (w[0], w[1]);
                let limit = (6.0 / (inputs + outputs) as f64).sqrt();
                Layer {
                    inputs,
                    outputs,
                    weights: (0..inputs * outputs)
                        .map(|_| rng.gen_range(-limit..limit))
                        .collect(),
                    biases: vec![0.0; outputs],
                }
            })
            .collect();
        Network {
            layers,
            examples_seen: 0,
        }
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs)
    }

    pub fn topology(&self) -> Vec<usize> {
        let mut t: Vec<usize> = self.layers.iter().map(|l| l.inputs).collect();
        if let Some(last) = self.layers.last() {
            t.push(last.outputs);
        }
        t
    }

    /// Forward pass keeping every layer's activations.
    pub fn forward_trace(&self, input: &[f64]) -> Result<ForwardTrace, ModelError> {
        if input.len() != self.input_size() {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_size(),
                actual: input.len(),
            });
        }
        let last = self.layers.len().saturating_sub(1);
        let mut activations = vec![input.to_vec()];
        let mut pre_activations = Vec::with_capacity(self.layers.len());

        for (idx, layer) in self.layers.iter().enumerate() {
            let prev = &activations[idx];
            let mut z = layer.biases.clone();
            for (i, a) in prev.iter().enumerate() {
                let row = &layer.weights[i * layer.outputs..(i + 1) * layer.outputs];
                for (zj, w) in z.iter_mut().zip(row) {
                    *zj += a * w;
                }
            }
            let act: Vec<f64> = if idx == last {
                z.iter().map(|&v| sigmoid(v)).collect()
            } else {
                z.iter().map(|&v| relu(v)).collect()
            };
            pre_activations.push(z);
            activations.push(act);
        }

        if activations.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok(ForwardTrace {
            activations,
            pre_activations,
        })
    }

    pub fn forward(&self, input: &[f64]) -> Result<Vec<f64>, ModelError> {
        let mut trace = self.forward_trace(input)?;
        Ok(trace.activations.pop().unwrap_or_default())
    }

    /// Chain-rule gradients of the loss for a single example, plus its loss.
    pub fn gradients(&self, example: &TrainingExample) -> Result<(Gradients, f64), ModelError> {
        let trace = self.forward_trace(&example.features)?;
        let loss = mse_loss(trace.output(), &example.target);
        let mut grads = Gradients::zeros_like(self);

        // Output delta: (a - y) * σ'(z), with σ'(z) = a (1 - a).
        let mut delta: Vec<f64> = trace
            .output()
            .iter()
            .zip(&example.target)
            .map(|(a, y)| (a - y) * a * (1.0 - a))
            .collect();

        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            let input = &trace.activations[idx];
            for (i, a) in input.iter().enumerate() {
                for (j, d) in delta.iter().enumerate() {
                    grads.weights[idx][i * layer.outputs + j] = a * d;
                }
            }
            grads.biases[idx].copy_from_slice(&delta);

            if idx > 0 {
                let z_prev = &trace.pre_activations[idx - 1];
                delta = (0..layer.inputs)
                    .map(|i| {
                        let row = &layer.weights[i * layer.outputs..(i + 1) * layer.outputs];
                        let back: f64 = row.iter().zip(&delta).map(|(w, d)| w * d).sum();
                        if z_prev[i] > 0.0 { back } else { 0.0 }
                    })
                    .collect();
            }
        }
        Ok((grads, loss))
    }

    /// Gradient-descent step.
    pub fn apply(&mut self, grads: &Gradients, learning_rate: f64) {
        for (layer, (gw, gb)) in self.layers.iter_mut().zip(grads.weights.iter().zip(&grads.biases)) {
            for (w, g) in layer.weights.iter_mut().zip(gw) {
                *w -= learning_rate * g;
            }
            for (b, g) in layer.biases.iter_mut().zip(gb) {
                *b -= learning_rate * g;
            }
        }
    }

    /// One backpropagation step over a whole batch using the mean gradient.
    /// Returns the mean loss before the update.
    pub fn train_batch(&mut self, batch: &[TrainingExample], learning_rate: f64) -> Result<f64, ModelError> {
        if batch.is_empty() {
            return Ok(0.0);
        }
        let per_example = batch
            .par_iter()
            .map(|ex| self.gradients(ex))
            .collect::<Result<Vec<_>, _>>()?;

        // Sequential merge keeps the update independent of thread scheduling.
        let scale = 1.0 / batch.len() as f64;
        let mut total = Gradients::zeros_like(self);
        let mut loss = 0.0;
        for (g, l) in &per_example {
            total.add_scaled(g, scale);
            loss += l * scale;
        }
        self.apply(&total, learning_rate);
        self.examples_seen += batch.len() as u64;
        Ok(loss)
    }
}
