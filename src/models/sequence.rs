use super::{Deadline, ForecastModel, TrainedModel};
use crate::config::SequenceModelConfig;
use crate::error::{ForecastError, Result};
use crate::utils::all_finite;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::VecDeque;

const GRAD_CLIP: f64 = 1.0;

/// Elman recurrent network: scalar input, `tanh` hidden state, linear readout
/// from the final hidden state.
#[derive(Debug, Clone)]
struct RecurrentNet {
    w_xh: Vec<f64>,
    w_hh: Vec<Vec<f64>>,
    b_h: Vec<f64>,
    w_hy: Vec<f64>,
    b_y: f64,
}

struct Gradients {
    w_xh: Vec<f64>,
    w_hh: Vec<Vec<f64>>,
    b_h: Vec<f64>,
    w_hy: Vec<f64>,
    b_y: f64,
}

impl RecurrentNet {
    fn new(hidden: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let input_dist = Normal::new(0.0, 0.5)
            .map_err(|e| ForecastError::InvalidConfig(format!("weight init: {}", e)))?;
        let hidden_dist = Normal::new(0.0, 1.0 / (hidden as f64).sqrt())
            .map_err(|e| ForecastError::InvalidConfig(format!("weight init: {}", e)))?;

        let w_xh = (0..hidden).map(|_| input_dist.sample(&mut rng)).collect();
        let w_hh = (0..hidden)
            .map(|_| (0..hidden).map(|_| 0.5 * hidden_dist.sample(&mut rng)).collect())
            .collect();
        let w_hy = (0..hidden).map(|_| hidden_dist.sample(&mut rng)).collect();

        Ok(Self {
            w_xh,
            w_hh,
            b_h: vec![0.0; hidden],
            w_hy,
            b_y: 0.0,
        })
    }

    fn hidden(&self) -> usize {
        self.b_h.len()
    }

    /// Returns every hidden state (`states[0]` is the zero initial state) and the output.
    fn forward<'a, I>(&self, window: I) -> (Vec<Vec<f64>>, f64)
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let hidden = self.hidden();
        let mut states = vec![vec![0.0; hidden]];

        for &x in window {
            let prev = &states[states.len() - 1];
            let next: Vec<f64> = (0..hidden)
                .map(|i| {
                    let recurrent: f64 = self.w_hh[i].iter().zip(prev).map(|(w, h)| w * h).sum();
                    (self.w_xh[i] * x + recurrent + self.b_h[i]).tanh()
                })
                .collect();
            states.push(next);
        }

        let last = &states[states.len() - 1];
        let output = self.w_hy.iter().zip(last).map(|(w, h)| w * h).sum::<f64>() + self.b_y;
        (states, output)
    }

    fn predict<'a, I>(&self, window: I) -> f64
    where
        I: IntoIterator<Item = &'a f64>,
    {
        self.forward(window).1
    }

    /// One stochastic gradient step on squared error, back-propagated through time.
    fn train_step(&mut self, window: &[f64], target: f64, learning_rate: f64) {
        let hidden = self.hidden();
        let (states, output) = self.forward(window);
        let d_out = output - target;

        let mut grads = Gradients {
            w_xh: vec![0.0; hidden],
            w_hh: vec![vec![0.0; hidden]; hidden],
            b_h: vec![0.0; hidden],
            w_hy: states[window.len()].iter().map(|h| d_out * h).collect(),
            b_y: d_out,
        };

        let mut d_h: Vec<f64> = self.w_hy.iter().map(|w| d_out * w).collect();
        for t in (0..window.len()).rev() {
            let h_t = &states[t + 1];
            let h_prev = &states[t];
            let d_a: Vec<f64> = (0..hidden).map(|i| d_h[i] * (1.0 - h_t[i] * h_t[i])).collect();

            for i in 0..hidden {
                grads.w_xh[i] += d_a[i] * window[t];
                grads.b_h[i] += d_a[i];
                for j in 0..hidden {
                    grads.w_hh[i][j] += d_a[i] * h_prev[j];
                }
            }

            d_h = (0..hidden)
                .map(|j| (0..hidden).map(|i| self.w_hh[i][j] * d_a[i]).sum())
                .collect();
        }

        self.apply(&grads, learning_rate);
    }

    fn apply(&mut self, grads: &Gradients, learning_rate: f64) {
        let step = |g: f64| learning_rate * g.clamp(-GRAD_CLIP, GRAD_CLIP);
        let hidden = self.hidden();

        for i in 0..hidden {
            self.w_xh[i] -= step(grads.w_xh[i]);
            self.b_h[i] -= step(grads.b_h[i]);
            self.w_hy[i] -= step(grads.w_hy[i]);
            for j in 0..hidden {
                self.w_hh[i][j] -= step(grads.w_hh[i][j]);
            }
        }
        self.b_y -= step(grads.b_y);
    }

    fn is_finite(&self) -> bool {
        all_finite(&self.w_xh)
            && all_finite(&self.b_h)
            && all_finite(&self.w_hy)
            && self.b_y.is_finite()
            && self.w_hh.iter().all(|row| all_finite(row))
    }
}

/// Windowed recurrent predictor. Training pairs are every `window`-long run of
/// months followed by the month after it.
#[derive(Debug, Clone)]
pub struct SequenceModel {
    config: SequenceModelConfig,
}

impl SequenceModel {
    pub fn new(config: SequenceModelConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Clone)]
pub struct TrainedSequenceModel {
    net: RecurrentNet,
    scale: f64,
    seed_window: Vec<f64>,
}

impl ForecastModel for SequenceModel {
    type Trained = TrainedSequenceModel;

    fn train(&self, values: &[f64], deadline: &Deadline) -> Result<TrainedSequenceModel> {
        let window = self.config.window;
        if values.len() <= window {
            return Err(ForecastError::InsufficientData {
                needed: window + 1,
                got: values.len(),
            });
        }
        if !all_finite(values) {
            return Err(ForecastError::NumericInstability(
                "series contains non-finite values".to_string(),
            ));
        }
        deadline.check()?;

        let scale = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if scale == 0.0 {
            return Err(ForecastError::NumericInstability(
                "series has no magnitude to scale".to_string(),
            ));
        }
        let scaled: Vec<f64> = values.iter().map(|v| v / scale).collect();

        let pairs: Vec<(&[f64], f64)> = (0..scaled.len() - window)
            .map(|start| (&scaled[start..start + window], scaled[start + window]))
            .collect();

        let mut net = RecurrentNet::new(self.config.hidden_units, self.config.seed)?;
        for _ in 0..self.config.epochs {
            deadline.check()?;
            for (inputs, target) in &pairs {
                net.train_step(inputs, *target, self.config.learning_rate);
            }
        }

        if !net.is_finite() {
            return Err(ForecastError::NumericInstability(
                "recurrent weights diverged during training".to_string(),
            ));
        }

        Ok(TrainedSequenceModel {
            net,
            scale,
            seed_window: scaled[scaled.len() - window..].to_vec(),
        })
    }

    fn name(&self) -> &str {
        "sequence"
    }
}

impl TrainedModel for TrainedSequenceModel {
    /// Autoregressive rollout: each prediction becomes the newest input of the
    /// next step and the oldest input drops out.
    fn forecast(&self, horizon: usize, deadline: &Deadline) -> Result<Vec<f64>> {
        deadline.check()?;

        let mut window: VecDeque<f64> = self.seed_window.iter().copied().collect();
        let mut forecasts = Vec::with_capacity(horizon);

        for _ in 0..horizon {
            let next = self.net.predict(window.iter());
            if !next.is_finite() {
                return Err(ForecastError::NumericInstability(
                    "recurrent rollout produced a non-finite value".to_string(),
                ));
            }
            forecasts.push(next * self.scale);
            window.pop_front();
            window.push_back(next);
        }

        Ok(forecasts)
    }
}
