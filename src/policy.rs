use anyhow::{Context, Result, ensure};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::EXTRA_FEATURES;
use crate::env::Action;
use crate::observation::ObservationEncoder;

// =============================================================================
// Policy Hyperparameters
// =============================================================================

pub struct PolicyConfig {
    pub hidden_size: usize,
    pub conv1_channels: usize,
    pub conv_channels: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hidden_size: 128,
            conv1_channels: 32,
            conv_channels: 64,
        }
    }
}

/// (kernel, stride) per conv layer.
const CONV_LAYERS: [(usize, usize); 3] = [(8, 4), (4, 2), (3, 1)];

fn conv_out(n: usize, kernel: usize, stride: usize) -> usize {
    (n - kernel) / stride + 1
}

/// Spatial size after the conv stack, or `None` when the screen is smaller
/// than a kernel.
pub fn conv_output_dims(height: usize, width: usize) -> Option<(usize, usize)> {
    CONV_LAYERS
        .iter()
        .try_fold((height, width), |(h, w), &(k, s)| {
            (h >= k && w >= k).then(|| (conv_out(h, k, s), conv_out(w, k, s)))
        })
}

// =============================================================================
// Actor-Critic Network (candle)
// =============================================================================

/// Screen grid through three conv layers; coordinates through a one-unit
/// embedding; badges and party size scaled. Shared hidden layer feeds the
/// action logits and the value head.
pub struct ActorCritic {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    coord_emb: Linear,
    fc: Linear,
    actor: Linear,
    value: Linear,
    height: usize,
    width: usize,
}

impl ActorCritic {
    pub fn new(vs: VarBuilder, config: &PolicyConfig, height: usize, width: usize) -> Result<Self> {
        let Some((out_h, out_w)) = conv_output_dims(height, width) else {
            anyhow::bail!("screen {width}x{height} is too small for the conv stack");
        };
        let c1 = config.conv1_channels;
        let c = config.conv_channels;
        let conv = |stride| Conv2dConfig {
            stride,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(1, c1, CONV_LAYERS[0].0, conv(CONV_LAYERS[0].1), vs.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(c1, c, CONV_LAYERS[1].0, conv(CONV_LAYERS[1].1), vs.pp("conv2"))?;
        let conv3 = candle_nn::conv2d(c, c, CONV_LAYERS[2].0, conv(CONV_LAYERS[2].1), vs.pp("conv3"))?;

        let cnn_out = c * out_h * out_w;
        let coord_emb = candle_nn::linear(3, 1, vs.pp("coord_emb"))?;
        let fc = candle_nn::linear(cnn_out + 3, config.hidden_size, vs.pp("fc"))?;
        let actor = candle_nn::linear(config.hidden_size, Action::COUNT, vs.pp("actor"))?;
        let value = candle_nn::linear(config.hidden_size, 1, vs.pp("value"))?;

        Ok(Self {
            conv1,
            conv2,
            conv3,
            coord_emb,
            fc,
            actor,
            value,
            height,
            width,
        })
    }

    pub fn obs_len(&self) -> usize {
        self.height * self.width + EXTRA_FEATURES
    }

    /// `obs` is `(batch, obs_len)`; returns `(logits, value)` shaped
    /// `(batch, Action::COUNT)` and `(batch, 1)`.
    pub fn forward(&self, obs: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let (batch, _) = obs.dims2()?;
        let screen_len = self.height * self.width;

        let screen = obs
            .narrow(1, 0, screen_len)?
            .contiguous()?
            .reshape((batch, 1, self.height, self.width))?;
        let screen = (screen / 255.0)?;
        let h = self.conv1.forward(&screen)?.relu()?;
        let h = self.conv2.forward(&h)?.relu()?;
        let h = self.conv3.forward(&h)?.relu()?.flatten_from(1)?;

        let coords = obs.narrow(1, screen_len, 3)?.contiguous()?;
        let coords = self.coord_emb.forward(&coords)?.relu()?;
        let badges = (obs.narrow(1, screen_len + 3, 1)?.contiguous()? / 8.0)?;
        let party = (obs.narrow(1, screen_len + 4, 1)?.contiguous()? / 6.0)?;

        let x = Tensor::cat(&[&h, &coords, &badges, &party], 1)?;
        let hidden = self.fc.forward(&x)?.gelu_erf()?;
        Ok((self.actor.forward(&hidden)?, self.value.forward(&hidden)?))
    }
}

// =============================================================================
// Policy
// =============================================================================

pub struct Policy {
    varmap: VarMap,
    net: ActorCritic,
    device: Device,
    rng: SmallRng,
}

impl Policy {
    pub fn new(device: &Device, config: &PolicyConfig, encoder: &ObservationEncoder) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = ActorCritic::new(vb, config, encoder.scaled_height(), encoder.scaled_width())?;
        Ok(Self {
            varmap,
            net,
            device: device.clone(),
            rng: SmallRng::from_os_rng(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .load(path)
            .with_context(|| format!("Failed to load policy weights: {}", path.display()))?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .save(path)
            .with_context(|| format!("Failed to save policy weights: {}", path.display()))?;
        Ok(())
    }

    pub fn network(&self) -> &ActorCritic {
        &self.net
    }

    /// Action logits and value estimate for one observation.
    pub fn evaluate(&self, obs: &[f32]) -> Result<(Vec<f32>, f32)> {
        ensure!(
            obs.len() == self.net.obs_len(),
            "observation has {} values, policy expects {}",
            obs.len(),
            self.net.obs_len()
        );
        let x = Tensor::from_slice(obs, (1, obs.len()), &self.device)?;
        let (logits, value) = self.net.forward(&x)?;
        let logits = logits.squeeze(0)?.to_vec1::<f32>()?;
        let value = value.squeeze(0)?.squeeze(0)?.to_scalar::<f32>()?;
        Ok((logits, value))
    }

    /// Argmax when `greedy`, otherwise a draw from the softmax.
    pub fn act(&mut self, obs: &[f32], greedy: bool) -> Result<usize> {
        let (logits, _) = self.evaluate(obs)?;
        if greedy {
            return Ok(argmax(&logits));
        }
        Ok(sample_softmax(&logits, self.rng.random::<f32>()))
    }

    /// `obs` is env-major, `n * obs_len` values.
    pub fn act_batch(&mut self, obs: &[f32], greedy: bool) -> Result<Vec<usize>> {
        let obs_len = self.net.obs_len();
        ensure!(
            obs_len > 0 && obs.len() % obs_len == 0,
            "batch of {} values is not a multiple of {obs_len}",
            obs.len()
        );
        let n = obs.len() / obs_len;
        let x = Tensor::from_slice(obs, (n, obs_len), &self.device)?;
        let (logits, _) = self.net.forward(&x)?;
        let rows = logits.to_vec2::<f32>()?;
        let actions = rows
            .iter()
            .map(|row| {
                if greedy {
                    argmax(row)
                } else {
                    sample_softmax(row, self.rng.random::<f32>())
                }
            })
            .collect();
        Ok(actions)
    }
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Inverse-CDF draw with `u` in `[0, 1)`.
fn sample_softmax(logits: &[f32], u: f32) -> usize {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let weights: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let total: f32 = weights.iter().sum();
    let mut target = u * total;
    for (i, w) in weights.iter().enumerate() {
        if target < *w {
            return i;
        }
        target -= w;
    }
    weights.len().saturating_sub(1)
}
