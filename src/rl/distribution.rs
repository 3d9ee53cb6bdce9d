//! Parametric action distributions
//!
//! The policy network emits raw distribution parameters; a
//! [`ParametricDistribution`] turns them into sampled actions, log-probabilities
//! and entropies. Sampling happens in an unbounded "raw" space and
//! [`postprocess`](ParametricDistribution::postprocess) maps raw samples into
//! the environment's action space.

use std::f32::consts::{LN_2, PI};

use burn::tensor::{Tensor, TensorData, activation::softplus, backend::Backend};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Distribution over actions parameterized by network output
pub trait ParametricDistribution<B: Backend> {
    /// Width of the parameter vector the policy network must produce
    fn param_size(&self) -> usize;

    /// Most likely action, postprocessed
    fn mode(&self, params: Tensor<B, 2>) -> Tensor<B, 2>;

    /// Draw a raw (pre-postprocessing) action per row
    fn sample_no_postprocessing<R: Rng + ?Sized>(
        &self,
        params: Tensor<B, 2>,
        rng: &mut R,
    ) -> Tensor<B, 2>;

    /// Map raw samples into the action space
    fn postprocess(&self, raw_actions: Tensor<B, 2>) -> Tensor<B, 2>;

    /// Map actions back into raw space
    fn inverse_postprocess(&self, actions: Tensor<B, 2>) -> Tensor<B, 2>;

    /// Log-probability of raw actions, summed over the event: `[batch]`
    fn log_prob(&self, params: Tensor<B, 2>, raw_actions: Tensor<B, 2>) -> Tensor<B, 1>;

    /// Entropy per row, estimated with one sample for the squashing term: `[batch]`
    fn entropy<R: Rng + ?Sized>(&self, params: Tensor<B, 2>, rng: &mut R) -> Tensor<B, 1>;

    /// Sample and postprocess in one step
    fn sample<R: Rng + ?Sized>(&self, params: Tensor<B, 2>, rng: &mut R) -> Tensor<B, 2> {
        let raw = self.sample_no_postprocessing(params, rng);
        self.postprocess(raw)
    }
}

/// Diagonal Gaussian squashed through `tanh`, giving actions in `(-1, 1)`
///
/// Parameters are `[loc | scale_raw]`, with
/// `scale = (softplus(scale_raw) + min_std) * var_scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalTanhDistribution {
    pub event_size: usize,
    pub min_std: f32,
    pub var_scale: f32,
}

impl NormalTanhDistribution {
    pub fn new(event_size: usize) -> Self {
        Self {
            event_size,
            min_std: 0.001,
            var_scale: 1.0,
        }
    }

    pub fn with_min_std(mut self, min_std: f32) -> Self {
        self.min_std = min_std;
        self
    }

    pub fn with_var_scale(mut self, var_scale: f32) -> Self {
        self.var_scale = var_scale;
        self
    }

    /// Split parameters into `(loc, scale)`, each `[batch, event_size]`
    pub fn loc_scale<B: Backend>(&self, params: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, _] = params.dims();
        let e = self.event_size;

        let loc = params.clone().slice([0..batch, 0..e]);
        let scale_raw = params.slice([0..batch, e..2 * e]);
        let scale = softplus(scale_raw, 1.0)
            .add_scalar(self.min_std)
            .mul_scalar(self.var_scale);

        (loc, scale)
    }

    fn standard_normal<B: Backend, R: Rng + ?Sized>(
        shape: [usize; 2],
        rng: &mut R,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let noise: Vec<f32> = (0..shape[0] * shape[1])
            .map(|_| rng.sample(StandardNormal))
            .collect();
        Tensor::from_data(TensorData::new(noise, shape), device)
    }
}

/// `log |d tanh(x) / dx|`, written to stay finite for large `|x|`
fn tanh_log_det_jacobian<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let softplus_term = softplus(x.clone().mul_scalar(-2.0), 1.0);
    (x.neg().add_scalar(LN_2) - softplus_term).mul_scalar(2.0)
}

impl<B: Backend> ParametricDistribution<B> for NormalTanhDistribution {
    fn param_size(&self) -> usize {
        2 * self.event_size
    }

    fn mode(&self, params: Tensor<B, 2>) -> Tensor<B, 2> {
        let (loc, _) = self.loc_scale(params);
        loc.tanh()
    }

    fn sample_no_postprocessing<R: Rng + ?Sized>(
        &self,
        params: Tensor<B, 2>,
        rng: &mut R,
    ) -> Tensor<B, 2> {
        let device = params.device();
        let (loc, scale) = self.loc_scale(params);
        let noise = Self::standard_normal::<B, R>(loc.dims(), rng, &device);
        loc + scale * noise
    }

    fn postprocess(&self, raw_actions: Tensor<B, 2>) -> Tensor<B, 2> {
        raw_actions.tanh()
    }

    fn inverse_postprocess(&self, actions: Tensor<B, 2>) -> Tensor<B, 2> {
        let limit = 1.0 - 1e-6;
        let x = actions.clamp(-limit, limit);
        let ratio = x.clone().add_scalar(1.0) / x.neg().add_scalar(1.0);
        ratio.log().mul_scalar(0.5)
    }

    fn log_prob(&self, params: Tensor<B, 2>, raw_actions: Tensor<B, 2>) -> Tensor<B, 1> {
        let (loc, scale) = self.loc_scale(params);

        let z = (raw_actions.clone() - loc) / scale.clone();
        let normal_log_prob = z
            .powf_scalar(2.0)
            .mul_scalar(-0.5)
            .sub(scale.log())
            .sub_scalar(0.5 * (2.0 * PI).ln());

        (normal_log_prob - tanh_log_det_jacobian(raw_actions))
            .sum_dim(1)
            .squeeze(1)
    }

    fn entropy<R: Rng + ?Sized>(&self, params: Tensor<B, 2>, rng: &mut R) -> Tensor<B, 1> {
        let device = params.device();
        let (loc, scale) = self.loc_scale(params);

        let noise = Self::standard_normal::<B, R>(loc.dims(), rng, &device);
        let sample = loc + scale.clone() * noise;

        let normal_entropy = scale.log().add_scalar(0.5 + 0.5 * (2.0 * PI).ln());
        (normal_entropy + tanh_log_det_jacobian(sample))
            .sum_dim(1)
            .squeeze(1)
    }
}
