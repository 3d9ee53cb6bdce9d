//! Global-norm gradient clipping
//!
//! burn's `GradientClippingConfig::Norm` clips each parameter tensor on its
//! own. PPO clips the concatenation of every gradient instead, so the
//! direction of the full update is preserved.

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    tensor::{ElementConversion, Tensor, backend::AutodiffBackend},
};

/// Sums the squared entries of every registered gradient
struct SquaredNorm<'a> {
    grads: &'a GradientsParams,
    total: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.total += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct Rescale<'a> {
    grads: &'a mut GradientsParams,
    scale: f32,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register(id, grad.mul_scalar(self.scale));
        }
    }
}

/// L2 norm over all of `module`'s gradients taken together
pub fn global_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &GradientsParams,
) -> f32 {
    let mut visitor = SquaredNorm { grads, total: 0.0 };
    module.visit(&mut visitor);
    visitor.total.sqrt() as f32
}

/// Scale every gradient by `max_norm / max(norm, max_norm)`
///
/// Returns the clipped gradients and the norm measured before clipping.
pub fn clip_by_global_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    mut grads: GradientsParams,
    max_norm: f32,
) -> (GradientsParams, f32) {
    let norm = global_norm::<B, M>(module, &grads);
    if norm > max_norm {
        let mut visitor = Rescale {
            grads: &mut grads,
            scale: max_norm / norm,
        };
        module.visit(&mut visitor);
    }
    (grads, norm)
}
