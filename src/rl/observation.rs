//! Named observation tensors
//!
//! An observation is a set of image streams keyed `pixels/<name>` (each
//! `[batch, height, width, channels]`) plus an optional flat `state` tensor
//! (`[batch, state_dim]`).
//!
//! [`Observation`] has no in-place mutation: every transformation consumes the
//! value and returns a new one, so a tensor handed to a network can never be
//! swapped out underneath a gradient computation.

use std::collections::BTreeMap;

use burn::tensor::{
    Distribution, Int, Tensor,
    backend::{AutodiffBackend, Backend},
};
use serde::{Deserialize, Serialize};

use crate::error::ObservationError;

/// Key prefix that marks an image stream
pub const PIXELS_PREFIX: &str = "pixels/";

/// Key of the flat state vector
pub const STATE_KEY: &str = "state";

/// Batched observation fed to the policy and value networks
#[derive(Debug, Clone)]
pub struct Observation<B: Backend> {
    pixels: BTreeMap<String, Tensor<B, 4>>,
    state: Option<Tensor<B, 2>>,
}

impl<B: Backend> Default for Observation<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Observation<B> {
    /// Create an empty observation
    pub fn new() -> Self {
        Self {
            pixels: BTreeMap::new(),
            state: None,
        }
    }

    /// Add (or replace) an image stream
    ///
    /// # Errors
    ///
    /// Returns [`ObservationError::InvalidPixelKey`] if `key` lacks the
    /// `pixels/` prefix.
    pub fn with_pixels(
        mut self,
        key: impl Into<String>,
        pixels: Tensor<B, 4>,
    ) -> Result<Self, ObservationError> {
        let key = key.into();
        if !is_pixel_key(&key) {
            return Err(ObservationError::InvalidPixelKey(key));
        }
        self.pixels.insert(key, pixels);
        Ok(self)
    }

    /// Add (or replace) the flat state tensor
    pub fn with_state(mut self, state: Tensor<B, 2>) -> Self {
        self.state = Some(state);
        self
    }

    /// Replace `state` with `f(state)` when present
    pub fn map_state(mut self, f: impl FnOnce(Tensor<B, 2>) -> Tensor<B, 2>) -> Self {
        self.state = self.state.map(f);
        self
    }

    /// Image streams in sorted key order
    pub fn pixels(&self) -> impl Iterator<Item = (&str, &Tensor<B, 4>)> {
        self.pixels.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn pixel(&self, key: &str) -> Option<&Tensor<B, 4>> {
        self.pixels.get(key)
    }

    pub fn pixel_keys(&self) -> Vec<String> {
        self.pixels.keys().cloned().collect()
    }

    pub fn state(&self) -> Option<&Tensor<B, 2>> {
        self.state.as_ref()
    }

    pub fn contains_state(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() && self.state.is_none()
    }

    /// Batch dimension shared by every entry
    ///
    /// # Errors
    ///
    /// Fails if the observation is empty or entries disagree on batch size.
    pub fn batch_size(&self) -> Result<usize, ObservationError> {
        let mut sizes = self
            .pixels
            .iter()
            .map(|(k, v)| (k.as_str(), v.dims()[0]))
            .chain(self.state.iter().map(|s| (STATE_KEY, s.dims()[0])));

        let (_, expected) = sizes.next().ok_or(ObservationError::Empty)?;
        for (key, actual) in sizes {
            if actual != expected {
                return Err(ObservationError::BatchMismatch {
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(expected)
    }

    /// Gather rows along the batch dimension
    pub fn select(self, indices: Tensor<B, 1, Int>) -> Self {
        let pixels = self
            .pixels
            .into_iter()
            .map(|(k, v)| (k, v.select(0, indices.clone())))
            .collect();
        let state = self.state.map(|s| s.select(0, indices));
        Self { pixels, state }
    }
}

impl<B: AutodiffBackend> Observation<B> {
    /// Lift an observation recorded on the inner backend
    pub fn from_inner(inner: Observation<B::InnerBackend>) -> Self {
        Self {
            pixels: inner
                .pixels
                .into_iter()
                .map(|(k, v)| (k, Tensor::from_inner(v)))
                .collect(),
            state: inner.state.map(Tensor::from_inner),
        }
    }
}

fn is_pixel_key(key: &str) -> bool {
    key.len() > PIXELS_PREFIX.len() && key.starts_with(PIXELS_PREFIX)
}

/// Per-sample shape of every observation entry (no batch dimension)
///
/// Pixel entries are `[height, width, channels]`, `state` is `[state_dim]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationSize(BTreeMap<String, Vec<usize>>);

impl ObservationSize {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pixels(mut self, key: impl Into<String>, shape: [usize; 3]) -> Self {
        self.0.insert(key.into(), shape.to_vec());
        self
    }

    pub fn with_state(mut self, state_dim: usize) -> Self {
        self.0.insert(STATE_KEY.to_string(), vec![state_dim]);
        self
    }

    /// Check every key and shape
    pub fn validate(&self) -> Result<(), ObservationError> {
        if self.0.is_empty() {
            return Err(ObservationError::Empty);
        }

        for (key, shape) in &self.0 {
            let expected = if key == STATE_KEY {
                "[state_dim]"
            } else if is_pixel_key(key) {
                "[height, width, channels]"
            } else {
                return Err(ObservationError::UnknownKey(key.clone()));
            };

            let rank_ok = if key == STATE_KEY {
                shape.len() == 1
            } else {
                shape.len() == 3
            };
            if !rank_ok || shape.iter().any(|&d| d == 0) {
                return Err(ObservationError::Shape {
                    key: key.clone(),
                    expected: expected.to_string(),
                    actual: shape.clone(),
                });
            }
        }

        Ok(())
    }

    /// Pixel keys in sorted order
    pub fn pixel_keys(&self) -> Vec<String> {
        self.0.keys().filter(|k| is_pixel_key(k)).cloned().collect()
    }

    pub fn pixel_shape(&self, key: &str) -> Option<[usize; 3]> {
        match self.0.get(key).map(Vec::as_slice) {
            Some(&[h, w, c]) if is_pixel_key(key) => Some([h, w, c]),
            _ => None,
        }
    }

    pub fn pixel_channels(&self, key: &str) -> Option<usize> {
        self.pixel_shape(key).map(|[_, _, c]| c)
    }

    pub fn state_size(&self) -> Option<usize> {
        match self.0.get(STATE_KEY).map(Vec::as_slice) {
            Some(&[d]) => Some(d),
            _ => None,
        }
    }

    /// All-zero observation used to trace shapes at init
    pub fn zeros<B: Backend>(&self, batch: usize, device: &B::Device) -> Observation<B> {
        self.build(
            |shape| Tensor::zeros(shape, device),
            |shape| Tensor::zeros(shape, device),
            batch,
        )
    }

    /// Observation filled with U(0, 1) noise
    pub fn random<B: Backend>(&self, batch: usize, device: &B::Device) -> Observation<B> {
        self.build(
            |shape| Tensor::random(shape, Distribution::Uniform(0.0, 1.0), device),
            |shape| Tensor::random(shape, Distribution::Uniform(0.0, 1.0), device),
            batch,
        )
    }

    fn build<B: Backend>(
        &self,
        make_pixels: impl Fn([usize; 4]) -> Tensor<B, 4>,
        make_state: impl Fn([usize; 2]) -> Tensor<B, 2>,
        batch: usize,
    ) -> Observation<B> {
        let pixels = self
            .pixel_keys()
            .into_iter()
            .filter_map(|key| {
                let [h, w, c] = self.pixel_shape(&key)?;
                Some((key, make_pixels([batch, h, w, c])))
            })
            .collect();
        let state = self.state_size().map(|d| make_state([batch, d]));
        Observation { pixels, state }
    }

    /// Check that an observation carries exactly these pixel streams with
    /// matching per-sample shapes
    pub fn check<B: Backend>(&self, observation: &Observation<B>) -> Result<(), ObservationError> {
        let expected = self.pixel_keys();
        let actual = observation.pixel_keys();
        if expected != actual {
            return Err(ObservationError::KeyMismatch { expected, actual });
        }

        for (key, tensor) in observation.pixels() {
            let [_, h, w, c] = tensor.dims();
            if self.pixel_shape(key) != Some([h, w, c]) {
                return Err(ObservationError::Shape {
                    key: key.to_string(),
                    expected: format!("{:?}", self.0.get(key)),
                    actual: vec![h, w, c],
                });
            }
        }

        match (self.state_size(), observation.state()) {
            (Some(d), Some(state)) if state.dims()[1] != d => Err(ObservationError::Shape {
                key: STATE_KEY.to_string(),
                expected: format!("[{d}]"),
                actual: vec![state.dims()[1]],
            }),
            (Some(_), None) => Err(ObservationError::KeyMismatch {
                expected: vec![STATE_KEY.to_string()],
                actual: Vec::new(),
            }),
            _ => Ok(()),
        }
    }
}
