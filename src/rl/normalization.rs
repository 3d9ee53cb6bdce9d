//! State preprocessing ("processor params")
//!
//! Networks run the `state` entry of an observation through a
//! [`StatePreprocessor`] before the encoder sees it. Pixels are never touched
//! here; images have their own per-channel normalization inside the encoder.

use burn::tensor::{Tensor, TensorData, backend::Backend};
use serde::{Deserialize, Serialize};

use crate::error::ObservationError;

const STD_MIN: f64 = 1e-6;
const STD_MAX: f64 = 1e6;

/// Transformation applied to the flat state before every forward pass
pub trait StatePreprocessor {
    /// `[batch, state_dim]` in, same shape out
    fn preprocess<B: Backend>(&self, state: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Passes the state through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl StatePreprocessor for Identity {
    fn preprocess<B: Backend>(&self, state: Tensor<B, 2>) -> Tensor<B, 2> {
        state
    }
}

/// Running mean / standard deviation of the state, updated batch by batch
///
/// Statistics live on the host in `f64`, so one instance serves every backend
/// and serializes straight into checkpoint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningStatistics {
    count: f64,
    mean: Vec<f64>,
    summed_variance: Vec<f64>,
    std: Vec<f64>,
    /// Clip normalized values to `[-max_abs_value, max_abs_value]`
    pub max_abs_value: Option<f32>,
}

impl RunningStatistics {
    /// Zero mean, unit std, no samples seen
    pub fn new(state_dim: usize) -> Self {
        Self {
            count: 0.0,
            mean: vec![0.0; state_dim],
            summed_variance: vec![0.0; state_dim],
            std: vec![1.0; state_dim],
            max_abs_value: None,
        }
    }

    pub fn with_max_abs_value(mut self, max_abs_value: Option<f32>) -> Self {
        self.max_abs_value = max_abs_value;
        self
    }

    pub fn state_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Fold a `[batch, state_dim]` tensor into the statistics
    ///
    /// Uses the pairwise (Chan et al.) combination of the old moments with
    /// the batch, so the result matches a single pass over all samples.
    pub fn update<B: Backend>(&mut self, batch: Tensor<B, 2>) -> Result<(), ObservationError> {
        let [rows, dim] = batch.dims();
        if dim != self.state_dim() {
            return Err(ObservationError::Shape {
                key: super::observation::STATE_KEY.to_string(),
                expected: format!("[{}]", self.state_dim()),
                actual: vec![dim],
            });
        }
        if rows == 0 {
            return Ok(());
        }

        let values: Vec<f64> = batch
            .into_data()
            .iter::<f32>()
            .map(f64::from)
            .collect();

        self.count += rows as f64;

        for j in 0..dim {
            let column = values.iter().skip(j).step_by(dim);

            let old_mean = self.mean[j];
            let diff_sum: f64 = column.clone().map(|x| x - old_mean).sum();
            let new_mean = old_mean + diff_sum / self.count;

            let cross: f64 = column.map(|x| (x - new_mean) * (x - old_mean)).sum();

            self.mean[j] = new_mean;
            self.summed_variance[j] += cross;
            self.std[j] = (self.summed_variance[j] / self.count)
                .max(0.0)
                .sqrt()
                .clamp(STD_MIN, STD_MAX);
        }

        Ok(())
    }

    fn row_tensor<B: Backend>(values: &[f64], device: &B::Device) -> Tensor<B, 2> {
        let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
        Tensor::from_data(TensorData::new(data, [1, values.len()]), device)
    }
}

impl StatePreprocessor for RunningStatistics {
    fn preprocess<B: Backend>(&self, state: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = state.device();
        let mean = Self::row_tensor::<B>(&self.mean, &device);
        let std = Self::row_tensor::<B>(&self.std, &device);

        let normalized = (state - mean) / std;
        match self.max_abs_value {
            Some(limit) => normalized.clamp(-limit, limit),
            None => normalized,
        }
    }
}

/// `None` behaves like [`Identity`]
impl<P: StatePreprocessor> StatePreprocessor for Option<P> {
    fn preprocess<B: Backend>(&self, state: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Some(inner) => inner.preprocess(state),
            None => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn tensor(rows: &[[f32; 2]]) -> Tensor<TestBackend, 2> {
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_data(
            TensorData::new(data, [rows.len(), 2]),
            &NdArrayDevice::default(),
        )
    }

    #[test]
    fn test_fresh_statistics_are_identity() {
        let stats = RunningStatistics::new(2);
        let out: Vec<f32> = stats
            .preprocess(tensor(&[[3.0, -4.0]]))
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(out, vec![3.0, -4.0]);
    }

    #[test]
    fn test_single_batch_moments() {
        let mut stats = RunningStatistics::new(2);
        stats
            .update(tensor(&[[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]]))
            .unwrap();

        assert_eq!(stats.count(), 3.0);
        assert!((stats.mean()[0] - 3.0).abs() < 1e-9);
        assert!((stats.mean()[1] - 10.0).abs() < 1e-9);
        // population std of [1, 3, 5]
        assert!((stats.std()[0] - (8.0f64 / 3.0).sqrt()).abs() < 1e-9);
        // constant column is clipped to the minimum std
        assert_eq!(stats.std()[1], STD_MIN);
    }

    #[test]
    fn test_incremental_matches_single_pass() {
        let rows = [[0.5, -2.0], [1.5, 4.0], [-3.0, 0.0], [2.0, 1.0], [7.0, -1.0]];

        let mut all_at_once = RunningStatistics::new(2);
        all_at_once.update(tensor(&rows)).unwrap();

        let mut incremental = RunningStatistics::new(2);
        incremental.update(tensor(&rows[..2])).unwrap();
        incremental.update(tensor(&rows[2..])).unwrap();

        for j in 0..2 {
            assert!((all_at_once.mean()[j] - incremental.mean()[j]).abs() < 1e-9);
            assert!((all_at_once.std()[j] - incremental.std()[j]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_normalized_output_is_standardized() {
        let rows = [[1.0, 100.0], [2.0, 200.0], [3.0, 300.0], [4.0, 400.0]];
        let mut stats = RunningStatistics::new(2);
        stats.update(tensor(&rows)).unwrap();

        let out = stats.preprocess(tensor(&rows));
        let mean: Vec<f32> = out.clone().mean_dim(0).into_data().to_vec().unwrap();
        let var: Vec<f32> = out.powf_scalar(2.0).mean_dim(0).into_data().to_vec().unwrap();

        for j in 0..2 {
            assert!(mean[j].abs() < 1e-5);
            assert!((var[j] - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_clipping() {
        let mut stats = RunningStatistics::new(2).with_max_abs_value(Some(1.0));
        stats.update(tensor(&[[0.0, 0.0], [2.0, 2.0]])).unwrap();

        let out: Vec<f32> = stats
            .preprocess(tensor(&[[100.0, -100.0]]))
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(out, vec![1.0, -1.0]);
    }

    #[test]
    fn test_update_rejects_wrong_width() {
        let mut stats = RunningStatistics::new(3);
        assert!(stats.update(tensor(&[[1.0, 2.0]])).is_err());
        assert_eq!(stats.count(), 0.0);
    }

    #[test]
    fn test_option_none_is_identity() {
        let none: Option<RunningStatistics> = None;
        let out: Vec<f32> = none
            .preprocess(tensor(&[[5.0, 6.0]]))
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(out, vec![5.0, 6.0]);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut stats = RunningStatistics::new(2);
        stats.update(tensor(&[[1.0, 2.0], [3.0, 5.0]])).unwrap();

        let json = serde_json::to_string(&stats).unwrap();
        let restored: RunningStatistics = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, stats);
    }
}
