//! Model contracts
//!
//! The selection, evaluation and bootstrap code only ever sees these two
//! traits. [`GradientBooster`](crate::booster::GradientBooster) implements
//! both.
use crate::data::{Matrix, RowMajorMatrix};
use crate::errors::PeatfluxError;

/// A model that can be fit to a training block and predict rows.
///
/// Templates are cloned before every fit, so a clone of an unfitted model
/// must be an independent unfitted model.
pub trait Regressor: Clone + Send + Sync {
    /// Fit the model, replacing anything learned before.
    fn fit(&mut self, data: &Matrix<f64>, y: &[f64]) -> Result<(), PeatfluxError>;
    /// Predict every row of `data`.
    fn predict(&self, data: &Matrix<f64>) -> Vec<f64>;
}

/// A fitted model that can attribute each prediction to its features.
pub trait Explainer {
    /// Prediction with no feature known.
    fn expected_value(&self) -> f64;
    /// One row per observation, one column per feature plus a last bias
    /// column. Each row sums to the prediction.
    fn explain(&self, data: &Matrix<f64>) -> RowMajorMatrix<f64>;
}
