use crate::data::{Dataset, RowMajorMatrix, TrainSet};
use crate::errors::PeatfluxError;
use crate::regressor::{Explainer, Regressor};
use crate::scaler::StandardScaler;

/// A scaler and a model fitted together on one training partition.
#[derive(Debug, Clone)]
pub struct FittedPipeline<R> {
    pub scaler: StandardScaler,
    pub model: R,
}

impl<R: Regressor> FittedPipeline<R> {
    /// Fit the scaler on `train`, then a clone of `template` on the scaled
    /// rows.
    pub fn fit(template: &R, train: &TrainSet) -> Result<Self, PeatfluxError> {
        let (scaler, scaled) = StandardScaler::fit_transform(train)?;
        let mut model = template.clone();
        let ds = scaled.dataset();
        model.fit(&ds.matrix(), &ds.y)?;
        Ok(FittedPipeline { scaler, model })
    }

    /// Scale and predict any block with the training columns.
    pub fn predict(&self, ds: &Dataset) -> Result<Vec<f64>, PeatfluxError> {
        let scaled = self.scaler.transform(ds)?;
        let preds = self.model.predict(&scaled.matrix());
        if preds.iter().any(|p| !p.is_finite()) {
            return Err(PeatfluxError::NonFiniteScore("prediction".to_string()));
        }
        Ok(preds)
    }
}

impl<R: Regressor + Explainer> FittedPipeline<R> {
    /// Shapley contributions in the scaled feature space, which is what the
    /// trees split on.
    pub fn explain(&self, ds: &Dataset) -> Result<RowMajorMatrix<f64>, PeatfluxError> {
        let scaled = self.scaler.transform(ds)?;
        Ok(self.model.explain(&scaled.matrix()))
    }
}
