use crate::data::{Dataset, TestSet, TrainSet};
use crate::errors::PeatfluxError;
use crate::utils::mean;
use serde::{Deserialize, Serialize};

/// Standardisation to zero mean and unit variance, fitted on a training
/// partition only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    /// Population standard deviation of every column.
    pub scale: Vec<f64>,
    pub feature_names: Vec<String>,
}

impl StandardScaler {
    /// Fit on a training partition. A column without variance is an error.
    pub fn fit(train: &TrainSet) -> Result<Self, PeatfluxError> {
        let ds = train.dataset();
        if ds.is_empty() {
            return Err(PeatfluxError::EmptyPartition("training".to_string()));
        }
        let mut means = Vec::with_capacity(ds.cols);
        let mut scale = Vec::with_capacity(ds.cols);
        for (c, name) in ds.feature_names.iter().enumerate() {
            let col = ds.get_col(c);
            let m = mean(col);
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / col.len() as f64;
            if var <= 0.0 || !var.is_finite() {
                return Err(PeatfluxError::NoVariance(name.clone()));
            }
            means.push(m);
            scale.push(var.sqrt());
        }
        Ok(StandardScaler {
            mean: means,
            scale,
            feature_names: ds.feature_names.clone(),
        })
    }

    /// Standardise any block with the same columns, using the fitted
    /// statistics.
    pub fn transform(&self, ds: &Dataset) -> Result<Dataset, PeatfluxError> {
        if ds.feature_names != self.feature_names {
            return Err(PeatfluxError::InvalidParameter(
                "scaler columns".to_string(),
                self.feature_names.join(";"),
                ds.feature_names.join(";"),
            ));
        }
        let mut data = Vec::with_capacity(ds.data.len());
        for c in 0..ds.cols {
            let (m, s) = (self.mean[c], self.scale[c]);
            data.extend(ds.get_col(c).iter().map(|v| (v - m) / s));
        }
        Ok(Dataset::new(data, ds.y.clone(), ds.feature_names.clone()))
    }

    pub fn transform_train(&self, train: &TrainSet) -> Result<TrainSet, PeatfluxError> {
        Ok(TrainSet::from_dataset(self.transform(train.dataset())?))
    }

    pub fn transform_test(&self, test: &TestSet) -> Result<TestSet, PeatfluxError> {
        Ok(TestSet::from_dataset(self.transform(test.dataset())?))
    }

    /// Fit on a training partition and return it transformed.
    pub fn fit_transform(train: &TrainSet) -> Result<(Self, TrainSet), PeatfluxError> {
        let scaler = Self::fit(train)?;
        let scaled = scaler.transform_train(train)?;
        Ok((scaler, scaled))
    }
}
