//! Inner cross validation over a training partition.
use crate::data::{Dataset, TrainSet};
use crate::errors::PeatfluxError;
use crate::metric::{metric_callables, Metric};
use crate::regressor::Regressor;
use rayon::prelude::*;

/// Contiguous, unshuffled k-fold split. The first `n % k` folds get one
/// extra row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    pub n_splits: usize,
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        KFold { n_splits }
    }

    /// `(train, test)` row indices of every fold, in fold order.
    pub fn split(&self, n_rows: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>, PeatfluxError> {
        if self.n_splits < 2 || n_rows < self.n_splits {
            return Err(PeatfluxError::InvalidParameter(
                "cv folds".to_string(),
                format!("between 2 and the {} training rows", n_rows),
                self.n_splits.to_string(),
            ));
        }
        let base = n_rows / self.n_splits;
        let extra = n_rows % self.n_splits;
        let mut start = 0;
        let mut splits = Vec::with_capacity(self.n_splits);
        for f in 0..self.n_splits {
            let size = base + usize::from(f < extra);
            let test: Vec<usize> = (start..start + size).collect();
            let train: Vec<usize> = (0..start).chain(start + size..n_rows).collect();
            splits.push((train, test));
            start += size;
        }
        Ok(splits)
    }
}

/// Score of every fold. The model is fit on the already scaled training
/// rows of each fold, nothing is re-scaled per fold.
pub fn cross_val_scores<R: Regressor>(
    template: &R,
    data: &Dataset,
    kfold: KFold,
    metric: Metric,
) -> Result<Vec<f64>, PeatfluxError> {
    let (metric_fn, _) = metric_callables(&metric);
    kfold
        .split(data.rows)?
        .into_par_iter()
        .map(|(train, test)| {
            let train_ds = data.select_rows(&train);
            let test_ds = data.select_rows(&test);
            let mut model = template.clone();
            model.fit(&train_ds.matrix(), &train_ds.y)?;
            let preds = model.predict(&test_ds.matrix());
            let score = metric_fn(&test_ds.y, &preds);
            if score.is_finite() {
                Ok(score)
            } else {
                Err(PeatfluxError::NonFiniteScore(format!("{:?}", metric)))
            }
        })
        .collect()
}

/// Mean cross validated score over a training partition.
pub fn cross_val_score<R: Regressor>(
    template: &R,
    train: &TrainSet,
    kfold: KFold,
    metric: Metric,
) -> Result<f64, PeatfluxError> {
    let scores = cross_val_scores(template, train.dataset(), kfold, metric)?;
    Ok(scores.iter().sum::<f64>() / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regressor::tests::{ConstantRegressor, MeanRegressor};

    #[test]
    fn test_kfold_sizes() {
        let splits = KFold::new(3).split(10).unwrap();
        let sizes: Vec<usize> = splits.iter().map(|(_, t)| t.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(splits[1].1, vec![4, 5, 6]);
        assert_eq!(splits[1].0, vec![0, 1, 2, 3, 7, 8, 9]);
        assert!(KFold::new(5).split(4).is_err());
        assert!(KFold::new(1).split(4).is_err());
    }

    #[test]
    fn test_cross_val_score() {
        let y: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ds = Dataset::new(y.clone(), y, vec!["x".to_string()]);
        let train = TrainSet::from_dataset(ds);
        let score = cross_val_score(&ConstantRegressor(100.0), &train, KFold::new(4), Metric::MeanSquaredError).unwrap();
        assert!(score > 0.0);
        // Every fold holds a contiguous block, so predicting the mean of the
        // other blocks gives a negative R2.
        let r2 = cross_val_score(&MeanRegressor::default(), &train, KFold::new(4), Metric::R2).unwrap();
        assert!(r2 < 0.0);
    }
}
