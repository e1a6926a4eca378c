//! Evaluator
//!
//! Held-out scores of a model, plus the resampling decomposition of its
//! squared error into bias and variance.
use crate::booster::sampler::{BootstrapSampler, Sampler};
use crate::data::{TestSet, TrainSet};
use crate::errors::PeatfluxError;
use crate::metric::{explained_variance_score, r2_score};
use crate::regressor::Regressor;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Scores of one (model, subset, test fold) triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Number of features in the subset.
    pub k: usize,
    /// Zero based test fold.
    pub test_fold: usize,
    pub mse: f64,
    /// Squared bias.
    pub bias: f64,
    pub variance: f64,
    pub r2: f64,
    pub explained_variance: f64,
}

/// Expected squared error over resampled training sets, split into squared
/// bias and variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasVariance {
    pub mse: f64,
    pub bias: f64,
    pub variance: f64,
}

impl BiasVariance {
    /// * `predictions` - One vector of test predictions per round.
    /// * `y` - Observed test values.
    pub fn decompose(predictions: &[Vec<f64>], y: &[f64]) -> Self {
        let rounds = predictions.len() as f64;
        let n = y.len() as f64;
        let mut mse = 0.0;
        let mut bias = 0.0;
        let mut variance = 0.0;
        for (j, t) in y.iter().enumerate() {
            let main = predictions.iter().map(|p| p[j]).sum::<f64>() / rounds;
            bias += (main - t).powi(2);
            for p in predictions {
                mse += (p[j] - t).powi(2);
                variance += (p[j] - main).powi(2);
            }
        }
        BiasVariance {
            mse: mse / (rounds * n),
            bias: bias / n,
            variance: variance / (rounds * n),
        }
    }
}

/// Scores fitted models against a held-out partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluator {
    /// Bootstrap rounds of the decomposition.
    pub rounds: usize,
    /// Round `r` resamples with seed `seed + r`.
    pub seed: u64,
}

impl Evaluator {
    pub fn new(rounds: usize, seed: u64) -> Self {
        Evaluator { rounds, seed }
    }

    /// Refit on `rounds` bootstrap resamples of the training rows and decompose
    /// the error of the test predictions.
    pub fn bias_variance<R: Regressor>(
        &self,
        template: &R,
        train: &TrainSet,
        test: &TestSet,
    ) -> Result<BiasVariance, PeatfluxError> {
        if train.rows() == 0 {
            return Err(PeatfluxError::EmptyPartition("training".to_string()));
        }
        if test.rows() == 0 {
            return Err(PeatfluxError::EmptyPartition("test".to_string()));
        }
        let index: Vec<usize> = (0..train.rows()).collect();
        let test_ds = test.dataset();
        let predictions = (0..self.rounds)
            .into_par_iter()
            .map(|r| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(r as u64));
                let (rows, _) = BootstrapSampler.sample(&mut rng, &index);
                let boot = train.select_rows(&rows);
                let mut model = template.clone();
                model.fit(&boot.dataset().matrix(), &boot.dataset().y)?;
                let preds = model.predict(&test_ds.matrix());
                debug!("Finished bias/variance round {}.", r);
                if preds.iter().all(|p| p.is_finite()) {
                    Ok(preds)
                } else {
                    Err(PeatfluxError::NonFiniteScore(format!("prediction in bias/variance round {}", r)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BiasVariance::decompose(&predictions, &test_ds.y))
    }

    /// Fit once on the whole training partition for R² and explained
    /// variance, then run the decomposition. Both sets must already be
    /// scaled. Returns the record and the single fit's test predictions.
    pub fn evaluate<R: Regressor>(
        &self,
        template: &R,
        train: &TrainSet,
        test: &TestSet,
        test_fold: usize,
    ) -> Result<(MetricsRecord, Vec<f64>), PeatfluxError> {
        let mut model = template.clone();
        let train_ds = train.dataset();
        model.fit(&train_ds.matrix(), &train_ds.y)?;
        let test_ds = test.dataset();
        let preds = model.predict(&test_ds.matrix());
        let r2 = r2_score(&test_ds.y, &preds);
        let explained_variance = explained_variance_score(&test_ds.y, &preds);
        if !r2.is_finite() || !explained_variance.is_finite() {
            return Err(PeatfluxError::NonFiniteScore("test score".to_string()));
        }
        let bv = self.bias_variance(template, train, test)?;
        let record = MetricsRecord {
            k: train_ds.cols,
            test_fold,
            mse: bv.mse,
            bias: bv.bias,
            variance: bv.variance,
            r2,
            explained_variance,
        };
        Ok((record, preds))
    }
}
