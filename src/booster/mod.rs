//! Booster
//!
//! Histogram based gradient boosted regression trees under squared error,
//! with per tree row subsampling and exact TreeSHAP contributions.
pub mod binning;
pub mod config;
pub mod sampler;
pub mod shapley;
pub mod tree;

use crate::booster::binning::bin_matrix;
use crate::booster::config::{BoosterConfig, ImportanceMethod};
use crate::booster::sampler::{RandomSampler, Sampler};
use crate::booster::shapley::predict_contributions_row_shapley;
use crate::booster::tree::Tree;
use crate::config::ConfigIO;
use crate::data::{Matrix, RowMajorMatrix};
use crate::errors::PeatfluxError;
use crate::regressor::{Explainer, Regressor};
use crate::utils::{mean, total_cmp};
use hashbrown::HashMap;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

type ImportanceFn = fn(&Tree, &mut HashMap<usize, (f64, usize)>);

/// Gradient boosted regressor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradientBooster {
    pub cfg: BoosterConfig,
    pub base_score: f64,
    pub n_features: usize,
    pub trees: Vec<Tree>,
}

impl Default for GradientBooster {
    fn default() -> Self {
        GradientBooster {
            cfg: BoosterConfig::default(),
            base_score: f64::NAN,
            n_features: 0,
            trees: Vec::new(),
        }
    }
}

impl GradientBooster {
    /// Create an unfitted booster, validating its configuration.
    pub fn new(cfg: BoosterConfig) -> Result<Self, PeatfluxError> {
        cfg.validate()?;
        Ok(GradientBooster {
            cfg,
            ..Default::default()
        })
    }

    /// Fit the booster, replacing any trees from an earlier fit.
    ///
    /// * `data` - Column major feature matrix.
    /// * `y` - Target, one value per row of `data`.
    pub fn fit(&mut self, data: &Matrix<f64>, y: &[f64]) -> Result<(), PeatfluxError> {
        if data.rows == 0 || y.is_empty() {
            return Err(PeatfluxError::EmptyPartition("training".to_string()));
        }
        if y.len() != data.rows {
            return Err(PeatfluxError::InvalidParameter(
                "y".to_string(),
                format!("{} values", data.rows),
                y.len().to_string(),
            ));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(PeatfluxError::NonFiniteScore("training target".to_string()));
        }
        let start = Instant::now();
        let binned = bin_matrix(data, self.cfg.max_bin)?;
        let hp = self.cfg.hyperparameters;

        self.base_score = mean(y);
        self.n_features = data.cols;
        self.trees = Vec::with_capacity(hp.n_estimators);
        let mut yhat = vec![self.base_score; data.rows];
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let mut sampler = RandomSampler::new(hp.subsample);
        let index: Vec<usize> = (0..data.rows).collect();

        for i in 0..hp.n_estimators {
            let grad: Vec<f64> = yhat.iter().zip(y.iter()).map(|(p, t)| p - t).collect();
            let chosen = if hp.subsample < 1.0 {
                sampler.sample(&mut rng, &index).0
            } else {
                index.clone()
            };
            let tree = Tree::fit(&binned, data.rows, chosen, &grad, &self.cfg);
            yhat.par_iter_mut()
                .enumerate()
                .for_each(|(r, p)| *p += tree.predict_with(|f| *data.get(r, f)));

            if self.cfg.log_iterations > 0 && i % self.cfg.log_iterations == 0 {
                let loss = yhat.iter().zip(y.iter()).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / y.len() as f64;
                info!(
                    "round {:0?}, tree.nodes: {:1?}, tree.depth: {:2?}, loss: {:3?}",
                    i,
                    tree.nodes.len(),
                    tree.depth,
                    loss,
                );
            }
            self.trees.push(tree);
        }

        if self.cfg.log_iterations > 0 {
            info!(
                "Finished training a booster with {0} trees in {1} seconds.",
                self.trees.len(),
                start.elapsed().as_secs()
            );
        }
        Ok(())
    }

    fn check_shape(&self, data: &Matrix<f64>) {
        assert_eq!(
            data.cols, self.n_features,
            "Booster was fit on {} features, but {} were provided.",
            self.n_features, data.cols
        );
    }

    /// Predict every row of `data`.
    pub fn predict(&self, data: &Matrix<f64>) -> Vec<f64> {
        self.check_shape(data);
        (0..data.rows)
            .into_par_iter()
            .map(|r| {
                self.trees
                    .iter()
                    .fold(self.base_score, |acc, t| acc + t.predict_with(|f| *data.get(r, f)))
            })
            .collect()
    }

    /// Prediction for a row where no feature is known.
    pub fn expected_value(&self) -> f64 {
        self.trees
            .iter()
            .fold(self.base_score, |acc, t| acc + t.get_average_leaf_weights(0))
    }

    /// Shapley contributions of every feature for every row, plus a last
    /// bias column holding the expected value. Each row sums to the
    /// prediction.
    pub fn predict_contributions(&self, data: &Matrix<f64>) -> RowMajorMatrix<f64> {
        self.check_shape(data);
        let cols = data.cols + 1;
        let mut contribs = vec![0.0; data.rows * cols];
        contribs.par_chunks_mut(cols).enumerate().for_each(|(r, c)| {
            let row = data.get_row(r);
            c[cols - 1] = self.base_score;
            for tree in self.trees.iter() {
                predict_contributions_row_shapley(tree, &row, c);
            }
        });
        RowMajorMatrix::new(contribs, data.rows, cols)
    }

    /// Feature importance, one value per feature in column order. Features
    /// never used in a split get 0.
    ///
    /// * `method` - Importance method to use.
    /// * `normalize` - Divide by the sum so the values add to 1.
    pub fn calculate_feature_importance(&self, method: ImportanceMethod, normalize: bool) -> Vec<f64> {
        let (average, importance_fn): (bool, ImportanceFn) = match method {
            ImportanceMethod::Weight => (false, Tree::calculate_importance_weight),
            ImportanceMethod::Gain => (true, Tree::calculate_importance_gain),
            ImportanceMethod::TotalGain => (false, Tree::calculate_importance_gain),
            ImportanceMethod::Cover => (true, Tree::calculate_importance_cover),
            ImportanceMethod::TotalCover => (false, Tree::calculate_importance_cover),
        };
        let mut stats = HashMap::new();
        for tree in self.trees.iter() {
            importance_fn(tree, &mut stats)
        }
        let mut importance = vec![0.0; self.n_features];
        for (k, (v, c)) in stats.iter() {
            importance[*k] = if average { v / (*c as f64) } else { *v };
        }
        if normalize {
            // Sum in sorted order so the total does not depend on map order.
            let mut values = importance.clone();
            values.sort_by(total_cmp);
            let total: f64 = values.iter().sum();
            if total > 0.0 {
                importance.iter_mut().for_each(|v| *v /= total);
            }
        }
        importance
    }
}

impl ConfigIO for GradientBooster {}

impl Regressor for GradientBooster {
    fn fit(&mut self, data: &Matrix<f64>, y: &[f64]) -> Result<(), PeatfluxError> {
        GradientBooster::fit(self, data, y)
    }

    fn predict(&self, data: &Matrix<f64>) -> Vec<f64> {
        GradientBooster::predict(self, data)
    }
}

impl Explainer for GradientBooster {
    fn expected_value(&self) -> f64 {
        GradientBooster::expected_value(self)
    }

    fn explain(&self, data: &Matrix<f64>) -> RowMajorMatrix<f64> {
        self.predict_contributions(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::config::Hyperparameters;
    use rand::Rng;

    fn synthetic(rows: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x0: Vec<f64> = (0..rows).map(|_| rng.gen_range(0.0..10.0)).collect();
        let x1: Vec<f64> = (0..rows).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let y = x0.iter().zip(x1.iter()).map(|(a, b)| 3.0 * a + b * b).collect();
        (x0.into_iter().chain(x1).collect(), y)
    }

    fn small_cfg(subsample: f64) -> BoosterConfig {
        BoosterConfig::from(Hyperparameters::new(0.3, 4, 60, subsample)).with_seed(11)
    }

    #[test]
    fn test_booster_fit_reduces_error() {
        let (data_vec, y) = synthetic(300, 0);
        let data = Matrix::new(&data_vec, 300, 2);
        let mut booster = GradientBooster::new(small_cfg(1.0)).unwrap();
        booster.fit(&data, &y).unwrap();
        assert_eq!(booster.trees.len(), 60);
        let preds = booster.predict(&data);
        let mse: f64 = preds.iter().zip(y.iter()).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / 300.0;
        let var = crate::utils::variance(&y);
        assert!(mse < 0.05 * var);
    }

    #[test]
    fn test_booster_deterministic_with_subsample() {
        let (data_vec, y) = synthetic(200, 1);
        let data = Matrix::new(&data_vec, 200, 2);
        let mut a = GradientBooster::new(small_cfg(0.6)).unwrap();
        let mut b = GradientBooster::new(small_cfg(0.6)).unwrap();
        a.fit(&data, &y).unwrap();
        b.fit(&data, &y).unwrap();
        assert_eq!(a.predict(&data), b.predict(&data));
    }

    #[test]
    fn test_contributions_add_up() {
        let (data_vec, y) = synthetic(150, 2);
        let data = Matrix::new(&data_vec, 150, 2);
        let mut booster = GradientBooster::new(small_cfg(0.8)).unwrap();
        booster.fit(&data, &y).unwrap();
        let preds = booster.predict(&data);
        let contribs = booster.predict_contributions(&data);
        for r in 0..150 {
            let row = contribs.get_row(r);
            assert!((row.iter().sum::<f64>() - preds[r]).abs() < 1e-8);
            assert!((row[2] - booster.expected_value()).abs() < 1e-8);
        }
        let importance = booster.calculate_feature_importance(ImportanceMethod::TotalGain, true);
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(importance[0] > importance[1]);
    }

    #[test]
    fn test_booster_json_roundtrip() {
        let (data_vec, y) = synthetic(50, 3);
        let data = Matrix::new(&data_vec, 50, 2);
        let mut booster = GradientBooster::new(small_cfg(1.0)).unwrap();
        booster.fit(&data, &y).unwrap();
        let loaded = GradientBooster::from_json(&booster.json_dump().unwrap()).unwrap();
        assert_eq!(loaded.predict(&data), booster.predict(&data));
    }

    #[test]
    fn test_empty_fit_is_error() {
        let data = Matrix::new(&[], 0, 2);
        let mut booster = GradientBooster::new(small_cfg(1.0)).unwrap();
        assert!(matches!(booster.fit(&data, &[]), Err(PeatfluxError::EmptyPartition(_))));
    }
}
