//! Sequential backward floating selection
//!
//! Starting from the whole feature universe, repeatedly drop the feature
//! whose removal hurts the cross validated score least, and after every
//! removal try adding back features that were dropped earlier. The best
//! subset seen at every size is kept.
use crate::config::SbfsConfig;
use crate::cross_validation::{cross_val_score, KFold};
use crate::data::{TestSet, TrainSet};
use crate::errors::PeatfluxError;
use crate::evaluator::{Evaluator, MetricsRecord};
use crate::metric::{is_comparison_better, metric_callables, Metric};
use crate::regressor::Regressor;
use hashbrown::HashMap;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ascending indices into the feature universe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureSubset(Vec<usize>);

impl FeatureSubset {
    /// Every feature of a universe of `n`.
    pub fn full(n: usize) -> Self {
        FeatureSubset((0..n).collect())
    }

    pub fn from_indices(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        FeatureSubset(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, feature: usize) -> bool {
        self.0.binary_search(&feature).is_ok()
    }

    pub fn without(&self, feature: usize) -> Self {
        FeatureSubset(self.0.iter().copied().filter(|f| *f != feature).collect())
    }

    pub fn with(&self, feature: usize) -> Self {
        let mut v = self.0.clone();
        if let Err(pos) = v.binary_search(&feature) {
            v.insert(pos, feature);
        }
        FeatureSubset(v)
    }

    /// Feature names, in universe order.
    pub fn names(&self, universe: &[String]) -> Vec<String> {
        self.0.iter().map(|i| universe[*i].clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetScore {
    pub subset: FeatureSubset,
    /// Mean cross validated score.
    pub score: f64,
}

/// Best subset found at every subset size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionCurve {
    records: BTreeMap<usize, SubsetScore>,
}

impl SelectionCurve {
    pub fn get(&self, k: usize) -> Option<&SubsetScore> {
        self.records.get(&k)
    }

    /// Records from the largest subset down to the smallest.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SubsetScore)> {
        self.records.iter().rev().map(|(k, s)| (*k, s))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the record at the subset's size if the score is strictly
    /// better. Returns whether it was replaced.
    fn offer(&mut self, candidate: SubsetScore, maximize: bool) -> bool {
        let k = candidate.subset.len();
        match self.records.get(&k) {
            Some(current) if !is_comparison_better(current.score, candidate.score, maximize) => false,
            _ => {
                self.records.insert(k, candidate);
                true
            }
        }
    }
}

/// Sequential backward floating selection over a fixed universe.
pub struct SequentialFloatingSelector<'a, R> {
    template: &'a R,
    kfold: KFold,
    metric: Metric,
    floor: usize,
    floating: bool,
}

impl<'a, R: Regressor> SequentialFloatingSelector<'a, R> {
    pub fn new(template: &'a R, cfg: &SbfsConfig) -> Self {
        SequentialFloatingSelector {
            template,
            kfold: KFold::new(cfg.cv_folds),
            metric: cfg.metric,
            floor: cfg.floor,
            floating: cfg.floating,
        }
    }

    /// Score the candidates in order, reusing earlier scores of the same
    /// subset, and return the index of the first best one.
    fn best_candidate(
        &self,
        train: &TrainSet,
        candidates: &[FeatureSubset],
        cache: &mut HashMap<FeatureSubset, f64>,
        maximize: bool,
    ) -> Result<(usize, f64), PeatfluxError> {
        let missing: Vec<&FeatureSubset> = candidates.iter().filter(|c| !cache.contains_key(*c)).collect();
        let scores = missing
            .par_iter()
            .map(|c| cross_val_score(self.template, &train.select_cols(c.indices()), self.kfold, self.metric))
            .collect::<Result<Vec<f64>, _>>()?;
        for (c, s) in missing.into_iter().zip(scores) {
            cache.insert(c.clone(), s);
        }
        let mut best = (0, cache[&candidates[0]]);
        for (i, c) in candidates.iter().enumerate().skip(1) {
            let s = cache[c];
            if is_comparison_better(best.1, s, maximize) {
                best = (i, s);
            }
        }
        Ok(best)
    }

    /// Run the selection on a scaled training partition whose columns are
    /// the universe, in universe order.
    pub fn select(&self, train: &TrainSet) -> Result<SelectionCurve, PeatfluxError> {
        let n = train.dataset().cols;
        if self.floor == 0 || self.floor > n {
            return Err(PeatfluxError::InvalidParameter(
                "sbfs.floor".to_string(),
                format!("1..={} (the universe size)", n),
                self.floor.to_string(),
            ));
        }
        let (_, maximize) = metric_callables(&self.metric);
        let mut cache = HashMap::new();
        let mut curve = SelectionCurve::default();

        let mut current = FeatureSubset::full(n);
        let (_, mut current_score) = self.best_candidate(train, &[current.clone()], &mut cache, maximize)?;
        curve.offer(
            SubsetScore {
                subset: current.clone(),
                score: current_score,
            },
            maximize,
        );
        info!("Selection starts with {} features, score {:.4}.", n, current_score);

        while current.len() > self.floor {
            let candidates: Vec<FeatureSubset> = current.indices().iter().map(|f| current.without(*f)).collect();
            let (best, score) = self.best_candidate(train, &candidates, &mut cache, maximize)?;
            let removed = current.indices()[best];
            current = candidates[best].clone();
            current_score = score;
            curve.offer(
                SubsetScore {
                    subset: current.clone(),
                    score,
                },
                maximize,
            );
            info!(
                "Removed feature {}, {} features left, score {:.4}.",
                removed,
                current.len(),
                score
            );

            while self.floating {
                let additions: Vec<FeatureSubset> = (0..n)
                    .filter(|f| *f != removed && !current.contains(*f))
                    .map(|f| current.with(f))
                    .collect();
                if additions.is_empty() {
                    break;
                }
                let (best, score) = self.best_candidate(train, &additions, &mut cache, maximize)?;
                let candidate = SubsetScore {
                    subset: additions[best].clone(),
                    score,
                };
                if !curve.offer(candidate, maximize) {
                    break;
                }
                current = additions[best].clone();
                current_score = score;
                debug!("Floating step back to {} features, score {:.4}.", current.len(), score);
            }
        }
        debug!("Selection finished at score {:.4}.", current_score);
        Ok(curve)
    }
}

/// Outcome of evaluating one subset on the held-out fold.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Evaluated(MetricsRecord),
    /// A recoverable numerical or sparsity failure, tagged with its message.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionStep {
    pub k: usize,
    pub features: Vec<String>,
    pub cv_score: f64,
    pub outcome: StepOutcome,
}

/// Selection result of one (variant, test fold) run.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionReport {
    pub test_fold: usize,
    /// Largest subset first.
    pub steps: Vec<SelectionStep>,
}

impl SelectionReport {
    pub fn records(&self) -> impl Iterator<Item = &MetricsRecord> {
        self.steps.iter().filter_map(|s| match &s.outcome {
            StepOutcome::Evaluated(r) => Some(r),
            StepOutcome::Failed(_) => None,
        })
    }
}

/// Select on the scaled training partition, then fit every winning subset
/// on the whole partition and score it on the held-out fold.
///
/// * `template` - Model scored inside the selection and evaluated per subset.
/// * `universe` - Names of the columns of `train` and `test`.
pub fn select_and_evaluate<R: Regressor>(
    template: &R,
    cfg: &SbfsConfig,
    evaluator: &Evaluator,
    universe: &[String],
    train: &TrainSet,
    test: &TestSet,
    test_fold: usize,
) -> Result<SelectionReport, PeatfluxError> {
    let curve = SequentialFloatingSelector::new(template, cfg).select(train)?;
    let mut steps = Vec::with_capacity(curve.len());
    for (k, record) in curve.iter() {
        let cols = record.subset.indices();
        let outcome = match evaluator.evaluate(template, &train.select_cols(cols), &test.select_cols(cols), test_fold) {
            Ok((metrics, _)) => StepOutcome::Evaluated(metrics),
            Err(e) if e.is_recoverable() => {
                warn!("Evaluation of the {} feature subset failed: {}", k, e);
                StepOutcome::Failed(e.to_string())
            }
            Err(e) => return Err(e),
        };
        info!("Evaluated the {} feature subset on test fold {}.", k, test_fold + 1);
        steps.push(SelectionStep {
            k,
            features: record.subset.names(universe),
            cv_score: record.score,
            outcome,
        });
    }
    Ok(SelectionReport { test_fold, steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Matrix};

    /// Predicts its first column. Feature 0 equals the target, so a subset
    /// scores R2 = 1 exactly when it keeps feature 0.
    #[derive(Clone)]
    struct LinearOracle;

    impl Regressor for LinearOracle {
        fn fit(&mut self, _data: &Matrix<f64>, _y: &[f64]) -> Result<(), PeatfluxError> {
            Ok(())
        }
        fn predict(&self, data: &Matrix<f64>) -> Vec<f64> {
            data.get_col(0).to_vec()
        }
    }

    fn train_set(n_features: usize) -> TrainSet {
        let rows = 40;
        let y: Vec<f64> = (0..rows).map(|i| i as f64).collect();
        let mut data = y.clone();
        for f in 1..n_features {
            data.extend((0..rows).map(|i| ((i * (f + 3)) % 7) as f64));
        }
        let names = (0..n_features).map(|f| format!("f{}", f)).collect();
        TrainSet::from_dataset(Dataset::new(data, y, names))
    }

    #[test]
    fn test_subset_ops() {
        let s = FeatureSubset::from_indices(vec![3, 1, 1, 2]);
        assert_eq!(s.indices(), &[1, 2, 3]);
        assert_eq!(s.without(2).indices(), &[1, 3]);
        assert_eq!(s.with(0).indices(), &[0, 1, 2, 3]);
        assert!(s.contains(3));
        let universe: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert_eq!(s.names(&universe), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_keeps_informative_feature() {
        let train = train_set(5);
        let cfg = SbfsConfig {
            floor: 1,
            cv_folds: 4,
            ..SbfsConfig::default()
        };
        let curve = SequentialFloatingSelector::new(&LinearOracle, &cfg).select(&train).unwrap();
        assert_eq!(curve.len(), 5);
        for (k, record) in curve.iter() {
            assert_eq!(record.subset.len(), k);
            assert!(record.subset.contains(0));
            assert_eq!(record.score, 1.0);
        }
        // Every candidate ties, so the earliest removal wins: feature 1 goes first.
        assert_eq!(curve.get(4).unwrap().subset.indices(), &[0, 2, 3, 4]);
        assert_eq!(curve.get(1).unwrap().subset.indices(), &[0]);
    }

    #[test]
    fn test_floor_larger_than_universe() {
        let train = train_set(3);
        let cfg = SbfsConfig {
            floor: 4,
            cv_folds: 4,
            ..SbfsConfig::default()
        };
        assert!(SequentialFloatingSelector::new(&LinearOracle, &cfg).select(&train).is_err());
    }

    #[test]
    fn test_curve_offer_is_strict() {
        let mut curve = SelectionCurve::default();
        let a = SubsetScore {
            subset: FeatureSubset::from_indices(vec![0, 1]),
            score: 0.5,
        };
        let b = SubsetScore {
            subset: FeatureSubset::from_indices(vec![0, 2]),
            score: 0.5,
        };
        assert!(curve.offer(a.clone(), true));
        assert!(!curve.offer(b, true));
        assert_eq!(curve.get(2), Some(&a));
    }
}
