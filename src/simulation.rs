//! Counterfactual simulation
//!
//! For every pair of representative values of two swept features, the rows
//! of the table that fall inside both tolerance windows fix the remaining
//! features at their mean, and the depth feature is swept over a grid. The
//! model's predictions along the grid form a response curve.
use crate::bootstrap::Band;
use crate::config::{SimulationConfig, SweptFeature};
use crate::data::Dataset;
use crate::errors::PeatfluxError;
use crate::regressor::Regressor;
use crate::trainer::FittedPipeline;
use crate::utils::mean;
use log::{info, warn};

/// Open interval around a swept value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceWindow {
    pub center: f64,
    pub half_width: f64,
    /// Upper bound used instead when the window is centred on zero.
    pub at_zero_below: f64,
}

impl ToleranceWindow {
    pub fn new(feature: &SweptFeature, center: f64) -> Self {
        ToleranceWindow {
            center,
            half_width: feature.half_width(),
            at_zero_below: feature.at_zero_below,
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        if self.center == 0.0 {
            v < self.at_zero_below
        } else {
            v > self.center - self.half_width && v < self.center + self.half_width
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePair {
    pub first: f64,
    pub second: f64,
}

/// Synthetic rows of one value pair, one row per depth grid value.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticBatch {
    pub pair: ValuePair,
    /// Columns are the model features. Targets are unknown and left at zero.
    pub rows: Dataset,
    /// Real depth values of the rows inside the window.
    pub window_depths: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub depth: f64,
    pub prediction: f64,
    pub band: Option<Band>,
}

/// Half open bin `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Curve {
        pair: ValuePair,
        window_rows: usize,
        points: Vec<CurvePoint>,
        histogram: Vec<HistogramBin>,
    },
    /// No observation falls inside both windows.
    NoData(ValuePair),
}

/// Contiguous fixed width bins covering every value, starting at the
/// multiple of `width` at or below the minimum.
pub fn histogram(values: &[f64], width: f64) -> Vec<HistogramBin> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let start = (min / width).floor() * width;
    let n = ((max - start) / width).floor() as usize + 1;
    let mut counts = vec![0; n];
    for v in values {
        let i = (((v - start) / width).floor() as usize).min(n - 1);
        counts[i] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: start + i as f64 * width,
            upper: start + (i + 1) as f64 * width,
            count,
        })
        .collect()
}

pub struct CounterfactualSimulator {
    cfg: SimulationConfig,
    features: Vec<String>,
    first: usize,
    second: usize,
    depth: usize,
    grid: Vec<f64>,
}

impl CounterfactualSimulator {
    /// * `features` - Columns of the model, in order. Must contain both swept
    ///   features and the depth feature.
    pub fn new(cfg: &SimulationConfig, features: &[String]) -> Result<Self, PeatfluxError> {
        let position = |name: &str| {
            features
                .iter()
                .position(|f| f == name)
                .ok_or_else(|| PeatfluxError::UnknownFeature(name.to_string()))
        };
        Ok(CounterfactualSimulator {
            first: position(&cfg.first.name)?,
            second: position(&cfg.second.name)?,
            depth: position(&cfg.depth_feature)?,
            grid: cfg.depth_grid.values(),
            features: features.to_vec(),
            cfg: cfg.clone(),
        })
    }

    /// All pairs, the first feature's values in the outer loop.
    pub fn pairs(&self) -> Vec<ValuePair> {
        let mut pairs = Vec::new();
        for first in &self.cfg.first.values {
            for second in &self.cfg.second.values {
                pairs.push(ValuePair {
                    first: *first,
                    second: *second,
                });
            }
        }
        pairs
    }

    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    /// Number of predicted values over all pairs.
    pub fn n_points(&self) -> usize {
        self.pairs().len() * self.grid.len()
    }

    /// Synthetic rows of a pair, `None` when no row of `data` falls inside
    /// both windows. `data` holds the model features as columns.
    pub fn build_batch(&self, data: &Dataset, pair: ValuePair) -> Option<SyntheticBatch> {
        let first = ToleranceWindow::new(&self.cfg.first, pair.first);
        let second = ToleranceWindow::new(&self.cfg.second, pair.second);
        let (a, b) = (data.get_col(self.first), data.get_col(self.second));
        let window: Vec<usize> = (0..data.rows).filter(|r| first.contains(a[*r]) && second.contains(b[*r])).collect();
        if window.is_empty() {
            return None;
        }
        let n = self.grid.len();
        let mut values = Vec::with_capacity(n * self.features.len());
        for c in 0..self.features.len() {
            if c == self.first {
                values.extend(std::iter::repeat(pair.first).take(n));
            } else if c == self.second {
                values.extend(std::iter::repeat(pair.second).take(n));
            } else if c == self.depth {
                values.extend_from_slice(&self.grid);
            } else {
                let col = data.get_col(c);
                let m = mean(&window.iter().map(|r| col[*r]).collect::<Vec<_>>());
                values.extend(std::iter::repeat(m).take(n));
            }
        }
        let depths = data.get_col(self.depth);
        Some(SyntheticBatch {
            pair,
            rows: Dataset::new(values, vec![0.0; n], self.features.clone()),
            window_depths: window.iter().map(|r| depths[*r]).collect(),
        })
    }

    /// Predictions of every pair and grid value, pair-major, `None` for the
    /// grid values of pairs without data.
    pub fn predict_grid<R: Regressor>(
        &self,
        fitted: &FittedPipeline<R>,
        data: &Dataset,
    ) -> Result<Vec<Option<f64>>, PeatfluxError> {
        let mut out = Vec::with_capacity(self.n_points());
        for pair in self.pairs() {
            match self.build_batch(data, pair) {
                Some(batch) => out.extend(fitted.predict(&batch.rows)?.into_iter().map(Some)),
                None => out.extend(std::iter::repeat(None).take(self.grid.len())),
            }
        }
        Ok(out)
    }

    /// Curves of the production model fit on `data`, with bootstrap bands
    /// laid out as [`Self::predict_grid`] lays out its predictions.
    pub fn run<R: Regressor>(
        &self,
        production: &FittedPipeline<R>,
        data: &Dataset,
        bands: Option<&[Option<Band>]>,
    ) -> Result<Vec<PairOutcome>, PeatfluxError> {
        let n = self.grid.len();
        let mut outcomes = Vec::new();
        for (p, pair) in self.pairs().into_iter().enumerate() {
            let batch = match self.build_batch(data, pair) {
                Some(b) => b,
                None => {
                    warn!(
                        "No observations with {} = {} and {} = {}.",
                        self.cfg.first.name, pair.first, self.cfg.second.name, pair.second
                    );
                    outcomes.push(PairOutcome::NoData(pair));
                    continue;
                }
            };
            let predictions = production.predict(&batch.rows)?;
            let points = self
                .grid
                .iter()
                .zip(predictions)
                .enumerate()
                .map(|(g, (depth, prediction))| CurvePoint {
                    depth: *depth,
                    prediction,
                    band: bands.and_then(|b| b[p * n + g]),
                })
                .collect();
            info!(
                "Simulated {} = {}, {} = {} from {} rows.",
                self.cfg.first.name,
                pair.first,
                self.cfg.second.name,
                pair.second,
                batch.window_depths.len()
            );
            outcomes.push(PairOutcome::Curve {
                pair,
                window_rows: batch.window_depths.len(),
                histogram: histogram(&batch.window_depths, self.cfg.histogram_bin_width),
                points,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureKind, GridRange};
    use crate::data::TrainSet;
    use crate::regressor::tests::MeanRegressor;

    fn cfg() -> SimulationConfig {
        SimulationConfig {
            first: SweptFeature {
                name: "PAR_abs".to_string(),
                kind: FeatureKind::Radiation,
                values: vec![0.0, 400.0, 1600.0],
                half_width: None,
                at_zero_below: 2.0,
            },
            second: SweptFeature {
                name: "Tsfc".to_string(),
                kind: FeatureKind::Temperature,
                values: vec![10.0],
                half_width: None,
                at_zero_below: 2.0,
            },
            depth_grid: GridRange {
                start: 0.0,
                stop: 4.0,
                step: 1.0,
            },
            ..SimulationConfig::default()
        }
    }

    fn names() -> Vec<String> {
        ["PAR_abs", "Tsfc", "RH", "Exp_PeatD"].iter().map(|s| s.to_string()).collect()
    }

    fn data() -> Dataset {
        // Three rows: PAR 1 and 390 near Tsfc 10, PAR 700 far from it.
        let par = [1.0, 390.0, 700.0];
        let tsfc = [9.0, 11.5, 10.0];
        let rh = [50.0, 70.0, 90.0];
        let depth = [12.0, 33.0, 40.0];
        let data = [par, tsfc, rh, depth].concat();
        Dataset::new(data, vec![1.0, 2.0, 3.0], names())
    }

    #[test]
    fn test_window() {
        let f = cfg().first;
        let w = ToleranceWindow::new(&f, 400.0);
        assert!(w.contains(201.0));
        assert!(!w.contains(200.0));
        assert!(!w.contains(600.0));
        let zero = ToleranceWindow::new(&f, 0.0);
        assert!(zero.contains(1.9));
        assert!(!zero.contains(2.0));
        assert!(zero.contains(-5.0));
    }

    #[test]
    fn test_build_batch() {
        let sim = CounterfactualSimulator::new(&cfg(), &names()).unwrap();
        let batch = sim
            .build_batch(
                &data(),
                ValuePair {
                    first: 400.0,
                    second: 10.0,
                },
            )
            .unwrap();
        assert_eq!(batch.rows.rows, 4);
        assert_eq!(batch.rows.get_col(0), &[400.0; 4]);
        assert_eq!(batch.rows.get_col(2), &[70.0; 4]);
        assert_eq!(batch.rows.get_col(3), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(batch.window_depths, vec![33.0]);
    }

    #[test]
    fn test_no_data_pair() {
        let sim = CounterfactualSimulator::new(&cfg(), &names()).unwrap();
        let train = TrainSet::from_dataset(data());
        let fitted = FittedPipeline::fit(&MeanRegressor::default(), &train).unwrap();
        let outcomes = sim.run(&fitted, &data(), None).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], PairOutcome::Curve { window_rows: 1, .. }));
        assert_eq!(
            outcomes[2],
            PairOutcome::NoData(ValuePair {
                first: 1600.0,
                second: 10.0
            })
        );
        let grid = sim.predict_grid(&fitted, &data()).unwrap();
        assert_eq!(grid.len(), sim.n_points());
        assert_eq!(grid[0], Some(2.0));
        assert!(grid[8..].iter().all(|p| p.is_none()));
    }

    #[test]
    fn test_unknown_feature() {
        let features = vec!["PAR_abs".to_string(), "Tsfc".to_string()];
        assert!(matches!(
            CounterfactualSimulator::new(&cfg(), &features),
            Err(PeatfluxError::UnknownFeature(f)) if f == "Exp_PeatD"
        ));
    }

    #[test]
    fn test_histogram() {
        let bins = histogram(&[0.0, 4.9, 5.0, 12.0], 5.0);
        let counts: Vec<usize> = bins.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(bins[2].lower, 10.0);
        assert!(histogram(&[], 5.0).is_empty());
    }
}
