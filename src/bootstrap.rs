//! Bootstrap uncertainty
//!
//! Two resampling procedures share the seeding scheme: iteration `i` draws
//! with replacement from a `StdRng` seeded with `i`, for `i` in `1..=B`.
//! The predictive mode refits a model per resample, the attribution mode only
//! aggregates precomputed attribution pairs.
use crate::config::{BinAxis, BootstrapConfig};
use crate::errors::PeatfluxError;
use crate::utils::{mean, precision_round, quantile_sorted, round_to_resolution, total_cmp, write_atomic};
use hashbrown::{HashMap, HashSet};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Mean and the 5th and 95th percentiles across iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub mean: f64,
    pub p5: f64,
    pub p95: f64,
}

impl Band {
    /// Band of the values in iteration order, `None` when there are none.
    pub fn from_values(values: &[f64]) -> Option<Band> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_unstable_by(total_cmp);
        Some(Band {
            mean: mean(values),
            p5: quantile_sorted(&sorted, 0.05),
            p95: quantile_sorted(&sorted, 0.95),
        })
    }
}

/// `n` indices into `0..len`, drawn with replacement.
pub fn resample_indices(seed: u64, n: usize, len: usize) -> Result<Vec<usize>, PeatfluxError> {
    if len == 0 {
        return Err(PeatfluxError::EmptyPartition("bootstrap population".to_string()));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok((0..n).map(|_| rng.gen_range(0..len)).collect())
}

/// Shared flag that stops the remaining iterations of a running bootstrap.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        StopSignal::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Settings a stored iteration was computed under. Iterations are only
/// reused by a run with the same settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RunSettings {
    rounds: usize,
    sample_size: usize,
    n_rows: usize,
    model_seed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    settings: RunSettings,
    seed: u64,
    predictions: Vec<Option<f64>>,
}

enum Iteration {
    Done(Vec<Option<f64>>),
    Skipped,
    Stopped,
}

/// Refit-per-resample bootstrap of a vector of predictions.
#[derive(Debug, Clone)]
pub struct PredictiveBootstrap {
    pub rounds: usize,
    pub sample_size: usize,
    pub checkpoint_dir: Option<PathBuf>,
    /// Seed of the model refit in every iteration, recorded in checkpoints.
    pub model_seed: u64,
    stop: StopSignal,
}

impl PredictiveBootstrap {
    pub fn new(cfg: &BootstrapConfig, stop: StopSignal) -> Self {
        PredictiveBootstrap {
            rounds: cfg.predictive_rounds,
            sample_size: cfg.predictive_sample_size,
            checkpoint_dir: cfg.checkpoint_dir.clone(),
            model_seed: 0,
            stop,
        }
    }

    pub fn with_model_seed(mut self, model_seed: u64) -> Self {
        self.model_seed = model_seed;
        self
    }

    fn settings(&self, n_rows: usize) -> RunSettings {
        RunSettings {
            rounds: self.rounds,
            sample_size: self.sample_size,
            n_rows,
            model_seed: self.model_seed,
        }
    }

    fn checkpoint_path(&self, seed: u64) -> Option<PathBuf> {
        self.checkpoint_dir.as_ref().map(|d| d.join(format!("iter_{:06}.json", seed)))
    }

    fn load_checkpoint(
        &self,
        settings: RunSettings,
        seed: u64,
        n_points: usize,
    ) -> Result<Option<Vec<Option<f64>>>, PeatfluxError> {
        let path = match self.checkpoint_path(seed) {
            Some(p) if p.exists() => p,
            _ => return Ok(None),
        };
        let read_err = |e: String| PeatfluxError::UnableToRead(format!("{}: {}", path.display(), e));
        let text = fs::read_to_string(&path).map_err(|e| read_err(e.to_string()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&text).map_err(|e| read_err(e.to_string()))?;
        if checkpoint.settings != settings {
            return Err(PeatfluxError::InvalidParameter(
                format!("checkpoint {}", path.display()),
                format!("{:?}", settings),
                format!("{:?}", checkpoint.settings),
            ));
        }
        if checkpoint.seed != seed || checkpoint.predictions.len() != n_points {
            return Err(read_err(format!(
                "checkpoint of seed {} with {} points, expected seed {} with {}",
                checkpoint.seed,
                checkpoint.predictions.len(),
                seed,
                n_points
            )));
        }
        Ok(Some(checkpoint.predictions))
    }

    fn save_checkpoint(&self, settings: RunSettings, seed: u64, predictions: &[Option<f64>]) -> Result<(), PeatfluxError> {
        if let Some(path) = self.checkpoint_path(seed) {
            let checkpoint = Checkpoint {
                settings,
                seed,
                predictions: predictions.to_vec(),
            };
            let json = serde_json::to_vec(&checkpoint).map_err(|e| PeatfluxError::UnableToWrite(e.to_string()))?;
            write_atomic(path, &json)?;
        }
        Ok(())
    }

    /// Run every iteration and summarise each of the `n_points` outputs.
    ///
    /// * `n_rows` - Size of the population resampled from.
    /// * `iteration` - Called with the seed and the drawn rows, returns one
    ///   value per point, `None` where the resample had no data for it.
    ///
    /// An iteration that fails with a recoverable error is skipped. Points
    /// that no iteration produced get no band. A stored iteration written
    /// under other settings is an error.
    pub fn run<F>(&self, n_rows: usize, n_points: usize, iteration: F) -> Result<Vec<Option<Band>>, PeatfluxError>
    where
        F: Fn(u64, &[usize]) -> Result<Vec<Option<f64>>, PeatfluxError> + Sync,
    {
        if let Some(dir) = &self.checkpoint_dir {
            fs::create_dir_all(dir).map_err(|e| PeatfluxError::UnableToWrite(format!("{}: {}", dir.display(), e)))?;
        }
        info!(
            "Starting {} bootstrap iterations of {} rows each.",
            self.rounds, self.sample_size
        );
        let settings = self.settings(n_rows);
        let completed = AtomicUsize::new(0);
        let iterations = (1..=self.rounds as u64)
            .into_par_iter()
            .map(|seed| {
                if self.stop.is_stopped() {
                    return Ok(Iteration::Stopped);
                }
                if let Some(predictions) = self.load_checkpoint(settings, seed, n_points)? {
                    completed.fetch_add(1, Ordering::SeqCst);
                    return Ok(Iteration::Done(predictions));
                }
                let rows = resample_indices(seed, self.sample_size, n_rows)?;
                match iteration(seed, &rows) {
                    Ok(predictions) => {
                        if predictions.len() != n_points {
                            return Err(PeatfluxError::InvalidParameter(
                                "bootstrap iteration".to_string(),
                                format!("{} points", n_points),
                                predictions.len().to_string(),
                            ));
                        }
                        self.save_checkpoint(settings, seed, &predictions)?;
                        completed.fetch_add(1, Ordering::SeqCst);
                        info!("Finished bootstrap iteration {}.", seed);
                        Ok(Iteration::Done(predictions))
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!("Bootstrap iteration {} skipped: {}", seed, e);
                        Ok(Iteration::Skipped)
                    }
                    Err(e) => Err(e),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if iterations.iter().any(|i| matches!(i, Iteration::Stopped)) {
            return Err(PeatfluxError::Interrupted(completed.load(Ordering::SeqCst)));
        }
        let done: Vec<&Vec<Option<f64>>> = iterations
            .iter()
            .filter_map(|i| match i {
                Iteration::Done(p) => Some(p),
                _ => None,
            })
            .collect();
        info!("{} of {} bootstrap iterations produced predictions.", done.len(), self.rounds);
        Ok((0..n_points)
            .map(|j| {
                let values: Vec<f64> = done.iter().filter_map(|p| p[j]).collect();
                Band::from_values(&values)
            })
            .collect())
    }
}

/// One observation's feature value and its attribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionPair {
    pub value: f64,
    pub attribution: f64,
    /// Row of the observation in the table the attributions came from.
    pub observation: usize,
}

/// Summary of one bin across all iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionBin {
    pub key: f64,
    pub band: Band,
    /// Distinct observations that landed in the bin in any iteration.
    pub n_unique: usize,
}

/// Resampling of precomputed attribution pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionBootstrap {
    pub rounds: usize,
    pub sample_size: usize,
    pub axis: BinAxis,
}

impl AttributionBootstrap {
    pub fn new(cfg: &BootstrapConfig, axis: BinAxis) -> Self {
        AttributionBootstrap {
            rounds: cfg.attribution_rounds,
            sample_size: cfg.attribution_sample_size,
            axis,
        }
    }

    /// Bin key and the value averaged inside the bin.
    fn key_and_value(&self, pair: &AttributionPair) -> (f64, f64) {
        let (key, value) = match self.axis {
            BinAxis::FeatureValue { resolution } => (round_to_resolution(pair.value, resolution), pair.attribution),
            BinAxis::Attribution { decimals } => (precision_round(pair.attribution, decimals), pair.value),
        };
        // -0.0 and 0.0 share a bin.
        (if key == 0.0 { 0.0 } else { key }, value)
    }

    /// Per-bin means of one iteration, plus the drawn pair indices.
    fn iteration(&self, seed: u64, pairs: &[AttributionPair]) -> Result<(Vec<(u64, f64)>, Vec<usize>), PeatfluxError> {
        let mut drawn = resample_indices(seed, self.sample_size, pairs.len())?;
        let mut sums: HashMap<u64, (f64, usize)> = HashMap::new();
        let mut order = Vec::new();
        for i in &drawn {
            let (key, value) = self.key_and_value(&pairs[*i]);
            let entry = sums.entry(key.to_bits()).or_insert_with(|| {
                order.push(key.to_bits());
                (0.0, 0)
            });
            entry.0 += value;
            entry.1 += 1;
        }
        let means = order
            .into_iter()
            .map(|k| {
                let (sum, count) = sums[&k];
                (k, sum / count as f64)
            })
            .collect();
        drawn.sort_unstable();
        drawn.dedup();
        Ok((means, drawn))
    }

    pub fn run(&self, pairs: &[AttributionPair]) -> Result<Vec<AttributionBin>, PeatfluxError> {
        info!(
            "Starting {} attribution bootstrap iterations of {} pairs each.",
            self.rounds, self.sample_size
        );
        let iterations = (1..=self.rounds as u64)
            .into_par_iter()
            .map(|seed| self.iteration(seed, pairs))
            .collect::<Result<Vec<_>, _>>()?;

        let mut per_bin: HashMap<u64, Vec<f64>> = HashMap::new();
        let mut observations: HashMap<u64, HashSet<usize>> = HashMap::new();
        for (means, drawn) in &iterations {
            for (key, m) in means {
                per_bin.entry(*key).or_default().push(*m);
            }
            for i in drawn {
                let (key, _) = self.key_and_value(&pairs[*i]);
                observations.entry(key.to_bits()).or_default().insert(pairs[*i].observation);
            }
        }
        let mut bins: Vec<AttributionBin> = per_bin
            .into_iter()
            .filter_map(|(key, values)| {
                Band::from_values(&values).map(|band| AttributionBin {
                    key: f64::from_bits(key),
                    band,
                    n_unique: observations.get(&key).map_or(0, |s| s.len()),
                })
            })
            .collect();
        bins.sort_unstable_by(|a, b| total_cmp(&a.key, &b.key));
        info!("Attribution bootstrap finished with {} bins.", bins.len());
        Ok(bins)
    }
}

/// The bin whose rounded attribution is zero. With bins keyed on the
/// attribution, its band brackets the feature value at which the attribution
/// changes sign.
pub fn zero_crossing(bins: &[AttributionBin]) -> Option<&AttributionBin> {
    bins.iter().find(|b| b.key == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pairs() -> Vec<AttributionPair> {
        (0..40)
            .map(|i| AttributionPair {
                value: (i % 10) as f64,
                attribution: (i % 10) as f64 * 0.1 - 0.45,
                observation: i,
            })
            .collect()
    }

    fn cfg(rounds: usize) -> BootstrapConfig {
        BootstrapConfig {
            predictive_rounds: rounds,
            predictive_sample_size: 20,
            attribution_rounds: rounds,
            attribution_sample_size: 30,
            checkpoint_dir: None,
        }
    }

    #[test]
    fn test_band_single_value() {
        let b = Band::from_values(&[2.5]).unwrap();
        assert_eq!((b.mean, b.p5, b.p95), (2.5, 2.5, 2.5));
        assert!(Band::from_values(&[]).is_none());
    }

    #[test]
    fn test_resample_is_seeded() {
        let a = resample_indices(7, 50, 10).unwrap();
        assert_eq!(a, resample_indices(7, 50, 10).unwrap());
        assert!(a.iter().all(|i| *i < 10));
        assert_ne!(a, resample_indices(8, 50, 10).unwrap());
        assert!(resample_indices(1, 5, 0).is_err());
    }

    #[test]
    fn test_single_round_attribution() {
        let boot = AttributionBootstrap::new(&cfg(1), BinAxis::FeatureValue { resolution: 1.0 });
        let bins = boot.run(&pairs()).unwrap();
        assert!(!bins.is_empty());
        for b in &bins {
            assert_eq!(b.band.mean, b.band.p5);
            assert_eq!(b.band.mean, b.band.p95);
            // Every pair with the same value has the same attribution.
            assert!((b.band.mean - (b.key * 0.1 - 0.45)).abs() < 1e-12);
            assert!(b.n_unique >= 1);
        }
        assert!(bins.windows(2).all(|w| w[0].key < w[1].key));
    }

    #[test]
    fn test_attribution_reruns_are_identical() {
        let boot = AttributionBootstrap::new(&cfg(25), BinAxis::Attribution { decimals: 1 });
        let a = boot.run(&pairs()).unwrap();
        let b = boot.run(&pairs()).unwrap();
        assert_eq!(a, b);
        let zero = zero_crossing(&a);
        assert!(zero.is_none() || zero.unwrap().key == 0.0);
    }

    #[test]
    fn test_predictive_bands() {
        let boot = PredictiveBootstrap::new(&cfg(10), StopSignal::new());
        let bands = boot
            .run(100, 2, |_, rows| {
                let m = rows.iter().map(|r| *r as f64).sum::<f64>() / rows.len() as f64;
                Ok(vec![Some(m), None])
            })
            .unwrap();
        let band = bands[0].unwrap();
        assert!(band.p5 <= band.mean && band.mean <= band.p95);
        assert!(bands[1].is_none());
    }

    #[test]
    fn test_predictive_checkpoints_resume() {
        let dir = tempdir().unwrap();
        let mut c = cfg(4);
        c.checkpoint_dir = Some(dir.path().to_path_buf());
        let boot = PredictiveBootstrap::new(&c, StopSignal::new());
        let first = boot.run(10, 1, |seed, _| Ok(vec![Some(seed as f64)])).unwrap();
        assert!(dir.path().join("iter_000003.json").exists());
        // A resumed run reads the stored iterations instead of recomputing.
        let resumed = boot
            .run(10, 1, |_, _| Err(PeatfluxError::UnableToRead("not called".to_string())))
            .unwrap();
        assert_eq!(first, resumed);
        assert_eq!(first[0].unwrap().mean, 2.5);
    }

    #[test]
    fn test_checkpoints_of_other_settings_are_refused() {
        let dir = tempdir().unwrap();
        let mut c = cfg(3);
        c.checkpoint_dir = Some(dir.path().to_path_buf());
        let boot = PredictiveBootstrap::new(&c, StopSignal::new()).with_model_seed(5);
        boot.run(10, 1, |seed, _| Ok(vec![Some(seed as f64)])).unwrap();

        let reseeded = PredictiveBootstrap::new(&c, StopSignal::new()).with_model_seed(6);
        let err = reseeded.run(10, 1, |_, _| Ok(vec![Some(0.0)])).unwrap_err();
        assert!(matches!(err, PeatfluxError::InvalidParameter(..)));

        c.predictive_sample_size = 40;
        let resized = PredictiveBootstrap::new(&c, StopSignal::new()).with_model_seed(5);
        assert!(resized.run(10, 1, |_, _| Ok(vec![Some(0.0)])).is_err());
        assert!(boot.run(12, 1, |_, _| Ok(vec![Some(0.0)])).is_err());

        let resumed = boot.run(10, 1, |_, _| Ok(vec![Some(0.0)])).unwrap();
        assert_eq!(resumed[0].unwrap().mean, 2.0);
    }

    #[test]
    fn test_stop_signal() {
        let stop = StopSignal::new();
        stop.stop();
        let boot = PredictiveBootstrap::new(&cfg(3), stop);
        let err = boot.run(10, 1, |_, _| Ok(vec![Some(1.0)])).unwrap_err();
        assert!(matches!(err, PeatfluxError::Interrupted(0)));
    }
}
