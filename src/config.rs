//! Experiment configuration
//!
//! One JSON document drives every command. Every field has a default, so an
//! empty object is a valid configuration reproducing the published setup.
use crate::booster::config::{BoosterConfig, Hyperparameters, ImportanceMethod};
use crate::errors::PeatfluxError;
use crate::metric::Metric;
use crate::table::Schema;
use crate::utils::{validate_positive_count, validate_positive_float_parameter};
use crate::variant::{ModelVariant, VariantSpec};
use rayon::ThreadPool;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// JSON persistence for configuration records and fitted models.
pub trait ConfigIO: Serialize + DeserializeOwned + Sized {
    /// Save as a json object to a file.
    ///
    /// * `path` - Path to save to.
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PeatfluxError> {
        let path = path.as_ref();
        fs::write(path, self.json_dump()?).map_err(|e| PeatfluxError::UnableToWrite(format!("{}: {}", path.display(), e)))
    }

    /// Dump as a json string.
    fn json_dump(&self) -> Result<String, PeatfluxError> {
        serde_json::to_string(self).map_err(|e| PeatfluxError::UnableToWrite(e.to_string()))
    }

    /// Load from a json string.
    ///
    /// * `json_str` - String object, which can be serialized to json.
    fn from_json(json_str: &str) -> Result<Self, PeatfluxError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| PeatfluxError::UnableToRead(e.to_string()))
    }

    /// Load from a path to a json object.
    ///
    /// * `path` - Path to load from.
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, PeatfluxError> {
        let path = path.as_ref();
        let json_str =
            fs::read_to_string(path).map_err(|e| PeatfluxError::UnableToRead(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json_str)
    }
}

/// Inclusive range of ISO week numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekRange {
    pub first: u8,
    pub last: u8,
}

impl WeekRange {
    pub fn new(first: u8, last: u8) -> Self {
        WeekRange { first, last }
    }

    pub fn weeks(&self) -> impl Iterator<Item = u8> {
        self.first..=self.last
    }
}

fn default_n_folds() -> usize {
    5
}
fn default_weeks() -> Vec<WeekRange> {
    vec![WeekRange::new(1, 50)]
}
fn default_overflow() -> Vec<(u8, usize)> {
    vec![(51, 2), (52, 3)]
}

/// Week based fold layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldConfig {
    #[serde(default = "default_n_folds")]
    pub n_folds: usize,
    /// Weeks assigned round robin, in ascending order.
    #[serde(default = "default_weeks")]
    pub weeks: Vec<WeekRange>,
    /// Extra `(week, fold)` pairs added after the round robin assignment.
    #[serde(default = "default_overflow")]
    pub overflow: Vec<(u8, usize)>,
}

impl Default for FoldConfig {
    fn default() -> Self {
        FoldConfig {
            n_folds: default_n_folds(),
            weeks: default_weeks(),
            overflow: default_overflow(),
        }
    }
}

fn default_floor() -> usize {
    4
}
fn default_cv_folds() -> usize {
    10
}
fn default_sbfs_metric() -> Metric {
    Metric::R2
}
fn default_true() -> bool {
    true
}
fn default_bias_variance_rounds() -> usize {
    200
}

/// Sequential backward floating selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbfsConfig {
    /// Smallest subset size produced.
    #[serde(default = "default_floor")]
    pub floor: usize,
    /// Inner cross validation folds over the training partition.
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default = "default_sbfs_metric")]
    pub metric: Metric,
    /// Try re-adding excluded features after every removal.
    #[serde(default = "default_true")]
    pub floating: bool,
    /// Booster scored inside the selection loop.
    #[serde(default)]
    pub booster: Hyperparameters,
    /// Resampling rounds of the bias/variance decomposition.
    #[serde(default = "default_bias_variance_rounds")]
    pub bias_variance_rounds: usize,
}

impl Default for SbfsConfig {
    fn default() -> Self {
        SbfsConfig {
            floor: default_floor(),
            cv_folds: default_cv_folds(),
            metric: default_sbfs_metric(),
            floating: true,
            booster: Hyperparameters::default(),
            bias_variance_rounds: default_bias_variance_rounds(),
        }
    }
}

fn default_predictive_rounds() -> usize {
    1000
}
fn default_predictive_sample_size() -> usize {
    10000
}
fn default_attribution_rounds() -> usize {
    10000
}
fn default_attribution_sample_size() -> usize {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_predictive_rounds")]
    pub predictive_rounds: usize,
    #[serde(default = "default_predictive_sample_size")]
    pub predictive_sample_size: usize,
    #[serde(default = "default_attribution_rounds")]
    pub attribution_rounds: usize,
    #[serde(default = "default_attribution_sample_size")]
    pub attribution_sample_size: usize,
    /// Directory holding one JSON file per finished predictive iteration.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            predictive_rounds: default_predictive_rounds(),
            predictive_sample_size: default_predictive_sample_size(),
            attribution_rounds: default_attribution_rounds(),
            attribution_sample_size: default_attribution_sample_size(),
            checkpoint_dir: None,
        }
    }
}

/// How wide the selection window around a swept value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Radiation,
    Temperature,
    Index,
}

impl FeatureKind {
    pub fn half_width(&self) -> f64 {
        match self {
            FeatureKind::Radiation => 200.0,
            FeatureKind::Temperature => 2.0,
            FeatureKind::Index => 0.1,
        }
    }
}

fn default_at_zero_below() -> f64 {
    2.0
}

/// A feature fixed at a list of representative values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweptFeature {
    pub name: String,
    pub kind: FeatureKind,
    pub values: Vec<f64>,
    /// Overrides the half width implied by `kind`.
    #[serde(default)]
    pub half_width: Option<f64>,
    /// A window centred on 0 selects `value < at_zero_below` instead.
    #[serde(default = "default_at_zero_below")]
    pub at_zero_below: f64,
}

impl SweptFeature {
    pub fn half_width(&self) -> f64 {
        self.half_width.unwrap_or_else(|| self.kind.half_width())
    }
}

/// `start..stop` in steps of `step`, `stop` excluded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridRange {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl GridRange {
    pub fn values(&self) -> Vec<f64> {
        let n = ((self.stop - self.start) / self.step).ceil().max(0.0) as usize;
        (0..n).map(|i| self.start + i as f64 * self.step).collect()
    }
}

fn default_first() -> SweptFeature {
    SweptFeature {
        name: "PAR_abs".to_string(),
        kind: FeatureKind::Radiation,
        values: vec![0.0, 400.0, 800.0, 1200.0, 1600.0],
        half_width: None,
        at_zero_below: default_at_zero_below(),
    }
}
fn default_second() -> SweptFeature {
    SweptFeature {
        name: "Tsfc".to_string(),
        kind: FeatureKind::Temperature,
        values: vec![0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0],
        half_width: None,
        at_zero_below: default_at_zero_below(),
    }
}
fn default_depth_feature() -> String {
    "Exp_PeatD".to_string()
}
fn default_depth_grid() -> GridRange {
    GridRange {
        start: 0.0,
        stop: 125.0,
        step: 1.0,
    }
}
fn default_histogram_bin_width() -> f64 {
    5.0
}
fn default_simulation_variant() -> ModelVariant {
    ModelVariant::M5
}

/// Counterfactual simulation over pairs of representative values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_variant")]
    pub variant: ModelVariant,
    #[serde(default = "default_first")]
    pub first: SweptFeature,
    #[serde(default = "default_second")]
    pub second: SweptFeature,
    #[serde(default = "default_depth_feature")]
    pub depth_feature: String,
    #[serde(default = "default_depth_grid")]
    pub depth_grid: GridRange,
    #[serde(default = "default_histogram_bin_width")]
    pub histogram_bin_width: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            variant: default_simulation_variant(),
            first: default_first(),
            second: default_second(),
            depth_feature: default_depth_feature(),
            depth_grid: default_depth_grid(),
            histogram_bin_width: default_histogram_bin_width(),
        }
    }
}

/// Binning of (feature value, attribution) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BinAxis {
    /// Bin on the feature value rounded to a multiple of `resolution`.
    FeatureValue { resolution: f64 },
    /// Bin on the attribution rounded to `decimals`, averaging the feature
    /// value.
    Attribution { decimals: i32 },
}

fn default_attribution_feature() -> String {
    "Exp_PeatD".to_string()
}
fn default_attribution_axis() -> BinAxis {
    BinAxis::FeatureValue { resolution: 0.5 }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default = "default_attribution_feature")]
    pub feature: String,
    #[serde(default = "default_attribution_axis")]
    pub axis: BinAxis,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        AttributionConfig {
            feature: default_attribution_feature(),
            axis: default_attribution_axis(),
        }
    }
}

fn default_importance_booster() -> Hyperparameters {
    Hyperparameters::new(0.1, 6, 1000, 1.0)
}
fn default_importance_method() -> ImportanceMethod {
    ImportanceMethod::Gain
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceConfig {
    #[serde(default = "default_importance_booster")]
    pub booster: Hyperparameters,
    #[serde(default = "default_importance_method")]
    pub method: ImportanceMethod,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        ImportanceConfig {
            booster: default_importance_booster(),
            method: default_importance_method(),
        }
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// The whole experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub folds: FoldConfig,
    #[serde(default)]
    pub sbfs: SbfsConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub importance: ImportanceConfig,
    /// Replaces the built in definition of a variant.
    #[serde(default)]
    pub variants: BTreeMap<ModelVariant, VariantSpec>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Seed of every randomized procedure. Has no default.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            schema: Schema::default(),
            folds: FoldConfig::default(),
            sbfs: SbfsConfig::default(),
            bootstrap: BootstrapConfig::default(),
            simulation: SimulationConfig::default(),
            attribution: AttributionConfig::default(),
            importance: ImportanceConfig::default(),
            variants: BTreeMap::new(),
            threads: default_threads(),
            seed: None,
        }
    }
}

impl ConfigIO for ExperimentConfig {}

impl ExperimentConfig {
    /// The variant definition, with any configured override applied.
    pub fn variant(&self, variant: ModelVariant) -> VariantSpec {
        self.variants.get(&variant).cloned().unwrap_or_else(|| variant.spec())
    }

    /// Seed for a randomized procedure, an error when none was given.
    pub fn seed(&self, procedure: &str) -> Result<u64, PeatfluxError> {
        self.seed.ok_or_else(|| PeatfluxError::MissingSeed(procedure.to_string()))
    }

    /// Booster settings of a variant's production model.
    pub fn production_booster(&self, variant: ModelVariant, seed: u64) -> BoosterConfig {
        BoosterConfig::from(self.variant(variant).hyperparameters).with_seed(seed)
    }

    pub fn thread_pool(&self) -> Result<ThreadPool, PeatfluxError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| PeatfluxError::InvalidParameter("threads".to_string(), "a buildable pool".to_string(), e.to_string()))
    }

    pub fn validate(&self) -> Result<(), PeatfluxError> {
        self.schema.validate()?;
        validate_positive_count(self.folds.n_folds, "folds.n_folds")?;
        validate_positive_count(self.threads, "threads")?;
        for range in &self.folds.weeks {
            if range.first > range.last {
                return Err(PeatfluxError::InvalidParameter(
                    "folds.weeks".to_string(),
                    "first <= last".to_string(),
                    format!("{}..={}", range.first, range.last),
                ));
            }
        }
        if self.sbfs.cv_folds < 2 {
            return Err(PeatfluxError::InvalidParameter(
                "sbfs.cv_folds".to_string(),
                "at least 2".to_string(),
                self.sbfs.cv_folds.to_string(),
            ));
        }
        validate_positive_count(self.sbfs.floor, "sbfs.floor")?;
        validate_positive_count(self.sbfs.bias_variance_rounds, "sbfs.bias_variance_rounds")?;
        self.sbfs.booster.validate()?;
        validate_positive_count(self.bootstrap.predictive_rounds, "bootstrap.predictive_rounds")?;
        validate_positive_count(self.bootstrap.predictive_sample_size, "bootstrap.predictive_sample_size")?;
        validate_positive_count(self.bootstrap.attribution_rounds, "bootstrap.attribution_rounds")?;
        validate_positive_count(self.bootstrap.attribution_sample_size, "bootstrap.attribution_sample_size")?;
        validate_positive_float_parameter(self.simulation.histogram_bin_width, "simulation.histogram_bin_width")?;
        validate_positive_float_parameter(self.simulation.depth_grid.step, "simulation.depth_grid.step")?;
        for f in [&self.simulation.first, &self.simulation.second] {
            validate_positive_float_parameter(f.half_width(), &format!("simulation.{}.half_width", f.name))?;
        }
        match self.attribution.axis {
            BinAxis::FeatureValue { resolution } => {
                validate_positive_float_parameter(resolution, "attribution.axis.resolution")?
            }
            BinAxis::Attribution { decimals } if !(0..=12).contains(&decimals) => {
                return Err(PeatfluxError::InvalidParameter(
                    "attribution.axis.decimals".to_string(),
                    "0..=12".to_string(),
                    decimals.to_string(),
                ))
            }
            BinAxis::Attribution { .. } => {}
        }
        self.importance.booster.validate()?;
        for spec in self.variants.values() {
            spec.hyperparameters.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_config_is_default() {
        let cfg = ExperimentConfig::from_json("{}").unwrap();
        assert_eq!(cfg.folds, FoldConfig::default());
        assert_eq!(cfg.sbfs.floor, 4);
        assert_eq!(cfg.sbfs.booster, Hyperparameters::new(0.05, 6, 1000, 1.0));
        assert_eq!(cfg.bootstrap.attribution_rounds, 10000);
        assert_eq!(cfg.simulation.depth_grid.values().len(), 125);
        assert!(cfg.validate().is_ok());
        assert!(matches!(cfg.seed("bootstrap"), Err(PeatfluxError::MissingSeed(_))));
    }

    #[test]
    fn test_variant_override() {
        let json = r#"{
            "seed": 1,
            "variants": {"M2": {"universe": ["PAR_abs", "Tsfc"], "features": ["Tsfc"],
                "hyperparameters": {"learning_rate": 0.1, "max_depth": 3, "n_estimators": 10, "subsample": 1.0}}},
            "attribution": {"axis": {"Attribution": {"decimals": 1}}}
        }"#;
        let cfg = ExperimentConfig::from_json(json).unwrap();
        assert_eq!(cfg.seed("bootstrap").unwrap(), 1);
        assert_eq!(cfg.variant(ModelVariant::M2).features, vec!["Tsfc".to_string()]);
        assert_eq!(cfg.variant(ModelVariant::M1), ModelVariant::M1.spec());
        assert_eq!(cfg.attribution.axis, BinAxis::Attribution { decimals: 1 });
    }

    #[test]
    fn test_invalid_config() {
        let mut cfg = ExperimentConfig::default();
        cfg.sbfs.cv_folds = 1;
        assert!(cfg.validate().is_err());
        let mut cfg = ExperimentConfig::default();
        cfg.attribution.axis = BinAxis::FeatureValue { resolution: 0.0 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_reversed_week_range() {
        let mut cfg = ExperimentConfig::default();
        cfg.folds.weeks = vec![WeekRange::new(1, 5), WeekRange::new(52, 35)];
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, PeatfluxError::InvalidParameter(ref name, ..) if name == "folds.weeks"));
        cfg.folds.weeks = vec![WeekRange::new(7, 7)];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let mut cfg = ExperimentConfig::default();
        cfg.seed = Some(42);
        cfg.folds.weeks = vec![WeekRange::new(1, 5), WeekRange::new(35, 52)];
        cfg.folds.overflow = Vec::new();
        cfg.save(&path).unwrap();
        assert_eq!(ExperimentConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn test_grid_range() {
        let g = GridRange {
            start: 0.0,
            stop: 2.0,
            step: 0.5,
        };
        assert_eq!(g.values(), vec![0.0, 0.5, 1.0, 1.5]);
    }
}
