use crate::config::ConfigIO;
use crate::errors::PeatfluxError;
use crate::utils::{items_to_strings, validate_float_parameter, validate_positive_count, validate_positive_float_parameter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tuned settings of one boosted-tree model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub max_depth: usize,
    pub n_estimators: usize,
    /// Share of training rows drawn, without replacement, for each tree.
    pub subsample: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new(0.05, 6, 1000, 1.0)
    }
}

impl Hyperparameters {
    pub const fn new(learning_rate: f64, max_depth: usize, n_estimators: usize, subsample: f64) -> Self {
        Hyperparameters {
            learning_rate,
            max_depth,
            n_estimators,
            subsample,
        }
    }

    pub fn validate(&self) -> Result<(), PeatfluxError> {
        validate_positive_float_parameter(self.learning_rate, "learning_rate")?;
        validate_float_parameter(self.subsample, 0.0, 1.0, "subsample")?;
        validate_positive_count(self.max_depth, "max_depth")?;
        validate_positive_count(self.n_estimators, "n_estimators")
    }
}

impl ConfigIO for Hyperparameters {}

/// Method used to summarise how much each feature is used by the trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportanceMethod {
    /// The number of times a feature is used to split the data across all trees.
    Weight,
    /// The average split gain across all splits the feature is used in.
    Gain,
    /// The average coverage across all splits the feature is used in.
    Cover,
    /// The total gain across all splits the feature is used in.
    TotalGain,
    /// The total coverage across all splits the feature is used in.
    TotalCover,
}

impl FromStr for ImportanceMethod {
    type Err = PeatfluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weight" => Ok(ImportanceMethod::Weight),
            "gain" => Ok(ImportanceMethod::Gain),
            "cover" => Ok(ImportanceMethod::Cover),
            "total_gain" => Ok(ImportanceMethod::TotalGain),
            "total_cover" => Ok(ImportanceMethod::TotalCover),
            _ => Err(PeatfluxError::ParseString(
                s.to_string(),
                "ImportanceMethod".to_string(),
                items_to_strings(vec!["weight", "gain", "cover", "total_gain", "total_cover"]),
            )),
        }
    }
}

fn default_lambda() -> f64 {
    1.0
}
fn default_min_child_weight() -> f64 {
    1.0
}
fn default_max_bin() -> u16 {
    256
}
fn default_log_iterations() -> usize {
    0
}

/// Everything a [`GradientBooster`](crate::booster::GradientBooster) needs
/// to fit: the tuned hyperparameters plus the fixed regularisation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterConfig {
    #[serde(flatten)]
    pub hyperparameters: Hyperparameters,
    /// L2 penalty on leaf weights.
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Minimum number of rows on each side of a split.
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,
    /// Maximum number of histogram bins per feature.
    #[serde(default = "default_max_bin")]
    pub max_bin: u16,
    /// Seed of the per-tree row subsampling.
    #[serde(default)]
    pub seed: u64,
    /// Log progress every this many trees, 0 disables it.
    #[serde(default = "default_log_iterations")]
    pub log_iterations: usize,
}

impl Default for BoosterConfig {
    fn default() -> Self {
        BoosterConfig::from(Hyperparameters::default())
    }
}

impl From<Hyperparameters> for BoosterConfig {
    fn from(hyperparameters: Hyperparameters) -> Self {
        BoosterConfig {
            hyperparameters,
            lambda: default_lambda(),
            min_child_weight: default_min_child_weight(),
            max_bin: default_max_bin(),
            seed: 0,
            log_iterations: default_log_iterations(),
        }
    }
}

impl BoosterConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), PeatfluxError> {
        self.hyperparameters.validate()?;
        if self.lambda.is_nan() || self.lambda < 0.0 {
            return Err(PeatfluxError::InvalidParameter(
                "lambda".to_string(),
                "non negative real value".to_string(),
                self.lambda.to_string(),
            ));
        }
        if self.max_bin < 2 {
            return Err(PeatfluxError::InvalidParameter(
                "max_bin".to_string(),
                "at least 2".to_string(),
                self.max_bin.to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigIO for BoosterConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_booster_config_default() {
        let config = BoosterConfig::default();
        assert_eq!(config.hyperparameters.n_estimators, 1000);
        assert_eq!(config.hyperparameters.learning_rate, 0.05);
        assert_eq!(config.max_bin, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hyperparameters_flattened_json() {
        let json = r#"{"learning_rate":0.001,"max_depth":6,"n_estimators":4000,"subsample":0.7,"seed":3}"#;
        let config = BoosterConfig::from_json(json).unwrap();
        assert_eq!(config.hyperparameters, Hyperparameters::new(0.001, 6, 4000, 0.7));
        assert_eq!(config.seed, 3);
        assert_eq!(config.lambda, 1.0);
    }

    #[test]
    fn test_invalid_hyperparameters() {
        assert!(Hyperparameters::new(0.0, 6, 10, 1.0).validate().is_err());
        assert!(Hyperparameters::new(0.1, 6, 10, 1.5).validate().is_err());
        assert!(Hyperparameters::new(0.1, 0, 10, 1.0).validate().is_err());
        assert!(Hyperparameters::new(0.1, 6, 0, 1.0).validate().is_err());
    }

    #[test]
    fn test_config_io_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("hyperparameters.json");
        let hp = Hyperparameters::new(0.005, 6, 750, 0.65);
        hp.save(&file_path).unwrap();
        assert_eq!(Hyperparameters::load(&file_path).unwrap(), hp);
        assert_eq!("total_gain".parse::<ImportanceMethod>().unwrap(), ImportanceMethod::TotalGain);
    }
}
