//! Model variants
//!
//! The six model configurations of the study. M1 to M3 are trained on tower
//! and airborne data, M4 to M6 drop airborne footprints over built-up area.
//! The variants differ in how peat depth enters the feature universe.
use crate::booster::config::Hyperparameters;
use crate::errors::PeatfluxError;
use crate::table::{Observation, ObservationTable, Source};
use crate::utils::items_to_strings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 6] = [
        ModelVariant::M1,
        ModelVariant::M2,
        ModelVariant::M3,
        ModelVariant::M4,
        ModelVariant::M5,
        ModelVariant::M6,
    ];

    /// Default selection universe, selected subset, tuned hyperparameters
    /// and row filter of the variant.
    pub fn spec(&self) -> VariantSpec {
        let base = [
            "PAR_abs", "Tsfc", "RH", "EVI", "SuC", "Wat", "Bld", "FnB", "zandG", "zeeK", "gedA",
        ];
        let depth: &[&str] = match self {
            ModelVariant::M1 | ModelVariant::M4 => &["PeatD", "OWD"],
            ModelVariant::M2 | ModelVariant::M5 => &["Exp_PeatD"],
            ModelVariant::M3 | ModelVariant::M6 => &["PeatD", "BBB"],
        };
        let (features, hyperparameters): (&[&str], Hyperparameters) = match self {
            ModelVariant::M1 | ModelVariant::M2 | ModelVariant::M3 => (
                &["PAR_abs", "Tsfc", "RH", "EVI", "SuC", "Bld"],
                Hyperparameters::new(0.001, 6, 4000, 0.7),
            ),
            ModelVariant::M4 => (
                &["PAR_abs", "Tsfc", "RH", "EVI", "SuC", "Wat", "Bld", "OWD"],
                Hyperparameters::new(0.005, 6, 750, 0.65),
            ),
            ModelVariant::M5 => (
                &["PAR_abs", "Tsfc", "RH", "EVI", "SuC", "Wat", "Bld", "Exp_PeatD"],
                Hyperparameters::new(0.001, 6, 4000, 0.55),
            ),
            ModelVariant::M6 => (
                &["PAR_abs", "Tsfc", "RH", "EVI", "SuC", "Wat", "Bld"],
                Hyperparameters::new(0.005, 6, 1000, 0.6),
            ),
        };
        let built_filter = match self {
            ModelVariant::M4 | ModelVariant::M5 | ModelVariant::M6 => Some(BuiltFilter::default()),
            _ => None,
        };
        VariantSpec {
            universe: base.iter().chain(depth.iter()).map(|s| s.to_string()).collect(),
            features: features.iter().map(|s| s.to_string()).collect(),
            hyperparameters,
            built_filter,
        }
    }
}

impl FromStr for ModelVariant {
    type Err = PeatfluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M1" => Ok(ModelVariant::M1),
            "M2" => Ok(ModelVariant::M2),
            "M3" => Ok(ModelVariant::M3),
            "M4" => Ok(ModelVariant::M4),
            "M5" => Ok(ModelVariant::M5),
            "M6" => Ok(ModelVariant::M6),
            _ => Err(PeatfluxError::ParseString(
                s.to_string(),
                "ModelVariant".to_string(),
                items_to_strings(vec!["M1", "M2", "M3", "M4", "M5", "M6"]),
            )),
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn default_built_feature() -> String {
    "Bld".to_string()
}
fn default_built_threshold() -> f64 {
    0.15
}
fn default_built_source() -> Source {
    Source::Airborne
}

/// Drop rows of one source whose built-up fraction exceeds a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltFilter {
    #[serde(default = "default_built_feature")]
    pub feature: String,
    #[serde(default = "default_built_threshold")]
    pub threshold: f64,
    #[serde(default = "default_built_source")]
    pub source: Source,
}

impl Default for BuiltFilter {
    fn default() -> Self {
        BuiltFilter {
            feature: default_built_feature(),
            threshold: default_built_threshold(),
            source: default_built_source(),
        }
    }
}

impl BuiltFilter {
    pub fn apply(&self, table: &ObservationTable) -> Result<ObservationTable, PeatfluxError> {
        let f = table.feature_index(&self.feature)?;
        Ok(table.filter(|r: &Observation| !(r.source == self.source && r.features[f] > self.threshold)))
    }
}

/// Everything that differs between two model variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    /// Features the floating selection starts from.
    pub universe: Vec<String>,
    /// Subset used for the production model.
    pub features: Vec<String>,
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub built_filter: Option<BuiltFilter>,
}

impl VariantSpec {
    /// Apply the row filter, if the variant has one.
    pub fn filter_table(&self, table: &ObservationTable) -> Result<ObservationTable, PeatfluxError> {
        match &self.built_filter {
            Some(f) => f.apply(table),
            None => Ok(table.clone()),
        }
    }

    pub fn validate(&self, table: &ObservationTable) -> Result<(), PeatfluxError> {
        self.hyperparameters.validate()?;
        table.feature_indices(&self.universe)?;
        table.feature_indices(&self.features)?;
        if self.universe.is_empty() {
            return Err(PeatfluxError::InvalidParameter(
                "universe".to_string(),
                "at least one feature".to_string(),
                "none".to_string(),
            ));
        }
        Ok(())
    }
}
