// Modules
pub mod booster;
pub mod bootstrap;
pub mod config;
pub mod cross_validation;
pub mod data;
pub mod errors;
pub mod evaluator;
pub mod folds;
pub mod metric;
pub mod pipeline;
pub mod regressor;
pub mod report;
pub mod sbfs;
pub mod scaler;
pub mod simulation;
pub mod table;
pub mod trainer;
pub mod utils;
pub mod variant;

// Individual classes, and functions
pub use booster::GradientBooster;
pub use config::{ConfigIO, ExperimentConfig};
pub use data::Matrix;
pub use errors::PeatfluxError;
pub use pipeline::Pipeline;
pub use table::ObservationTable;
pub use variant::ModelVariant;
