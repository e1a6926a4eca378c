//! Pipeline
//!
//! The operations behind every command, wired from an [`ExperimentConfig`].
//! Batch operations return one result per test fold, so a fold that fails
//! for lack of data or variance does not stop the others.
use crate::booster::config::BoosterConfig;
use crate::booster::GradientBooster;
use crate::bootstrap::{AttributionBin, AttributionBootstrap, AttributionPair, PredictiveBootstrap, StopSignal};
use crate::config::ExperimentConfig;
use crate::data::{Dataset, TrainSet};
use crate::errors::PeatfluxError;
use crate::evaluator::{Evaluator, MetricsRecord};
use crate::folds::{FoldAssignment, FoldSelection, Folds};
use crate::sbfs::{select_and_evaluate, SelectionReport};
use crate::scaler::StandardScaler;
use crate::simulation::{CounterfactualSimulator, PairOutcome};
use crate::table::ObservationTable;
use crate::trainer::FittedPipeline;
use crate::utils::fmt_vec_output;
use crate::variant::ModelVariant;
use log::{info, warn};
use std::path::Path;

/// Held-out evaluation of a variant's production model on one test fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldEvaluation {
    pub record: MetricsRecord,
    pub observed: Vec<f64>,
    pub predicted: Vec<f64>,
}

/// Results keyed by zero based test fold.
pub type FoldResults<T> = Vec<(usize, Result<T, PeatfluxError>)>;

/// Log the successes and failures of a batch and keep going.
pub fn summarize<T>(what: &str, results: &FoldResults<T>) -> usize {
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    for (fold, result) in results {
        if let Err(e) = result {
            warn!("{} failed for test fold {}: {}", what, fold + 1, e);
        }
    }
    info!("{}: {} succeeded, {} failed.", what, results.len() - failed, failed);
    failed
}

fn evaluate_fold(
    template: &GradientBooster,
    evaluator: &Evaluator,
    table: &ObservationTable,
    folds: &Folds,
    features: &[usize],
    test_fold: usize,
) -> Result<FoldEvaluation, PeatfluxError> {
    let (train_rows, test_rows) = folds.split(test_fold)?;
    let train = table.train_set(&train_rows, features)?;
    let test = table.test_set(&test_rows, features)?;
    let (scaler, train) = StandardScaler::fit_transform(&train)?;
    let test = scaler.transform_test(&test)?;
    let (record, predicted) = evaluator.evaluate(template, &train, &test, test_fold)?;
    Ok(FoldEvaluation {
        record,
        observed: test.dataset().y.clone(),
        predicted,
    })
}

pub struct Pipeline {
    pub cfg: ExperimentConfig,
}

impl Pipeline {
    pub fn new(cfg: ExperimentConfig) -> Result<Self, PeatfluxError> {
        cfg.validate()?;
        Ok(Pipeline { cfg })
    }

    /// Read the table and apply the variant's row filter.
    pub fn load_table<P: AsRef<Path>>(&self, path: P, variant: ModelVariant) -> Result<ObservationTable, PeatfluxError> {
        let table = ObservationTable::from_csv(path, &self.cfg.schema)?;
        let spec = self.cfg.variant(variant);
        spec.validate(&table)?;
        let filtered = spec.filter_table(&table)?;
        info!(
            "Loaded {} rows for {}, {} after filtering.",
            table.len(),
            variant,
            filtered.len()
        );
        Ok(filtered)
    }

    pub fn partition(&self, table: &ObservationTable) -> Result<(FoldAssignment, Folds), PeatfluxError> {
        let assignment = FoldAssignment::new(&self.cfg.folds)?;
        let folds = assignment.partition(table);
        info!(
            "Fold sizes {:?}, {} rows outside the configured weeks.",
            folds.sizes(),
            folds.excluded()
        );
        Ok((assignment, folds))
    }

    fn production_template(&self, variant: ModelVariant, seed: u64) -> Result<GradientBooster, PeatfluxError> {
        GradientBooster::new(self.cfg.production_booster(variant, seed))
    }

    /// Every row, with the variant's selected features as columns.
    fn full_dataset(&self, table: &ObservationTable, variant: ModelVariant) -> Result<Dataset, PeatfluxError> {
        let features = table.feature_indices(&self.cfg.variant(variant).features)?;
        let rows: Vec<usize> = (0..table.len()).collect();
        Ok(table.dataset(&rows, &features))
    }

    /// Fit the variant's production model on the selected features of the
    /// training folds and score it on the test fold.
    pub fn evaluate_folds(
        &self,
        table: &ObservationTable,
        variant: ModelVariant,
        selection: FoldSelection,
    ) -> Result<FoldResults<FoldEvaluation>, PeatfluxError> {
        let seed = self.cfg.seed("evaluate")?;
        let template = self.production_template(variant, seed)?;
        let features = table.feature_indices(&self.cfg.variant(variant).features)?;
        let evaluator = Evaluator::new(self.cfg.sbfs.bias_variance_rounds, seed);
        let (_, folds) = self.partition(table)?;
        let mut results = Vec::new();
        for test_fold in selection.folds(folds.n_folds())? {
            match evaluate_fold(&template, &evaluator, table, &folds, &features, test_fold) {
                Err(e) if !e.is_recoverable() => return Err(e),
                Ok(evaluation) => {
                    info!(
                        "{} on test fold {}: R2 {:.4}, MSE {:.4}.",
                        variant,
                        test_fold + 1,
                        evaluation.record.r2,
                        evaluation.record.mse
                    );
                    results.push((test_fold, Ok(evaluation)));
                }
                Err(e) => results.push((test_fold, Err(e))),
            }
        }
        Ok(results)
    }

    /// Floating selection over the variant's universe, per test fold.
    pub fn select_features(
        &self,
        table: &ObservationTable,
        variant: ModelVariant,
        selection: FoldSelection,
    ) -> Result<FoldResults<SelectionReport>, PeatfluxError> {
        let seed = self.cfg.seed("select")?;
        let spec = self.cfg.variant(variant);
        let universe = table.feature_indices(&spec.universe)?;
        let template = GradientBooster::new(BoosterConfig::from(self.cfg.sbfs.booster).with_seed(seed))?;
        let evaluator = Evaluator::new(self.cfg.sbfs.bias_variance_rounds, seed);
        let (_, folds) = self.partition(table)?;
        let mut results = Vec::new();
        for test_fold in selection.folds(folds.n_folds())? {
            info!("Selecting features for {} with test fold {}.", variant, test_fold + 1);
            let result = (|| -> Result<SelectionReport, PeatfluxError> {
                let (train_rows, test_rows) = folds.split(test_fold)?;
                let train = table.train_set(&train_rows, &universe)?;
                let test = table.test_set(&test_rows, &universe)?;
                let (scaler, train) = StandardScaler::fit_transform(&train)?;
                let test = scaler.transform_test(&test)?;
                select_and_evaluate(
                    &template,
                    &self.cfg.sbfs,
                    &evaluator,
                    &spec.universe,
                    &train,
                    &test,
                    test_fold,
                )
            })();
            match result {
                Err(e) if !e.is_recoverable() => return Err(e),
                r => results.push((test_fold, r)),
            }
        }
        Ok(results)
    }

    /// Response curves of the production model fit on the whole table, with
    /// bands from the predictive bootstrap.
    pub fn simulate(
        &self,
        table: &ObservationTable,
        variant: ModelVariant,
        stop: StopSignal,
    ) -> Result<Vec<PairOutcome>, PeatfluxError> {
        let seed = self.cfg.seed("simulate")?;
        let template = self.production_template(variant, seed)?;
        let data = self.full_dataset(table, variant)?;
        let simulator = CounterfactualSimulator::new(&self.cfg.simulation, &data.feature_names)?;
        let production = FittedPipeline::fit(&template, &TrainSet::from_dataset(data.clone()))?;
        let bootstrap = PredictiveBootstrap::new(&self.cfg.bootstrap, stop).with_model_seed(seed);
        let bands = bootstrap.run(data.rows, simulator.n_points(), |_, rows| {
            let sample = data.select_rows(rows);
            let fitted = FittedPipeline::fit(&template, &TrainSet::from_dataset(sample.clone()))?;
            simulator.predict_grid(&fitted, &sample)
        })?;
        simulator.run(&production, &data, Some(&bands))
    }

    /// Attributions of one feature by the production model fit on the whole
    /// table, summarised by the attribution bootstrap.
    pub fn attribution(&self, table: &ObservationTable, variant: ModelVariant) -> Result<Vec<AttributionBin>, PeatfluxError> {
        let seed = self.cfg.seed("attribution")?;
        let template = self.production_template(variant, seed)?;
        let data = self.full_dataset(table, variant)?;
        let feature = data
            .feature_names
            .iter()
            .position(|f| *f == self.cfg.attribution.feature)
            .ok_or_else(|| PeatfluxError::UnknownFeature(self.cfg.attribution.feature.clone()))?;
        let production = FittedPipeline::fit(&template, &TrainSet::from_dataset(data.clone()))?;
        let contributions = production.explain(&data)?;
        let values = data.get_col(feature);
        let pairs: Vec<AttributionPair> = (0..data.rows)
            .map(|r| AttributionPair {
                value: values[r],
                attribution: *contributions.get(r, feature),
                observation: r,
            })
            .collect();
        AttributionBootstrap::new(&self.cfg.bootstrap, self.cfg.attribution.axis).run(&pairs)
    }

    /// Normalised importance of the variant's features, from a booster fit on
    /// the whole table.
    pub fn importance(&self, table: &ObservationTable, variant: ModelVariant) -> Result<Vec<(String, f64)>, PeatfluxError> {
        let seed = self.cfg.seed("importance")?;
        let booster = GradientBooster::new(BoosterConfig::from(self.cfg.importance.booster).with_seed(seed))?;
        let data = self.full_dataset(table, variant)?;
        let fitted = FittedPipeline::fit(&booster, &TrainSet::from_dataset(data.clone()))?;
        let importance = fitted.model.calculate_feature_importance(self.cfg.importance.method, true);
        info!("{:?} importance of {}: {}", self.cfg.importance.method, variant, fmt_vec_output(&importance));
        Ok(data.feature_names.into_iter().zip(importance).collect())
    }
}
