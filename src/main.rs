use clap::{Args, Parser, Subcommand};
use log::info;
use peatflux::bootstrap::{zero_crossing, StopSignal};
use peatflux::config::{BinAxis, ConfigIO, ExperimentConfig};
use peatflux::folds::FoldSelection;
use peatflux::pipeline::{summarize, Pipeline};
use peatflux::report;
use peatflux::utils::write_atomic;
use peatflux::{ModelVariant, PeatfluxError};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "peatflux")]
#[command(about = "Feature selection, validation and interpretation of CO2 flux models over peatland")]
#[command(version)]
struct Cli {
    /// More log output, repeat for debug output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Merged observation table (CSV)
    #[arg(short, long)]
    input: PathBuf,

    /// Directory the result tables are written to
    #[arg(short, long)]
    output: PathBuf,

    /// Model variant, M1 to M6. Defaults to the simulation variant
    #[arg(long)]
    variant: Option<ModelVariant>,

    /// Experiment configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for every randomized step, overrides the configuration
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign weeks to folds and report fold sizes
    Partition {
        #[command(flatten)]
        common: Common,
    },
    /// Evaluate a variant's production model per test fold
    Evaluate {
        #[command(flatten)]
        common: Common,

        /// Test fold, 1 based, or all
        #[arg(long, default_value = "all")]
        test_fold: FoldSelection,
    },
    /// Floating feature selection per test fold
    Select {
        #[command(flatten)]
        common: Common,

        /// Test fold, 1 based, or all
        #[arg(long, default_value = "all")]
        test_fold: FoldSelection,
    },
    /// Counterfactual response curves with bootstrap bands
    Simulate {
        #[command(flatten)]
        common: Common,
    },
    /// Bootstrap bands of a feature's Shapley attributions
    Attribution {
        #[command(flatten)]
        common: Common,
    },
    /// Normalised gain importance of a model fit on the whole table
    Importance {
        #[command(flatten)]
        common: Common,
    },
}

impl Commands {
    fn common(&self) -> &Common {
        match self {
            Commands::Partition { common }
            | Commands::Evaluate { common, .. }
            | Commands::Select { common, .. }
            | Commands::Simulate { common }
            | Commands::Attribution { common }
            | Commands::Importance { common } => common,
        }
    }
}

fn load_config(common: &Common) -> Result<ExperimentConfig, PeatfluxError> {
    let mut cfg = match &common.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    if common.seed.is_some() {
        cfg.seed = common.seed;
    }
    Ok(cfg)
}

fn out_path(dir: &Path, name: String) -> PathBuf {
    dir.join(name)
}

/// Run one command, returning the number of failed folds.
fn run(command: &Commands, pipeline: &Pipeline) -> Result<usize, PeatfluxError> {
    let common = command.common();
    let variant = common.variant.unwrap_or(pipeline.cfg.simulation.variant);
    let out = common.output.as_path();
    fs::create_dir_all(out).map_err(|e| PeatfluxError::UnableToWrite(format!("{}: {}", out.display(), e)))?;
    let table = pipeline.load_table(&common.input, variant)?;

    match command {
        Commands::Partition { .. } => {
            let (assignment, folds) = pipeline.partition(&table)?;
            report::write_folds(out_path(out, format!("folds_{}.csv", variant)), &assignment, &folds)?;
            Ok(0)
        }
        Commands::Evaluate { test_fold, .. } => {
            let results = pipeline.evaluate_folds(&table, variant, *test_fold)?;
            for (fold, result) in &results {
                if let Ok(evaluation) = result {
                    report::write_predictions(
                        out_path(out, format!("predictions_{}_fold{}.csv", variant, fold + 1)),
                        &evaluation.observed,
                        &evaluation.predicted,
                    )?;
                }
            }
            let rows: Vec<_> = results
                .iter()
                .map(|(fold, r)| (*fold, r.as_ref().map(|e| e.record).map_err(|e| e.to_string())))
                .collect();
            report::write_fold_evaluations(out_path(out, format!("evaluation_{}.csv", variant)), &rows)?;
            let hyperparameters = pipeline.cfg.variant(variant).hyperparameters;
            write_atomic(
                out_path(out, format!("hyperparameters_{}.json", variant)),
                hyperparameters.json_dump()?.as_bytes(),
            )?;
            Ok(summarize("Evaluation", &results))
        }
        Commands::Select { test_fold, .. } => {
            let results = pipeline.select_features(&table, variant, *test_fold)?;
            for (fold, result) in &results {
                if let Ok(selection) = result {
                    report::write_selection_metrics(
                        out_path(out, format!("metrics_{}_fold{}.csv", variant, fold + 1)),
                        selection,
                    )?;
                    report::write_selection_subsets(
                        out_path(out, format!("subsets_{}_fold{}.csv", variant, fold + 1)),
                        selection,
                    )?;
                }
            }
            Ok(summarize("Selection", &results))
        }
        Commands::Simulate { .. } => {
            let outcomes = pipeline.simulate(&table, variant, StopSignal::new())?;
            let sim = &pipeline.cfg.simulation;
            let names = (sim.first.name.as_str(), sim.second.name.as_str());
            report::write_simulation(out_path(out, format!("simulation_{}.csv", variant)), names, &outcomes)?;
            report::write_simulation_gaps(out_path(out, format!("simulation_gaps_{}.csv", variant)), names, &outcomes)?;
            report::write_depth_histograms(
                out_path(out, format!("depth_histograms_{}.csv", variant)),
                names,
                &outcomes,
            )?;
            Ok(0)
        }
        Commands::Attribution { .. } => {
            let bins = pipeline.attribution(&table, variant)?;
            let feature = &pipeline.cfg.attribution.feature;
            let key = match pipeline.cfg.attribution.axis {
                BinAxis::FeatureValue { .. } => feature.as_str(),
                BinAxis::Attribution { .. } => "attribution",
            };
            if let (BinAxis::Attribution { .. }, Some(bin)) = (pipeline.cfg.attribution.axis, zero_crossing(&bins)) {
                info!(
                    "Attribution of {} changes sign at {:.3} ({:.3} to {:.3}).",
                    feature, bin.band.mean, bin.band.p5, bin.band.p95
                );
            }
            report::write_attribution(out_path(out, format!("attribution_{}_{}.csv", variant, feature)), key, &bins)?;
            Ok(0)
        }
        Commands::Importance { .. } => {
            let importance = pipeline.importance(&table, variant)?;
            let (names, values): (Vec<String>, Vec<f64>) = importance.into_iter().unzip();
            report::write_importance(out_path(out, format!("importance_{}.csv", variant)), &names, &values)?;
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = load_config(cli.command.common())
        .and_then(Pipeline::new)
        .and_then(|pipeline| {
            let pool = pipeline.cfg.thread_pool()?;
            pool.install(|| run(&cli.command, &pipeline))
        });
    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("Error: {} test folds failed, see the log for details.", failed);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
