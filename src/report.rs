//! CSV artifacts
//!
//! Every table is rendered in memory and moved into place in one rename.
use crate::bootstrap::{AttributionBin, Band};
use crate::errors::PeatfluxError;
use crate::evaluator::MetricsRecord;
use crate::folds::{FoldAssignment, Folds};
use crate::sbfs::{SelectionReport, StepOutcome};
use crate::simulation::PairOutcome;
use crate::utils::write_atomic;
use std::path::Path;

fn write_table<P, I>(path: P, header: &[&str], rows: I) -> Result<(), PeatfluxError>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = Vec<String>>,
{
    let path = path.as_ref();
    let err = |e: csv::Error| PeatfluxError::UnableToWrite(format!("{}: {}", path.display(), e));
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header).map_err(err)?;
    for row in rows {
        writer.write_record(&row).map_err(err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PeatfluxError::UnableToWrite(format!("{}: {}", path.display(), e)))?;
    write_atomic(path, &bytes)
}

fn metric_cells(r: &MetricsRecord) -> Vec<String> {
    vec![
        r.mse.to_string(),
        r.bias.to_string(),
        r.variance.to_string(),
        r.r2.to_string(),
        r.explained_variance.to_string(),
    ]
}

fn band_cells(band: Option<Band>) -> Vec<String> {
    match band {
        Some(b) => vec![b.mean.to_string(), b.p5.to_string(), b.p95.to_string()],
        None => vec![String::new(); 3],
    }
}

/// `fold,rows,weeks`, folds 1-based and weeks `;`-separated.
pub fn write_folds<P: AsRef<Path>>(path: P, assignment: &FoldAssignment, folds: &Folds) -> Result<(), PeatfluxError> {
    let sizes = folds.sizes();
    write_table(
        path,
        &["fold", "rows", "weeks"],
        (0..assignment.n_folds()).map(|f| {
            let weeks: Vec<String> = assignment.weeks_in(f).iter().map(|w| w.to_string()).collect();
            vec![(f + 1).to_string(), sizes[f].to_string(), weeks.join(";")]
        }),
    )
}

/// `k,mse,bias,var,r2,expl_var,status` of one selection run.
pub fn write_selection_metrics<P: AsRef<Path>>(path: P, report: &SelectionReport) -> Result<(), PeatfluxError> {
    write_table(
        path,
        &["k", "mse", "bias", "var", "r2", "expl_var", "status"],
        report.steps.iter().map(|s| {
            let mut row = vec![s.k.to_string()];
            match &s.outcome {
                StepOutcome::Evaluated(r) => {
                    row.extend(metric_cells(r));
                    row.push("ok".to_string());
                }
                StepOutcome::Failed(msg) => {
                    row.extend(vec![String::new(); 5]);
                    row.push(msg.clone());
                }
            }
            row
        }),
    )
}

/// `k,cv_score,features` of one selection run.
pub fn write_selection_subsets<P: AsRef<Path>>(path: P, report: &SelectionReport) -> Result<(), PeatfluxError> {
    write_table(
        path,
        &["k", "cv_score", "features"],
        report
            .steps
            .iter()
            .map(|s| vec![s.k.to_string(), s.cv_score.to_string(), s.features.join(";")]),
    )
}

/// One row per test fold, failed folds keep their message.
pub fn write_fold_evaluations<P: AsRef<Path>>(
    path: P,
    results: &[(usize, Result<MetricsRecord, String>)],
) -> Result<(), PeatfluxError> {
    write_table(
        path,
        &["test_fold", "k", "mse", "bias", "var", "r2", "expl_var", "status"],
        results.iter().map(|(fold, result)| {
            let mut row = vec![(fold + 1).to_string()];
            match result {
                Ok(r) => {
                    row.push(r.k.to_string());
                    row.extend(metric_cells(r));
                    row.push("ok".to_string());
                }
                Err(msg) => {
                    row.extend(vec![String::new(); 6]);
                    row.push(msg.clone());
                }
            }
            row
        }),
    )
}

pub fn write_predictions<P: AsRef<Path>>(path: P, observed: &[f64], predicted: &[f64]) -> Result<(), PeatfluxError> {
    write_table(
        path,
        &["row", "observed", "predicted"],
        observed
            .iter()
            .zip(predicted)
            .enumerate()
            .map(|(i, (o, p))| vec![i.to_string(), o.to_string(), p.to_string()]),
    )
}

/// Curve points of every simulated pair.
pub fn write_simulation<P: AsRef<Path>>(
    path: P,
    names: (&str, &str),
    outcomes: &[PairOutcome],
) -> Result<(), PeatfluxError> {
    let mut rows = Vec::new();
    for outcome in outcomes {
        if let PairOutcome::Curve { pair, points, .. } = outcome {
            for p in points {
                let mut row = vec![
                    pair.first.to_string(),
                    pair.second.to_string(),
                    p.depth.to_string(),
                    p.prediction.to_string(),
                ];
                row.extend(band_cells(p.band));
                rows.push(row);
            }
        }
    }
    write_table(path, &[names.0, names.1, "depth", "prediction", "mean", "p5", "p95"], rows)
}

/// Pairs with no observation inside their windows.
pub fn write_simulation_gaps<P: AsRef<Path>>(
    path: P,
    names: (&str, &str),
    outcomes: &[PairOutcome],
) -> Result<(), PeatfluxError> {
    write_table(
        path,
        &[names.0, names.1],
        outcomes.iter().filter_map(|o| match o {
            PairOutcome::NoData(pair) => Some(vec![pair.first.to_string(), pair.second.to_string()]),
            PairOutcome::Curve { .. } => None,
        }),
    )
}

pub fn write_depth_histograms<P: AsRef<Path>>(
    path: P,
    names: (&str, &str),
    outcomes: &[PairOutcome],
) -> Result<(), PeatfluxError> {
    let mut rows = Vec::new();
    for outcome in outcomes {
        if let PairOutcome::Curve { pair, histogram, .. } = outcome {
            for bin in histogram {
                rows.push(vec![
                    pair.first.to_string(),
                    pair.second.to_string(),
                    bin.lower.to_string(),
                    bin.upper.to_string(),
                    bin.count.to_string(),
                ]);
            }
        }
    }
    write_table(path, &[names.0, names.1, "lower", "upper", "count"], rows)
}

/// `key,mean,p5,p95,n_unique`, the key column named after the bin axis.
pub fn write_attribution<P: AsRef<Path>>(path: P, key: &str, bins: &[AttributionBin]) -> Result<(), PeatfluxError> {
    write_table(
        path,
        &[key, "mean", "p5", "p95", "n_unique"],
        bins.iter().map(|b| {
            let mut row = vec![b.key.to_string()];
            row.extend(band_cells(Some(b.band)));
            row.push(b.n_unique.to_string());
            row
        }),
    )
}

pub fn write_importance<P: AsRef<Path>>(path: P, names: &[String], importance: &[f64]) -> Result<(), PeatfluxError> {
    write_table(
        path,
        &["feature", "importance"],
        names
            .iter()
            .zip(importance)
            .map(|(n, v)| vec![n.clone(), v.to_string()]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbfs::SelectionStep;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_selection_tables() {
        let record = MetricsRecord {
            k: 2,
            test_fold: 1,
            mse: 1.5,
            bias: 1.0,
            variance: 0.5,
            r2: 0.75,
            explained_variance: 0.8,
        };
        let report = SelectionReport {
            test_fold: 1,
            steps: vec![
                SelectionStep {
                    k: 2,
                    features: vec!["Tsfc".to_string(), "EVI".to_string()],
                    cv_score: 0.5,
                    outcome: StepOutcome::Evaluated(record),
                },
                SelectionStep {
                    k: 1,
                    features: vec!["Tsfc".to_string()],
                    cv_score: 0.25,
                    outcome: StepOutcome::Failed("Feature Tsfc has no variance".to_string()),
                },
            ],
        };
        let dir = tempdir().unwrap();
        let metrics = dir.path().join("metrics.csv");
        write_selection_metrics(&metrics, &report).unwrap();
        let text = fs::read_to_string(&metrics).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "k,mse,bias,var,r2,expl_var,status");
        assert_eq!(lines[1], "2,1.5,1,0.5,0.75,0.8,ok");
        assert_eq!(lines[2], "1,,,,,,Feature Tsfc has no variance");

        let subsets = dir.path().join("subsets.csv");
        write_selection_subsets(&subsets, &report).unwrap();
        let text = fs::read_to_string(&subsets).unwrap();
        assert_eq!(text.lines().nth(1), Some("2,0.5,Tsfc;EVI"));
        assert!(!dir.path().join("subsets.csv.tmp").exists());
    }
}
