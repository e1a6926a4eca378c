use crate::errors::PeatfluxError;
use crate::utils::{items_to_strings, mean, variance};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type MetricFn = fn(&[f64], &[f64]) -> f64;

/// Compare to metric values, determining if b is better.
/// If one of them is NaN favor the non NaN value.
/// If both are NaN, consider the first value to be better.
/// Equal values are not better, so the earlier of two tied candidates wins.
pub fn is_comparison_better(value: f64, comparison: f64, maximize: bool) -> bool {
    match (value.is_nan(), comparison.is_nan()) {
        (true, true) | (false, true) => false,
        (true, false) => true,
        (false, false) => {
            if maximize {
                value < comparison
            } else {
                value > comparison
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    R2,
    ExplainedVariance,
    MeanSquaredError,
    RootMeanSquaredError,
}

impl FromStr for Metric {
    type Err = PeatfluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R2" => Ok(Metric::R2),
            "ExplainedVariance" => Ok(Metric::ExplainedVariance),
            "MeanSquaredError" => Ok(Metric::MeanSquaredError),
            "RootMeanSquaredError" => Ok(Metric::RootMeanSquaredError),
            _ => Err(PeatfluxError::ParseString(
                s.to_string(),
                "Metric".to_string(),
                items_to_strings(vec!["R2", "ExplainedVariance", "MeanSquaredError", "RootMeanSquaredError"]),
            )),
        }
    }
}

pub fn metric_callables(metric_type: &Metric) -> (MetricFn, bool) {
    match metric_type {
        Metric::R2 => (R2Metric::calculate_metric, R2Metric::maximize()),
        Metric::ExplainedVariance => (
            ExplainedVarianceMetric::calculate_metric,
            ExplainedVarianceMetric::maximize(),
        ),
        Metric::MeanSquaredError => (
            MeanSquaredErrorMetric::calculate_metric,
            MeanSquaredErrorMetric::maximize(),
        ),
        Metric::RootMeanSquaredError => (
            RootMeanSquaredErrorMetric::calculate_metric,
            RootMeanSquaredErrorMetric::maximize(),
        ),
    }
}

pub trait EvaluationMetric {
    fn calculate_metric(y: &[f64], yhat: &[f64]) -> f64;
    fn maximize() -> bool;
}

pub struct R2Metric {}
impl EvaluationMetric for R2Metric {
    fn calculate_metric(y: &[f64], yhat: &[f64]) -> f64 {
        r2_score(y, yhat)
    }
    fn maximize() -> bool {
        true
    }
}

pub struct ExplainedVarianceMetric {}
impl EvaluationMetric for ExplainedVarianceMetric {
    fn calculate_metric(y: &[f64], yhat: &[f64]) -> f64 {
        explained_variance_score(y, yhat)
    }
    fn maximize() -> bool {
        true
    }
}

pub struct MeanSquaredErrorMetric {}
impl EvaluationMetric for MeanSquaredErrorMetric {
    fn calculate_metric(y: &[f64], yhat: &[f64]) -> f64 {
        mean_squared_error(y, yhat)
    }
    fn maximize() -> bool {
        false
    }
}

pub struct RootMeanSquaredErrorMetric {}
impl EvaluationMetric for RootMeanSquaredErrorMetric {
    fn calculate_metric(y: &[f64], yhat: &[f64]) -> f64 {
        mean_squared_error(y, yhat).sqrt()
    }
    fn maximize() -> bool {
        false
    }
}

/// A perfect fit of a constant target scores 1, any other fit of a constant
/// target scores 0.
fn ratio_score(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - numerator / denominator
    }
}

/// Coefficient of determination, `1 - SS_res / SS_tot`.
pub fn r2_score(y: &[f64], yhat: &[f64]) -> f64 {
    let y_mean = mean(y);
    let ss_res: f64 = y.iter().zip(yhat).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|t| (t - y_mean).powi(2)).sum();
    ratio_score(ss_res, ss_tot)
}

/// `1 - Var(y - yhat) / Var(y)`.
pub fn explained_variance_score(y: &[f64], yhat: &[f64]) -> f64 {
    let residual: Vec<f64> = y.iter().zip(yhat).map(|(t, p)| t - p).collect();
    ratio_score(variance(&residual), variance(y))
}

pub fn mean_squared_error(y: &[f64], yhat: &[f64]) -> f64 {
    y.iter().zip(yhat).map(|(t, p)| (t - p).powi(2)).sum::<f64>() / y.len() as f64
}
