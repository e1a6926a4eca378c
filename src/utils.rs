use crate::errors::PeatfluxError;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;

/// Create a string of all available items.
pub fn items_to_strings(items: Vec<&str>) -> String {
    items.join(", ")
}

pub fn fmt_vec_output(v: &[f64]) -> String {
    v.iter().map(|n| format!("{:.4}", n)).collect::<Vec<_>>().join(", ")
}

// Validation
pub fn validate_positive_float_parameter(value: f64, parameter: &str) -> Result<(), PeatfluxError> {
    validate_float_parameter(value, 0.0, f64::INFINITY, parameter)
}

/// Check that `value` lies in the half open interval `(min, max]`.
pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), PeatfluxError> {
    if value.is_nan() || value <= min || value > max {
        let ex_msg = format!("real value within range ({} and {}]", min, max);
        Err(PeatfluxError::InvalidParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_positive_count(value: usize, parameter: &str) -> Result<(), PeatfluxError> {
    if value == 0 {
        Err(PeatfluxError::InvalidParameter(
            parameter.to_string(),
            "a count of at least 1".to_string(),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Total order for finite floats, NaN sorts last.
#[inline]
pub fn total_cmp(a: &f64, b: &f64) -> Ordering {
    a.total_cmp(b)
}

pub fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Population variance (ddof = 0).
pub fn variance(v: &[f64]) -> f64 {
    let m = mean(v);
    v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64
}

/// Unweighted percentiles of a slice, `percentiles` in `[0, 1]` and sorted.
///
/// Each percentile is the smallest value whose cumulative share of the data
/// reaches it.
pub fn percentiles(v: &[f64], percentiles: &[f64]) -> Vec<f64> {
    let mut sorted = v.to_vec();
    sorted.sort_unstable_by(total_cmp);
    let n = sorted.len() as f64;
    percentiles
        .iter()
        .map(|p| {
            let i = ((p * n).ceil() as usize).saturating_sub(1).min(sorted.len() - 1);
            sorted[i]
        })
        .collect()
}

/// Quantile of a sorted slice, interpolating linearly between the two
/// closest ranks.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Write `contents` next to `path` and rename it into place, so a reader
/// never sees a partial file.
pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<(), PeatfluxError> {
    let path = path.as_ref();
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let err = |e: std::io::Error| PeatfluxError::UnableToWrite(format!("{}: {}", path.display(), e));
    fs::write(&tmp, contents).map_err(err)?;
    fs::rename(&tmp, path).map_err(err)
}

/// Return the index of the first value in a sorted
/// slice that is greater than a provided value.
///
/// * `x` - The sorted slice of values.
/// * `v` - The value used to calculate the first
///   value larger than it.
#[inline]
pub fn map_bin(x: &[f64], v: f64) -> u16 {
    let low = x.partition_point(|c| *c <= v);
    u16::try_from(low).unwrap_or(u16::MAX)
}

#[inline]
pub fn precision_round(n: f64, precision: i32) -> f64 {
    let p = (10.0_f64).powi(precision);
    (n * p).round_ties_even() / p
}

/// Round to the nearest multiple of `resolution`, ties to even.
#[inline]
pub fn round_to_resolution(n: f64, resolution: f64) -> f64 {
    (n / resolution).round_ties_even() * resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round() {
        assert_eq!(0.3, precision_round(0.3333, 1));
        assert_eq!(0.2, precision_round(0.25, 1));
        assert_eq!(2.0, round_to_resolution(2.25, 0.5));
        assert_eq!(3.0, round_to_resolution(2.75, 0.5));
        assert_eq!(0.0, round_to_resolution(0.25, 0.5));
    }

    #[test]
    fn test_percentiles() {
        let v = vec![4., 5., 6., 1., 2., 3., 7., 8., 9., 10.];
        let p = percentiles(&v, &[0.0, 0.1, 0.5, 1.0]);
        assert_eq!(p, vec![1., 1., 5., 10.]);
    }

    #[test]
    fn test_quantile_sorted() {
        let v = vec![1., 2., 3., 4., 5.];
        assert_eq!(quantile_sorted(&v, 0.5), 3.0);
        assert!((quantile_sorted(&v, 0.05) - 1.2).abs() < 1e-12);
        assert!((quantile_sorted(&v, 0.95) - 4.8).abs() < 1e-12);
        assert_eq!(quantile_sorted(&[7.0], 0.95), 7.0);
    }

    #[test]
    fn test_map_bin() {
        let cuts = vec![1.0, 2.0, 5.0, f64::MAX];
        assert_eq!(map_bin(&cuts, 0.5), 0);
        assert_eq!(map_bin(&cuts, 1.0), 1);
        assert_eq!(map_bin(&cuts, 4.9), 2);
        assert_eq!(map_bin(&cuts, 100.0), 3);
    }

    #[test]
    fn test_validate() {
        assert!(validate_float_parameter(0.5, 0.0, 1.0, "subsample").is_ok());
        assert!(validate_float_parameter(0.0, 0.0, 1.0, "subsample").is_err());
        assert!(validate_positive_float_parameter(f64::NAN, "learning_rate").is_err());
        assert!(validate_positive_count(0, "n_estimators").is_err());
        assert_eq!(mean(&[1., 2., 3.]), 2.0);
        assert_eq!(variance(&[1., 3.]), 1.0);
        assert_eq!(fmt_vec_output(&[1.0, 0.5]), "1.0000, 0.5000");
    }
}
