use crate::data::{JaggedMatrix, Matrix};
use crate::errors::PeatfluxError;
use crate::utils::{map_bin, percentiles, total_cmp};

/// If there are fewer unique values than their are
/// percentiles, just return the unique values of the
/// vectors.
///
/// * `v` - A numeric slice to calculate percentiles for.
fn percentiles_or_value(v: &[f64], pcts: &[f64]) -> Vec<f64> {
    let mut v_u = v.to_owned();
    v_u.sort_unstable_by(total_cmp);
    v_u.dedup();
    if v_u.len() <= pcts.len() + 1 {
        v_u
    } else {
        percentiles(v, pcts)
    }
}

// Each column is cut at its percentiles (or at every unique value when there
// are few of them), and f64::MAX is appended as the last cut.
// A value lands in bin b when cuts[b - 1] <= value < cuts[b], so
// "bin < b" is the same as "value < cuts[b - 1]" and a split on a bin
// boundary translates back to a split on a raw value.
#[derive(Debug)]
pub struct BinnedData {
    pub binned_data: Vec<u16>,
    pub cuts: JaggedMatrix<f64>,
    pub nunique: Vec<usize>,
}

impl BinnedData {
    /// Number of bins a column can take.
    pub fn n_bins(&self, col: usize) -> usize {
        self.cuts.get_col(col).len() + 1
    }

    /// Binned values of a column.
    pub fn get_col(&self, col: usize, rows: usize) -> &[u16] {
        &self.binned_data[col * rows..(col + 1) * rows]
    }
}

/// Convert a matrix of data, into a binned matrix.
///
/// * `data` - Numeric data to be binned.
/// * `cuts` - Cut values for each of the columns.
fn bin_matrix_from_cuts(data: &Matrix<f64>, cuts: &JaggedMatrix<f64>) -> Vec<u16> {
    data.data
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let col = i / data.rows;
            map_bin(cuts.get_col(col), *v)
        })
        .collect()
}

/// Bin a numeric matrix.
///
/// * `data` - A numeric matrix, of data to be binned.
/// * `nbins` - The number of bins each column should be binned into.
pub fn bin_matrix(data: &Matrix<f64>, nbins: u16) -> Result<BinnedData, PeatfluxError> {
    if data.rows == 0 {
        return Err(PeatfluxError::EmptyPartition("training".to_string()));
    }
    let pcts: Vec<f64> = (0..nbins).map(|i| f64::from(i) / f64::from(nbins)).collect();

    let mut cuts = JaggedMatrix::new();
    let mut nunique = Vec::with_capacity(data.cols);
    for i in 0..data.cols {
        let col = data.get_col(i);
        if let Some(v) = col.iter().find(|v| !v.is_finite()) {
            return Err(PeatfluxError::NonFiniteScore(format!("feature value {} in column {}", v, i)));
        }
        let mut col_cuts = percentiles_or_value(col, &pcts);
        col_cuts.push(f64::MAX);
        col_cuts.dedup();
        nunique.push(col_cuts.len() - 1);
        cuts.push_col(col_cuts);
    }

    let binned_data = bin_matrix_from_cuts(data, &cuts);

    Ok(BinnedData {
        binned_data,
        cuts,
        nunique,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_data_few_values() {
        let data_vec = vec![3.0, 1.0, 2.0, 1.0, 10.0, 10.0, 10.0, 10.0];
        let data = Matrix::new(&data_vec, 4, 2);
        let b = bin_matrix(&data, 256).unwrap();
        assert_eq!(b.cuts.get_col(0), &[1.0, 2.0, 3.0, f64::MAX]);
        assert_eq!(b.nunique, vec![3, 1]);
        assert_eq!(b.get_col(0, 4), &[3, 1, 2, 1]);
        // A constant column lands in a single bin and can never be split.
        assert_eq!(b.get_col(1, 4), &[1, 1, 1, 1]);
    }

    #[test]
    fn test_bin_boundaries_match_raw_split() {
        let data_vec: Vec<f64> = (0..1000).map(|i| (i as f64) * 0.37).collect();
        let data = Matrix::new(&data_vec, 1000, 1);
        let b = bin_matrix(&data, 16).unwrap();
        let cuts = b.cuts.get_col(0);
        assert!(cuts.len() <= 17);
        for (v, bin) in data_vec.iter().zip(b.get_col(0, 1000)) {
            for split in 1..b.n_bins(0) {
                assert_eq!((*bin as usize) < split, *v < cuts[split - 1]);
            }
        }
    }

    #[test]
    fn test_bin_rejects_non_finite() {
        let data_vec = vec![1.0, f64::NAN];
        let data = Matrix::new(&data_vec, 2, 1);
        assert!(bin_matrix(&data, 4).is_err());
    }
}
