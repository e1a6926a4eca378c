//! Data
//!
//! Matrix views used by the booster, and the owned feature blocks that flow
//! through folds, scaling and resampling.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Contiguous column major matrix view.
///
/// All feature blocks in this crate are stored column by column, so a
/// column is a plain slice and rows are strided reads.
pub struct Matrix<'a, T> {
    /// The raw data stored in a single slice.
    pub data: &'a [T],
    /// Number of rows in the matrix.
    pub rows: usize,
    /// Number of columns in the matrix.
    pub cols: usize,
}

impl<'a, T> Matrix<'a, T> {
    /// Create a new column major Matrix.
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Self {
        assert_eq!(data.len(), rows * cols, "Matrix data does not match its shape");
        Matrix {
            data,
            rows,
            cols,
        }
    }

    /// Get a single reference to an item in the matrix.
    ///
    /// * `i` - The ith row of the data to get.
    /// * `j` - the jth column of the data to get.
    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[j * self.rows + i]
    }

    /// Get an entire column in the matrix.
    ///
    /// * `col` - The index of the column to get.
    pub fn get_col(&self, col: usize) -> &[T] {
        &self.data[col * self.rows..(col + 1) * self.rows]
    }

    /// Get access to a row of the data, as an iterator.
    pub fn get_row_iter(&self, row: usize) -> std::iter::StepBy<std::iter::Skip<std::slice::Iter<'a, T>>> {
        self.data.iter().skip(row).step_by(self.rows)
    }
}

impl<'a, T> Matrix<'a, T>
where
    T: Copy,
{
    /// Get a row of the data as a vector.
    pub fn get_row(&self, row: usize) -> Vec<T> {
        self.get_row_iter(row).copied().collect()
    }
}

impl<'a, T> fmt::Display for Matrix<'a, T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for i in 0..self.rows {
            for j in 0..self.cols {
                write!(f, "{}", self.get(i, j))?;
                if j == (self.cols - 1) {
                    writeln!(f)?;
                } else {
                    write!(f, " ")?;
                }
            }
        }
        Ok(())
    }
}

/// A lightweight row major matrix, used for returning per row
/// results such as feature contributions.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RowMajorMatrix<T> {
    /// The raw data in row-major order.
    pub data: Vec<T>,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
}

impl<T> RowMajorMatrix<T> {
    /// Create a new RowMajorMatrix.
    pub fn new(data: Vec<T>, rows: usize, cols: usize) -> Self {
        RowMajorMatrix { data, rows, cols }
    }

    /// Get a single reference to an item in the matrix.
    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[i * self.cols + j]
    }

    /// Get a whole row as a slice.
    pub fn get_row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// A jagged column aligned matrix, that owns its data contents.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct JaggedMatrix<T> {
    /// The contents of the matrix.
    pub data: Vec<T>,
    /// The end index's of the matrix.
    pub ends: Vec<usize>,
    /// Number of columns in the matrix
    pub cols: usize,
}

impl<T> JaggedMatrix<T> {
    /// Create a new jagged matrix.
    pub fn new() -> Self {
        JaggedMatrix {
            data: Vec::new(),
            ends: Vec::new(),
            cols: 0,
        }
    }

    /// Append a column.
    pub fn push_col(&mut self, col: Vec<T>) {
        self.data.extend(col);
        self.ends.push(self.data.len());
        self.cols = self.ends.len();
    }

    /// Get the column of a jagged array.
    pub fn get_col(&self, col: usize) -> &[T] {
        assert!(col < self.ends.len());
        let start = if col == 0 { 0 } else { self.ends[col - 1] };
        &self.data[start..self.ends[col]]
    }
}

/// Owned column major feature block and its target.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Feature values, column by column.
    pub data: Vec<f64>,
    /// Target values, one per row.
    pub y: Vec<f64>,
    /// Number of rows.
    pub rows: usize,
    /// Number of feature columns.
    pub cols: usize,
    /// Name of every feature column, in column order.
    pub feature_names: Vec<String>,
}

impl Dataset {
    pub fn new(data: Vec<f64>, y: Vec<f64>, feature_names: Vec<String>) -> Self {
        let rows = y.len();
        let cols = feature_names.len();
        assert_eq!(data.len(), rows * cols, "Dataset data does not match its shape");
        Dataset {
            data,
            y,
            rows,
            cols,
            feature_names,
        }
    }

    /// Borrow the features as a matrix view.
    pub fn matrix(&self) -> Matrix<'_, f64> {
        Matrix::new(&self.data, self.rows, self.cols)
    }

    pub fn get_col(&self, col: usize) -> &[f64] {
        &self.data[col * self.rows..(col + 1) * self.rows]
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Copy out the given rows, in the given order. Rows may repeat.
    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        let mut data = Vec::with_capacity(rows.len() * self.cols);
        for c in 0..self.cols {
            let col = self.get_col(c);
            data.extend(rows.iter().map(|r| col[*r]));
        }
        let y = rows.iter().map(|r| self.y[*r]).collect();
        Dataset::new(data, y, self.feature_names.clone())
    }

    /// Copy out the given columns, in the given order.
    pub fn select_cols(&self, cols: &[usize]) -> Dataset {
        let mut data = Vec::with_capacity(self.rows * cols.len());
        for c in cols {
            data.extend_from_slice(self.get_col(*c));
        }
        let names = cols.iter().map(|c| self.feature_names[*c].clone()).collect();
        Dataset::new(data, self.y.clone(), names)
    }
}

/// A dataset that is known to be a training partition.
///
/// Only a `TrainSet` can be used to fit a scaler or a model, the test side of a
/// split is a [`TestSet`] and has no such path.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSet(Dataset);

impl TrainSet {
    pub(crate) fn from_dataset(dataset: Dataset) -> Self {
        TrainSet(dataset)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.0
    }

    pub fn rows(&self) -> usize {
        self.0.rows
    }

    /// A row subset of a training partition is still training data.
    pub fn select_rows(&self, rows: &[usize]) -> TrainSet {
        TrainSet(self.0.select_rows(rows))
    }

    pub fn select_cols(&self, cols: &[usize]) -> TrainSet {
        TrainSet(self.0.select_cols(cols))
    }
}

/// A dataset that is known to be a held-out partition.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSet(Dataset);

impl TestSet {
    pub(crate) fn from_dataset(dataset: Dataset) -> Self {
        TestSet(dataset)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.0
    }

    pub fn rows(&self) -> usize {
        self.0.rows
    }

    pub fn select_cols(&self, cols: &[usize]) -> TestSet {
        TestSet(self.0.select_cols(cols))
    }
}
