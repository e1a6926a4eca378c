//! Week based folds
//!
//! Weeks are dealt round robin over the folds, so consecutive weeks always
//! land in different folds. The first sorted week goes to fold 1, the
//! `n_folds`-th to fold 0.
use crate::config::FoldConfig;
use crate::errors::PeatfluxError;
use crate::table::ObservationTable;
use log::warn;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Mapping from week number to fold id, built once per dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldAssignment {
    n_folds: usize,
    folds: BTreeMap<u8, usize>,
}

impl FoldAssignment {
    /// Assign the configured weeks round robin, then add the overflow weeks.
    pub fn new(cfg: &FoldConfig) -> Result<Self, PeatfluxError> {
        let weeks: Vec<u8> = cfg.weeks.iter().flat_map(|r| r.weeks()).collect();
        Self::from_weeks(&weeks, cfg.n_folds, &cfg.overflow)
    }

    /// * `weeks` - Weeks to assign, in any order. Duplicates are ignored.
    /// * `n_folds` - Number of folds.
    /// * `overflow` - `(week, fold)` pairs added after the round robin.
    pub fn from_weeks(weeks: &[u8], n_folds: usize, overflow: &[(u8, usize)]) -> Result<Self, PeatfluxError> {
        if n_folds == 0 {
            return Err(PeatfluxError::InvalidParameter(
                "n_folds".to_string(),
                "at least 1".to_string(),
                "0".to_string(),
            ));
        }
        let mut sorted = weeks.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut folds = BTreeMap::new();
        for (position, week) in sorted.iter().enumerate() {
            if !(1..=53).contains(week) {
                return Err(PeatfluxError::InvalidParameter(
                    "weeks".to_string(),
                    "weeks within 1..=53".to_string(),
                    week.to_string(),
                ));
            }
            folds.insert(*week, (position + 1) % n_folds);
        }
        for (week, fold) in overflow {
            if *fold >= n_folds {
                return Err(PeatfluxError::InvalidParameter(
                    format!("overflow week {}", week),
                    format!("fold id below {}", n_folds),
                    fold.to_string(),
                ));
            }
            if !(1..=53).contains(week) || folds.insert(*week, *fold).is_some() {
                return Err(PeatfluxError::InvalidParameter(
                    "overflow".to_string(),
                    "weeks within 1..=53 that are not already assigned".to_string(),
                    week.to_string(),
                ));
            }
        }
        Ok(FoldAssignment { n_folds, folds })
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Fold of a week, `None` when the week is excluded.
    pub fn fold_of(&self, week: u8) -> Option<usize> {
        self.folds.get(&week).copied()
    }

    /// Weeks of a fold, ascending.
    pub fn weeks_in(&self, fold: usize) -> Vec<u8> {
        self.folds.iter().filter(|(_, f)| **f == fold).map(|(w, _)| *w).collect()
    }

    /// Every assigned `(week, fold)` pair, ascending by week.
    pub fn pairs(&self) -> impl Iterator<Item = (u8, usize)> + '_ {
        self.folds.iter().map(|(w, f)| (*w, *f))
    }

    /// Split the rows of a table into folds. Rows whose week is not assigned
    /// are left out.
    pub fn partition(&self, table: &ObservationTable) -> Folds {
        let mut folds = vec![Vec::new(); self.n_folds];
        let mut excluded = 0;
        for (i, row) in table.rows().iter().enumerate() {
            match self.fold_of(row.week) {
                Some(f) => folds[f].push(i),
                None => excluded += 1,
            }
        }
        for (f, rows) in folds.iter().enumerate() {
            if rows.is_empty() {
                warn!("Fold {} has no rows.", f + 1);
            }
        }
        Folds { folds, excluded }
    }
}

/// Row indices of every fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folds {
    folds: Vec<Vec<usize>>,
    excluded: usize,
}

impl Folds {
    pub fn n_folds(&self) -> usize {
        self.folds.len()
    }

    pub fn fold(&self, fold: usize) -> &[usize] {
        &self.folds[fold]
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.folds.iter().map(|f| f.len()).collect()
    }

    /// Rows whose week has no fold.
    pub fn excluded(&self) -> usize {
        self.excluded
    }

    /// Train and test rows for a test fold. The training rows are the other
    /// folds concatenated in fold order.
    pub fn split(&self, test: usize) -> Result<(Vec<usize>, Vec<usize>), PeatfluxError> {
        if test >= self.folds.len() {
            return Err(PeatfluxError::InvalidParameter(
                "test fold".to_string(),
                format!("1..={}", self.folds.len()),
                (test + 1).to_string(),
            ));
        }
        let test_rows = self.folds[test].clone();
        if test_rows.is_empty() {
            return Err(PeatfluxError::EmptyPartition(format!("test fold {}", test + 1)));
        }
        let train_rows: Vec<usize> = self
            .folds
            .iter()
            .enumerate()
            .filter(|(f, _)| *f != test)
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect();
        if train_rows.is_empty() {
            return Err(PeatfluxError::EmptyPartition(format!("training data for test fold {}", test + 1)));
        }
        Ok((train_rows, test_rows))
    }
}

/// Which folds a command uses as test fold. Parsed from `all` or a 1 based
/// fold number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldSelection {
    All,
    One(usize),
}

impl FoldSelection {
    /// Zero based fold ids.
    pub fn folds(&self, n_folds: usize) -> Result<Vec<usize>, PeatfluxError> {
        match self {
            FoldSelection::All => Ok((0..n_folds).collect()),
            FoldSelection::One(f) if (1..=n_folds).contains(f) => Ok(vec![f - 1]),
            FoldSelection::One(f) => Err(PeatfluxError::InvalidParameter(
                "test fold".to_string(),
                format!("all or 1..={}", n_folds),
                f.to_string(),
            )),
        }
    }
}

impl FromStr for FoldSelection {
    type Err = PeatfluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(FoldSelection::All);
        }
        s.parse::<usize>()
            .ok()
            .filter(|f| *f > 0)
            .map(FoldSelection::One)
            .ok_or_else(|| PeatfluxError::ParseString(s.to_string(), "FoldSelection".to_string(), "all, 1, 2, ...".to_string()))
    }
}

impl fmt::Display for FoldSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FoldSelection::All => write!(f, "all"),
            FoldSelection::One(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeekRange;
    use crate::table::{Observation, Source};

    fn table_with_weeks(weeks: &[u8]) -> ObservationTable {
        let rows = weeks
            .iter()
            .map(|w| Observation {
                features: vec![f64::from(*w)],
                target: 0.0,
                source: Source::Tower,
                week: *w,
            })
            .collect();
        ObservationTable::new(vec!["x".to_string()], rows).unwrap()
    }

    #[test]
    fn test_default_assignment() {
        let a = FoldAssignment::new(&FoldConfig::default()).unwrap();
        assert_eq!(a.fold_of(1), Some(1));
        assert_eq!(a.fold_of(2), Some(2));
        assert_eq!(a.fold_of(5), Some(0));
        assert_eq!(a.fold_of(50), Some(0));
        assert_eq!(a.fold_of(51), Some(2));
        assert_eq!(a.fold_of(52), Some(3));
        assert_eq!(a.fold_of(53), None);
        assert_eq!(a.weeks_in(0), vec![5, 10, 15, 20, 25, 30, 35, 40, 45, 50]);
        assert_eq!(a.weeks_in(1), vec![1, 6, 11, 16, 21, 26, 31, 36, 41, 46]);
        assert_eq!(a.weeks_in(3), vec![3, 8, 13, 18, 23, 28, 33, 38, 43, 48, 52]);
        for w in 1..50 {
            assert_ne!(a.fold_of(w), a.fold_of(w + 1));
        }
    }

    #[test]
    fn test_seasonal_weeks() {
        let cfg = FoldConfig {
            n_folds: 5,
            weeks: vec![WeekRange::new(35, 52), WeekRange::new(1, 5)],
            overflow: Vec::new(),
        };
        let a = FoldAssignment::new(&cfg).unwrap();
        // Sorted weeks: 1..=5 then 35..=52.
        assert_eq!(a.fold_of(1), Some(1));
        assert_eq!(a.fold_of(5), Some(0));
        assert_eq!(a.fold_of(35), Some(1));
        assert_eq!(a.fold_of(39), Some(0));
        assert_eq!(a.fold_of(20), None);
    }

    #[test]
    fn test_invalid_overflow() {
        assert!(FoldAssignment::from_weeks(&[1, 2, 3], 2, &[(3, 0)]).is_err());
        assert!(FoldAssignment::from_weeks(&[1, 2, 3], 2, &[(4, 2)]).is_err());
        assert!(FoldAssignment::from_weeks(&[1, 2, 3], 0, &[]).is_err());
    }

    #[test]
    fn test_partition_and_split() {
        let table = table_with_weeks(&[1, 2, 3, 4, 5, 6, 53, 51, 2]);
        let a = FoldAssignment::new(&FoldConfig::default()).unwrap();
        let folds = a.partition(&table);
        assert_eq!(folds.excluded(), 1);
        assert_eq!(folds.fold(0), &[4]);
        assert_eq!(folds.fold(1), &[0, 5]);
        assert_eq!(folds.fold(2), &[1, 7, 8]);
        let (train, test) = folds.split(2).unwrap();
        assert_eq!(test, vec![1, 7, 8]);
        assert_eq!(train, vec![4, 0, 5, 2, 3]);
    }

    #[test]
    fn test_empty_fold_is_flagged() {
        let table = table_with_weeks(&[1, 6, 2]);
        let a = FoldAssignment::new(&FoldConfig::default()).unwrap();
        let folds = a.partition(&table);
        assert_eq!(folds.sizes(), vec![0, 2, 1, 0, 0]);
        assert!(matches!(folds.split(0), Err(PeatfluxError::EmptyPartition(_))));
        assert!(folds.split(1).is_ok());
    }

    #[test]
    fn test_fold_selection() {
        assert_eq!("all".parse::<FoldSelection>().unwrap(), FoldSelection::All);
        assert_eq!("3".parse::<FoldSelection>().unwrap().folds(5).unwrap(), vec![2]);
        assert!("0".parse::<FoldSelection>().is_err());
        assert!(FoldSelection::One(6).folds(5).is_err());
        assert_eq!(FoldSelection::All.folds(3).unwrap(), vec![0, 1, 2]);
    }
}
