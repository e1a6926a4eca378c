//! Observation table
//!
//! Typed rows of the merged tower/airborne dataset, validated once against a
//! [`Schema`] when the CSV is read. Everything downstream works on row
//! indices into an immutable [`ObservationTable`].
use crate::data::{Dataset, TestSet, TrainSet};
use crate::errors::PeatfluxError;
use crate::utils::items_to_strings;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// Meteorological and remote sensing covariates.
pub const METEO_FEATURES: [&str; 11] = [
    "PAR_abs", "Tsfc", "VPD", "RH", "NDVI", "EVI", "BBB", "GWS", "OWD", "PeatD", "Exp_PeatD",
];
/// Land use fractions.
pub const LAND_USE_FEATURES: [&str; 12] = [
    "Grs", "SuC", "SpC", "Ghs", "dFr", "cFr", "Wat", "Bld", "bSl", "Hth", "FnB", "Shr",
];
/// Non-peat soil fractions.
pub const SOIL_FEATURES: [&str; 6] = ["W", "zandG", "zeeK", "rivK", "gedA", "leem"];

/// Platform an observation was measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Tower,
    Airborne,
}

impl FromStr for Source {
    type Err = PeatfluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "tower" => Ok(Source::Tower),
            "airborne" => Ok(Source::Airborne),
            _ => Err(PeatfluxError::ParseString(
                s.to_string(),
                "Source".to_string(),
                items_to_strings(vec!["tower", "airborne"]),
            )),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Tower => write!(f, "tower"),
            Source::Airborne => write!(f, "airborne"),
        }
    }
}

/// One flux observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Feature values, in the order of [`ObservationTable::feature_names`].
    pub features: Vec<f64>,
    /// CO2 flux.
    pub target: f64,
    pub source: Source,
    /// ISO week number, 1..=53.
    pub week: u8,
}

fn default_target() -> String {
    "CO2flx".to_string()
}
fn default_source() -> String {
    "source".to_string()
}
fn default_week() -> String {
    "weekno".to_string()
}
fn default_timestamp() -> Option<String> {
    Some("Datetime".to_string())
}
fn default_features() -> Vec<String> {
    METEO_FEATURES
        .iter()
        .chain(LAND_USE_FEATURES.iter())
        .chain(SOIL_FEATURES.iter())
        .map(|s| s.to_string())
        .collect()
}
fn default_ignored() -> Vec<String> {
    vec![String::new()]
}

/// Column roles of the input table.
///
/// Every header of the input must be claimed by exactly one role, a column
/// that is not listed anywhere is rejected instead of dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default = "default_source")]
    pub source: String,
    /// Integer week column. When absent from the file, the week is derived
    /// from `timestamp`.
    #[serde(default = "default_week")]
    pub week: String,
    #[serde(default = "default_timestamp")]
    pub timestamp: Option<String>,
    /// Candidate feature columns, the universe every subset is drawn from.
    #[serde(default = "default_features")]
    pub features: Vec<String>,
    /// Columns that are present in the file but carry no role, such as the
    /// unnamed index column.
    #[serde(default = "default_ignored")]
    pub ignored: Vec<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            target: default_target(),
            source: default_source(),
            week: default_week(),
            timestamp: default_timestamp(),
            features: default_features(),
            ignored: default_ignored(),
        }
    }
}

enum Role {
    Target,
    Source,
    Week,
    Timestamp,
    Feature(usize),
    Ignored,
}

impl Schema {
    pub fn validate(&self) -> Result<(), PeatfluxError> {
        let mut seen = BTreeSet::new();
        let mut names: Vec<&String> = vec![&self.target, &self.source, &self.week];
        names.extend(self.timestamp.iter());
        names.extend(self.features.iter());
        for n in names {
            if !seen.insert(n.as_str()) {
                return Err(PeatfluxError::InvalidParameter(
                    "schema".to_string(),
                    "unique column names".to_string(),
                    format!("{} listed twice", n),
                ));
            }
        }
        if self.features.is_empty() {
            return Err(PeatfluxError::InvalidParameter(
                "schema.features".to_string(),
                "at least one feature column".to_string(),
                "none".to_string(),
            ));
        }
        Ok(())
    }

    fn role_of(&self, header: &str) -> Option<Role> {
        if header == self.target {
            Some(Role::Target)
        } else if header == self.source {
            Some(Role::Source)
        } else if header == self.week {
            Some(Role::Week)
        } else if self.timestamp.as_deref() == Some(header) {
            Some(Role::Timestamp)
        } else if let Some(i) = self.features.iter().position(|f| f == header) {
            Some(Role::Feature(i))
        } else if self.ignored.iter().any(|c| c == header) {
            Some(Role::Ignored)
        } else {
            None
        }
    }
}

/// Parse a timestamp and return its ISO week number.
pub fn iso_week(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.iso_week().week());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.iso_week().week());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|d| d.iso_week().week())
}

fn parse_number(column: &str, row: usize, value: &str) -> Result<f64, PeatfluxError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(PeatfluxError::InvalidValue {
            column: column.to_string(),
            row,
            value: value.to_string(),
        }),
    }
}

fn parse_week(column: &str, row: usize, value: &str) -> Result<u8, PeatfluxError> {
    let v = parse_number(column, row, value)?;
    if v.fract() != 0.0 {
        return Err(PeatfluxError::InvalidValue {
            column: column.to_string(),
            row,
            value: value.to_string(),
        });
    }
    check_week(row, v as i64)
}

fn check_week(row: usize, week: i64) -> Result<u8, PeatfluxError> {
    if (1..=53).contains(&week) {
        Ok(week as u8)
    } else {
        Err(PeatfluxError::InvalidWeek { row, week })
    }
}

/// The immutable observation table.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    feature_names: Vec<String>,
    rows: Vec<Observation>,
}

impl ObservationTable {
    /// Build a table from already typed rows, checking the row invariants.
    pub fn new(feature_names: Vec<String>, rows: Vec<Observation>) -> Result<Self, PeatfluxError> {
        for (i, r) in rows.iter().enumerate() {
            if r.features.len() != feature_names.len() {
                return Err(PeatfluxError::InvalidParameter(
                    format!("row {}", i),
                    format!("{} feature values", feature_names.len()),
                    r.features.len().to_string(),
                ));
            }
            if !r.target.is_finite() {
                return Err(PeatfluxError::InvalidValue {
                    column: "target".to_string(),
                    row: i,
                    value: r.target.to_string(),
                });
            }
            check_week(i, i64::from(r.week))?;
        }
        Ok(ObservationTable { feature_names, rows })
    }

    /// Load a table from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P, schema: &Schema) -> Result<Self, PeatfluxError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PeatfluxError::UnableToRead(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(BufReader::new(file), schema)
    }

    /// Load a table from any CSV reader, validating every header against the
    /// schema.
    pub fn from_reader<R: Read>(reader: R, schema: &Schema) -> Result<Self, PeatfluxError> {
        schema.validate()?;
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = csv_reader
            .headers()
            .map_err(|e| PeatfluxError::UnableToRead(e.to_string()))?
            .clone();

        let mut roles = Vec::with_capacity(headers.len());
        let mut seen: HashSet<&str> = HashSet::new();
        for h in headers.iter() {
            let role = schema
                .role_of(h)
                .ok_or_else(|| PeatfluxError::UnexpectedColumn(h.to_string()))?;
            if !seen.insert(h) {
                return Err(PeatfluxError::InvalidParameter(
                    "input header".to_string(),
                    "unique column names".to_string(),
                    format!("{} appears twice", h),
                ));
            }
            roles.push(role);
        }
        let has = |name: &str| seen.contains(name);
        if !has(&schema.target) {
            return Err(PeatfluxError::MissingColumn(schema.target.clone()));
        }
        if !has(&schema.source) {
            return Err(PeatfluxError::MissingColumn(schema.source.clone()));
        }
        let week_from_timestamp = !has(&schema.week);
        if week_from_timestamp {
            match &schema.timestamp {
                Some(ts) if has(ts) => {}
                _ => return Err(PeatfluxError::MissingColumn(schema.week.clone())),
            }
        }
        for f in schema.features.iter() {
            if !has(f) {
                return Err(PeatfluxError::MissingColumn(f.clone()));
            }
        }

        let mut rows = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| PeatfluxError::UnableToRead(e.to_string()))?;
            let mut features = vec![f64::NAN; schema.features.len()];
            let mut target = f64::NAN;
            let mut source = None;
            let mut week = None;
            for ((role, value), header) in roles.iter().zip(record.iter()).zip(headers.iter()) {
                match role {
                    Role::Target => target = parse_number(header, i, value)?,
                    Role::Source => source = Some(value.parse::<Source>()?),
                    Role::Week if !week_from_timestamp => week = Some(parse_week(header, i, value)?),
                    Role::Timestamp if week_from_timestamp => {
                        let w = iso_week(value).ok_or_else(|| PeatfluxError::InvalidValue {
                            column: header.to_string(),
                            row: i,
                            value: value.to_string(),
                        })?;
                        week = Some(check_week(i, i64::from(w))?);
                    }
                    Role::Feature(j) => features[*j] = parse_number(header, i, value)?,
                    _ => {}
                }
            }
            // Both are guaranteed by the header checks above.
            let (Some(source), Some(week)) = (source, week) else {
                return Err(PeatfluxError::UnableToRead(format!("row {} is shorter than the header", i)));
            };
            rows.push(Observation {
                features,
                target,
                source,
                week,
            });
        }
        Self::new(schema.features.clone(), rows)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_index(&self, name: &str) -> Result<usize, PeatfluxError> {
        self.feature_names
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| PeatfluxError::UnknownFeature(name.to_string()))
    }

    pub fn feature_indices(&self, names: &[String]) -> Result<Vec<usize>, PeatfluxError> {
        names.iter().map(|n| self.feature_index(n)).collect()
    }

    /// Distinct week numbers present in the table.
    pub fn weeks(&self) -> BTreeSet<u8> {
        self.rows.iter().map(|r| r.week).collect()
    }

    /// Values of one feature column, in row order.
    pub fn column(&self, feature: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.features[feature]).collect()
    }

    /// A new table keeping only the rows matching `keep`.
    pub fn filter<F>(&self, keep: F) -> ObservationTable
    where
        F: Fn(&Observation) -> bool,
    {
        ObservationTable {
            feature_names: self.feature_names.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Collect the given rows and feature columns into an owned block.
    pub fn dataset(&self, rows: &[usize], features: &[usize]) -> Dataset {
        let mut data = Vec::with_capacity(rows.len() * features.len());
        for f in features {
            data.extend(rows.iter().map(|r| self.rows[*r].features[*f]));
        }
        let y = rows.iter().map(|r| self.rows[*r].target).collect();
        let names = features.iter().map(|f| self.feature_names[*f].clone()).collect();
        Dataset::new(data, y, names)
    }

    /// Rows used to fit a scaler and model.
    pub fn train_set(&self, rows: &[usize], features: &[usize]) -> Result<TrainSet, PeatfluxError> {
        if rows.is_empty() {
            return Err(PeatfluxError::EmptyPartition("training".to_string()));
        }
        Ok(TrainSet::from_dataset(self.dataset(rows, features)))
    }

    /// Held-out rows, only ever transformed and predicted.
    pub fn test_set(&self, rows: &[usize], features: &[usize]) -> Result<TestSet, PeatfluxError> {
        if rows.is_empty() {
            return Err(PeatfluxError::EmptyPartition("test".to_string()));
        }
        Ok(TestSet::from_dataset(self.dataset(rows, features)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_schema() -> Schema {
        Schema {
            features: vec!["PAR_abs".to_string(), "Tsfc".to_string()],
            ..Schema::default()
        }
    }

    #[test]
    fn test_read_with_week_column() {
        let csv = ",CO2flx,source,weekno,PAR_abs,Tsfc\n0,-3.5,tower,12,400.0,11.2\n1,2.0,airborne,13,0.0,4.0\n";
        let table = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].week, 12);
        assert_eq!(table.rows()[1].source, Source::Airborne);
        assert_eq!(table.column(1), vec![11.2, 4.0]);
    }

    #[test]
    fn test_week_from_timestamp() {
        let csv = "CO2flx,source,Datetime,PAR_abs,Tsfc\n1.0,tower,2021-01-04 12:30:00,1.0,2.0\n1.0,tower,2021-12-31,1.0,2.0\n";
        let table = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap();
        assert_eq!(table.rows()[0].week, 1);
        assert_eq!(table.rows()[1].week, 52);
    }

    #[test]
    fn test_missing_and_unexpected_columns() {
        let csv = "CO2flx,source,weekno,PAR_abs\n1.0,tower,3,1.0\n";
        let err = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap_err();
        assert!(matches!(err, PeatfluxError::MissingColumn(c) if c == "Tsfc"));

        let csv = "CO2flx,source,weekno,PAR_abs,Tsfc,VPD\n1.0,tower,3,1.0,2.0,3.0\n";
        let err = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap_err();
        assert!(matches!(err, PeatfluxError::UnexpectedColumn(c) if c == "VPD"));
    }

    #[test]
    fn test_invalid_cells() {
        let csv = "CO2flx,source,weekno,PAR_abs,Tsfc\n,tower,3,1.0,2.0\n";
        let err = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap_err();
        assert!(matches!(err, PeatfluxError::InvalidValue { .. }));

        let csv = "CO2flx,source,weekno,PAR_abs,Tsfc\n1.0,tower,54,1.0,2.0\n";
        let err = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap_err();
        assert!(matches!(err, PeatfluxError::InvalidWeek { week: 54, .. }));

        let csv = "CO2flx,source,weekno,PAR_abs,Tsfc\n1.0,satellite,5,1.0,2.0\n";
        let err = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap_err();
        assert!(matches!(err, PeatfluxError::ParseString(..)));
    }

    #[test]
    fn test_filter_and_sets() {
        let csv = "CO2flx,source,weekno,PAR_abs,Tsfc\n1.0,tower,3,1.0,2.0\n2.0,airborne,4,5.0,6.0\n3.0,tower,5,7.0,8.0\n";
        let table = ObservationTable::from_reader(csv.as_bytes(), &small_schema()).unwrap();
        let towers = table.filter(|r| r.source == Source::Tower);
        assert_eq!(towers.len(), 2);
        assert_eq!(table.weeks().into_iter().collect::<Vec<_>>(), vec![3, 4, 5]);

        let train = table.train_set(&[0, 2], &[1]).unwrap();
        assert_eq!(train.dataset().get_col(0), &[2.0, 8.0]);
        assert_eq!(train.dataset().y, vec![1.0, 3.0]);
        assert!(matches!(
            table.test_set(&[], &[1]),
            Err(PeatfluxError::EmptyPartition(_))
        ));
    }
}
