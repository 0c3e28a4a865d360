//! Peak and trajectory tables, logically indexed by `(t_stamp, label)`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Column of the table usable as a tracking coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coord {
    #[serde(rename = "x")]
    X,
    #[serde(rename = "y")]
    Y,
    #[serde(rename = "z")]
    Z,
    #[serde(rename = "w")]
    W,
    #[serde(rename = "I")]
    I,
    #[serde(rename = "t")]
    T,
}

impl Coord {
    /// The default tracking coordinates.
    pub fn xyz() -> Vec<Coord> {
        vec![Coord::X, Coord::Y, Coord::Z]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Coord::X => "x",
            Coord::Y => "y",
            Coord::Z => "z",
            Coord::W => "w",
            Coord::I => "I",
            Coord::T => "t",
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Coord {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x" => Ok(Coord::X),
            "y" => Ok(Coord::Y),
            "z" => Ok(Coord::Z),
            "w" => Ok(Coord::W),
            "I" => Ok(Coord::I),
            "t" => Ok(Coord::T),
            other => Err(TrackingError::InvalidParameter(format!("unknown coordinate column '{}'", other))),
        }
    }
}

/// One row: a peak at one time point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    pub t_stamp: usize,
    pub label: usize,
    pub t: f64,
    #[serde(default)]
    pub z: f64,
    pub y: f64,
    pub x: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(rename = "I", default)]
    pub intensity: f64,
}

impl PeakRecord {
    pub fn coord(&self, coord: Coord) -> f64 {
        match coord {
            Coord::X => self.x,
            Coord::Y => self.y,
            Coord::Z => self.z,
            Coord::W => self.w,
            Coord::I => self.intensity,
            Coord::T => self.t,
        }
    }

    pub fn coords(&self, coords: &[Coord]) -> Vec<f64> {
        coords.iter().map(|&c| self.coord(c)).collect()
    }
}

/// Ordered rows, grouped by `t_stamp` in increasing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeakTable {
    rows: Vec<PeakRecord>,
}

impl PeakTable {
    pub fn new(rows: Vec<PeakRecord>) -> Self {
        Self { rows }
    }

    /// The explicitly empty table.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[PeakRecord] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<PeakRecord> {
        self.rows
    }

    /// Consecutive row ranges sharing one `t_stamp`, in table order.
    pub fn time_groups(&self) -> Vec<(usize, Range<usize>)> {
        let mut groups: Vec<(usize, Range<usize>)> = Vec::new();
        for (idx, row) in self.rows.iter().enumerate() {
            match groups.last_mut() {
                Some((t, range)) if *t == row.t_stamp => range.end = idx + 1,
                _ => groups.push((row.t_stamp, idx..idx + 1)),
            }
        }
        groups
    }

    pub fn t_stamps(&self) -> Vec<usize> {
        self.time_groups().into_iter().map(|(t, _)| t).collect()
    }

    /// Rows of one time point, empty if the time point is absent.
    pub fn rows_at(&self, t_stamp: usize) -> &[PeakRecord] {
        let start = self.rows.partition_point(|r| r.t_stamp < t_stamp);
        let end = self.rows.partition_point(|r| r.t_stamp <= t_stamp);
        &self.rows[start..end.max(start)]
    }

    /// Distinct labels, in order of first appearance.
    pub fn labels(&self) -> Vec<usize> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.label))
            .map(|r| r.label)
            .collect()
    }

    pub fn n_labels(&self) -> usize {
        self.labels().len()
    }

    /// Check the table can be tracked over `coords`.
    ///
    /// Time points must be sorted and contiguous with a non-decreasing `t`,
    /// labels unique within a time point and the tracking coordinates finite.
    pub fn validate(&self, coords: &[Coord]) -> Result<()> {
        if coords.is_empty() {
            return Err(TrackingError::InvalidTable("no coordinate columns selected".to_string()));
        }
        for pair in self.rows.windows(2) {
            if pair[1].t_stamp < pair[0].t_stamp {
                return Err(TrackingError::InvalidTable(format!(
                    "t_stamp {} follows t_stamp {}: time points must be sorted",
                    pair[1].t_stamp, pair[0].t_stamp
                )));
            }
            if pair[1].t_stamp > pair[0].t_stamp && !(pair[1].t >= pair[0].t) {
                return Err(TrackingError::InvalidTable(format!(
                    "t decreases from {} to {} between t_stamps {} and {}",
                    pair[0].t, pair[1].t, pair[0].t_stamp, pair[1].t_stamp
                )));
            }
        }
        for (t_stamp, range) in self.time_groups() {
            let mut labels = HashSet::new();
            for row in &self.rows[range] {
                if !labels.insert(row.label) {
                    return Err(TrackingError::InvalidTable(format!(
                        "label {} appears twice at t_stamp {}",
                        row.label, t_stamp
                    )));
                }
                if let Some(c) = coords.iter().find(|&&c| !row.coord(c).is_finite()) {
                    return Err(TrackingError::InvalidTable(format!(
                        "non-finite '{}' for label {} at t_stamp {}",
                        c, row.label, t_stamp
                    )));
                }
            }
        }
        Ok(())
    }

    /// Replace labels row by row, then order each time point by label.
    pub(crate) fn apply_labels(&mut self, labels: &[usize]) {
        for (row, &label) in self.rows.iter_mut().zip(labels) {
            row.label = label;
        }
        for (_, range) in self.time_groups() {
            self.rows[range].sort_by_key(|r| r.label);
        }
    }

    /// Rename labels to `0..n` following their first appearance.
    pub fn compact_labels(&mut self) {
        let mut mapping: HashMap<usize, usize> = HashMap::new();
        let dense: Vec<usize> = self
            .rows
            .iter()
            .map(|r| {
                let next = mapping.len();
                *mapping.entry(r.label).or_insert(next)
            })
            .collect();
        self.apply_labels(&dense);
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
