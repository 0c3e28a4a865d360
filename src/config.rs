use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;

use crate::error::{Result, TrackingError};
use crate::table::Coord;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionParameters,
    #[serde(default)]
    pub tracking: TrackingParameters,
}

impl Config {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        cfg.detection.validate()?;
        cfg.tracking.validate()?;
        Ok(cfg)
    }
}

/// Peak detection parameters. Lengths are physical units.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionParameters {
    /// Width of the sliding window of the likelihood test.
    #[serde(default = "default_w_s")]
    pub w_s: f64,
    /// Typical radius of the peaks to detect.
    #[serde(default = "default_peak_radius")]
    pub peak_radius: f64,
    /// Chi-square criterion for a positive detection.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// The deflation loop stops once this many peaks are found.
    #[serde(default = "default_max_peaks")]
    pub max_peaks: usize,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default)]
    pub num_threads: Option<usize>,
}

fn default_w_s() -> f64 {
    0.7
}
fn default_peak_radius() -> f64 {
    0.2
}
fn default_threshold() -> f64 {
    27.0
}
fn default_max_peaks() -> usize {
    10_000
}
fn default_parallel() -> bool {
    true
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            w_s: default_w_s(),
            peak_radius: default_peak_radius(),
            threshold: default_threshold(),
            max_peaks: default_max_peaks(),
            parallel: default_parallel(),
            num_threads: None,
        }
    }
}

impl DetectionParameters {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("w_s", self.w_s), ("peak_radius", self.peak_radius), ("threshold", self.threshold)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrackingError::InvalidParameter(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.max_peaks == 0 {
            return Err(TrackingError::InvalidParameter("max_peaks must be at least 1".to_string()));
        }
        if self.num_threads == Some(0) {
            return Err(TrackingError::InvalidParameter("num_threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Tracking parameters, tagged by the motion model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "motion", rename_all = "snake_case")]
pub enum TrackingParameters {
    Brownian {
        max_speed: f64,
        #[serde(default = "default_penalty")]
        penalty: f64,
        #[serde(default = "Coord::xyz")]
        coords: Vec<Coord>,
    },
    Directed {
        max_speed: f64,
        #[serde(default = "default_penalty")]
        penalty: f64,
        /// Length of trajectory history used for extrapolation, in `t` units.
        #[serde(default = "default_past_traj_time")]
        past_traj_time: f64,
        #[serde(default)]
        smooth_factor: f64,
        #[serde(default = "default_interpolation_order")]
        interpolation_order: usize,
        #[serde(default = "Coord::xyz")]
        coords: Vec<Coord>,
    },
}

fn default_penalty() -> f64 {
    1.05
}
fn default_past_traj_time() -> f64 {
    10.0
}
fn default_interpolation_order() -> usize {
    1
}

impl Default for TrackingParameters {
    fn default() -> Self {
        TrackingParameters::Brownian {
            max_speed: 5.0,
            penalty: default_penalty(),
            coords: Coord::xyz(),
        }
    }
}

impl TrackingParameters {
    pub fn coords(&self) -> &[Coord] {
        match self {
            TrackingParameters::Brownian { coords, .. } | TrackingParameters::Directed { coords, .. } => coords,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (max_speed, penalty) = match self {
            TrackingParameters::Brownian { max_speed, penalty, .. } => (*max_speed, *penalty),
            TrackingParameters::Directed {
                max_speed,
                penalty,
                past_traj_time,
                smooth_factor,
                interpolation_order,
                ..
            } => {
                if !(*past_traj_time > 0.0) {
                    return Err(TrackingError::InvalidParameter(format!(
                        "past_traj_time must be positive, got {}",
                        past_traj_time
                    )));
                }
                if !(*smooth_factor >= 0.0) {
                    return Err(TrackingError::InvalidParameter(format!(
                        "smooth_factor must be non-negative, got {}",
                        smooth_factor
                    )));
                }
                if !(1..=5).contains(interpolation_order) {
                    return Err(TrackingError::InvalidParameter(format!(
                        "interpolation_order must lie in 1..=5, got {}",
                        interpolation_order
                    )));
                }
                (*max_speed, *penalty)
            }
        };
        if !(max_speed.is_finite() && max_speed > 0.0) {
            return Err(TrackingError::InvalidParameter(format!("max_speed must be positive, got {}", max_speed)));
        }
        if !(penalty.is_finite() && penalty > 0.0) {
            return Err(TrackingError::InvalidParameter(format!("penalty must be positive, got {}", penalty)));
        }
        validate_coords(self.coords())
    }
}

pub(crate) fn validate_coords(coords: &[Coord]) -> Result<()> {
    if coords.is_empty() {
        return Err(TrackingError::InvalidParameter("coords must not be empty".to_string()));
    }
    let mut seen = HashSet::new();
    if let Some(c) = coords.iter().find(|c| !seen.insert(**c)) {
        return Err(TrackingError::InvalidParameter(format!("coordinate '{}' listed twice", c)));
    }
    Ok(())
}
