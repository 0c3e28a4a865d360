use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TrackingError};
use crate::frame::Frame;
use crate::gaussian::{fit_gaussian, FitOptions, GaussParams, ReferencePatch};
use crate::progress::CancellationToken;
use crate::utils::peak_local_max;

/// Minimum separation, in pixels, between two candidates of one pass.
const MIN_PEAK_DISTANCE: usize = 3;

/// A single detected peak, in pixel units of its frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Row coordinate.
    pub y: f64,
    /// Column coordinate.
    pub x: f64,
    /// Gaussian 1/e radius.
    pub w: f64,
    /// Background-corrected amplitude.
    #[serde(rename = "I")]
    pub intensity: f64,
}

impl Peak {
    pub fn new(y: f64, x: f64, w: f64, intensity: f64) -> Self {
        Self { y, x, w, intensity }
    }
}

/// Gaussian peak detection after Segré et al., Nature Methods 5 (2008).
///
/// A likelihood ratio test finds candidate spots, each candidate is fitted
/// by least squares, fitted spots are subtracted from the image and the
/// test runs again until nothing new is found.
#[derive(Debug, Clone)]
pub struct PeakDetector {
    /// Sliding window width in pixels.
    pub w_s: usize,
    /// Expected peak radius in pixels.
    pub peak_radius: f64,
    pub threshold: f64,
    pub max_peaks: usize,
    pub fit: FitOptions,
    reference: ReferencePatch,
}

impl PeakDetector {
    /// Create a detector working in pixel units.
    pub fn new(w_s: usize, peak_radius: f64, threshold: f64, max_peaks: usize) -> Result<Self> {
        if w_s < 3 {
            return Err(TrackingError::InvalidParameter(format!(
                "window size must be at least 3 pixels, got {}",
                w_s
            )));
        }
        if !(peak_radius > 1.0) {
            return Err(TrackingError::InvalidParameter(format!(
                "peak radius must be larger than one pixel, got {}",
                peak_radius
            )));
        }
        if !(threshold > 0.0) {
            return Err(TrackingError::InvalidParameter(format!(
                "detection threshold must be positive, got {}",
                threshold
            )));
        }
        if max_peaks == 0 {
            return Err(TrackingError::InvalidParameter("max_peaks must be at least 1".to_string()));
        }
        Ok(PeakDetector {
            w_s,
            peak_radius,
            threshold,
            max_peaks,
            fit: FitOptions::default(),
            reference: ReferencePatch::new(peak_radius, w_s),
        })
    }

    /// Detect peaks in a frame.
    pub fn detect(&self, frame: &Frame) -> Vec<Peak> {
        // A fresh token is never cancelled.
        self.detect_cancellable(frame, &CancellationToken::new())
            .unwrap_or_default()
    }

    /// Detect peaks, checking `cancel` between deflation passes.
    pub fn detect_cancellable(&self, frame: &Frame, cancel: &CancellationToken) -> Result<Vec<Peak>> {
        let mut image = frame.data.clone();
        let mut peaks: Vec<Peak> = Vec::new();
        let mut passes = 0usize;

        let mut candidates = self.glrt_detection(&image, frame);
        while !candidates.is_empty() && peaks.len() < self.max_peaks {
            cancel.check()?;
            passes += 1;

            let room = self.max_peaks - peaks.len();
            let mut new_peaks = self.gauss_estimation(&image, &candidates);
            if new_peaks.is_empty() {
                // every fit of this pass failed
                break;
            }
            new_peaks.truncate(room);

            let deflated = self.deflate(&mut image, &new_peaks);
            peaks.extend_from_slice(&new_peaks);
            if deflated == 0 {
                break;
            }
            candidates = self.glrt_detection(&image, frame);
        }

        debug!(passes, n_peaks = peaks.len(), "deflation loop finished");
        Ok(peaks)
    }

    /// Likelihood ratio statistic, scaled by -2, for every window position.
    ///
    /// Entry `(i, j)` belongs to the window whose top-left corner is `(i, j)`.
    pub fn hypothesis_map(&self, image: &DMatrix<f64>) -> DMatrix<f64> {
        let w_s = self.w_s;
        let (rows, cols) = image.shape();
        if rows <= w_s || cols <= w_s {
            return DMatrix::zeros(0, 0);
        }
        let n = (w_s * w_s) as f64;
        let g = &self.reference.patch;
        let g_squaresum = self.reference.square_sum;

        DMatrix::from_fn(rows - w_s, cols - w_s, |i, j| {
            let window = image.view((i, j), (w_s, w_s));
            let mean = window.mean();
            let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            let std = variance.sqrt();
            if std <= f64::EPSILON * mean.abs().max(1.0) {
                return 0.0;
            }
            let intensity = g.component_mul(&window).sum();
            let normalisation = w_s as f64 * std;
            let rho2 = (intensity / normalisation).powi(2) / g_squaresum;
            let ratio = (n / 2.0) * (1.0 - rho2).max(f64::MIN_POSITIVE).ln();
            -2.0 * ratio
        })
    }

    /// Candidate peak centers `(row, col)` in image coordinates.
    pub fn glrt_detection(&self, image: &DMatrix<f64>, frame: &Frame) -> Vec<(usize, usize)> {
        let hmap = self.hypothesis_map(image);
        if hmap.is_empty() {
            return Vec::new();
        }
        let offset = self.w_s / 2;
        peak_local_max(&hmap, MIN_PEAK_DISTANCE, self.threshold)
            .into_iter()
            .map(|(r, c)| (r + offset, c + offset))
            .filter(|&(r, c)| !frame.is_masked(r, c))
            .collect()
    }

    /// Fit a Gaussian on the window around each candidate.
    ///
    /// Candidates whose window leaves the image, whose fit fails, or whose
    /// fit is degenerate are dropped.
    pub fn gauss_estimation(&self, image: &DMatrix<f64>, candidates: &[(usize, usize)]) -> Vec<Peak> {
        let w_s = self.w_s;
        let half = w_s / 2;
        let (rows, cols) = image.shape();
        let mut peaks = Vec::with_capacity(candidates.len());

        for &(r, c) in candidates {
            if r < half || c < half || r - half + w_s > rows || c - half + w_s > cols {
                warn!(
                    "peak too close from the edge, use a smaller window: peak @ ({}, {}) discarded",
                    r, c
                );
                continue;
            }
            let low_r = r - half;
            let low_c = c - half;
            let patch = image.view((low_r, low_c), (w_s, w_s)).clone_owned();

            match fit_gaussian(&patch, &self.fit) {
                Some(params) if params.amplitude > 0.0 && params.width < w_s as f64 => {
                    peaks.push(Peak::new(
                        params.row + low_r as f64,
                        params.col + low_c as f64,
                        params.width,
                        params.amplitude,
                    ));
                }
                Some(params) => debug!(
                    row = r,
                    col = c,
                    width = params.width,
                    amplitude = params.amplitude,
                    "degenerate fit discarded"
                ),
                None => debug!(row = r, col = c, "gaussian fit did not converge"),
            }
        }
        peaks
    }

    /// Subtract fitted peaks from `image`; returns how many were subtracted.
    ///
    /// Peaks whose window does not lie fully inside the image are left alone.
    pub fn deflate(&self, image: &mut DMatrix<f64>, peaks: &[Peak]) -> usize {
        let w_s = self.w_s;
        let half = (w_s / 2) as f64;
        let (rows, cols) = image.shape();
        let mut deflated = 0;

        for peak in peaks {
            let low_r = (peak.y - half).floor();
            let low_c = (peak.x - half).floor();
            if low_r < 0.0
                || low_c < 0.0
                || low_r as usize + w_s > rows
                || low_c as usize + w_s > cols
            {
                continue;
            }
            let params = GaussParams {
                row: peak.y - low_r,
                col: peak.x - low_c,
                width: peak.w,
                amplitude: peak.intensity,
                background: 0.0,
            };
            let (low_r, low_c) = (low_r as usize, low_c as usize);
            for i in 0..w_s {
                for j in 0..w_s {
                    image[(low_r + i, low_c + j)] -= params.value(i, j);
                }
            }
            deflated += 1;
        }
        deflated
    }
}
