//! Past positions of one track segment and their extrapolation in time.

use nalgebra::{DMatrix, DVector};

/// Time-ordered positions of one label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub positions: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point; points must arrive in increasing time.
    pub fn push(&mut self, t: f64, position: Vec<f64>) {
        self.times.push(t);
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn last_position(&self) -> Option<&[f64]> {
        self.positions.last().map(Vec::as_slice)
    }

    /// Predict the position at time `t`.
    ///
    /// Each coordinate is fitted by a polynomial in time of degree
    /// `order`, lowered to `len() - 1` when the history is too short; a
    /// single point therefore predicts the last known position.
    ///
    /// The newest `degree + 1` points always carry weight 1. Older points
    /// carry `s / (1 + s)` with `s = smooth_factor`, so `s = 0` interpolates
    /// the newest points, small `s` stays close to that interpolant and a
    /// large `s` tends to the plain least-squares fit over the history.
    pub fn extrapolate(&self, t: f64, order: usize, smooth_factor: f64) -> Option<Vec<f64>> {
        let last = self.last_position()?.to_vec();
        let degree = order.min(self.len() - 1);
        if degree == 0 {
            return Some(last);
        }

        let start = if smooth_factor > 0.0 { 0 } else { self.len() - degree - 1 };
        let times = &self.times[start..];
        let positions = &self.positions[start..];
        let n_recent = degree + 1;
        let old_weight = (smooth_factor / (1.0 + smooth_factor)).sqrt();
        let row_weight = |i: usize| if i + n_recent >= times.len() { 1.0 } else { old_weight };

        // Center on the newest point and rescale for a well-conditioned system.
        let t_last = *times.last()?;
        let scale = times.iter().map(|ti| (ti - t_last).abs()).fold(1.0, f64::max);
        let vandermonde = DMatrix::from_fn(times.len(), degree + 1, |i, k| {
            row_weight(i) * ((times[i] - t_last) / scale).powi(k as i32)
        });
        let svd = vandermonde.svd(true, true);
        let s = (t - t_last) / scale;

        let mut predicted = Vec::with_capacity(last.len());
        for dim in 0..last.len() {
            let b = DVector::from_iterator(
                times.len(),
                positions.iter().enumerate().map(|(i, p)| row_weight(i) * p[dim]),
            );
            match svd.solve(&b, 1e-12) {
                Ok(coeffs) => {
                    let value = coeffs.iter().enumerate().map(|(k, c)| c * s.powi(k as i32)).sum::<f64>();
                    predicted.push(if value.is_finite() { value } else { last[dim] });
                }
                Err(_) => predicted.push(last[dim]),
            }
        }
        Some(predicted)
    }
}
