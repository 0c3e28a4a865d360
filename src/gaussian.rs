//! Radially symmetric 2-D Gaussian model and its least-squares fit.
//!
//! The model over a `w_s × w_s` patch is
//! `I · exp(-(i - yc)² / w²) · exp(-(j - xc)² / w²) + bg`
//! where `i` runs along rows and `j` along columns.

use nalgebra::{DMatrix, SMatrix, SVector};

type Vector5 = SVector<f64, 5>;
type Matrix5 = SMatrix<f64, 5, 5>;

/// Fitted parameters, in patch coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussParams {
    /// Row (y) center.
    pub row: f64,
    /// Column (x) center.
    pub col: f64,
    pub width: f64,
    pub amplitude: f64,
    pub background: f64,
}

impl GaussParams {
    fn to_vector(self) -> Vector5 {
        Vector5::new(self.row, self.col, self.width, self.amplitude, self.background)
    }

    fn from_vector(v: &Vector5) -> Self {
        Self {
            row: v[0],
            col: v[1],
            width: v[2],
            amplitude: v[3],
            background: v[4],
        }
    }

    /// Model value at patch pixel `(i, j)`.
    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.amplitude * self.profile(i, j) + self.background
    }

    fn profile(&self, i: usize, j: usize) -> f64 {
        let w2 = self.width * self.width;
        let di = i as f64 - self.row;
        let dj = j as f64 - self.col;
        (-di * di / w2).exp() * (-dj * dj / w2).exp()
    }
}

/// Zero-mean reference patch of radius `r0` used by the likelihood test,
/// together with its energy `Σ g²`.
#[derive(Debug, Clone)]
pub struct ReferencePatch {
    pub patch: DMatrix<f64>,
    pub square_sum: f64,
}

impl ReferencePatch {
    /// Power-normalised Gaussian centered on the window, minus its mean.
    pub fn new(r0: f64, w_s: usize) -> Self {
        let half = (w_s / 2) as f64;
        let norm = 1.0 / (std::f64::consts::PI.sqrt() * r0);
        let axis: Vec<f64> = (0..w_s)
            .map(|k| {
                let d = k as f64 - half;
                (-d * d / (r0 * r0)).exp()
            })
            .collect();

        let mut patch = DMatrix::from_fn(w_s, w_s, |i, j| norm * axis[i] * axis[j]);
        let mean = patch.mean();
        patch.add_scalar_mut(-mean);
        let square_sum = patch.iter().map(|g| g * g).sum();

        Self { patch, square_sum }
    }
}

/// Continuous Gaussian sampled on a `w_s × w_s` grid.
pub fn gauss_continuous(params: &GaussParams, w_s: usize) -> DMatrix<f64> {
    DMatrix::from_fn(w_s, w_s, |i, j| params.value(i, j))
}

/// Levenberg-Marquardt settings for the patch fit.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    /// Absolute step tolerance on every parameter.
    pub xtol: f64,
    pub max_iterations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            xtol: 0.01,
            max_iterations: 200,
        }
    }
}

/// Initial guess derived from the patch itself.
pub fn initial_guess(patch: &DMatrix<f64>) -> GaussParams {
    let half = patch.nrows() as f64 / 2.0;
    let max = patch.max();
    let min = patch.min();
    GaussParams {
        row: half,
        col: half,
        width: 3.0,
        amplitude: max - min,
        background: min,
    }
}

/// Fit the Gaussian model to a square patch.
///
/// Returns `None` when the fit does not converge within the iteration budget
/// or produces non-finite values. The returned width is always positive.
pub fn fit_gaussian(patch: &DMatrix<f64>, options: &FitOptions) -> Option<GaussParams> {
    if patch.nrows() != patch.ncols() || patch.is_empty() {
        return None;
    }
    let mut p = initial_guess(patch).to_vector();
    let mut cost = residual_cost(patch, &p);
    let mut lambda = 1e-3;
    let mut moved = false;

    for _ in 0..options.max_iterations {
        let (jtj, jtr) = normal_equations(patch, &p);

        let mut accepted = None;
        for _ in 0..16 {
            let mut a = jtj;
            for k in 0..5 {
                a[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let step = match a.cholesky() {
                Some(chol) => chol.solve(&jtr),
                None => match a.lu().solve(&jtr) {
                    Some(s) => s,
                    None => {
                        lambda *= 10.0;
                        continue;
                    }
                },
            };
            let candidate = p + step;
            let new_cost = residual_cost(patch, &candidate);
            if new_cost.is_finite() && new_cost <= cost {
                accepted = Some((candidate, new_cost, step));
                lambda = (lambda / 10.0).max(1e-12);
                break;
            }
            lambda *= 10.0;
        }

        let Some((candidate, new_cost, step)) = accepted else {
            // No downhill step left. Only a fit that moved counts as converged.
            return if moved { finish(&p) } else { None };
        };
        moved = true;
        p = candidate;
        cost = new_cost;

        if step.amax() < options.xtol {
            return finish(&p);
        }
    }
    None
}

fn finish(p: &Vector5) -> Option<GaussParams> {
    if p.iter().all(|v| v.is_finite()) && p[2] != 0.0 {
        let mut params = GaussParams::from_vector(p);
        params.width = params.width.abs();
        Some(params)
    } else {
        None
    }
}

fn residual_cost(patch: &DMatrix<f64>, p: &Vector5) -> f64 {
    let params = GaussParams::from_vector(p);
    let mut sum = 0.0;
    for i in 0..patch.nrows() {
        for j in 0..patch.ncols() {
            let r = patch[(i, j)] - params.value(i, j);
            sum += r * r;
        }
    }
    sum
}

/// `JᵀJ` and `Jᵀr` for the residual `r = data - model`.
fn normal_equations(patch: &DMatrix<f64>, p: &Vector5) -> (Matrix5, Vector5) {
    let params = GaussParams::from_vector(p);
    let w = params.width;
    let w2 = w * w;
    let mut jtj = Matrix5::zeros();
    let mut jtr = Vector5::zeros();

    for i in 0..patch.nrows() {
        for j in 0..patch.ncols() {
            let g = params.profile(i, j);
            let ag = params.amplitude * g;
            let di = i as f64 - params.row;
            let dj = j as f64 - params.col;
            let jac = Vector5::new(
                ag * 2.0 * di / w2,
                ag * 2.0 * dj / w2,
                ag * 2.0 * (di * di + dj * dj) / (w2 * w),
                g,
                1.0,
            );
            let r = patch[(i, j)] - (ag + params.background);
            jtj += jac * jac.transpose();
            jtr += jac * r;
        }
    }
    (jtj, jtr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reference_patch_zero_mean() {
        let reference = ReferencePatch::new(1.5, 7);
        assert_abs_diff_eq!(reference.patch.sum(), 0.0, epsilon = 1e-12);
        assert!(reference.square_sum > 0.0);
        // symmetric around the window center
        assert_abs_diff_eq!(reference.patch[(0, 3)], reference.patch[(6, 3)], epsilon = 1e-12);
        assert!(reference.patch[(3, 3)] > reference.patch[(0, 0)]);
    }

    #[test]
    fn test_gauss_continuous_peak_location() {
        let params = GaussParams {
            row: 4.0,
            col: 2.0,
            width: 1.5,
            amplitude: 10.0,
            background: 1.0,
        };
        let patch = gauss_continuous(&params, 9);
        assert_abs_diff_eq!(patch[(4, 2)], 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(patch.max(), 11.0, epsilon = 1e-12);
        assert!(patch[(0, 8)] < 1.01);
    }

    #[test]
    fn test_fit_recovers_exact_gaussian() {
        let truth = GaussParams {
            row: 4.3,
            col: 3.8,
            width: 2.0,
            amplitude: 150.0,
            background: 12.0,
        };
        let patch = gauss_continuous(&truth, 9);
        let fit = fit_gaussian(&patch, &FitOptions::default()).expect("fit converges");
        assert_abs_diff_eq!(fit.row, truth.row, epsilon = 0.02);
        assert_abs_diff_eq!(fit.col, truth.col, epsilon = 0.02);
        assert_abs_diff_eq!(fit.width, truth.width, epsilon = 0.02);
        assert_abs_diff_eq!(fit.amplitude, truth.amplitude, epsilon = 1.0);
        assert_abs_diff_eq!(fit.background, truth.background, epsilon = 1.0);
    }

    #[test]
    fn test_fit_without_any_step_is_dropped() {
        let mut patch = gauss_continuous(
            &GaussParams {
                row: 4.0,
                col: 4.0,
                width: 2.0,
                amplitude: 100.0,
                background: 5.0,
            },
            9,
        );
        patch[(2, 6)] = f64::NAN;
        assert!(fit_gaussian(&patch, &FitOptions::default()).is_none());
    }

    #[test]
    fn test_fit_rejects_non_square_patch() {
        let patch = DMatrix::<f64>::zeros(3, 4);
        assert!(fit_gaussian(&patch, &FitOptions::default()).is_none());
    }
}
