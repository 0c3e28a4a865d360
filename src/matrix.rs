//! The global cost matrix of one pair of time points.
//!
//! ```text
//!              t_out objects     death slots
//! t_in      [      link      |     death     ]
//! birth     [      birth     |   auxiliary   ]
//! ```
//!
//! The auxiliary block is the transpose of the link block's feasibility,
//! filled with the smallest link cost. A chosen link `(i, j)` leaves death
//! slot `i` and birth row `j` free, which pair up through it.

use nalgebra::DMatrix;
use tracing::debug;

use crate::cost::INFEASIBLE;
use crate::error::{Result, TrackingError};
use crate::lapjv::{lapjv, Assignment};

#[derive(Debug, Clone)]
pub struct CostMatrix {
    pub mat: DMatrix<f64>,
    /// `[n_in, n_out]`: real rows, then birth rows.
    pub row_shapes: [usize; 2],
    /// `[n_out, n_in]`: real columns, then death columns.
    pub col_shapes: [usize; 2],
    assignment: Option<Assignment>,
}

impl CostMatrix {
    pub fn from_blocks(link: &DMatrix<f64>, death: &DMatrix<f64>, birth: &DMatrix<f64>) -> Result<Self> {
        let (n_in, n_out) = link.shape();
        if death.shape() != (n_in, n_in) {
            return Err(TrackingError::ShapeMismatch {
                block: "death",
                expected: (n_in, n_in),
                actual: death.shape(),
            });
        }
        if birth.shape() != (n_out, n_out) {
            return Err(TrackingError::ShapeMismatch {
                block: "birth",
                expected: (n_out, n_out),
                actual: birth.shape(),
            });
        }

        let fill = link
            .iter()
            .copied()
            .filter(|c| c.is_finite())
            .fold(f64::INFINITY, f64::min);

        let n = n_in + n_out;
        let mut mat = DMatrix::from_element(n, n, INFEASIBLE);
        mat.view_mut((0, 0), (n_in, n_out)).copy_from(link);
        mat.view_mut((0, n_out), (n_in, n_in)).copy_from(death);
        mat.view_mut((n_in, 0), (n_out, n_out)).copy_from(birth);
        for i in 0..n_in {
            for j in 0..n_out {
                if link[(i, j)].is_finite() {
                    mat[(n_in + j, n_out + i)] = fill;
                }
            }
        }

        Ok(Self {
            mat,
            row_shapes: [n_in, n_out],
            col_shapes: [n_out, n_in],
            assignment: None,
        })
    }

    /// Solve the assignment; an empty matrix gives an empty assignment.
    pub fn solve(&mut self) -> Result<&Assignment> {
        let assignment = lapjv(&self.mat)?;
        debug!(size = self.mat.nrows(), cost = assignment.total_cost(&self.mat), "Assignment solved");
        Ok(&*self.assignment.insert(assignment))
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    /// Row matched to every t_out object. Values `>= row_shapes[0]` are
    /// births. Empty before [`CostMatrix::solve`].
    pub fn out_links(&self) -> Vec<usize> {
        self.assignment
            .as_ref()
            .map(|a| a.col_to_row[..self.col_shapes[0]].to_vec())
            .unwrap_or_default()
    }

    /// Column matched to every t_in object. Values `>= col_shapes[0]` are
    /// deaths. Empty before [`CostMatrix::solve`].
    pub fn in_links(&self) -> Vec<usize> {
        self.assignment
            .as_ref()
            .map(|a| a.row_to_col[..self.row_shapes[0]].to_vec())
            .unwrap_or_default()
    }
}
