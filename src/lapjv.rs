//! Dense minimum-cost linear assignment.
//!
//! Shortest augmenting paths with row and column potentials, the same
//! family as Jonker-Volgenant. Runs in O(n³) on a square matrix.

use nalgebra::DMatrix;

use crate::error::{Result, TrackingError};

/// A perfect matching of a square cost matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Column matched to each row.
    pub row_to_col: Vec<usize>,
    /// Row matched to each column.
    pub col_to_row: Vec<usize>,
}

impl Assignment {
    pub fn len(&self) -> usize {
        self.row_to_col.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_to_col.is_empty()
    }

    /// Sum of the selected entries.
    pub fn total_cost(&self, cost: &DMatrix<f64>) -> f64 {
        self.row_to_col.iter().enumerate().map(|(i, &j)| cost[(i, j)]).sum()
    }
}

/// Solve the assignment problem on a square matrix.
///
/// Non-finite entries are forbidden. They are replaced by a cost larger
/// than any matching made of finite entries, and an error is returned if
/// the optimum still has to use one.
pub fn lapjv(cost: &DMatrix<f64>) -> Result<Assignment> {
    let n = cost.nrows();
    if cost.ncols() != n {
        return Err(TrackingError::Assignment(format!(
            "cost matrix must be square, got {}x{}",
            n,
            cost.ncols()
        )));
    }
    if n == 0 {
        return Ok(Assignment::default());
    }

    let max_abs = cost
        .iter()
        .filter(|c| c.is_finite())
        .fold(0.0_f64, |acc, c| acc.max(c.abs()));
    let forbidden = 2.0 * n as f64 * max_abs + 1.0;
    let c = cost.map(|v| if v.is_finite() { v } else { forbidden });

    // 1-indexed potentials, column 0 is the virtual source.
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    let mut p = vec![0_usize; n + 1];
    let mut way = vec![0_usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0_usize;
        let mut min_val = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0_usize;

            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let reduced = c[(i0 - 1, j - 1)] - u[i0] - v[j];
                if reduced < min_val[j] {
                    min_val[j] = reduced;
                    way[j] = j0;
                }
                if min_val[j] < delta {
                    delta = min_val[j];
                    j1 = j;
                }
            }
            if j1 == 0 {
                return Err(TrackingError::Assignment("no augmenting path found".to_string()));
            }

            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let prev = way[j0];
            p[j0] = p[prev];
            j0 = prev;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = Assignment {
        row_to_col: vec![0; n],
        col_to_row: vec![0; n],
    };
    for j in 1..=n {
        assignment.row_to_col[p[j] - 1] = j - 1;
        assignment.col_to_row[j - 1] = p[j] - 1;
    }

    if let Some((i, &j)) = assignment
        .row_to_col
        .iter()
        .enumerate()
        .find(|&(i, &j)| !cost[(i, j)].is_finite())
    {
        return Err(TrackingError::Assignment(format!(
            "no feasible assignment: row {} can only take forbidden column {}",
            i, j
        )));
    }
    Ok(assignment)
}
