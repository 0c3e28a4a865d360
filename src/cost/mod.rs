//! Cost functions filling the blocks of the tracking cost matrix.
//!
//! Every cost function turns an immutable context into one block. Link
//! functions see the objects of two adjacent time points, diagonal
//! functions (birth and death) see one object set and the solver's current
//! adaptive threshold.

use std::ops::Range;

use nalgebra::DMatrix;

use crate::error::{Result, TrackingError};
use crate::table::{PeakRecord, PeakTable};

pub mod brownian;
pub mod diagonal;
pub mod directed;

pub use brownian::BrownianLinkCostFunction;
pub use diagonal::DiagonalCostFunction;
pub use directed::DirectedLinkCostFunction;

/// Cost of an entry that can never be selected.
pub const INFEASIBLE: f64 = f64::INFINITY;

/// Objects of two adjacent time points plus the tracking state so far.
#[derive(Debug, Clone, Copy)]
pub struct LinkContext<'a> {
    pub table: &'a PeakTable,
    /// Current labels, aligned with the table rows.
    pub labels: &'a [usize],
    /// Row ranges of every time point, see [`PeakTable::time_groups`].
    pub groups: &'a [(usize, Range<usize>)],
    pub index_in: usize,
    pub index_out: usize,
}

impl<'a> LinkContext<'a> {
    pub fn pos_in(&self) -> &'a [PeakRecord] {
        &self.table.rows()[self.groups[self.index_in].1.clone()]
    }

    pub fn pos_out(&self) -> &'a [PeakRecord] {
        &self.table.rows()[self.groups[self.index_out].1.clone()]
    }

    pub fn labels_in(&self) -> &'a [usize] {
        &self.labels[self.groups[self.index_in].1.clone()]
    }

    pub fn t_in(&self) -> f64 {
        self.pos_in().first().map_or(0.0, |r| r.t)
    }

    pub fn t_out(&self) -> f64 {
        self.pos_out().first().map_or(0.0, |r| r.t)
    }

    /// Elapsed time between the two time points; 1 when the `t` column
    /// does not increase.
    pub fn dt(&self) -> f64 {
        let dt = self.t_out() - self.t_in();
        if dt > 0.0 {
            dt
        } else {
            1.0
        }
    }

    fn check(&self) -> Result<()> {
        if self.labels.len() != self.table.len() {
            return Err(TrackingError::InvalidContext(format!(
                "{} labels for {} table rows",
                self.labels.len(),
                self.table.len()
            )));
        }
        if self.index_in >= self.index_out || self.index_out >= self.groups.len() {
            return Err(TrackingError::InvalidContext(format!(
                "time point indices ({}, {}) out of order or range",
                self.index_in, self.index_out
            )));
        }
        Ok(())
    }
}

/// One object set plus the running maximum of accepted link costs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagonalContext {
    pub n_objects: usize,
    pub max_assigned_cost: f64,
    /// Set once an accepted link has pushed `max_assigned_cost` up.
    pub raised: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum CostContext<'a> {
    Link(LinkContext<'a>),
    Diagonal(DiagonalContext),
}

impl CostContext<'_> {
    /// Shape the block built from this context must have.
    pub fn expected_shape(&self) -> (usize, usize) {
        match self {
            CostContext::Link(ctx) => (ctx.pos_in().len(), ctx.pos_out().len()),
            CostContext::Diagonal(ctx) => (ctx.n_objects, ctx.n_objects),
        }
    }
}

pub trait CostFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Build the cost block for `context`. Must not depend on anything
    /// but its arguments.
    fn block(&self, context: &CostContext<'_>) -> Result<DMatrix<f64>>;

    /// Cost used before any link has been accepted, for diagonal functions.
    fn initial_cost(&self) -> Option<f64> {
        None
    }
}

/// Build a block and check it has the declared shape.
pub fn compute_block(function: &dyn CostFunction, context: &CostContext<'_>, block: &'static str) -> Result<DMatrix<f64>> {
    if let CostContext::Link(ctx) = context {
        ctx.check()?;
    }
    let mat = function.block(context)?;
    let expected = context.expected_shape();
    if mat.shape() != expected {
        return Err(TrackingError::ShapeMismatch {
            block,
            expected,
            actual: mat.shape(),
        });
    }
    Ok(mat)
}

pub(crate) fn link_context<'a>(function: &str, context: &CostContext<'a>) -> Result<LinkContext<'a>> {
    match context {
        CostContext::Link(ctx) => Ok(*ctx),
        CostContext::Diagonal(_) => Err(TrackingError::InvalidContext(format!(
            "{} needs the objects of two time points",
            function
        ))),
    }
}

/// The three cost functions driving the frame-by-frame solver.
pub struct CostFunctions {
    pub link: Box<dyn CostFunction>,
    pub birth: Box<dyn CostFunction>,
    pub death: Box<dyn CostFunction>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(t_stamp: usize, label: usize, x: f64, y: f64) -> PeakRecord {
        PeakRecord {
            t_stamp,
            label,
            t: t_stamp as f64,
            z: 0.0,
            y,
            x,
            w: 1.0,
            intensity: 1.0,
        }
    }

    struct Misshaped;

    impl CostFunction for Misshaped {
        fn name(&self) -> &str {
            "misshaped"
        }

        fn block(&self, _context: &CostContext<'_>) -> Result<DMatrix<f64>> {
            Ok(DMatrix::zeros(1, 3))
        }
    }

    #[test]
    fn test_compute_block_checks_shape() {
        let ctx = CostContext::Diagonal(DiagonalContext {
            n_objects: 2,
            max_assigned_cost: 1.0,
            raised: false,
        });
        let err = compute_block(&Misshaped, &ctx, "birth").unwrap_err();
        assert!(matches!(
            err,
            TrackingError::ShapeMismatch {
                expected: (2, 2),
                actual: (1, 3),
                ..
            }
        ));
    }

    #[test]
    fn test_link_context_accessors() {
        let table = PeakTable::new(vec![record(0, 0, 0.0, 0.0), record(1, 1, 1.0, 0.0), record(1, 2, 3.0, 0.0)]);
        let groups = table.time_groups();
        let labels = vec![0, 1, 2];
        let ctx = LinkContext {
            table: &table,
            labels: &labels,
            groups: &groups,
            index_in: 0,
            index_out: 1,
        };
        assert_eq!(ctx.pos_in().len(), 1);
        assert_eq!(ctx.pos_out().len(), 2);
        assert_eq!(ctx.dt(), 1.0);
        assert_eq!(CostContext::Link(ctx).expected_shape(), (1, 2));

        let bad = LinkContext { index_in: 1, index_out: 0, ..ctx };
        assert!(bad.check().is_err());
    }
}
