use nalgebra::DMatrix;

use crate::cost::{CostContext, CostFunction, DiagonalContext, INFEASIBLE};
use crate::error::{Result, TrackingError};

/// Birth or death cost on the diagonal, infeasible elsewhere.
///
/// The cost stays at `initial_cost` until an accepted link raises the
/// solver's threshold, then follows that threshold scaled by `penalty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagonalCostFunction {
    pub penalty: f64,
    pub initial_cost: f64,
}

impl DiagonalCostFunction {
    pub fn new(penalty: f64, initial_cost: f64) -> Result<Self> {
        if !(penalty.is_finite() && penalty > 0.0) {
            return Err(TrackingError::InvalidParameter(format!("penalty must be positive, got {}", penalty)));
        }
        if !initial_cost.is_finite() {
            return Err(TrackingError::InvalidParameter(format!(
                "initial cost must be finite, got {}",
                initial_cost
            )));
        }
        Ok(Self { penalty, initial_cost })
    }

    pub fn cost(&self, ctx: &DiagonalContext) -> f64 {
        if ctx.raised {
            ctx.max_assigned_cost * self.penalty
        } else {
            self.initial_cost
        }
    }
}

impl CostFunction for DiagonalCostFunction {
    fn name(&self) -> &str {
        "diagonal"
    }

    fn block(&self, context: &CostContext<'_>) -> Result<DMatrix<f64>> {
        let ctx = match context {
            CostContext::Diagonal(ctx) => ctx,
            CostContext::Link(_) => {
                return Err(TrackingError::InvalidContext(
                    "diagonal cost needs an object count and a running maximum".to_string(),
                ))
            }
        };
        let cost = self.cost(ctx);
        let n = ctx.n_objects;
        Ok(DMatrix::from_fn(n, n, |i, j| if i == j { cost } else { INFEASIBLE }))
    }

    fn initial_cost(&self) -> Option<f64> {
        Some(self.initial_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(n_objects: usize, max_assigned_cost: f64, raised: bool) -> CostContext<'static> {
        CostContext::Diagonal(DiagonalContext {
            n_objects,
            max_assigned_cost,
            raised,
        })
    }

    #[test]
    fn test_initial_cost_until_raised() {
        let cf = DiagonalCostFunction::new(1.05, 100.0).unwrap();
        let mat = cf.block(&context(3, 50.0, false)).unwrap();
        assert_eq!(mat.shape(), (3, 3));
        assert_eq!(mat[(1, 1)], 100.0);
        assert!(mat[(0, 2)].is_infinite());
        assert!(mat[(2, 1)].is_infinite());
    }

    #[test]
    fn test_follows_raised_maximum() {
        let cf = DiagonalCostFunction::new(2.0, 10.0).unwrap();
        assert_eq!(cf.block(&context(1, 12.0, true)).unwrap()[(0, 0)], 24.0);
        assert_eq!(cf.initial_cost(), Some(10.0));
    }

    #[test]
    fn test_larger_maximum_alone_does_not_raise() {
        // A threshold seeded from another function's initial cost.
        let birth = DiagonalCostFunction::new(1.0, 1.0).unwrap();
        assert_eq!(birth.block(&context(1, 10.0, false)).unwrap()[(0, 0)], 1.0);
        assert_eq!(birth.block(&context(1, 10.0, true)).unwrap()[(0, 0)], 10.0);
    }

    #[test]
    fn test_empty_object_set() {
        let cf = DiagonalCostFunction::new(1.0, 1.0).unwrap();
        assert_eq!(cf.block(&context(0, 1.0, false)).unwrap().shape(), (0, 0));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(DiagonalCostFunction::new(0.0, 1.0).is_err());
        assert!(DiagonalCostFunction::new(1.0, f64::INFINITY).is_err());
    }
}
