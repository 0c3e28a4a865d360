use nalgebra::DMatrix;

use crate::config::validate_coords;
use crate::cost::{link_context, CostContext, CostFunction, INFEASIBLE};
use crate::error::{Result, TrackingError};
use crate::table::Coord;
use crate::utils::squared_distance;

/// Squared displacement between two time points.
///
/// A link is infeasible when the squared displacement exceeds
/// `max_speed² · Δt`.
#[derive(Debug, Clone)]
pub struct BrownianLinkCostFunction {
    pub max_speed: f64,
    pub coords: Vec<Coord>,
}

impl BrownianLinkCostFunction {
    pub fn new(max_speed: f64, coords: Vec<Coord>) -> Result<Self> {
        if !(max_speed.is_finite() && max_speed > 0.0) {
            return Err(TrackingError::InvalidParameter(format!(
                "max_speed must be positive, got {}",
                max_speed
            )));
        }
        validate_coords(&coords)?;
        Ok(Self { max_speed, coords })
    }
}

impl CostFunction for BrownianLinkCostFunction {
    fn name(&self) -> &str {
        "brownian link"
    }

    fn block(&self, context: &CostContext<'_>) -> Result<DMatrix<f64>> {
        let ctx = link_context(self.name(), context)?;
        let pos_in = ctx.pos_in();
        let pos_out = ctx.pos_out();
        let max_sq = self.max_speed * self.max_speed * ctx.dt();

        let xs_in: Vec<Vec<f64>> = pos_in.iter().map(|r| r.coords(&self.coords)).collect();
        let xs_out: Vec<Vec<f64>> = pos_out.iter().map(|r| r.coords(&self.coords)).collect();

        Ok(DMatrix::from_fn(pos_in.len(), pos_out.len(), |i, j| {
            let d2 = squared_distance(&xs_in[i], &xs_out[j]);
            if d2 > max_sq {
                INFEASIBLE
            } else {
                d2
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::tests::record;
    use crate::cost::{DiagonalContext, LinkContext};
    use crate::table::PeakTable;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_squared_distances_and_cap() {
        let table = PeakTable::new(vec![
            record(0, 0, 0.0, 0.0),
            record(0, 1, 10.0, 0.0),
            record(1, 2, 1.0, 1.0),
            record(1, 3, 30.0, 0.0),
        ]);
        let groups = table.time_groups();
        let labels = vec![0, 1, 2, 3];
        let ctx = CostContext::Link(LinkContext {
            table: &table,
            labels: &labels,
            groups: &groups,
            index_in: 0,
            index_out: 1,
        });
        let cf = BrownianLinkCostFunction::new(25.0, vec![Coord::X, Coord::Y]).unwrap();
        let mat = cf.block(&ctx).unwrap();

        assert_eq!(mat.shape(), (2, 2));
        assert_abs_diff_eq!(mat[(0, 0)], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mat[(1, 0)], 82.0, epsilon = 1e-12);
        assert!(mat[(0, 1)].is_infinite());
        assert_abs_diff_eq!(mat[(1, 1)], 400.0, epsilon = 1e-12);
    }

    #[test]
    fn test_longer_gap_allows_longer_jumps() {
        let table = PeakTable::new(vec![record(0, 0, 0.0, 0.0), record(4, 1, 8.0, 0.0)]);
        let groups = table.time_groups();
        let labels = vec![0, 1];
        let ctx = CostContext::Link(LinkContext {
            table: &table,
            labels: &labels,
            groups: &groups,
            index_in: 0,
            index_out: 1,
        });
        let cf = BrownianLinkCostFunction::new(5.0, vec![Coord::X]).unwrap();
        assert_abs_diff_eq!(cf.block(&ctx).unwrap()[(0, 0)], 64.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_diagonal_context() {
        let cf = BrownianLinkCostFunction::new(1.0, Coord::xyz()).unwrap();
        let ctx = CostContext::Diagonal(DiagonalContext {
            n_objects: 1,
            max_assigned_cost: 1.0,
            raised: false,
        });
        assert!(matches!(cf.block(&ctx), Err(TrackingError::InvalidContext(_))));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(BrownianLinkCostFunction::new(0.0, Coord::xyz()).is_err());
        assert!(BrownianLinkCostFunction::new(1.0, vec![]).is_err());
    }
}
