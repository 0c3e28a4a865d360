use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::config::validate_coords;
use crate::cost::{link_context, CostContext, CostFunction, LinkContext, INFEASIBLE};
use crate::error::{Result, TrackingError};
use crate::table::Coord;
use crate::track::Trajectory;
use crate::utils::squared_distance;

/// Squared distance between the position extrapolated from each incoming
/// segment's recent history and each outgoing object.
///
/// The history of a segment is every row carrying its current label within
/// `past_traj_time` before the incoming time point. Links farther than
/// `max_speed² · Δt` from the prediction are infeasible.
#[derive(Debug, Clone)]
pub struct DirectedLinkCostFunction {
    pub max_speed: f64,
    pub past_traj_time: f64,
    pub smooth_factor: f64,
    pub interpolation_order: usize,
    pub coords: Vec<Coord>,
}

impl DirectedLinkCostFunction {
    pub fn new(
        max_speed: f64,
        past_traj_time: f64,
        smooth_factor: f64,
        interpolation_order: usize,
        coords: Vec<Coord>,
    ) -> Result<Self> {
        if !(max_speed.is_finite() && max_speed > 0.0) {
            return Err(TrackingError::InvalidParameter(format!(
                "max_speed must be positive, got {}",
                max_speed
            )));
        }
        if !(past_traj_time > 0.0) {
            return Err(TrackingError::InvalidParameter(format!(
                "past_traj_time must be positive, got {}",
                past_traj_time
            )));
        }
        if !(smooth_factor >= 0.0) {
            return Err(TrackingError::InvalidParameter(format!(
                "smooth_factor must be non-negative, got {}",
                smooth_factor
            )));
        }
        if interpolation_order == 0 {
            return Err(TrackingError::InvalidParameter("interpolation_order must be at least 1".to_string()));
        }
        validate_coords(&coords)?;
        Ok(Self {
            max_speed,
            past_traj_time,
            smooth_factor,
            interpolation_order,
            coords,
        })
    }

    /// Recent history of every incoming label, oldest point first.
    fn histories(&self, ctx: &LinkContext<'_>) -> HashMap<usize, Trajectory> {
        let mut histories: HashMap<usize, Trajectory> =
            ctx.labels_in().iter().map(|&label| (label, Trajectory::new())).collect();
        let t_min = ctx.t_in() - self.past_traj_time;
        let rows = ctx.table.rows();

        let window = &ctx.groups[..=ctx.index_in];
        let first = window.partition_point(|(_, range)| rows[range.start].t < t_min);
        for (_, range) in &window[first..] {
            for idx in range.clone() {
                if let Some(traj) = histories.get_mut(&ctx.labels[idx]) {
                    traj.push(rows[idx].t, rows[idx].coords(&self.coords));
                }
            }
        }
        histories
    }
}

impl CostFunction for DirectedLinkCostFunction {
    fn name(&self) -> &str {
        "directed link"
    }

    fn block(&self, context: &CostContext<'_>) -> Result<DMatrix<f64>> {
        let ctx = link_context(self.name(), context)?;
        let pos_in = ctx.pos_in();
        let pos_out = ctx.pos_out();
        let t_out = ctx.t_out();
        let max_sq = self.max_speed * self.max_speed * ctx.dt();
        let histories = self.histories(&ctx);

        let predicted: Vec<Vec<f64>> = pos_in
            .iter()
            .zip(ctx.labels_in())
            .map(|(row, label)| {
                histories
                    .get(label)
                    .and_then(|traj| traj.extrapolate(t_out, self.interpolation_order, self.smooth_factor))
                    .unwrap_or_else(|| row.coords(&self.coords))
            })
            .collect();
        let xs_out: Vec<Vec<f64>> = pos_out.iter().map(|r| r.coords(&self.coords)).collect();

        Ok(DMatrix::from_fn(pos_in.len(), pos_out.len(), |i, j| {
            let d2 = squared_distance(&predicted[i], &xs_out[j]);
            if d2 > max_sq {
                INFEASIBLE
            } else {
                d2
            }
        }))
    }
}
