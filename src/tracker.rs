//! Frame-by-frame linking of detected peaks into track segments.

use std::ops::Range;

use tracing::{debug, info};

use crate::config::{validate_coords, TrackingParameters};
use crate::cost::{
    compute_block, BrownianLinkCostFunction, CostContext, CostFunctions, DiagonalContext, DiagonalCostFunction,
    DirectedLinkCostFunction, LinkContext,
};
use crate::error::{Result, TrackingError};
use crate::matrix::CostMatrix;
use crate::progress::{CancellationToken, ProgressEvent, ProgressSink};
use crate::table::{Coord, PeakTable};

/// Links every pair of adjacent time points with one assignment problem.
///
/// Birth and death costs adapt as tracking goes: once a link costing more
/// than the current threshold is accepted, the threshold follows it for
/// every later pair. Pairs are therefore solved strictly in time order.
pub struct ByFrameSolver {
    table: PeakTable,
    cost_functions: CostFunctions,
    coords: Vec<Coord>,
    groups: Vec<(usize, Range<usize>)>,
    /// Working labels, aligned with the table rows.
    labels: Vec<usize>,
    max_label: usize,
    max_assigned_cost: f64,
    /// Whether an accepted link has raised `max_assigned_cost` yet.
    raised: bool,
}

impl ByFrameSolver {
    /// Check the table and set up the solver state.
    pub fn new(table: PeakTable, cost_functions: CostFunctions, coords: Vec<Coord>) -> Result<Self> {
        validate_coords(&coords)?;
        table.validate(&coords)?;
        let max_assigned_cost = cost_functions.death.initial_cost().ok_or_else(|| {
            TrackingError::InvalidParameter(format!(
                "death cost function '{}' has no initial cost",
                cost_functions.death.name()
            ))
        })?;

        let labels: Vec<usize> = table.rows().iter().map(|r| r.label).collect();
        let max_label = labels.iter().copied().max().unwrap_or(0);
        let groups = table.time_groups();

        Ok(Self {
            table,
            cost_functions,
            coords,
            groups,
            labels,
            max_label,
            max_assigned_cost,
            raised: false,
        })
    }

    /// Squared-distance linking, with birth and death initially costing
    /// `max_speed² × penalty`.
    pub fn for_brownian_motion(table: PeakTable, max_speed: f64, penalty: f64, coords: Vec<Coord>) -> Result<Self> {
        let guessed_cost = max_speed * max_speed * penalty;
        let diagonal = DiagonalCostFunction::new(penalty, guessed_cost)?;
        let cost_functions = CostFunctions {
            link: Box::new(BrownianLinkCostFunction::new(max_speed, coords.clone())?),
            birth: Box::new(diagonal),
            death: Box::new(diagonal),
        };
        Self::new(table, cost_functions, coords)
    }

    /// Linking against positions extrapolated from recent history, with
    /// birth and death initially costing `20 × penalty`.
    pub fn for_directed_motion(
        table: PeakTable,
        max_speed: f64,
        penalty: f64,
        past_traj_time: f64,
        smooth_factor: f64,
        interpolation_order: usize,
        coords: Vec<Coord>,
    ) -> Result<Self> {
        let guessed_cost = 20.0 * penalty;
        let diagonal = DiagonalCostFunction::new(penalty, guessed_cost)?;
        let link = DirectedLinkCostFunction::new(
            max_speed,
            past_traj_time,
            smooth_factor,
            interpolation_order,
            coords.clone(),
        )?;
        let cost_functions = CostFunctions {
            link: Box::new(link),
            birth: Box::new(diagonal),
            death: Box::new(diagonal),
        };
        Self::new(table, cost_functions, coords)
    }

    pub fn from_parameters(table: PeakTable, params: &TrackingParameters) -> Result<Self> {
        params.validate()?;
        match params.clone() {
            TrackingParameters::Brownian {
                max_speed,
                penalty,
                coords,
            } => Self::for_brownian_motion(table, max_speed, penalty, coords),
            TrackingParameters::Directed {
                max_speed,
                penalty,
                past_traj_time,
                smooth_factor,
                interpolation_order,
                coords,
            } => Self::for_directed_motion(
                table,
                max_speed,
                penalty,
                past_traj_time,
                smooth_factor,
                interpolation_order,
                coords,
            ),
        }
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    /// Largest link cost accepted so far, or the initial death cost.
    pub fn max_assigned_cost(&self) -> f64 {
        self.max_assigned_cost
    }

    /// Labels resolved so far, aligned with the input table rows. After a
    /// cancelled run, pairs processed before the cancellation keep their
    /// labels.
    pub fn resolved_labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn track(&mut self) -> Result<PeakTable> {
        self.track_with(None, &CancellationToken::new())
    }

    /// Link all time points and return the table with dense labels.
    pub fn track_with(&mut self, progress: Option<&dyn ProgressSink>, cancel: &CancellationToken) -> Result<PeakTable> {
        info!("Initiating frame by frame tracking.");
        let n_labels_before = self.table.n_labels();
        let n_pairs = self.groups.len().saturating_sub(1);

        for index_in in 0..n_pairs {
            cancel.check()?;
            self.one_frame(index_in, index_in + 1)?;
            if let Some(sink) = progress {
                sink.report(&ProgressEvent::Tracking {
                    percent: (index_in + 1) as f64 / n_pairs as f64 * 100.0,
                    t_in: self.groups[index_in].0,
                    t_out: self.groups[index_in + 1].0,
                });
            }
        }

        let mut tracked = self.table.clone();
        tracked.apply_labels(&self.labels);
        tracked.compact_labels();

        info!(
            "Frame by frame tracking done. {} segments found ({} before).",
            tracked.n_labels(),
            n_labels_before
        );
        Ok(tracked)
    }

    /// Link time point `index_in` to `index_out`, indices into the table's
    /// time groups.
    pub fn one_frame(&mut self, index_in: usize, index_out: usize) -> Result<()> {
        let mut cm = {
            let link_ctx = LinkContext {
                table: &self.table,
                labels: &self.labels,
                groups: &self.groups,
                index_in,
                index_out,
            };
            let link = compute_block(self.cost_functions.link.as_ref(), &CostContext::Link(link_ctx), "link")?;
            let (n_in, n_out) = link.shape();
            let death_ctx = CostContext::Diagonal(DiagonalContext {
                n_objects: n_in,
                max_assigned_cost: self.max_assigned_cost,
                raised: self.raised,
            });
            let birth_ctx = CostContext::Diagonal(DiagonalContext {
                n_objects: n_out,
                max_assigned_cost: self.max_assigned_cost,
                raised: self.raised,
            });
            let death = compute_block(self.cost_functions.death.as_ref(), &death_ctx, "death")?;
            let birth = compute_block(self.cost_functions.birth.as_ref(), &birth_ctx, "birth")?;
            CostMatrix::from_blocks(&link, &death, &birth)?
        };
        cm.solve()?;
        self.assign(&cm, index_in, index_out);
        Ok(())
    }

    fn assign(&mut self, cm: &CostMatrix, index_in: usize, index_out: usize) {
        let n_in = cm.row_shapes[0];
        let rows_in = self.groups[index_in].1.clone();
        let rows_out = self.groups[index_out].1.clone();
        let mut births = 0;

        for (idx_out, &idx_in) in cm.out_links().iter().enumerate() {
            let label = if idx_in >= n_in {
                births += 1;
                self.max_label += 1;
                self.max_label
            } else {
                let cost = cm.mat[(idx_in, idx_out)];
                if cost > self.max_assigned_cost {
                    self.max_assigned_cost = cost;
                    self.raised = true;
                }
                self.labels[rows_in.start + idx_in]
            };
            self.labels[rows_out.start + idx_out] = label;
        }

        debug!(
            t_in = self.groups[index_in].0,
            t_out = self.groups[index_out].0,
            links = rows_out.len() - births,
            births,
            max_assigned_cost = self.max_assigned_cost,
            "Pair linked"
        );
    }
}
