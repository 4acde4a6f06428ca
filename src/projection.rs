//! Closest-point projection of physical points onto a parametric function.
//!
//! Each query starts from the nearest node of a uniform parametric grid and is
//! refined with Newton's method on `‖x - f(p)‖²` inside the box `[0,1]^d`.
//! Coordinates pinned to a face whose gradient points outward are held fixed
//! for that iteration (active set). All still-running points share one basis
//! evaluation per derivative order per iteration; the per-point updates run
//! in parallel.

use crate::function::{Function, FunctionError};
use crate::grid::{nearest_indices, uniform_grid};
use crate::linalg::faer_ndarray::solve_symmetric;
use crate::types::{DerivativeOrders, ProjectionOptions, ProjectionStatus};
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

/// Projected coordinates plus per-point diagnostics, all aligned with the
/// input point order.
#[derive(Debug, Clone)]
pub struct ProjectionResult {
    pub parametric_coordinates: Array2<f64>,
    pub statuses: Vec<ProjectionStatus>,
    /// Euclidean distance from each target to the function at its coordinate.
    pub distances: Array1<f64>,
    /// Newton steps taken per point.
    pub iterations: Vec<usize>,
}

impl ProjectionResult {
    pub fn all_converged(&self) -> bool {
        self.statuses
            .iter()
            .all(|status| *status == ProjectionStatus::Converged)
    }
}

/// Derivative data for the active points at one iteration.
struct NewtonBatch {
    values: Array2<f64>,
    /// `∂f/∂p_k`, one `(n_active, m)` block per parametric dimension.
    jacobian: Vec<Array2<f64>>,
    /// `∂²f/∂p_k∂p_l` for `k <= l`, indexed by `pair_index`.
    hessian: Vec<Array2<f64>>,
}

enum NewtonOutcome {
    Converged,
    Step(Array1<f64>),
    Singular,
}

/// Position of `(k, l)` in the row-major upper triangle of a `d × d` matrix.
#[inline]
fn pair_index(k: usize, l: usize, d: usize) -> usize {
    let (k, l) = if k <= l { (k, l) } else { (l, k) };
    k * (2 * d - k + 1) / 2 + (l - k)
}

impl Function {
    /// Closest parametric coordinates for each row of `points`.
    ///
    /// Points that do not reach `newton_tolerance` within the iteration cap are
    /// still returned (best current guess) and flagged in `statuses`.
    pub fn project(
        &self,
        points: ArrayView2<'_, f64>,
        options: &ProjectionOptions,
    ) -> Result<ProjectionResult, FunctionError> {
        if options.direction.is_some() {
            return Err(FunctionError::UnsupportedProjectionMode(
                "directional (ray) projection is not supported; omit `direction`".to_string(),
            ));
        }
        if options.grid_search_density_parameter == 0 {
            return Err(FunctionError::InvalidArgument(
                "grid search density parameter must be positive".to_string(),
            ));
        }
        if !options.newton_tolerance.is_finite() || options.newton_tolerance <= 0.0 {
            return Err(FunctionError::InvalidArgument(format!(
                "newton tolerance must be finite and positive, got {}",
                options.newton_tolerance
            )));
        }
        let m = self.num_physical_dimensions();
        if points.ncols() != m {
            return Err(FunctionError::InvalidArgument(format!(
                "points have {} coordinates but the function has {m} physical dimensions",
                points.ncols()
            )));
        }
        if points.iter().any(|v| !v.is_finite()) {
            return Err(FunctionError::InvalidArgument(
                "points to project must be finite".to_string(),
            ));
        }

        let d = self.num_parametric_dimensions();
        let num_points = points.nrows();
        let mut coordinates = self.initial_guess(points, options)?;
        let mut statuses = vec![ProjectionStatus::MaxIterations; num_points];
        let mut iterations = vec![0usize; num_points];

        let first_orders: Vec<DerivativeOrders> =
            (0..d).map(|k| DerivativeOrders::axis(d, k, 1)).collect();
        let second_orders: Vec<DerivativeOrders> = (0..d)
            .flat_map(|k| (k..d).map(move |l| DerivativeOrders::mixed_second(d, k, l)))
            .collect();

        let mut active: Vec<usize> = (0..num_points).collect();
        for iteration in 0..options.max_newton_iterations {
            if active.is_empty() {
                break;
            }
            let current = coordinates.select(Axis(0), &active);
            let batch = NewtonBatch {
                values: self.evaluate(current.view(), None, None)?,
                jacobian: first_orders
                    .iter()
                    .map(|orders| self.evaluate(current.view(), Some(orders), None))
                    .collect::<Result<_, _>>()?,
                hessian: second_orders
                    .iter()
                    .map(|orders| self.evaluate(current.view(), Some(orders), None))
                    .collect::<Result<_, _>>()?,
            };

            let outcomes: Vec<NewtonOutcome> = active
                .par_iter()
                .enumerate()
                .map(|(slot, &point)| {
                    newton_update(
                        slot,
                        points.row(point),
                        current.row(slot),
                        &batch,
                        options.newton_tolerance,
                    )
                })
                .collect();

            let mut still_active = Vec::with_capacity(active.len());
            for (point, outcome) in active.iter().copied().zip(outcomes) {
                match outcome {
                    NewtonOutcome::Converged => statuses[point] = ProjectionStatus::Converged,
                    NewtonOutcome::Singular => {
                        warn!(
                            "singular reduced Hessian while projecting point {point}; keeping its current guess"
                        );
                        statuses[point] = ProjectionStatus::SingularHessian;
                    }
                    NewtonOutcome::Step(next) => {
                        coordinates.row_mut(point).assign(&next);
                        iterations[point] += 1;
                        still_active.push(point);
                    }
                }
            }
            debug!(
                "projection iteration {iteration}: {} of {num_points} points still active, {} converged",
                still_active.len(),
                statuses
                    .iter()
                    .filter(|status| **status == ProjectionStatus::Converged)
                    .count()
            );
            active = still_active;
        }

        let values = self.evaluate(coordinates.view(), None, None)?;
        let distances = Array1::from_shape_fn(num_points, |i| {
            values
                .row(i)
                .iter()
                .zip(points.row(i).iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt()
        });

        Ok(ProjectionResult {
            parametric_coordinates: coordinates,
            statuses,
            distances,
            iterations,
        })
    }

    /// Nearest node of a uniform parametric grid, in physical space, per point.
    fn initial_guess(
        &self,
        points: ArrayView2<'_, f64>,
        options: &ProjectionOptions,
    ) -> Result<Array2<f64>, FunctionError> {
        let d = self.num_parametric_dimensions();
        let resolution = options.grid_search_resolution(d);
        let grid = uniform_grid(&vec![resolution; d]);
        let grid_values = self.evaluate(grid.view(), None, None)?;
        debug!(
            "projection grid search: {} nodes for {} points",
            grid.nrows(),
            points.nrows()
        );
        let nearest = nearest_indices(grid_values.view(), points);
        Ok(grid.select(Axis(0), &nearest))
    }
}

/// One active-set Newton update for the point in row `slot` of the batch.
fn newton_update(
    slot: usize,
    target: ArrayView1<'_, f64>,
    coordinate: ArrayView1<'_, f64>,
    batch: &NewtonBatch,
    tolerance: f64,
) -> NewtonOutcome {
    let d = coordinate.len();
    let displacement = &target - &batch.values.row(slot);

    // gradient = -2 dispᵀ J
    let gradient = Array1::from_shape_fn(d, |k| {
        -2.0 * displacement.dot(&batch.jacobian[k].row(slot))
    });

    // hessian = 2 (JᵀJ - dispᵀ ∂²f)
    let mut hessian = Array2::<f64>::zeros((d, d));
    for k in 0..d {
        for l in k..d {
            let gauss_newton = batch.jacobian[k].row(slot).dot(&batch.jacobian[l].row(slot));
            let curvature = displacement.dot(&batch.hessian[pair_index(k, l, d)].row(slot));
            let entry = 2.0 * (gauss_newton - curvature);
            hessian[[k, l]] = entry;
            hessian[[l, k]] = entry;
        }
    }

    let free: Vec<usize> = (0..d)
        .filter(|&k| {
            let pinned_low = coordinate[k] <= 0.0 && gradient[k] > 0.0;
            let pinned_high = coordinate[k] >= 1.0 && gradient[k] < 0.0;
            !(pinned_low || pinned_high)
        })
        .collect();

    let free_norm = free
        .iter()
        .map(|&k| gradient[k] * gradient[k])
        .sum::<f64>()
        .sqrt();
    if free_norm < tolerance {
        return NewtonOutcome::Converged;
    }

    let reduced = hessian.select(Axis(0), &free).select(Axis(1), &free);
    let rhs = Array2::from_shape_fn((free.len(), 1), |(i, _)| -gradient[free[i]]);
    let Ok(step) = solve_symmetric(&reduced, &rhs) else {
        return NewtonOutcome::Singular;
    };

    let mut next = coordinate.to_owned();
    for (i, &k) in free.iter().enumerate() {
        next[k] += step[[i, 0]];
    }
    next.mapv_inplace(|v| v.clamp(0.0, 1.0));
    NewtonOutcome::Step(next)
}
