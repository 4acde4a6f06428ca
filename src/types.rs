use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Samples per parametric dimension used by `refit` when neither explicit
/// coordinates nor a grid resolution are supplied.
pub const DEFAULT_REFIT_GRID_RESOLUTION: usize = 100;

pub fn default_grid_search_density_parameter() -> usize {
    1
}

pub fn default_max_newton_iterations() -> usize {
    100
}

pub fn default_newton_tolerance() -> f64 {
    1e-6
}

/// Parametric derivative orders, aligned per coordinate.
///
/// `Uniform` applies one `d`-tuple to every query point; `PerPoint` carries one
/// row per point, shape `(num_points, d)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DerivativeOrders {
    Uniform(Vec<usize>),
    PerPoint(Array2<usize>),
}

impl DerivativeOrders {
    pub fn uniform(orders: &[usize]) -> Self {
        Self::Uniform(orders.to_vec())
    }

    /// Order `(k)` along `dimension`, zero elsewhere.
    pub fn axis(num_dimensions: usize, dimension: usize, order: usize) -> Self {
        let mut orders = vec![0usize; num_dimensions];
        orders[dimension] = order;
        Self::Uniform(orders)
    }

    /// Mixed second derivative `∂²/∂p_k∂p_m`; a pure second derivative when `k == m`.
    pub fn mixed_second(num_dimensions: usize, k: usize, m: usize) -> Self {
        let mut orders = vec![0usize; num_dimensions];
        orders[k] += 1;
        orders[m] += 1;
        Self::Uniform(orders)
    }

    #[inline]
    pub fn order(&self, point: usize, dimension: usize) -> usize {
        match self {
            Self::Uniform(orders) => orders[dimension],
            Self::PerPoint(orders) => orders[[point, dimension]],
        }
    }

    pub fn num_dimensions(&self) -> usize {
        match self {
            Self::Uniform(orders) => orders.len(),
            Self::PerPoint(orders) => orders.ncols(),
        }
    }

    /// Number of points covered, `None` when uniform.
    pub fn num_points(&self) -> Option<usize> {
        match self {
            Self::Uniform(_) => None,
            Self::PerPoint(orders) => Some(orders.nrows()),
        }
    }

    pub fn max_order(&self) -> usize {
        match self {
            Self::Uniform(orders) => orders.iter().copied().max().unwrap_or(0),
            Self::PerPoint(orders) => orders.iter().copied().max().unwrap_or(0),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.max_order() == 0
    }
}

impl From<Array2<usize>> for DerivativeOrders {
    fn from(value: Array2<usize>) -> Self {
        Self::PerPoint(value)
    }
}

impl From<ArrayView2<'_, usize>> for DerivativeOrders {
    fn from(value: ArrayView2<'_, usize>) -> Self {
        Self::PerPoint(value.to_owned())
    }
}

impl From<Vec<usize>> for DerivativeOrders {
    fn from(value: Vec<usize>) -> Self {
        Self::Uniform(value)
    }
}

/// Sampling and fitting choices for `Function::refit`.
///
/// Explicit `parametric_coordinates` take precedence over `grid_resolution`;
/// when neither is set a grid of `DEFAULT_REFIT_GRID_RESOLUTION` samples per
/// dimension is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefitOptions {
    #[serde(default)]
    pub grid_resolution: Option<Vec<usize>>,
    #[serde(default)]
    pub parametric_coordinates: Option<Array2<f64>>,
    #[serde(default)]
    pub derivative_orders: Option<DerivativeOrders>,
    #[serde(default)]
    pub regularization_parameter: Option<f64>,
}

impl RefitOptions {
    pub fn with_grid_resolution(grid_resolution: &[usize]) -> Self {
        Self {
            grid_resolution: Some(grid_resolution.to_vec()),
            ..Self::default()
        }
    }

    pub fn with_coordinates(parametric_coordinates: Array2<f64>) -> Self {
        Self {
            parametric_coordinates: Some(parametric_coordinates),
            ..Self::default()
        }
    }

    pub fn regularization(mut self, regularization_parameter: f64) -> Self {
        self.regularization_parameter = Some(regularization_parameter);
        self
    }
}

/// Controls for `Function::project`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionOptions {
    /// Ray direction; not supported by the solver, rejected when set.
    #[serde(default)]
    pub direction: Option<Array1<f64>>,
    #[serde(default = "default_grid_search_density_parameter")]
    pub grid_search_density_parameter: usize,
    #[serde(default = "default_max_newton_iterations")]
    pub max_newton_iterations: usize,
    #[serde(default = "default_newton_tolerance")]
    pub newton_tolerance: f64,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            direction: None,
            grid_search_density_parameter: default_grid_search_density_parameter(),
            max_newton_iterations: default_max_newton_iterations(),
            newton_tolerance: default_newton_tolerance(),
        }
    }
}

impl ProjectionOptions {
    /// Per-dimension resolution of the initial-guess grid, coarsened as the
    /// parametric dimension grows to bound the total grid size.
    pub fn grid_search_resolution(&self, num_parametric_dimensions: usize) -> usize {
        100 * self.grid_search_density_parameter / num_parametric_dimensions.max(1) + 1
    }
}

/// Outcome of the Newton refinement for one projected point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionStatus {
    /// Free-variable gradient norm fell below the tolerance.
    Converged,
    /// Iteration cap reached; the coordinate is the best current guess.
    MaxIterations,
    /// The reduced Hessian could not be solved; the last guess is kept.
    ///
    /// When this happens on the first step the coordinate is the grid-search
    /// guess, accurate only to the grid spacing in every dimension, including
    /// ones that were well determined.
    SingularHessian,
}
