//! The closed set of function spaces a `Function` can live in.
//!
//! Each variant only knows how to build its (derivative) basis matrix;
//! `evaluate` and `fit` are derived from it here, so every variant satisfies
//! `evaluate(C, x) == compute_basis_matrix(x) · C`.

pub mod bspline;
pub mod constant;
pub mod idw;
pub mod polynomial;

pub use bspline::BSplineSpace;
pub use constant::ConstantSpace;
pub use idw::IdwSpace;
pub use polynomial::PolynomialSpace;

use crate::linalg::faer_ndarray::{FaerLinalgError, numerical_rank, solve_symmetric};
use crate::matrix::BasisMatrix;
use crate::types::DerivativeOrders;
use log::debug;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slack allowed on the `[0, 1]` domain bounds before a coordinate is rejected.
pub const DOMAIN_TOLERANCE: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("Spline degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error("The provided knot vector is invalid: {0}.")]
    InvalidKnotVector(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error(
        "Parametric coordinate {value} at point {point}, dimension {dimension} lies outside [0, 1]."
    )]
    OutOfDomain {
        point: usize,
        dimension: usize,
        value: f64,
    },

    #[error("{space} space does not support derivative order {order}.")]
    UnsupportedDerivative { space: &'static str, order: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to build sparse basis matrix: {0}")]
    SparseCreation(String),

    #[error(
        "Least-squares system with {num_coefficients} coefficients is singular; add regularization or sample more points."
    )]
    SingularSystem { num_coefficients: usize },

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}

/// A function space: maps coefficients to values over `[0,1]^d`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FunctionSpace {
    BSpline(BSplineSpace),
    Polynomial(PolynomialSpace),
    Idw(IdwSpace),
    Constant(ConstantSpace),
}

impl FunctionSpace {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BSpline(_) => "B-spline",
            Self::Polynomial(_) => "polynomial",
            Self::Idw(_) => "IDW",
            Self::Constant(_) => "constant",
        }
    }

    pub fn num_parametric_dimensions(&self) -> usize {
        match self {
            Self::BSpline(space) => space.num_parametric_dimensions(),
            Self::Polynomial(space) => space.num_parametric_dimensions(),
            Self::Idw(space) => space.num_parametric_dimensions(),
            Self::Constant(space) => space.num_parametric_dimensions(),
        }
    }

    pub fn num_coefficients(&self) -> usize {
        match self {
            Self::BSpline(space) => space.num_coefficients(),
            Self::Polynomial(space) => space.num_coefficients(),
            Self::Idw(space) => space.num_coefficients(),
            Self::Constant(_) => 1,
        }
    }

    /// Shape of the coefficient grid when coefficients are laid out as a
    /// tensor (B-splines only).
    pub fn coefficient_grid_shape(&self) -> Option<Vec<usize>> {
        match self {
            Self::BSpline(space) => Some(space.coefficients_per_dimension()),
            _ => None,
        }
    }

    /// Linear map from coefficients to (derivative) values at `coordinates`.
    pub fn compute_basis_matrix(
        &self,
        coordinates: ArrayView2<'_, f64>,
        derivative_orders: Option<&DerivativeOrders>,
    ) -> Result<BasisMatrix, SpaceError> {
        let d = self.num_parametric_dimensions();
        validate_coordinates(coordinates, d)?;
        let zero_orders;
        let orders = match derivative_orders {
            Some(orders) => {
                validate_derivative_orders(orders, coordinates.nrows(), d)?;
                orders
            }
            None => {
                zero_orders = DerivativeOrders::Uniform(vec![0; d]);
                &zero_orders
            }
        };
        match self {
            Self::BSpline(space) => space.basis_matrix(coordinates, orders),
            Self::Polynomial(space) => Ok(space.basis_matrix(coordinates, orders)),
            Self::Idw(space) => space.basis_matrix(coordinates, orders),
            Self::Constant(space) => Ok(space.basis_matrix(coordinates, orders)),
        }
    }

    /// Values `(num_points, num_physical_dimensions)` of the function with the
    /// given coefficients.
    pub fn evaluate(
        &self,
        coefficients: ArrayView2<'_, f64>,
        coordinates: ArrayView2<'_, f64>,
        derivative_orders: Option<&DerivativeOrders>,
    ) -> Result<Array2<f64>, SpaceError> {
        self.check_coefficients(coefficients)?;
        let basis = self.compute_basis_matrix(coordinates, derivative_orders)?;
        Ok(basis.multiply_coefficients(coefficients))
    }

    /// Regularized least squares: solves `(BᵀB + λP) C = BᵀV` for all value
    /// channels at once, where `P` is the space's own smoothing penalty.
    pub fn fit(
        &self,
        values: ArrayView2<'_, f64>,
        coordinates: ArrayView2<'_, f64>,
        derivative_orders: Option<&DerivativeOrders>,
        regularization_parameter: Option<f64>,
    ) -> Result<Array2<f64>, SpaceError> {
        if values.nrows() != coordinates.nrows() {
            return Err(SpaceError::DimensionMismatch(format!(
                "{} fitting values for {} coordinates",
                values.nrows(),
                coordinates.nrows()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SpaceError::InvalidInput(
                "fitting values must be finite".to_string(),
            ));
        }
        let lambda = regularization_parameter.unwrap_or(0.0);
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(SpaceError::InvalidInput(format!(
                "regularization parameter must be finite and non-negative, got {lambda}"
            )));
        }

        let basis = self.compute_basis_matrix(coordinates, derivative_orders)?;
        let mut system = basis.gram();
        if lambda > 0.0 {
            system = match self {
                Self::BSpline(space) => system + space.penalty_matrix()? * lambda,
                _ => crate::linalg::utils::add_ridge(&system, lambda),
            };
        }
        let rhs = basis.transpose_multiply(values);
        debug!(
            "fitting {} space: {} samples, {} coefficients, {} channels, lambda {lambda}",
            self.kind(),
            coordinates.nrows(),
            system.nrows(),
            values.ncols()
        );

        let rank = numerical_rank(&system)?;
        if rank < system.nrows() {
            debug!(
                "{} least-squares system has rank {rank} of {}",
                self.kind(),
                system.nrows()
            );
            return Err(SpaceError::SingularSystem {
                num_coefficients: system.nrows(),
            });
        }
        solve_symmetric(&system, &rhs).map_err(|err| match err {
            FaerLinalgError::NonFiniteSolution | FaerLinalgError::FactorizationFailed => {
                SpaceError::SingularSystem {
                    num_coefficients: system.nrows(),
                }
            }
            other => SpaceError::Linalg(other),
        })
    }

    fn check_coefficients(&self, coefficients: ArrayView2<'_, f64>) -> Result<(), SpaceError> {
        let expected = self.num_coefficients();
        if coefficients.nrows() != expected {
            return Err(SpaceError::DimensionMismatch(format!(
                "{} space has {expected} coefficients but {} were supplied",
                self.kind(),
                coefficients.nrows()
            )));
        }
        Ok(())
    }
}

impl From<BSplineSpace> for FunctionSpace {
    fn from(value: BSplineSpace) -> Self {
        Self::BSpline(value)
    }
}

impl From<PolynomialSpace> for FunctionSpace {
    fn from(value: PolynomialSpace) -> Self {
        Self::Polynomial(value)
    }
}

impl From<IdwSpace> for FunctionSpace {
    fn from(value: IdwSpace) -> Self {
        Self::Idw(value)
    }
}

impl From<ConstantSpace> for FunctionSpace {
    fn from(value: ConstantSpace) -> Self {
        Self::Constant(value)
    }
}

/// Checks that `coordinates` is `(n, d)`, finite, and inside `[0,1]^d`.
pub fn validate_coordinates(
    coordinates: ArrayView2<'_, f64>,
    num_parametric_dimensions: usize,
) -> Result<(), SpaceError> {
    if coordinates.ncols() != num_parametric_dimensions {
        return Err(SpaceError::DimensionMismatch(format!(
            "expected {num_parametric_dimensions} parametric dimensions, got {}",
            coordinates.ncols()
        )));
    }
    for ((point, dimension), &value) in coordinates.indexed_iter() {
        if !value.is_finite() {
            return Err(SpaceError::InvalidInput(format!(
                "parametric coordinate at point {point}, dimension {dimension} is not finite"
            )));
        }
        if !(-DOMAIN_TOLERANCE..=1.0 + DOMAIN_TOLERANCE).contains(&value) {
            return Err(SpaceError::OutOfDomain {
                point,
                dimension,
                value,
            });
        }
    }
    Ok(())
}

pub fn validate_derivative_orders(
    orders: &DerivativeOrders,
    num_points: usize,
    num_parametric_dimensions: usize,
) -> Result<(), SpaceError> {
    if orders.num_dimensions() != num_parametric_dimensions {
        return Err(SpaceError::DimensionMismatch(format!(
            "derivative orders cover {} dimensions, space has {num_parametric_dimensions}",
            orders.num_dimensions()
        )));
    }
    if let Some(rows) = orders.num_points()
        && rows != num_points
    {
        return Err(SpaceError::DimensionMismatch(format!(
            "derivative orders given for {rows} points, but {num_points} coordinates were supplied"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn all_spaces() -> Vec<FunctionSpace> {
        vec![
            BSplineSpace::new(&[2, 3], &[5, 6]).unwrap().into(),
            PolynomialSpace::new(&[2, 1]).unwrap().into(),
            IdwSpace::new(array![[0.0, 0.0], [1.0, 0.0], [0.3, 0.8], [1.0, 1.0]], 2.0)
                .unwrap()
                .into(),
            ConstantSpace::new(2).unwrap().into(),
        ]
    }

    fn sample_coordinates() -> Array2<f64> {
        array![[0.0, 0.0], [0.25, 0.6], [0.5, 0.5], [0.9, 0.1], [1.0, 1.0], [0.3, 0.8]]
    }

    #[test]
    fn evaluate_equals_basis_times_coefficients_for_every_variant() {
        let coords = sample_coordinates();
        for space in all_spaces() {
            let n = space.num_coefficients();
            let coefficients =
                Array2::from_shape_fn((n, 3), |(i, j)| ((i * 3 + j) as f64 * 0.37).sin());
            let values = space.evaluate(coefficients.view(), coords.view(), None).unwrap();
            let basis = space.compute_basis_matrix(coords.view(), None).unwrap().to_dense();
            let expected = basis.dot(&coefficients);
            for (v, e) in values.iter().zip(expected.iter()) {
                assert_abs_diff_eq!(*v, *e, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn coordinates_outside_the_domain_are_rejected() {
        let space: FunctionSpace = PolynomialSpace::new(&[1]).unwrap().into();
        let err = space
            .compute_basis_matrix(array![[0.5], [1.1]].view(), None)
            .unwrap_err();
        assert!(matches!(err, SpaceError::OutOfDomain { point: 1, .. }));
        assert!(
            space
                .compute_basis_matrix(array![[1.0 + 1e-13]].view(), None)
                .is_ok()
        );
        assert!(matches!(
            space.compute_basis_matrix(array![[f64::NAN]].view(), None),
            Err(SpaceError::InvalidInput(_))
        ));
        assert!(matches!(
            space.compute_basis_matrix(array![[0.1, 0.2]].view(), None),
            Err(SpaceError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn derivative_order_shapes_are_checked() {
        let space: FunctionSpace = BSplineSpace::new(&[2], &[4]).unwrap().into();
        let coords = array![[0.1], [0.2]];
        let wrong_dims = DerivativeOrders::uniform(&[1, 0]);
        assert!(
            space
                .compute_basis_matrix(coords.view(), Some(&wrong_dims))
                .is_err()
        );
        let wrong_rows = DerivativeOrders::from(array![[1usize]]);
        assert!(
            space
                .compute_basis_matrix(coords.view(), Some(&wrong_rows))
                .is_err()
        );
    }

    #[test]
    fn fit_reproduces_values_in_the_space() {
        let coords = Array2::from_shape_fn((64, 2), |(i, j)| {
            if j == 0 {
                (i % 8) as f64 / 7.0
            } else {
                (i / 8) as f64 / 7.0
            }
        });
        for space in all_spaces() {
            if matches!(space, FunctionSpace::Idw(_)) {
                continue;
            }
            let n = space.num_coefficients();
            let truth = Array2::from_shape_fn((n, 2), |(i, j)| (i as f64 + 1.0) * (j as f64 - 0.5));
            let values = space.evaluate(truth.view(), coords.view(), None).unwrap();
            let fitted = space.fit(values.view(), coords.view(), None, None).unwrap();
            for (f, t) in fitted.iter().zip(truth.iter()) {
                assert_abs_diff_eq!(*f, *t, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn fit_rejects_bad_regularization_and_singular_systems() {
        let space: FunctionSpace = BSplineSpace::new(&[1], &[5]).unwrap().into();
        let coords = array![[0.0], [1.0]];
        let values = array![[0.0], [1.0]];
        assert!(matches!(
            space.fit(values.view(), coords.view(), None, Some(-1.0)),
            Err(SpaceError::InvalidInput(_))
        ));
        assert!(matches!(
            space.fit(values.view(), coords.view(), None, None),
            Err(SpaceError::SingularSystem { .. })
        ));
        // Fewer distinct samples than coefficients, none on a knot span edge.
        let interior = array![[0.1], [0.35], [0.6], [0.85]];
        assert!(matches!(
            space.fit(array![[1.0], [2.0], [0.5], [3.0]].view(), interior.view(), None, None),
            Err(SpaceError::SingularSystem { num_coefficients: 5 })
        ));
        // The difference penalty fills the null space left by the two samples.
        let fitted = space
            .fit(values.view(), coords.view(), None, Some(1e-3))
            .unwrap();
        assert_eq!(fitted.dim(), (5, 1));
        for w in fitted.column(0).windows(2) {
            assert!(w[1] >= w[0] - 1e-9);
        }
    }
}
