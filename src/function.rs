use crate::spaces::{FunctionSpace, SpaceError};
use crate::types::DerivativeOrders;
use ndarray::{Array2, ArrayD, ArrayView2, IxDyn, ShapeError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FunctionError {
    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error("Coefficient reshape failed: {0}")]
    Shape(#[from] ShapeError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid {kind} '{value}'. Must be one of: {expected}.")]
    InvalidSelection {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Unsupported projection mode: {0}")]
    UnsupportedProjectionMode(String),

    #[error("The color function must be {expected}D to plot this function, but it is {found}D.")]
    PlotDimensionMismatch { expected: usize, found: usize },
}

/// A parametric function: coefficients over a shared, immutable function space.
///
/// Coefficients are held as `(num_coefficients, num_physical_dimensions)`; the
/// shape they were supplied in (e.g. a `(nu, nv, m)` control grid) is kept for
/// callers that want it back.
#[derive(Debug, Clone)]
pub struct Function {
    space: Arc<FunctionSpace>,
    coefficients: Array2<f64>,
    coefficient_shape: Vec<usize>,
}

impl Function {
    pub fn new(space: Arc<FunctionSpace>, coefficients: Array2<f64>) -> Result<Self, FunctionError> {
        let coefficient_shape = coefficients.shape().to_vec();
        Self::from_parts(space, coefficients, coefficient_shape)
    }

    /// Accepts coefficients of any rank whose last axis is the physical dimension.
    pub fn from_shaped(
        space: Arc<FunctionSpace>,
        coefficients: ArrayD<f64>,
    ) -> Result<Self, FunctionError> {
        let coefficient_shape = coefficients.shape().to_vec();
        let Some(&channels) = coefficient_shape.last() else {
            return Err(FunctionError::InvalidArgument(
                "coefficients must have at least one axis".to_string(),
            ));
        };
        if channels == 0 {
            return Err(FunctionError::InvalidArgument(
                "coefficients must have a non-empty physical axis".to_string(),
            ));
        }
        let rows = coefficients.len() / channels;
        let flat = coefficients
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((rows, channels))?;
        Self::from_parts(space, flat, coefficient_shape)
    }

    fn from_parts(
        space: Arc<FunctionSpace>,
        coefficients: Array2<f64>,
        coefficient_shape: Vec<usize>,
    ) -> Result<Self, FunctionError> {
        if coefficients.ncols() == 0 {
            return Err(FunctionError::InvalidArgument(
                "coefficients must have at least one physical dimension".to_string(),
            ));
        }
        let expected = space.num_coefficients();
        if coefficients.nrows() != expected {
            return Err(FunctionError::InvalidArgument(format!(
                "{} space expects {expected} coefficients, got {}",
                space.kind(),
                coefficients.nrows()
            )));
        }
        Ok(Self {
            space,
            coefficients,
            coefficient_shape,
        })
    }

    pub fn space(&self) -> &Arc<FunctionSpace> {
        &self.space
    }

    pub fn coefficients(&self) -> ArrayView2<'_, f64> {
        self.coefficients.view()
    }

    /// Shape the coefficients were supplied in.
    pub fn coefficient_shape(&self) -> &[usize] {
        &self.coefficient_shape
    }

    pub fn shaped_coefficients(&self) -> Result<ArrayD<f64>, FunctionError> {
        Ok(self
            .coefficients
            .clone()
            .into_shape_with_order(IxDyn(&self.coefficient_shape))?)
    }

    pub fn num_parametric_dimensions(&self) -> usize {
        self.space.num_parametric_dimensions()
    }

    pub fn num_physical_dimensions(&self) -> usize {
        self.coefficients.ncols()
    }

    /// Values (or parametric derivatives) at `parametric_coordinates`, shape
    /// `(num_points, num_physical_dimensions)`. `coefficients` overrides the
    /// function's own coefficients for this call only.
    pub fn evaluate(
        &self,
        parametric_coordinates: ArrayView2<'_, f64>,
        derivative_orders: Option<&DerivativeOrders>,
        coefficients: Option<ArrayView2<'_, f64>>,
    ) -> Result<Array2<f64>, FunctionError> {
        let coefficients = match &coefficients {
            Some(overridden) => overridden.view(),
            None => self.coefficients.view(),
        };
        Ok(self
            .space
            .evaluate(coefficients, parametric_coordinates, derivative_orders)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spaces::{BSplineSpace, PolynomialSpace};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, array};

    #[test]
    fn evaluate_uses_own_coefficients_unless_overridden() {
        let space = Arc::new(FunctionSpace::from(BSplineSpace::new(&[1], &[2]).unwrap()));
        let function = Function::new(space, array![[0.0, 0.0], [1.0, 1.0]]).unwrap();
        let coords = array![[0.25]];
        let own = function.evaluate(coords.view(), None, None).unwrap();
        assert_abs_diff_eq!(own[[0, 1]], 0.25, epsilon = 1e-12);

        let other = array![[2.0, 0.0], [4.0, 0.0]];
        let overridden = function
            .evaluate(coords.view(), None, Some(other.view()))
            .unwrap();
        assert_abs_diff_eq!(overridden[[0, 0]], 2.5, epsilon = 1e-12);
        assert_eq!(function.coefficients(), array![[0.0, 0.0], [1.0, 1.0]]);
    }

    #[test]
    fn shaped_coefficients_round_trip_through_the_flat_layout() {
        let space = Arc::new(FunctionSpace::from(BSplineSpace::new(&[1, 1], &[2, 3]).unwrap()));
        let grid = Array3::from_shape_fn((2, 3, 2), |(i, j, k)| (i * 10 + j) as f64 + 0.5 * k as f64);
        let function = Function::from_shaped(space, grid.clone().into_dyn()).unwrap();
        assert_eq!(function.coefficients().dim(), (6, 2));
        assert_eq!(function.coefficient_shape(), &[2, 3, 2]);
        assert_eq!(function.coefficients()[[4, 1]], 11.5);
        assert_eq!(function.shaped_coefficients().unwrap(), grid.into_dyn());
        assert_eq!(function.num_physical_dimensions(), 2);
    }

    #[test]
    fn coefficient_count_must_match_the_space() {
        let space = Arc::new(FunctionSpace::from(PolynomialSpace::new(&[2]).unwrap()));
        assert!(matches!(
            Function::new(space.clone(), Array2::zeros((2, 1))),
            Err(FunctionError::InvalidArgument(_))
        ));
        assert!(Function::new(space, Array2::zeros((3, 0))).is_err());
    }
}
