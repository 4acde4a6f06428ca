use super::SpaceError;
use crate::basis::{
    TensorAxes, assemble_tensor_basis, compute_tensor_strides, create_difference_penalty_matrix,
    generate_clamped_knot_vector, validate_knots_for_degree,
};
use crate::linalg::utils::embed_axis_penalty;
use crate::matrix::BasisMatrix;
use crate::types::DerivativeOrders;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Tensor product of clamped B-spline bases, one axis per parametric dimension.
///
/// Coefficients are ordered row-major over the per-axis indices, last axis
/// fastest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BSplineSpace {
    degrees: Vec<usize>,
    knots: Vec<Array1<f64>>,
}

impl BSplineSpace {
    /// Uniform clamped knots on `[0, 1]` for every axis.
    pub fn new(
        degrees: &[usize],
        coefficients_per_dimension: &[usize],
    ) -> Result<Self, SpaceError> {
        if degrees.len() != coefficients_per_dimension.len() {
            return Err(SpaceError::DimensionMismatch(format!(
                "{} degrees for {} coefficient counts",
                degrees.len(),
                coefficients_per_dimension.len()
            )));
        }
        let knots = degrees
            .iter()
            .zip(coefficients_per_dimension)
            .map(|(&degree, &count)| generate_clamped_knot_vector(count, degree))
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_knots(degrees, knots)
    }

    pub fn with_knots(degrees: &[usize], knots: Vec<Array1<f64>>) -> Result<Self, SpaceError> {
        if degrees.is_empty() {
            return Err(SpaceError::InvalidInput(
                "a B-spline space needs at least one parametric dimension".to_string(),
            ));
        }
        if degrees.len() != knots.len() {
            return Err(SpaceError::DimensionMismatch(format!(
                "{} degrees for {} knot vectors",
                degrees.len(),
                knots.len()
            )));
        }
        for (knot_vector, &degree) in knots.iter().zip(degrees) {
            validate_knots_for_degree(knot_vector.view(), degree)?;
        }
        let space = Self {
            degrees: degrees.to_vec(),
            knots,
        };
        compute_tensor_strides(&space.coefficients_per_dimension())?;
        Ok(space)
    }

    pub fn degrees(&self) -> &[usize] {
        &self.degrees
    }

    pub fn knots(&self) -> &[Array1<f64>] {
        &self.knots
    }

    pub fn coefficients_per_dimension(&self) -> Vec<usize> {
        self.knots
            .iter()
            .zip(&self.degrees)
            .map(|(k, &d)| k.len() - d - 1)
            .collect()
    }

    pub fn num_parametric_dimensions(&self) -> usize {
        self.degrees.len()
    }

    pub fn num_coefficients(&self) -> usize {
        self.coefficients_per_dimension().iter().product()
    }

    pub(crate) fn basis_matrix(
        &self,
        coordinates: ArrayView2<'_, f64>,
        orders: &DerivativeOrders,
    ) -> Result<BasisMatrix, SpaceError> {
        let axes = TensorAxes {
            knots: self.knots.iter().map(|k| k.view()).collect(),
            degrees: self.degrees.clone(),
        };
        // Tiny overshoot allowed by validation is folded back onto the domain.
        let clamped = coordinates.mapv(|v| v.clamp(0.0, 1.0));
        let sparse = assemble_tensor_basis(clamped.view(), &axes, orders)?;
        Ok(BasisMatrix::from(sparse))
    }

    /// Sum over axes of the embedded difference penalties: second differences,
    /// or first differences on an axis with only two coefficients.
    pub fn penalty_matrix(&self) -> Result<Array2<f64>, SpaceError> {
        let sizes = self.coefficients_per_dimension();
        let total = self.num_coefficients();
        let mut penalty = Array2::<f64>::zeros((total, total));
        for (axis, &size) in sizes.iter().enumerate() {
            let order = if size > 2 { 2 } else { 1 };
            let axis_penalty = create_difference_penalty_matrix(size, order)?;
            penalty += &embed_axis_penalty(&axis_penalty, axis, &sizes);
        }
        Ok(penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spaces::FunctionSpace;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn linear_curve_interpolates_its_end_coefficients() {
        let space: FunctionSpace = BSplineSpace::new(&[1], &[2]).unwrap().into();
        let coefficients = array![[0.0, 0.0], [1.0, 1.0]];
        let coords = array![[0.0], [0.5], [1.0]];
        let values = space
            .evaluate(coefficients.view(), coords.view(), None)
            .unwrap();
        assert_abs_diff_eq!(values[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[[1, 1]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(values[[2, 0]], 1.0, epsilon = 1e-12);

        let slope = space
            .evaluate(
                coefficients.view(),
                coords.view(),
                Some(&DerivativeOrders::uniform(&[1])),
            )
            .unwrap();
        for v in slope.iter() {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn mixed_partial_matches_finite_difference_of_surface() {
        let space: FunctionSpace = BSplineSpace::new(&[3, 2], &[5, 4]).unwrap().into();
        let coefficients =
            Array2::from_shape_fn((20, 1), |(i, _)| ((i as f64) * 0.7).cos() + 0.1 * i as f64);
        let (u, v, h) = (0.37, 0.58, 1e-5);
        let eval = |u: f64, v: f64| {
            space
                .evaluate(coefficients.view(), array![[u, v]].view(), None)
                .unwrap()[[0, 0]]
        };
        let fd = (eval(u + h, v + h) - eval(u + h, v - h) - eval(u - h, v + h)
            + eval(u - h, v - h))
            / (4.0 * h * h);
        let exact = space
            .evaluate(
                coefficients.view(),
                array![[u, v]].view(),
                Some(&DerivativeOrders::mixed_second(2, 0, 1)),
            )
            .unwrap()[[0, 0]];
        assert_abs_diff_eq!(exact, fd, epsilon = 1e-4);
    }

    #[test]
    fn penalty_charges_curvature_on_long_axes_and_slope_on_short_ones() {
        let space = BSplineSpace::new(&[2, 1], &[4, 2]).unwrap();
        let penalty = space.penalty_matrix().unwrap();
        assert_eq!(penalty.dim(), (8, 8));
        let energy = |c: &Array1<f64>| c.dot(&penalty.dot(c));

        // c[i, j] = 1 + 2i: linear along the second-difference axis.
        let ramp = Array1::from_shape_fn(8, |k| 1.0 + 2.0 * (k / 2) as f64);
        assert_abs_diff_eq!(energy(&ramp), 0.0, epsilon = 1e-12);
        // c[i, j] = 3j: slope along the two-coefficient axis is penalized.
        let tilt = Array1::from_shape_fn(8, |k| 3.0 * (k % 2) as f64);
        assert_abs_diff_eq!(energy(&tilt), 36.0, epsilon = 1e-12);
        let bump = Array1::from_shape_fn(8, |k| if k / 2 == 1 { 1.0 } else { 0.0 });
        assert!(energy(&bump) > 0.0);
    }

    #[test]
    fn explicit_knots_are_validated() {
        assert!(BSplineSpace::with_knots(&[1], vec![array![0.0, 0.0, 0.6, 0.4, 1.0, 1.0]]).is_err());
        assert!(BSplineSpace::with_knots(&[1, 2], vec![array![0.0, 0.0, 1.0, 1.0]]).is_err());
        let space =
            BSplineSpace::with_knots(&[1], vec![array![0.0, 0.0, 0.25, 1.0, 1.0]]).unwrap();
        assert_eq!(space.num_coefficients(), 3);
        assert!(BSplineSpace::new(&[3], &[3]).is_err());
    }
}
