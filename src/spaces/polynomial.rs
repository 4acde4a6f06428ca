use super::SpaceError;
use crate::basis::{PAR_THRESHOLD, compute_tensor_strides};
use crate::matrix::BasisMatrix;
use crate::types::DerivativeOrders;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};

/// Tensor-product monomial basis `Π_k p_k^{e_k}` with `0 <= e_k <= degree_k`.
/// Exponent tuples are ordered row-major, last dimension fastest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolynomialSpace {
    degrees: Vec<usize>,
}

impl PolynomialSpace {
    pub fn new(degrees: &[usize]) -> Result<Self, SpaceError> {
        if degrees.is_empty() {
            return Err(SpaceError::InvalidInput(
                "a polynomial space needs at least one parametric dimension".to_string(),
            ));
        }
        let sizes: Vec<usize> = degrees.iter().map(|&d| d + 1).collect();
        compute_tensor_strides(&sizes)?;
        Ok(Self {
            degrees: degrees.to_vec(),
        })
    }

    pub fn degrees(&self) -> &[usize] {
        &self.degrees
    }

    pub fn num_parametric_dimensions(&self) -> usize {
        self.degrees.len()
    }

    pub fn num_coefficients(&self) -> usize {
        self.degrees.iter().map(|&d| d + 1).product()
    }

    pub(crate) fn basis_matrix(
        &self,
        coordinates: ArrayView2<'_, f64>,
        orders: &DerivativeOrders,
    ) -> BasisMatrix {
        let n = coordinates.nrows();
        let mut out = Array2::<f64>::zeros((n, self.num_coefficients()));
        let fill = |point: usize, row: ArrayViewMut1<'_, f64>| {
            self.fill_row(point, coordinates, orders, row);
        };
        if n >= PAR_THRESHOLD {
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(point, row)| fill(point, row));
        } else {
            for (point, row) in out.axis_iter_mut(Axis(0)).enumerate() {
                fill(point, row);
            }
        }
        BasisMatrix::Dense(out)
    }

    fn fill_row(
        &self,
        point: usize,
        coordinates: ArrayView2<'_, f64>,
        orders: &DerivativeOrders,
        mut row: ArrayViewMut1<'_, f64>,
    ) {
        // factors[dim][e] = d^k/dx^k x^e at this coordinate.
        let factors: Vec<Vec<f64>> = self
            .degrees
            .iter()
            .enumerate()
            .map(|(dim, &degree)| {
                let x = coordinates[[point, dim]];
                let k = orders.order(point, dim);
                (0..=degree).map(|e| monomial_derivative(x, e, k)).collect()
            })
            .collect();

        for (col, entry) in row.iter_mut().enumerate() {
            let mut rest = col;
            let mut product = 1.0;
            for dim in (0..self.degrees.len()).rev() {
                let size = self.degrees[dim] + 1;
                product *= factors[dim][rest % size];
                rest /= size;
            }
            *entry = product;
        }
    }
}

/// `d^k/dx^k x^e`.
fn monomial_derivative(x: f64, exponent: usize, order: usize) -> f64 {
    if order > exponent {
        return 0.0;
    }
    let falling: f64 = ((exponent - order + 1)..=exponent).map(|v| v as f64).product();
    falling * x.powi((exponent - order) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spaces::FunctionSpace;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn monomial_derivatives_follow_the_power_rule() {
        assert_abs_diff_eq!(monomial_derivative(0.5, 3, 0), 0.125, epsilon = 1e-15);
        assert_abs_diff_eq!(monomial_derivative(0.5, 3, 1), 0.75, epsilon = 1e-15);
        assert_abs_diff_eq!(monomial_derivative(0.5, 3, 2), 3.0, epsilon = 1e-15);
        assert_abs_diff_eq!(monomial_derivative(0.5, 3, 3), 6.0, epsilon = 1e-15);
        assert_eq!(monomial_derivative(0.5, 3, 4), 0.0);
        assert_eq!(monomial_derivative(0.0, 0, 0), 1.0);
    }

    #[test]
    fn surface_derivatives_are_analytic() {
        // f(u, v) = 1 + 2v + 3u + 4uv + 5u² + 6u²v
        let space: FunctionSpace = PolynomialSpace::new(&[2, 1]).unwrap().into();
        let coefficients = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let (u, v) = (0.3, 0.7);
        let coords = array![[u, v]];
        let eval = |orders: &[usize]| {
            space
                .evaluate(
                    coefficients.view(),
                    coords.view(),
                    Some(&DerivativeOrders::uniform(orders)),
                )
                .unwrap()[[0, 0]]
        };
        let value = 1.0 + 2.0 * v + 3.0 * u + 4.0 * u * v + 5.0 * u * u + 6.0 * u * u * v;
        assert_abs_diff_eq!(eval(&[0, 0]), value, epsilon = 1e-12);
        assert_abs_diff_eq!(eval(&[1, 0]), 3.0 + 4.0 * v + 10.0 * u + 12.0 * u * v, epsilon = 1e-12);
        assert_abs_diff_eq!(eval(&[0, 1]), 2.0 + 4.0 * u + 6.0 * u * u, epsilon = 1e-12);
        assert_abs_diff_eq!(eval(&[1, 1]), 4.0 + 12.0 * u, epsilon = 1e-12);
        assert_abs_diff_eq!(eval(&[2, 0]), 10.0 + 12.0 * v, epsilon = 1e-12);
        assert_abs_diff_eq!(eval(&[0, 2]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn parallel_rows_match_serial_rows() {
        let space = PolynomialSpace::new(&[3]).unwrap();
        let coords = Array2::from_shape_fn((300, 1), |(i, _)| i as f64 / 299.0);
        let orders = DerivativeOrders::uniform(&[1]);
        let big = space.basis_matrix(coords.view(), &orders).to_dense();
        let small = space
            .basis_matrix(coords.slice(ndarray::s![..10, ..]), &orders)
            .to_dense();
        for ((i, j), &v) in small.indexed_iter() {
            assert_eq!(v, big[[i, j]]);
        }
    }
}
