use crate::spaces::SpaceError;
use crate::types::DerivativeOrders;
use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, s};
use rayon::prelude::*;

/// Rows at or above this count are assembled in parallel chunks.
pub(crate) const PAR_THRESHOLD: usize = 256;
const CHUNK_SIZE: usize = 1024;

/// Builds a clamped knot vector on `[0, 1]` with uniformly spaced interior knots.
///
/// Boundary knots are repeated `degree + 1` times so every basis function is
/// supported inside the domain and the curve interpolates its end coefficients.
pub fn generate_clamped_knot_vector(
    num_coefficients: usize,
    degree: usize,
) -> Result<Array1<f64>, SpaceError> {
    if degree < 1 {
        return Err(SpaceError::InvalidDegree(degree));
    }
    if num_coefficients < degree + 1 {
        return Err(SpaceError::InvalidKnotVector(format!(
            "degree {degree} needs at least {} coefficients per dimension, got {num_coefficients}",
            degree + 1
        )));
    }

    let num_internal_knots = num_coefficients - degree - 1;
    let h = 1.0 / (num_internal_knots as f64 + 1.0);
    let mut knots = Vec::with_capacity(num_coefficients + degree + 1);
    for _ in 0..=degree {
        knots.push(0.0);
    }
    for i in 1..=num_internal_knots {
        knots.push(i as f64 * h);
    }
    for _ in 0..=degree {
        knots.push(1.0);
    }
    Ok(Array::from_vec(knots))
}

pub fn validate_knots_for_degree(
    knot_vector: ArrayView1<f64>,
    degree: usize,
) -> Result<(), SpaceError> {
    if degree < 1 {
        return Err(SpaceError::InvalidDegree(degree));
    }

    let required_knots = degree + 2;
    if knot_vector.len() < required_knots {
        return Err(SpaceError::InvalidKnotVector(format!(
            "degree {degree} needs at least {required_knots} knots but only {} were provided",
            knot_vector.len()
        )));
    }

    if knot_vector.iter().any(|&k| !k.is_finite()) {
        return Err(SpaceError::InvalidKnotVector(
            "knot vector contains non-finite (NaN or Infinity) values".to_string(),
        ));
    }

    for i in 0..(knot_vector.len() - 1) {
        if knot_vector[i] > knot_vector[i + 1] {
            return Err(SpaceError::InvalidKnotVector(
                "knot vector is not non-decreasing".to_string(),
            ));
        }
    }

    let num_basis = knot_vector.len() - degree - 1;
    let (lo, hi) = (knot_vector[degree], knot_vector[num_basis]);
    if lo > 0.0 || hi < 1.0 {
        return Err(SpaceError::InvalidKnotVector(format!(
            "knot domain [{lo}, {hi}] does not cover the parametric domain [0, 1]"
        )));
    }

    Ok(())
}

/// Scratch buffers for the triangular Cox-de Boor pass and its derivative
/// recurrences, reused across points.
#[derive(Clone, Debug)]
pub(crate) struct BsplineScratch {
    left: Vec<f64>,
    right: Vec<f64>,
    /// `(degree+1)²`, row-major: upper triangle holds basis values of every
    /// degree, lower triangle the knot differences.
    ndu: Vec<f64>,
    /// Two alternating coefficient rows of the derivative recurrence.
    a: Vec<f64>,
    values: Vec<f64>,
}

impl BsplineScratch {
    pub(crate) fn new(degree: usize) -> Self {
        let len = degree + 1;
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
            ndu: vec![0.0; len * len],
            a: vec![0.0; 2 * len],
            values: vec![0.0; len],
        }
    }

    /// The `degree + 1` nonzero entries written by the last evaluation.
    pub(crate) fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Knot span `mu` with `knots[mu] <= x < knots[mu + 1]`, restricted to the
/// valid range `[degree, num_basis - 1]`. At the right end of the domain the
/// last non-degenerate span is used so derivatives there stay one-sided limits.
fn find_span(x: f64, degree: usize, knots: ArrayView1<f64>) -> usize {
    let num_basis = knots.len() - degree - 1;
    if x >= knots[num_basis] {
        let mut span = num_basis - 1;
        while span > degree && knots[span] >= knots[span + 1] {
            span -= 1;
        }
        return span;
    }
    if x < knots[degree] {
        return degree;
    }
    let mut span = degree;
    while span + 1 < num_basis && x >= knots[span + 1] {
        span += 1;
    }
    span
}

#[inline]
fn divide_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() > 1e-12 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Evaluates the `order`-th derivative of the `degree + 1` B-splines that are
/// nonzero at `x` and returns the index of the first one. The results are left
/// in `scratch.values()`.
///
/// Values and all derivative levels come from one triangular table built on a
/// single knot span (The NURBS Book, algorithms A2.2/A2.3), so derivatives are
/// consistent with the values at knots and at the domain boundary. Orders above
/// the degree are identically zero.
pub(crate) fn evaluate_bspline_derivatives_into(
    x: f64,
    degree: usize,
    knots: ArrayView1<f64>,
    order: usize,
    scratch: &mut BsplineScratch,
) -> usize {
    let p = degree;
    let w = p + 1;
    let mu = find_span(x, p, knots);
    let start = mu - p;

    let BsplineScratch {
        left,
        right,
        ndu,
        a,
        values,
    } = scratch;
    values.fill(0.0);
    if order > p {
        return start;
    }

    ndu[0] = 1.0;
    for j in 1..=p {
        left[j] = x - knots[mu + 1 - j];
        right[j] = knots[mu + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            ndu[j * w + r] = right[r + 1] + left[j - r];
            let temp = divide_or_zero(ndu[r * w + j - 1], ndu[j * w + r]);
            ndu[r * w + j] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        ndu[j * w + j] = saved;
    }

    if order == 0 {
        for j in 0..=p {
            values[j] = ndu[j * w + p];
        }
        return start;
    }

    for r in 0..=p {
        let (mut s1, mut s2) = (0usize, w);
        a[0] = 1.0;
        let mut derivative = 0.0;
        for k in 1..=order {
            let mut d = 0.0;
            let rk = r as isize - k as isize;
            let pk = p - k;
            if rk >= 0 {
                let rk = rk as usize;
                a[s2] = divide_or_zero(a[s1], ndu[(pk + 1) * w + rk]);
                d = a[s2] * ndu[rk * w + pk];
            }
            let j1 = if rk >= -1 { 1 } else { (-rk) as usize };
            let j2 = if r <= pk + 1 { k - 1 } else { p - r };
            for j in j1..=j2 {
                let idx = (rk + j as isize) as usize;
                a[s2 + j] = divide_or_zero(a[s1 + j] - a[s1 + j - 1], ndu[(pk + 1) * w + idx]);
                d += a[s2 + j] * ndu[idx * w + pk];
            }
            if r <= pk {
                a[s2 + k] = divide_or_zero(-a[s1 + k - 1], ndu[(pk + 1) * w + r]);
                d += a[s2 + k] * ndu[r * w + pk];
            }
            derivative = d;
            std::mem::swap(&mut s1, &mut s2);
        }
        values[r] = derivative;
    }

    let factor: f64 = (0..order).map(|k| (p - k) as f64).product();
    for v in values.iter_mut() {
        *v *= factor;
    }
    start
}

/// Dense row of all `order`-th derivative basis values at `x`.
pub fn evaluate_bspline_basis(
    x: f64,
    degree: usize,
    knots: ArrayView1<f64>,
    order: usize,
) -> Result<Array1<f64>, SpaceError> {
    validate_knots_for_degree(knots, degree)?;
    let num_basis = knots.len() - degree - 1;
    let mut scratch = BsplineScratch::new(degree);
    let start = evaluate_bspline_derivatives_into(x, degree, knots, order, &mut scratch);
    let mut row = Array1::<f64>::zeros(num_basis);
    for (i, &v) in scratch.values().iter().enumerate() {
        if start + i < num_basis {
            row[start + i] = v;
        }
    }
    Ok(row)
}

/// Row-major strides of the tensor-product coefficient index (last axis fastest).
pub(crate) fn compute_tensor_strides(num_basis: &[usize]) -> Result<Vec<usize>, SpaceError> {
    let mut strides = vec![1usize; num_basis.len()];
    let mut acc = 1usize;
    for i in (0..num_basis.len()).rev() {
        strides[i] = acc;
        acc = acc
            .checked_mul(num_basis[i])
            .ok_or_else(|| SpaceError::DimensionMismatch("tensor basis too large".to_string()))?;
    }
    Ok(strides)
}

/// Per-axis B-spline description consumed by the tensor assembly.
pub(crate) struct TensorAxes<'a> {
    pub knots: Vec<ArrayView1<'a, f64>>,
    pub degrees: Vec<usize>,
}

struct RowWorkspace {
    scratch: Vec<BsplineScratch>,
    starts: Vec<usize>,
    indices: Vec<usize>,
}

impl RowWorkspace {
    fn new(degrees: &[usize]) -> Self {
        Self {
            scratch: degrees.iter().map(|&d| BsplineScratch::new(d)).collect(),
            starts: vec![0; degrees.len()],
            indices: vec![0; degrees.len()],
        }
    }
}

fn fill_tensor_row<F>(
    row_idx: usize,
    coordinates: ArrayView2<'_, f64>,
    axes: &TensorAxes<'_>,
    orders: &DerivativeOrders,
    strides: &[usize],
    work: &mut RowWorkspace,
    mut write_entry: F,
) where
    F: FnMut(usize, f64),
{
    let dims = axes.degrees.len();
    for dim in 0..dims {
        work.starts[dim] = evaluate_bspline_derivatives_into(
            coordinates[[row_idx, dim]],
            axes.degrees[dim],
            axes.knots[dim],
            orders.order(row_idx, dim),
            &mut work.scratch[dim],
        );
    }

    work.indices.fill(0);
    loop {
        let mut product = 1.0f64;
        let mut col = 0usize;
        for dim in 0..dims {
            let v = work.scratch[dim].values()[work.indices[dim]];
            product *= v;
            if product == 0.0 {
                break;
            }
            col += (work.starts[dim] + work.indices[dim]) * strides[dim];
        }
        if product != 0.0 {
            write_entry(col, product);
        }

        let mut carried = true;
        for dim in (0..dims).rev() {
            work.indices[dim] += 1;
            if work.indices[dim] <= axes.degrees[dim] {
                carried = false;
                break;
            }
            work.indices[dim] = 0;
        }
        if carried {
            break;
        }
    }
}

/// Sparse tensor-product B-spline (derivative) basis matrix, one row per
/// coordinate. Inputs are assumed validated by the calling space.
pub(crate) fn assemble_tensor_basis(
    coordinates: ArrayView2<'_, f64>,
    axes: &TensorAxes<'_>,
    orders: &DerivativeOrders,
) -> Result<SparseColMat<usize, f64>, SpaceError> {
    let nrows = coordinates.nrows();
    let num_basis: Vec<usize> = axes
        .knots
        .iter()
        .zip(&axes.degrees)
        .map(|(k, &d)| k.len() - d - 1)
        .collect();
    let strides = compute_tensor_strides(&num_basis)?;
    let total_cols = num_basis.iter().product::<usize>();
    let per_row_nnz = axes.degrees.iter().map(|&d| d + 1).product::<usize>();

    let triplets: Vec<Triplet<usize, usize, f64>> = if nrows >= PAR_THRESHOLD {
        let row_starts: Vec<usize> = (0..nrows).step_by(CHUNK_SIZE).collect();
        row_starts
            .into_par_iter()
            .map_init(
                || RowWorkspace::new(&axes.degrees),
                |work, chunk_start| {
                    let row_end = (chunk_start + CHUNK_SIZE).min(nrows);
                    let mut local = Vec::with_capacity((row_end - chunk_start) * per_row_nnz);
                    for row_idx in chunk_start..row_end {
                        fill_tensor_row(
                            row_idx,
                            coordinates,
                            axes,
                            orders,
                            &strides,
                            work,
                            |col, value| local.push(Triplet::new(row_idx, col, value)),
                        );
                    }
                    local
                },
            )
            .reduce(Vec::new, |mut acc, mut chunk| {
                acc.append(&mut chunk);
                acc
            })
    } else {
        let mut work = RowWorkspace::new(&axes.degrees);
        let mut triplets = Vec::with_capacity(nrows * per_row_nnz);
        for row_idx in 0..nrows {
            fill_tensor_row(
                row_idx,
                coordinates,
                axes,
                orders,
                &strides,
                &mut work,
                |col, value| triplets.push(Triplet::new(row_idx, col, value)),
            );
        }
        triplets
    };

    SparseColMat::try_new_from_triplets(nrows, total_cols, &triplets)
        .map_err(|err| SpaceError::SparseCreation(format!("{err:?}")))
}

/// Difference penalty `S = DᵀD` on `num_basis_functions` coefficients, where
/// `D` applies the `order`-th forward difference.
pub fn create_difference_penalty_matrix(
    num_basis_functions: usize,
    order: usize,
) -> Result<Array2<f64>, SpaceError> {
    if order == 0 || order >= num_basis_functions {
        return Err(SpaceError::InvalidInput(format!(
            "penalty order {order} must be positive and less than the number of basis functions {num_basis_functions}"
        )));
    }

    let mut d = Array2::<f64>::eye(num_basis_functions);
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }
    Ok(d.t().dot(&d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Recursive Cox-de Boor definition, used to cross-check the triangular pass.
    fn evaluate_bspline(x: f64, knots: &Array1<f64>, i: usize, degree: usize) -> f64 {
        let last_knot = knots[knots.len() - 1];
        let last_basis_index = knots.len() - degree - 2;

        if (x - last_knot).abs() < 1e-12 {
            return if i == last_basis_index { 1.0 } else { 0.0 };
        }

        if degree == 0 {
            return if x >= knots[i] && x < knots[i + 1] { 1.0 } else { 0.0 };
        }

        let mut result = 0.0;
        let den1 = knots[i + degree] - knots[i];
        if den1.abs() > 1e-12 {
            result += (x - knots[i]) / den1 * evaluate_bspline(x, knots, i, degree - 1);
        }
        let den2 = knots[i + degree + 1] - knots[i + 1];
        if den2.abs() > 1e-12 {
            result +=
                (knots[i + degree + 1] - x) / den2 * evaluate_bspline(x, knots, i + 1, degree - 1);
        }
        result
    }

    #[test]
    fn test_knot_generation_uniform() {
        let knots = generate_clamped_knot_vector(6, 2).unwrap();
        assert_eq!(knots.len(), 9);
        let expected = array![0.0, 0.0, 0.0, 0.25, 0.5, 0.75, 1.0, 1.0, 1.0];
        assert_abs_diff_eq!(
            knots.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_knot_validation_rejects_bad_vectors() {
        assert!(validate_knots_for_degree(array![0.0, 0.5, 0.2, 1.0].view(), 1).is_err());
        assert!(validate_knots_for_degree(array![0.0, 0.0, f64::NAN, 1.0, 1.0].view(), 1).is_err());
        assert!(validate_knots_for_degree(array![0.0, 0.0, 0.5, 0.5].view(), 1).is_err());
        assert!(validate_knots_for_degree(array![0.0, 1.0].view(), 1).is_err());
        assert!(validate_knots_for_degree(array![0.0, 0.0, 1.0, 1.0].view(), 0).is_err());
        assert!(validate_knots_for_degree(array![0.0, 0.0, 0.4, 1.0, 1.0].view(), 1).is_ok());
    }

    #[test]
    fn test_values_match_recursive_definition() {
        let knots = array![0.0, 0.0, 0.0, 0.0, 0.2, 0.5, 0.7, 1.0, 1.0, 1.0, 1.0];
        let degree = 3;
        for &x in &[0.0, 0.1, 0.2, 0.33, 0.5, 0.69, 0.9, 1.0] {
            let row = evaluate_bspline_basis(x, degree, knots.view(), 0).unwrap();
            for i in 0..row.len() {
                assert_abs_diff_eq!(row[i], evaluate_bspline(x, &knots, i, degree), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_partition_of_unity() {
        let knots = generate_clamped_knot_vector(7, 3).unwrap();
        for i in 0..=50 {
            let x = i as f64 / 50.0;
            let row = evaluate_bspline_basis(x, 3, knots.view(), 0).unwrap();
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
            let d1 = evaluate_bspline_basis(x, 3, knots.view(), 1).unwrap();
            assert_abs_diff_eq!(d1.sum(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let knots = generate_clamped_knot_vector(6, 3).unwrap();
        let h = 1e-6;
        for &x in &[0.05, 0.3, 0.41, 0.62, 0.95] {
            let d1 = evaluate_bspline_basis(x, 3, knots.view(), 1).unwrap();
            let d2 = evaluate_bspline_basis(x, 3, knots.view(), 2).unwrap();
            let plus = evaluate_bspline_basis(x + h, 3, knots.view(), 0).unwrap();
            let minus = evaluate_bspline_basis(x - h, 3, knots.view(), 0).unwrap();
            let d1_plus = evaluate_bspline_basis(x + h, 3, knots.view(), 1).unwrap();
            let d1_minus = evaluate_bspline_basis(x - h, 3, knots.view(), 1).unwrap();
            for i in 0..d1.len() {
                assert_abs_diff_eq!(d1[i], (plus[i] - minus[i]) / (2.0 * h), epsilon = 1e-5);
                assert_abs_diff_eq!(d2[i], (d1_plus[i] - d1_minus[i]) / (2.0 * h), epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_right_endpoint_derivative_is_one_sided_limit() {
        // Linear clamped basis on [0,1]: N0 = 1 - x, N1 = x.
        let knots = array![0.0, 0.0, 1.0, 1.0];
        let d1 = evaluate_bspline_basis(1.0, 1, knots.view(), 1).unwrap();
        assert_abs_diff_eq!(d1[0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d1[1], 1.0, epsilon = 1e-12);

        let knots = generate_clamped_knot_vector(5, 2).unwrap();
        let at_end = evaluate_bspline_basis(1.0, 2, knots.view(), 1).unwrap();
        let near_end = evaluate_bspline_basis(1.0 - 1e-9, 2, knots.view(), 1).unwrap();
        for i in 0..at_end.len() {
            assert_abs_diff_eq!(at_end[i], near_end[i], epsilon = 1e-6);
        }
        assert!(at_end.iter().any(|v| v.abs() > 1.0));
    }

    #[test]
    fn test_orders_above_degree_vanish() {
        let knots = generate_clamped_knot_vector(4, 2).unwrap();
        let row = evaluate_bspline_basis(0.4, 2, knots.view(), 3).unwrap();
        assert!(row.iter().all(|&v| v == 0.0));
        let quadratic_second = evaluate_bspline_basis(0.4, 2, knots.view(), 2).unwrap();
        assert_abs_diff_eq!(quadratic_second.sum(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tensor_basis_matches_outer_product_of_axes() {
        let k0 = generate_clamped_knot_vector(4, 2).unwrap();
        let k1 = generate_clamped_knot_vector(3, 1).unwrap();
        let axes = TensorAxes {
            knots: vec![k0.view(), k1.view()],
            degrees: vec![2, 1],
        };
        let coords = array![[0.3, 0.7], [1.0, 0.0], [0.0, 0.25]];
        let orders = DerivativeOrders::uniform(&[1, 0]);
        let basis = assemble_tensor_basis(coords.view(), &axes, &orders).unwrap();
        assert_eq!(basis.nrows(), 3);
        assert_eq!(basis.ncols(), 12);
        let dense = crate::matrix::BasisMatrix::from(basis).to_dense();
        for row in 0..coords.nrows() {
            let a = evaluate_bspline_basis(coords[[row, 0]], 2, k0.view(), 1).unwrap();
            let b = evaluate_bspline_basis(coords[[row, 1]], 1, k1.view(), 0).unwrap();
            for i in 0..4 {
                for j in 0..3 {
                    assert_abs_diff_eq!(dense[[row, i * 3 + j]], a[i] * b[j], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_parallel_and_serial_assembly_agree() {
        let knots = generate_clamped_knot_vector(8, 3).unwrap();
        let axes = TensorAxes {
            knots: vec![knots.view()],
            degrees: vec![3],
        };
        let coords = Array2::from_shape_fn((600, 1), |(i, _)| i as f64 / 599.0);
        let orders = DerivativeOrders::uniform(&[0]);
        let big = crate::matrix::BasisMatrix::from(
            assemble_tensor_basis(coords.view(), &axes, &orders).unwrap(),
        )
        .to_dense();
        let small_coords = coords.slice(s![..100, ..]);
        let small = crate::matrix::BasisMatrix::from(
            assemble_tensor_basis(small_coords, &axes, &orders).unwrap(),
        )
        .to_dense();
        for ((i, j), &v) in small.indexed_iter() {
            assert_abs_diff_eq!(v, big[[i, j]], epsilon = 1e-14);
        }
    }

    #[test]
    fn test_penalty_matrix_creation() {
        let s = create_difference_penalty_matrix(5, 2).unwrap();
        let expected = array![
            [1., -2., 1., 0., 0.],
            [-2., 5., -4., 1., 0.],
            [1., -4., 6., -4., 1.],
            [0., 1., -4., 5., -2.],
            [0., 0., 1., -2., 1.]
        ];
        assert_abs_diff_eq!(
            s.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 1e-12
        );
        assert!(create_difference_penalty_matrix(2, 2).is_err());
    }
}
