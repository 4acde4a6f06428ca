use ndarray::Array2;

pub(crate) fn add_ridge(matrix: &Array2<f64>, ridge: f64) -> Array2<f64> {
    if ridge <= 0.0 {
        return matrix.clone();
    }
    let mut regularized = matrix.clone();
    let n = regularized.nrows();
    for i in 0..n {
        regularized[[i, i]] += ridge;
    }
    regularized
}

/// Kronecker product `A ⊗ B`.
pub(crate) fn kronecker(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let (ar, ac) = a.dim();
    let (br, bc) = b.dim();
    let mut out = Array2::<f64>::zeros((ar * br, ac * bc));
    for i in 0..ar {
        for j in 0..ac {
            let aij = a[[i, j]];
            if aij == 0.0 {
                continue;
            }
            for k in 0..br {
                for l in 0..bc {
                    out[[i * br + k, j * bc + l]] = aij * b[[k, l]];
                }
            }
        }
    }
    out
}

/// Embeds a per-axis penalty into a row-major tensor-product coefficient
/// space: `I ⊗ … ⊗ S_axis ⊗ … ⊗ I`.
pub(crate) fn embed_axis_penalty(
    penalty: &Array2<f64>,
    axis: usize,
    axis_sizes: &[usize],
) -> Array2<f64> {
    let mut out = Array2::<f64>::eye(1);
    for (dim, &size) in axis_sizes.iter().enumerate() {
        let factor = if dim == axis {
            penalty.clone()
        } else {
            Array2::<f64>::eye(size)
        };
        out = kronecker(&out, &factor);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn kronecker_matches_hand_computed_block_layout() {
        let a = array![[1.0, 2.0], [0.0, -1.0]];
        let b = array![[1.0, 1.0], [2.0, 0.5]];
        let k = kronecker(&a, &b);
        let expected = array![
            [1.0, 1.0, 2.0, 2.0],
            [2.0, 0.5, 4.0, 1.0],
            [0.0, 0.0, -1.0, -1.0],
            [0.0, 0.0, -2.0, -0.5]
        ];
        assert_abs_diff_eq!(
            k.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn axis_penalty_acts_on_the_requested_axis_only() {
        let s = array![[1.0, -1.0], [-1.0, 1.0]];
        // Two axes of size 2 and 3; coefficient index = i * 3 + j.
        let embedded = embed_axis_penalty(&s, 0, &[2, 3]);
        assert_eq!(embedded.dim(), (6, 6));
        // Coefficients constant along axis 0 are in the null space.
        let c = array![1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        let pc = embedded.dot(&c);
        for v in pc.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }
        // Variation along axis 1 only is also unpenalized by the axis-0 block.
        let c1 = array![0.0, 1.0, 5.0, 0.0, 1.0, 5.0];
        assert_abs_diff_eq!(c1.dot(&embedded.dot(&c1)), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn add_ridge_only_touches_the_diagonal() {
        let m = array![[2.0, 1.0], [1.0, 3.0]];
        let r = add_ridge(&m, 0.5);
        assert_abs_diff_eq!(r[[0, 0]], 2.5);
        assert_abs_diff_eq!(r[[1, 1]], 3.5);
        assert_abs_diff_eq!(r[[0, 1]], 1.0);
        assert_eq!(add_ridge(&m, 0.0), m);
    }
}
