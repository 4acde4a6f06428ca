use faer::diag::DiagRef;
use faer::linalg::solvers::{self, Solve};
pub use faer::linalg::solvers::{Lblt as FaerLblt, Ldlt as FaerLdlt, Llt as FaerLlt};
use faer::{Mat, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Factorization failed")]
    FactorizationFailed,
    #[error("Linear solve produced non-finite values; the system is singular")]
    NonFiniteSolution,
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
}

/// Eigenvalues below this fraction of the largest magnitude count as zero.
const RANK_TOLERANCE: f64 = 1e-12;

pub enum FaerSymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
    Lblt(FaerLblt<f64>),
}

impl FaerSymmetricFactor {
    #[inline]
    pub fn solve(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        match self {
            FaerSymmetricFactor::Llt(f) => f.solve(rhs),
            FaerSymmetricFactor::Ldlt(f) => f.solve(rhs),
            FaerSymmetricFactor::Lblt(f) => f.solve(rhs),
        }
    }
}

/// Solve `A X = B` for a symmetric `A` and return `X`.
///
/// Factorizations are tried cheapest first: LLT, then LDLT, then
/// Bunch-Kaufman (LBLT) for indefinite matrices with zero leading pivots.
/// The first factorization whose solution is finite wins; if none is, the
/// matrix is numerically singular and `NonFiniteSolution` is returned.
pub fn solve_symmetric<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    matrix: &ArrayBase<S1, Ix2>,
    rhs: &ArrayBase<S2, Ix2>,
) -> Result<Array2<f64>, FaerLinalgError> {
    if matrix.nrows() != matrix.ncols() {
        return Err(FaerLinalgError::DimensionMismatch(format!(
            "symmetric solve requires a square matrix, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.nrows() != rhs.nrows() {
        return Err(FaerLinalgError::DimensionMismatch(format!(
            "matrix has {} rows but right-hand side has {}",
            matrix.nrows(),
            rhs.nrows()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(FaerLinalgError::FactorizationFailed);
    }

    let matrix_view = FaerArrayView::new(matrix);
    let a = matrix_view.as_ref();
    let rhs_view = FaerArrayView::new(rhs);
    let b = rhs_view.as_ref();

    let mut factored = false;
    for attempt in 0..3 {
        let factor = match attempt {
            0 => FaerLlt::new(a, Side::Lower).ok().map(FaerSymmetricFactor::Llt),
            1 => FaerLdlt::new(a, Side::Lower).ok().map(FaerSymmetricFactor::Ldlt),
            _ => std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                FaerLblt::new(a, Side::Lower)
            }))
            .ok()
            .map(FaerSymmetricFactor::Lblt),
        };
        let Some(factor) = factor else {
            continue;
        };
        factored = true;
        let solved = mat_to_array(factor.solve(b).as_ref());
        if solved.iter().all(|v| v.is_finite()) {
            return Ok(solved);
        }
    }

    if factored {
        Err(FaerLinalgError::NonFiniteSolution)
    } else {
        Err(FaerLinalgError::FactorizationFailed)
    }
}

#[inline]
fn should_use_faer_matmul(m: usize, n: usize, k: usize) -> bool {
    // Small, centralized dispatch policy:
    // - stay on ndarray for tiny products to avoid setup overhead,
    // - switch to faer GEMM/GEMV for moderate+ sizes.
    const MIN_DIM: usize = 32;
    const MIN_FLOP_SCALE: usize = 64 * 64;
    (m >= MIN_DIM || n >= MIN_DIM || k >= MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= MIN_FLOP_SCALE
}

#[inline]
fn choose_par(n: usize, p: usize) -> Par {
    if n < 128 || p < 128 {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

/// Compute A^T * A using faer's SIMD-optimized GEMM.
///
/// For a matrix A of shape (n, p), this computes the (p, p) result.
/// Uses zero-copy view when possible, falls back to copy for non-contiguous arrays.
#[inline]
pub fn fast_ata<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n, p) = a.dim();

    if !should_use_faer_matmul(p, p, n) {
        return a.t().dot(a);
    }

    let mut result = Mat::<f64>::zeros(p, p);

    let a_view = FaerArrayView::new(a);
    let a_ref = a_view.as_ref();
    let a_t = a_ref.transpose();

    matmul(
        result.as_mut(),
        Accum::Replace,
        a_t,
        a_ref,
        1.0,
        choose_par(n, p),
    );

    mat_to_array(result.as_ref())
}

/// Compute A^T * B using faer's SIMD-optimized GEMM.
/// For A of shape (n, p) and B of shape (n, q), this computes the (p, q) result.
#[inline]
pub fn fast_atb<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n_a, p) = a.dim();
    let (n_b, q) = b.dim();
    debug_assert_eq!(n_a, n_b, "A and B must have same number of rows");

    if !should_use_faer_matmul(p, q, n_a) {
        return a.t().dot(b);
    }

    let mut result = Mat::<f64>::zeros(p, q);

    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    let a_ref = a_view.as_ref();
    let b_ref = b_view.as_ref();

    matmul(
        result.as_mut(),
        Accum::Replace,
        a_ref.transpose(),
        b_ref,
        1.0,
        choose_par(n_a, p),
    );

    mat_to_array(result.as_ref())
}

pub trait FaerEigh {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }
}

/// Number of eigenvalues of the symmetric `matrix` above
/// `RANK_TOLERANCE · max|λ|`.
///
/// Factorizations of a rank-deficient Gram matrix often succeed on roundoff
/// pivots and return a finite but arbitrary solution, so rank is decided here
/// from the spectrum instead.
pub fn numerical_rank<S: Data<Elem = f64>>(
    matrix: &ArrayBase<S, Ix2>,
) -> Result<usize, FaerLinalgError> {
    if matrix.nrows() != matrix.ncols() {
        return Err(FaerLinalgError::DimensionMismatch(format!(
            "numerical rank requires a square matrix, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.is_empty() {
        return Ok(0);
    }
    let (eigenvalues, _) = matrix.eigh(Side::Lower)?;
    let max_ev = eigenvalues.iter().fold(0.0_f64, |a, &b| a.max(b.abs()));
    let tol = if max_ev > 0.0 {
        max_ev * RANK_TOLERANCE
    } else {
        RANK_TOLERANCE
    };
    Ok(eigenvalues.iter().filter(|&&ev| ev > tol).count())
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

pub(crate) fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        // Negative or zero strides can alias or reverse traversal, which faer
        // kernels do not expect; such layouts get a compact owned copy.
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }

        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        };
        // SAFETY: pointer/shape/strides either come directly from a live ndarray
        // view with positive strides, or from an owned compact copy stored inside
        // this wrapper, which guarantees validity for the returned view lifetime.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}
