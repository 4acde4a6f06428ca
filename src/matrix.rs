use crate::linalg::faer_ndarray::{fast_ata, fast_atb};
use faer::sparse::{SparseColMat, SparseRowMat};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

#[inline]
fn dense_matvec(matrix: &Array2<f64>, vector: ArrayView1<'_, f64>) -> Array1<f64> {
    let nrows = matrix.nrows();
    let ncols = matrix.ncols();
    let mut out = Array1::<f64>::zeros(nrows);

    if ncols == 0 || nrows == 0 {
        return out;
    }

    if matrix.is_standard_layout()
        && let (Some(ms), Some(vs), Some(os)) = (
            matrix.as_slice_memory_order(),
            vector.as_slice(),
            out.as_slice_mut(),
        )
    {
        for (i, row) in ms.chunks_exact(ncols).enumerate() {
            let mut acc = 0.0_f64;
            for j in 0..ncols {
                acc += row[j] * vs[j];
            }
            os[i] = acc;
        }
        return out;
    }

    for i in 0..nrows {
        let mut acc = 0.0_f64;
        for j in 0..ncols {
            acc += matrix[[i, j]] * vector[j];
        }
        out[i] = acc;
    }
    out
}

#[derive(Clone, Debug)]
pub struct SparseBasisMatrix {
    matrix: SparseColMat<usize, f64>,
    dense_cache: Arc<OnceLock<Arc<Array2<f64>>>>,
    csr_cache: Arc<OnceLock<Arc<SparseRowMat<usize, f64>>>>,
}

impl SparseBasisMatrix {
    pub fn new(matrix: SparseColMat<usize, f64>) -> Self {
        Self {
            matrix,
            dense_cache: Arc::new(OnceLock::new()),
            csr_cache: Arc::new(OnceLock::new()),
        }
    }

    pub fn to_dense_arc(&self) -> Arc<Array2<f64>> {
        self.dense_cache
            .get_or_init(|| {
                let mut out = Array2::<f64>::zeros((self.matrix.nrows(), self.matrix.ncols()));
                let (symbolic, values) = self.matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for col in 0..self.matrix.ncols() {
                    let start = col_ptr[col];
                    let end = col_ptr[col + 1];
                    for idx in start..end {
                        out[[row_idx[idx], col]] += values[idx];
                    }
                }
                Arc::new(out)
            })
            .clone()
    }

    pub fn to_csr_arc(&self) -> Option<Arc<SparseRowMat<usize, f64>>> {
        if let Some(cached) = self.csr_cache.get() {
            return Some(cached.clone());
        }
        let csr = self.matrix.as_ref().to_row_major().ok()?;
        let arc = Arc::new(csr);
        let _ = self.csr_cache.set(arc.clone());
        Some(arc)
    }

    /// `BᵀB` accumulated row by row from the CSR form, so the cost scales with
    /// the squared number of nonzeros per row rather than with `n·p²`.
    fn gram(&self) -> Array2<f64> {
        let p = self.matrix.ncols();
        let mut out = Array2::<f64>::zeros((p, p));
        let Some(csr) = self.to_csr_arc() else {
            let dense = self.to_dense_arc();
            return fast_ata(&*dense);
        };
        let (symbolic, values) = csr.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        for row in 0..csr.nrows() {
            let start = row_ptr[row];
            let end = row_ptr[row + 1];
            for a in start..end {
                let va = values[a];
                if va == 0.0 {
                    continue;
                }
                let ca = col_idx[a];
                for b in start..end {
                    out[[ca, col_idx[b]]] += va * values[b];
                }
            }
        }
        out
    }
}

impl Deref for SparseBasisMatrix {
    type Target = SparseColMat<usize, f64>;
    fn deref(&self) -> &Self::Target {
        &self.matrix
    }
}

/// A (possibly derivative) basis matrix: row `i` expresses the value at query
/// coordinate `i` as a linear combination of the coefficients.
#[derive(Clone, Debug)]
pub enum BasisMatrix {
    Dense(Array2<f64>),
    Sparse(SparseBasisMatrix),
}

impl BasisMatrix {
    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.ncols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.clone(),
            Self::Sparse(matrix) => matrix.to_dense_arc().as_ref().clone(),
        }
    }

    pub fn matrix_vector_multiply(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => dense_matvec(matrix, vector),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.nrows());
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for col in 0..matrix.ncols() {
                    let start = col_ptr[col];
                    let end = col_ptr[col + 1];
                    let x = vector[col];
                    if x == 0.0 {
                        continue;
                    }
                    for idx in start..end {
                        let row = row_idx[idx];
                        output[row] += values[idx] * x;
                    }
                }
                output
            }
        }
    }

    /// `B · C` for a coefficient block `C` of shape `(ncols, m)`, one channel
    /// (column of `C`) at a time.
    pub fn multiply_coefficients(&self, coefficients: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((self.nrows(), coefficients.ncols()));
        for (channel, column) in coefficients.columns().into_iter().enumerate() {
            let values = self.matrix_vector_multiply(column);
            out.column_mut(channel).assign(&values);
        }
        out
    }

    /// `Bᵀ · V` for a value block `V` of shape `(nrows, m)`.
    pub fn transpose_multiply(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => fast_atb(matrix, &values),
            Self::Sparse(matrix) => {
                let mut output = Array2::<f64>::zeros((matrix.ncols(), values.ncols()));
                let (symbolic, entries) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for col in 0..matrix.ncols() {
                    let start = col_ptr[col];
                    let end = col_ptr[col + 1];
                    for idx in start..end {
                        let row = row_idx[idx];
                        let weight = entries[idx];
                        for channel in 0..values.ncols() {
                            output[[col, channel]] += weight * values[[row, channel]];
                        }
                    }
                }
                output
            }
        }
    }

    /// Gram matrix `BᵀB`.
    pub fn gram(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => fast_ata(matrix),
            Self::Sparse(matrix) => matrix.gram(),
        }
    }
}

impl From<Array2<f64>> for BasisMatrix {
    fn from(value: Array2<f64>) -> Self {
        Self::Dense(value)
    }
}

impl From<SparseColMat<usize, f64>> for BasisMatrix {
    fn from(value: SparseColMat<usize, f64>) -> Self {
        Self::Sparse(SparseBasisMatrix::new(value))
    }
}
