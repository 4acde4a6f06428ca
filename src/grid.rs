use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

/// `n` evenly spaced samples on `[0, 1]`; a single sample sits at `0`.
pub fn linspace_unit(n: usize) -> Array1<f64> {
    if n <= 1 {
        return Array1::zeros(n);
    }
    Array1::from_shape_fn(n, |i| i as f64 / (n - 1) as f64)
}

/// Tensor grid over `[0,1]^d` with `resolution[k]` samples along axis `k`,
/// one row per node, ordered with the last axis varying fastest.
pub fn uniform_grid(resolution: &[usize]) -> Array2<f64> {
    let axes: Vec<Array1<f64>> = resolution.iter().map(|&n| linspace_unit(n)).collect();
    let total: usize = resolution.iter().product();
    let dims = resolution.len();
    let mut grid = Array2::<f64>::zeros((total, dims));
    let mut indices = vec![0usize; dims];
    for mut row in grid.outer_iter_mut() {
        for dim in 0..dims {
            row[dim] = axes[dim][indices[dim]];
        }
        for dim in (0..dims).rev() {
            indices[dim] += 1;
            if indices[dim] < resolution[dim] {
                break;
            }
            indices[dim] = 0;
        }
    }
    grid
}

/// Index of the closest row of `candidates` for every row of `queries`
/// (Euclidean distance). Ties go to the lowest candidate index.
pub fn nearest_indices(candidates: ArrayView2<'_, f64>, queries: ArrayView2<'_, f64>) -> Vec<usize> {
    (0..queries.nrows())
        .into_par_iter()
        .map(|q| {
            let query = queries.row(q);
            let mut best = 0usize;
            let mut best_distance = f64::INFINITY;
            for (idx, candidate) in candidates.outer_iter().enumerate() {
                let mut distance = 0.0;
                for (a, b) in candidate.iter().zip(query.iter()) {
                    let diff = a - b;
                    distance += diff * diff;
                    if distance >= best_distance {
                        break;
                    }
                }
                if distance < best_distance {
                    best_distance = distance;
                    best = idx;
                }
            }
            best
        })
        .collect()
}
