use super::{SpaceError, validate_coordinates};
use crate::basis::PAR_THRESHOLD;
use crate::matrix::BasisMatrix;
use crate::types::DerivativeOrders;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};

/// Distances below this are treated as coincident with an anchor.
const COINCIDENCE_TOLERANCE: f64 = 1e-12;

pub fn default_idw_power() -> f64 {
    2.0
}

/// Inverse-distance-weighted interpolation over fixed parametric anchors.
///
/// One coefficient per anchor; the basis row at `x` holds the normalized
/// weights `w_j = ‖x - a_j‖^{-p} / Σ_k ‖x - a_k‖^{-p}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdwSpace {
    anchors: Array2<f64>,
    #[serde(default = "default_idw_power")]
    power: f64,
}

impl IdwSpace {
    pub fn new(anchors: Array2<f64>, power: f64) -> Result<Self, SpaceError> {
        if anchors.nrows() == 0 || anchors.ncols() == 0 {
            return Err(SpaceError::InvalidInput(
                "an IDW space needs at least one anchor with at least one dimension".to_string(),
            ));
        }
        if !power.is_finite() || power <= 0.0 {
            return Err(SpaceError::InvalidInput(format!(
                "IDW power must be finite and positive, got {power}"
            )));
        }
        validate_coordinates(anchors.view(), anchors.ncols())?;
        Ok(Self { anchors, power })
    }

    pub fn with_default_power(anchors: Array2<f64>) -> Result<Self, SpaceError> {
        Self::new(anchors, default_idw_power())
    }

    pub fn anchors(&self) -> ArrayView2<'_, f64> {
        self.anchors.view()
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn num_parametric_dimensions(&self) -> usize {
        self.anchors.ncols()
    }

    pub fn num_coefficients(&self) -> usize {
        self.anchors.nrows()
    }

    pub(crate) fn basis_matrix(
        &self,
        coordinates: ArrayView2<'_, f64>,
        orders: &DerivativeOrders,
    ) -> Result<BasisMatrix, SpaceError> {
        let order = orders.max_order();
        if order > 0 {
            return Err(SpaceError::UnsupportedDerivative {
                space: "IDW",
                order,
            });
        }

        let n = coordinates.nrows();
        let mut out = Array2::<f64>::zeros((n, self.num_coefficients()));
        let fill = |point: usize, row: ArrayViewMut1<'_, f64>| {
            self.fill_row(point, coordinates, row);
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
        Ok(BasisMatrix::Dense(out))
    }

    fn fill_row(
        &self,
        point: usize,
        coordinates: ArrayView2<'_, f64>,
        mut row: ArrayViewMut1<'_, f64>,
    ) {
        let x = coordinates.row(point);
        let mut total = 0.0;
        for (anchor_idx, anchor) in self.anchors.outer_iter().enumerate() {
            let distance = anchor
                .iter()
                .zip(x.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            if distance < COINCIDENCE_TOLERANCE {
                row.fill(0.0);
                row[anchor_idx] = 1.0;
                return;
            }
            let weight = distance.powf(-self.power);
            row[anchor_idx] = weight;
            total += weight;
        }
        row /= total;
    }
}
