use super::SpaceError;
use crate::matrix::BasisMatrix;
use crate::types::DerivativeOrders;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// A single coefficient (per physical channel) that holds everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantSpace {
    num_parametric_dimensions: usize,
}

impl ConstantSpace {
    pub fn new(num_parametric_dimensions: usize) -> Result<Self, SpaceError> {
        if num_parametric_dimensions == 0 {
            return Err(SpaceError::InvalidInput(
                "a constant space needs at least one parametric dimension".to_string(),
            ));
        }
        Ok(Self {
            num_parametric_dimensions,
        })
    }

    pub fn num_parametric_dimensions(&self) -> usize {
        self.num_parametric_dimensions
    }

    pub(crate) fn basis_matrix(
        &self,
        coordinates: ArrayView2<'_, f64>,
        orders: &DerivativeOrders,
    ) -> BasisMatrix {
        BasisMatrix::Dense(Array2::from_shape_fn((coordinates.nrows(), 1), |(point, _)| {
            let differentiated =
                (0..self.num_parametric_dimensions).any(|dim| orders.order(point, dim) > 0);
            if differentiated { 0.0 } else { 1.0 }
        }))
    }
}
