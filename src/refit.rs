use crate::function::{Function, FunctionError};
use crate::grid::uniform_grid;
use crate::spaces::FunctionSpace;
use crate::types::{DEFAULT_REFIT_GRID_RESOLUTION, RefitOptions};
use log::{debug, warn};
use ndarray::Array2;
use std::sync::Arc;

impl Function {
    /// Least-squares approximation of this function in `new_space`.
    ///
    /// The function is sampled at the requested coordinates (or on a uniform
    /// grid), and `new_space` fits coefficients to those samples. The result is
    /// a new `Function`; `self` is left untouched.
    pub fn refit(
        &self,
        new_space: Arc<FunctionSpace>,
        options: &RefitOptions,
    ) -> Result<Function, FunctionError> {
        let coordinates = self.refit_coordinates(options)?;
        let derivative_orders = options.derivative_orders.as_ref();

        let basis = self
            .space()
            .compute_basis_matrix(coordinates.view(), derivative_orders)?;
        // One product per physical channel keeps the working set to a single column.
        let fitting_values = basis.multiply_coefficients(self.coefficients());
        debug!(
            "refitting {} function into {} space: {} samples, {} channels",
            self.space().kind(),
            new_space.kind(),
            coordinates.nrows(),
            fitting_values.ncols()
        );

        let coefficients = new_space.fit(
            fitting_values.view(),
            coordinates.view(),
            derivative_orders,
            options.regularization_parameter,
        )?;
        Function::new(new_space, coefficients)
    }

    fn refit_coordinates(&self, options: &RefitOptions) -> Result<Array2<f64>, FunctionError> {
        let d = self.num_parametric_dimensions();
        match (&options.parametric_coordinates, &options.grid_resolution) {
            (Some(coordinates), grid_resolution) => {
                if grid_resolution.is_some() {
                    warn!(
                        "both grid resolution and parametric coordinates were provided; using parametric coordinates"
                    );
                }
                Ok(coordinates.clone())
            }
            (None, Some(resolution)) => {
                if resolution.len() != d {
                    return Err(FunctionError::InvalidArgument(format!(
                        "grid resolution has {} entries for a {d}-dimensional function",
                        resolution.len()
                    )));
                }
                if resolution.contains(&0) {
                    return Err(FunctionError::InvalidArgument(
                        "grid resolution entries must be positive".to_string(),
                    ));
                }
                Ok(uniform_grid(resolution))
            }
            (None, None) => Ok(uniform_grid(&vec![DEFAULT_REFIT_GRID_RESOLUTION; d])),
        }
    }
}
