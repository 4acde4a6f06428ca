#![deny(dead_code)]
#![deny(unused_imports)]

pub mod basis;
pub mod function;
pub mod grid;
pub mod linalg;
pub mod matrix;
pub mod plotting;
pub mod projection;
pub mod refit;
pub mod spaces;
pub mod types;

pub use function::{Function, FunctionError};
pub use matrix::BasisMatrix;
pub use plotting::{ColorSource, PlotColor, PlotConfig, PlotStyle, PlotType, Plotter, PointType};
pub use projection::ProjectionResult;
pub use spaces::{
    BSplineSpace, ConstantSpace, FunctionSpace, IdwSpace, PolynomialSpace, SpaceError,
};
pub use types::{
    DEFAULT_REFIT_GRID_RESOLUTION, DerivativeOrders, ProjectionOptions, ProjectionStatus,
    RefitOptions,
};
