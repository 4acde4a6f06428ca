//! Point payloads for an external plotting backend.
//!
//! The engine only decides *what* to draw: evaluated sample grids or
//! coefficient nets, and per-point colours. Rendering belongs to whatever
//! implements [`Plotter`].

use crate::function::{Function, FunctionError};
use crate::grid::{linspace_unit, uniform_grid};
use ndarray::{Array2, Array3, Array4, ArrayView2, Axis, concatenate, s};
use std::str::FromStr;

const CURVE_SAMPLES: usize = 100;
const SURFACE_SAMPLES: usize = 25;
const VOLUME_FACE_SAMPLES: usize = 50;

pub const DEFAULT_PLOT_COLOR: &str = "#00629B";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    EvaluatedPoints,
    Coefficients,
}

impl FromStr for PointType {
    type Err = FunctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evaluated_points" => Ok(Self::EvaluatedPoints),
            "coefficients" => Ok(Self::Coefficients),
            other => Err(FunctionError::InvalidSelection {
                kind: "point type",
                value: other.to_string(),
                expected: "'evaluated_points', 'coefficients'",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotType {
    Surface,
    Wireframe,
    PointCloud,
    Volume,
}

impl FromStr for PlotType {
    type Err = FunctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "surface" => Ok(Self::Surface),
            "wireframe" => Ok(Self::Wireframe),
            "point_cloud" => Ok(Self::PointCloud),
            "volume" => Ok(Self::Volume),
            other => Err(FunctionError::InvalidSelection {
                kind: "plot type",
                value: other.to_string(),
                expected: "'surface', 'wireframe', 'point_cloud', 'volume'",
            }),
        }
    }
}

/// How to colour the plot: a fixed colour, or a scalar/vector field given by
/// another function over the same parametric domain.
#[derive(Debug, Clone)]
pub enum ColorSource {
    Hex(String),
    Function(Box<Function>),
}

/// Colour handed to the plotter.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotColor {
    Hex(String),
    /// One row per plotted point.
    Values(Array2<f64>),
}

/// Per-call plot settings. Tags are kept as strings and parsed when `plot`
/// runs, so unknown tags fail before any evaluation.
#[derive(Debug, Clone)]
pub struct PlotConfig {
    pub point_types: Vec<String>,
    pub plot_types: Vec<String>,
    pub opacity: f64,
    pub color: ColorSource,
    pub color_map: String,
    pub surface_texture: String,
    pub line_width: f64,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            point_types: vec!["evaluated_points".to_string()],
            plot_types: vec!["surface".to_string()],
            opacity: 1.0,
            color: ColorSource::Hex(DEFAULT_PLOT_COLOR.to_string()),
            color_map: "jet".to_string(),
            surface_texture: String::new(),
            line_width: 3.0,
        }
    }
}

/// Plot styling after validation.
#[derive(Debug, Clone)]
pub struct PlotStyle<'a> {
    pub plot_types: &'a [PlotType],
    pub opacity: f64,
    pub color_map: &'a str,
    pub surface_texture: &'a str,
    pub line_width: f64,
}

/// Rendering backend.
pub trait Plotter {
    type Element;

    /// `points` rows are `[u, values...]`.
    fn plot_curve(
        &mut self,
        points: Array2<f64>,
        color: PlotColor,
        style: &PlotStyle<'_>,
    ) -> Self::Element;

    /// `points` is a `(nu, nv, m)` net of physical points.
    fn plot_surface(
        &mut self,
        points: Array3<f64>,
        color: PlotColor,
        style: &PlotStyle<'_>,
    ) -> Self::Element;
}

impl Function {
    /// Builds the plot payloads for every requested point type and hands them
    /// to `plotter`. Volumes produce one surface element per boundary face.
    pub fn plot<P: Plotter>(
        &self,
        config: &PlotConfig,
        plotter: &mut P,
    ) -> Result<Vec<P::Element>, FunctionError> {
        let point_types = config
            .point_types
            .iter()
            .map(|tag| tag.parse::<PointType>())
            .collect::<Result<Vec<_>, _>>()?;
        let plot_types = config
            .plot_types
            .iter()
            .map(|tag| tag.parse::<PlotType>())
            .collect::<Result<Vec<_>, _>>()?;
        if let ColorSource::Hex(hex) = &config.color {
            validate_hex_color(hex)?;
        }
        let style = PlotStyle {
            plot_types: &plot_types,
            opacity: config.opacity,
            color_map: &config.color_map,
            surface_texture: &config.surface_texture,
            line_width: config.line_width,
        };

        let mut elements = Vec::new();
        for point_type in point_types {
            match self.num_parametric_dimensions() {
                1 => {
                    let (points, color) = self.curve_payload(point_type, &config.color)?;
                    elements.push(plotter.plot_curve(points, color, &style));
                }
                2 => {
                    let (points, color) = self.surface_payload(point_type, &config.color)?;
                    elements.push(plotter.plot_surface(points, color, &style));
                }
                3 => {
                    for (points, color) in self.volume_payload(point_type, &config.color)? {
                        elements.push(plotter.plot_surface(points, color, &style));
                    }
                }
                d => {
                    return Err(FunctionError::InvalidArgument(format!(
                        "only curves, surfaces and volumes can be plotted; this function has {d} parametric dimensions"
                    )));
                }
            }
        }
        Ok(elements)
    }

    fn curve_payload(
        &self,
        point_type: PointType,
        color: &ColorSource,
    ) -> Result<(Array2<f64>, PlotColor), FunctionError> {
        let color_function = color_function(color, 1)?;
        let (parameters, values) = match point_type {
            PointType::EvaluatedPoints => {
                let parameters = linspace_unit(CURVE_SAMPLES).insert_axis(Axis(1));
                let values = self.evaluate(parameters.view(), None, None)?;
                (parameters, values)
            }
            PointType::Coefficients => {
                let parameters = linspace_unit(self.coefficients().nrows()).insert_axis(Axis(1));
                (parameters, self.coefficients().to_owned())
            }
        };

        let plot_color = match color_function {
            None => hex_color(color),
            Some(colors) => PlotColor::Values(self.matching_colors(
                colors,
                point_type,
                parameters.view(),
            )?),
        };

        // Stretch the parameter axis to the value range so the curve is legible.
        let u_axis_scaling = value_range(values.view());
        let u_axis = if u_axis_scaling != 0.0 {
            &parameters * u_axis_scaling
        } else {
            parameters
        };
        let points = concatenate(Axis(1), &[u_axis.view(), values.view()])?;
        Ok((points, plot_color))
    }

    fn surface_payload(
        &self,
        point_type: PointType,
        color: &ColorSource,
    ) -> Result<(Array3<f64>, PlotColor), FunctionError> {
        let color_function = color_function(color, 2)?;
        let m = self.num_physical_dimensions();
        match point_type {
            PointType::EvaluatedPoints => {
                let grid = uniform_grid(&[SURFACE_SAMPLES, SURFACE_SAMPLES]);
                let values = self.evaluate(grid.view(), None, None)?;
                let points =
                    values.into_shape_with_order((SURFACE_SAMPLES, SURFACE_SAMPLES, m))?;
                let plot_color = match color_function {
                    None => hex_color(color),
                    Some(colors) => PlotColor::Values(colors.evaluate(grid.view(), None, None)?),
                };
                Ok((points, plot_color))
            }
            PointType::Coefficients => {
                let [nu, nv] = self.coefficient_grid::<2>()?;
                let points = self
                    .coefficients()
                    .to_owned()
                    .into_shape_with_order((nu, nv, m))?;
                let plot_color = match color_function {
                    None => hex_color(color),
                    Some(colors) => {
                        let grid = uniform_grid(&[nu, nv]);
                        PlotColor::Values(self.matching_colors(
                            colors,
                            PointType::Coefficients,
                            grid.view(),
                        )?)
                    }
                };
                Ok((points, plot_color))
            }
        }
    }

    fn volume_payload(
        &self,
        point_type: PointType,
        color: &ColorSource,
    ) -> Result<Vec<(Array3<f64>, PlotColor)>, FunctionError> {
        let color_function = color_function(color, 3)?;
        let m = self.num_physical_dimensions();
        match point_type {
            PointType::EvaluatedPoints => {
                let n = VOLUME_FACE_SAMPLES;
                let face = uniform_grid(&[n, n]);
                let mut payload = Vec::with_capacity(6);
                for coordinates in volume_faces(face.view()) {
                    let points = self
                        .evaluate(coordinates.view(), None, None)?
                        .into_shape_with_order((n, n, m))?;
                    let plot_color = match color_function {
                        None => hex_color(color),
                        Some(colors) => {
                            PlotColor::Values(colors.evaluate(coordinates.view(), None, None)?)
                        }
                    };
                    payload.push((points, plot_color));
                }
                Ok(payload)
            }
            PointType::Coefficients => {
                let [n0, n1, n2] = self.coefficient_grid::<3>()?;
                let net = self
                    .coefficients()
                    .to_owned()
                    .into_shape_with_order((n0, n1, n2, m))?;
                let color_net = match color_function {
                    None => None,
                    Some(colors) => {
                        if colors.coefficients().nrows() != n0 * n1 * n2 {
                            return Err(FunctionError::InvalidArgument(
                                "volume coefficient plots need a color function with the same coefficient layout; plot evaluated points instead".to_string(),
                            ));
                        }
                        let channels = colors.num_physical_dimensions();
                        Some(
                            colors
                                .coefficients()
                                .to_owned()
                                .into_shape_with_order((n0, n1, n2, channels))?,
                        )
                    }
                };
                let color_faces = color_net.as_ref().map(boundary_faces);
                let mut payload = Vec::with_capacity(6);
                for (i, points) in boundary_faces(&net).into_iter().enumerate() {
                    let plot_color = match &color_faces {
                        None => hex_color(color),
                        Some(colored) => {
                            let (a, b, c) = colored[i].dim();
                            PlotColor::Values(colored[i].clone().into_shape_with_order((a * b, c))?)
                        }
                    };
                    payload.push((points, plot_color));
                }
                Ok(payload)
            }
        }
    }

    /// Per-axis sizes of the coefficient net: taken from the supplied
    /// coefficient shape when it has that rank, else from the space.
    fn coefficient_grid<const D: usize>(&self) -> Result<[usize; D], FunctionError> {
        let shape = self.coefficient_shape();
        let sizes = if shape.len() == D + 1 {
            shape[..D].to_vec()
        } else if let Some(sizes) = self.space().coefficient_grid_shape() {
            sizes
        } else {
            return Err(FunctionError::InvalidArgument(format!(
                "coefficients of a {} space have no {D}-dimensional grid layout to plot",
                self.space().kind()
            )));
        };
        sizes.try_into().map_err(|sizes: Vec<usize>| {
            FunctionError::InvalidArgument(format!(
                "coefficient grid {sizes:?} is not {D}-dimensional"
            ))
        })
    }

    /// Colour values aligned with this function's points: the colour
    /// function's own coefficients when the layouts agree, otherwise the colour
    /// function evaluated at `parameters`.
    fn matching_colors(
        &self,
        colors: &Function,
        point_type: PointType,
        parameters: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, FunctionError> {
        if point_type == PointType::Coefficients
            && colors.coefficients().nrows() == self.coefficients().nrows()
        {
            return Ok(colors.coefficients().to_owned());
        }
        colors.evaluate(parameters, None, None)
    }
}

fn color_function(color: &ColorSource, dimensions: usize) -> Result<Option<&Function>, FunctionError> {
    match color {
        ColorSource::Hex(_) => Ok(None),
        ColorSource::Function(function) => {
            let found = function.num_parametric_dimensions();
            if found != dimensions {
                return Err(FunctionError::PlotDimensionMismatch {
                    expected: dimensions,
                    found,
                });
            }
            Ok(Some(function))
        }
    }
}

fn hex_color(color: &ColorSource) -> PlotColor {
    match color {
        ColorSource::Hex(hex) => PlotColor::Hex(hex.clone()),
        ColorSource::Function(_) => PlotColor::Hex(DEFAULT_PLOT_COLOR.to_string()),
    }
}

fn validate_hex_color(hex: &str) -> Result<(), FunctionError> {
    let digits = hex.strip_prefix('#').unwrap_or("");
    if digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(FunctionError::InvalidSelection {
            kind: "color",
            value: hex.to_string(),
            expected: "a 6 digit hex code such as '#00629B'",
        })
    }
}

fn value_range(values: ArrayView2<'_, f64>) -> f64 {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if min.is_finite() && max.is_finite() {
        max - min
    } else {
        0.0
    }
}

/// The six boundary faces of `[0,1]^3` sampled on a square `face` grid.
fn volume_faces(face: ArrayView2<'_, f64>) -> Vec<Array2<f64>> {
    let n = face.nrows();
    let a = face.column(0);
    let b = face.column(1);
    let mut faces = Vec::with_capacity(6);
    for (fixed_axis, level) in [(2, 0.0), (2, 1.0), (1, 0.0), (1, 1.0), (0, 0.0), (0, 1.0)] {
        let mut coordinates = Array2::<f64>::zeros((n, 3));
        let free_axes: Vec<usize> = (0..3).filter(|&axis| axis != fixed_axis).collect();
        coordinates.column_mut(free_axes[0]).assign(&a);
        coordinates.column_mut(free_axes[1]).assign(&b);
        coordinates.column_mut(fixed_axis).fill(level);
        faces.push(coordinates);
    }
    faces
}

/// Boundary slices of a `(n0, n1, n2, m)` net, in the same face order as
/// `volume_faces`.
fn boundary_faces(net: &Array4<f64>) -> Vec<Array3<f64>> {
    vec![
        net.slice(s![.., .., 0, ..]).to_owned(),
        net.slice(s![.., .., -1, ..]).to_owned(),
        net.slice(s![.., 0, .., ..]).to_owned(),
        net.slice(s![.., -1, .., ..]).to_owned(),
        net.slice(s![0, .., .., ..]).to_owned(),
        net.slice(s![-1, .., .., ..]).to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_and_reject_unknown_values() {
        assert_eq!("coefficients".parse::<PointType>().unwrap(), PointType::Coefficients);
        assert_eq!("point_cloud".parse::<PlotType>().unwrap(), PlotType::PointCloud);
        assert!(matches!(
            "control_points".parse::<PointType>(),
            Err(FunctionError::InvalidSelection { kind: "point type", .. })
        ));
        assert!("mesh".parse::<PlotType>().is_err());
    }

    #[test]
    fn hex_colors_are_validated() {
        assert!(validate_hex_color("#00629B").is_ok());
        assert!(validate_hex_color("00629B").is_err());
        assert!(validate_hex_color("#0062").is_err());
        assert!(validate_hex_color("#00629G").is_err());
    }

    #[test]
    fn volume_faces_pin_one_axis_each() {
        let face = uniform_grid(&[3, 3]);
        let faces = volume_faces(face.view());
        assert_eq!(faces.len(), 6);
        assert!(faces[0].column(2).iter().all(|&v| v == 0.0));
        assert!(faces[3].column(1).iter().all(|&v| v == 1.0));
        assert!(faces[5].column(0).iter().all(|&v| v == 1.0));
        assert_eq!(faces[4].row(5).to_vec(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn boundary_faces_follow_face_order() {
        let net = Array4::from_shape_fn((2, 3, 4, 1), |(i, j, k, _)| (i * 100 + j * 10 + k) as f64);
        let faces = boundary_faces(&net);
        assert_eq!(faces[0].dim(), (2, 3, 1));
        assert_eq!(faces[1][[1, 2, 0]], 123.0);
        assert_eq!(faces[2].dim(), (2, 4, 1));
        assert_eq!(faces[5][[2, 3, 0]], 123.0);
    }

    #[test]
    fn value_range_ignores_empty_input() {
        assert_eq!(value_range(Array2::<f64>::zeros((0, 2)).view()), 0.0);
    }
}
