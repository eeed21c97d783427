use log::{debug, info};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use tiny_solver::problem::Problem;

use crate::error::{Result, TrackingError};
use crate::optimization::factors::{PinParameterLayout, UltrasoundPinFactor, pin_residual};
use crate::optimization::{PARAMETER_BLOCK, SolveOptions, solve_levenberg_marquardt};
use crate::types::RvecTvec;
use crate::util::{make_scaling_matrix, rms_of_squared};

/// Step used when differencing the percentage scale parameters.
pub const SCALE_DERIVATIVE_STEP: f64 = 1.0e-4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UltrasoundPinConfig {
    /// 6 (rigid only), 8 (+ scale), 9 (+ invariant point) or 11 (all).
    pub number_of_parameters: usize,
    pub millimetres_per_pixel: [f64; 2],
    pub invariant_point: [f64; 3],
    /// Starting parameters, zeros with the configured invariant point if empty.
    pub initial_guess: Vec<f64>,
    pub max_iterations: usize,
}

impl Default for UltrasoundPinConfig {
    fn default() -> Self {
        Self {
            number_of_parameters: 6,
            millimetres_per_pixel: [1.0, 1.0],
            invariant_point: [0.0, 0.0, 0.0],
            initial_guess: Vec::new(),
            max_iterations: 100,
        }
    }
}

/// Squared distance of every tracked pin image from the invariant point.
///
/// Borrows the tracker matrices and pixel points; the caller keeps them.
#[derive(Debug, Clone)]
pub struct UltrasoundPinCostFunction<'a> {
    matrices: &'a [na::Matrix4<f64>],
    points: &'a [na::Point3<f64>],
    layout: PinParameterLayout,
    millimetres_per_pixel: [f64; 2],
    invariant_point: [f64; 3],
}

impl<'a> UltrasoundPinCostFunction<'a> {
    pub fn new(
        matrices: &'a [na::Matrix4<f64>],
        points: &'a [na::Point3<f64>],
        number_of_parameters: usize,
    ) -> Result<UltrasoundPinCostFunction<'a>> {
        Ok(UltrasoundPinCostFunction {
            matrices,
            points,
            layout: PinParameterLayout::new(number_of_parameters)?,
            millimetres_per_pixel: [1.0, 1.0],
            invariant_point: [0.0, 0.0, 0.0],
        })
    }

    pub fn set_millimetres_per_pixel(&mut self, millimetres_per_pixel: [f64; 2]) {
        self.millimetres_per_pixel = millimetres_per_pixel;
    }

    pub fn set_invariant_point(&mut self, invariant_point: [f64; 3]) {
        self.invariant_point = invariant_point;
    }

    pub fn number_of_parameters(&self) -> usize {
        self.layout.number_of_parameters
    }

    pub fn number_of_values(&self) -> usize {
        self.points.len()
    }

    pub fn layout(&self) -> PinParameterLayout {
        self.layout
    }

    fn check(&self, parameters: &[f64]) -> Result<()> {
        if parameters.len() != self.layout.number_of_parameters {
            return Err(TrackingError::ParameterCountMismatch {
                expected: self.layout.number_of_parameters,
                got: parameters.len(),
            });
        }
        if self.matrices.is_empty() {
            return Err(TrackingError::EmptyInput("matrices"));
        }
        if self.points.is_empty() {
            return Err(TrackingError::EmptyInput("points"));
        }
        if self.matrices.len() != self.points.len() {
            return Err(TrackingError::SizeMismatch {
                what: "matrices and points",
                left: self.matrices.len(),
                right: self.points.len(),
            });
        }
        Ok(())
    }

    pub fn get_value(&self, parameters: &[f64]) -> Result<Vec<f64>> {
        self.check(parameters)?;
        let p = na::DVector::from_column_slice(parameters);
        Ok(self
            .matrices
            .iter()
            .zip(self.points)
            .map(|(m, point)| {
                pin_residual(
                    &p,
                    &self.layout,
                    m,
                    point,
                    self.millimetres_per_pixel,
                    self.invariant_point,
                )
                .norm_squared()
            })
            .collect())
    }

    /// Root mean of the squared distances from [`Self::get_value`].
    pub fn get_residual(&self, values: &[f64]) -> f64 {
        rms_of_squared(values)
    }

    /// Forward difference Jacobian, one row per parameter and one column per
    /// value.
    pub fn get_derivative(&self, parameters: &[f64]) -> Result<na::DMatrix<f64>> {
        let current = self.get_value(parameters)?;
        let mut derivative = na::DMatrix::zeros(parameters.len(), current.len());
        for i in 0..parameters.len() {
            let step = if self.layout.optimise_scaling && (i == 6 || i == 7) {
                SCALE_DERIVATIVE_STEP
            } else {
                1.0
            };
            let mut forward = parameters.to_vec();
            forward[i] += step;
            let forward_value = self.get_value(&forward)?;
            for (j, (f, c)) in forward_value.iter().zip(&current).enumerate() {
                derivative[(i, j)] = (f - c) / step;
            }
        }
        Ok(derivative)
    }

    /// The rigid part, probe image to tracker marker.
    pub fn get_calibration_transformation(&self, parameters: &[f64]) -> Result<na::Matrix4<f64>> {
        if parameters.len() < 6 {
            return Err(TrackingError::ParameterCountMismatch {
                expected: self.layout.number_of_parameters,
                got: parameters.len(),
            });
        }
        Ok(RvecTvec::from_params(parameters).to_matrix4())
    }

    /// Pixel scale after the percentage corrections, if optimised.
    pub fn get_millimetres_per_pixel(&self, parameters: &[f64]) -> [f64; 2] {
        if self.layout.optimise_scaling && parameters.len() >= 8 {
            [
                self.millimetres_per_pixel[0] * (100.0 + parameters[6]) / 100.0,
                self.millimetres_per_pixel[1] * (100.0 + parameters[7]) / 100.0,
            ]
        } else {
            self.millimetres_per_pixel
        }
    }

    pub fn get_invariant_point(&self, parameters: &[f64]) -> na::Point3<f64> {
        match self.layout.invariant_point_index {
            Some(i) if parameters.len() >= i + 3 => {
                na::Point3::new(parameters[i], parameters[i + 1], parameters[i + 2])
            }
            _ => na::Point3::from(self.invariant_point),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UltrasoundPinResult {
    pub rigid: na::Matrix4<f64>,
    pub scaling: na::Matrix4<f64>,
    pub invariant_point: na::Point3<f64>,
    pub millimetres_per_pixel: [f64; 2],
    pub residual_rms: f64,
    pub parameters: Vec<f64>,
}

impl UltrasoundPinResult {
    /// `rigid * scaling`, pixels to marker space.
    pub fn calibration(&self) -> na::Matrix4<f64> {
        self.rigid * self.scaling
    }
}

#[derive(Debug, Clone, Default)]
pub struct UltrasoundPinCalibration {
    pub config: UltrasoundPinConfig,
}

impl UltrasoundPinCalibration {
    pub fn new(config: UltrasoundPinConfig) -> UltrasoundPinCalibration {
        UltrasoundPinCalibration { config }
    }

    fn initial_parameters(&self, layout: &PinParameterLayout) -> Result<Vec<f64>> {
        if !self.config.initial_guess.is_empty() {
            if self.config.initial_guess.len() != layout.number_of_parameters {
                return Err(TrackingError::ParameterCountMismatch {
                    expected: layout.number_of_parameters,
                    got: self.config.initial_guess.len(),
                });
            }
            return Ok(self.config.initial_guess.clone());
        }
        let mut initial = vec![0.0; layout.number_of_parameters];
        if let Some(i) = layout.invariant_point_index {
            initial[i..i + 3].copy_from_slice(&self.config.invariant_point);
        }
        Ok(initial)
    }

    /// Refines the configured parameters with Levenberg-Marquardt.
    pub fn calibrate(
        &self,
        matrices: &[na::Matrix4<f64>],
        points: &[na::Point3<f64>],
    ) -> Result<UltrasoundPinResult> {
        let mut cost = UltrasoundPinCostFunction::new(
            matrices,
            points,
            self.config.number_of_parameters,
        )?;
        cost.set_millimetres_per_pixel(self.config.millimetres_per_pixel);
        cost.set_invariant_point(self.config.invariant_point);
        let layout = cost.layout();

        let initial = self.initial_parameters(&layout)?;
        let initial_residual = cost.get_residual(&cost.get_value(&initial)?);
        if 3 * matrices.len() < layout.number_of_parameters {
            return Err(TrackingError::Degenerate(format!(
                "{} samples cannot constrain {} parameters",
                matrices.len(),
                layout.number_of_parameters
            )));
        }

        let mut problem = Problem::new();
        for (m, p) in matrices.iter().zip(points) {
            let factor = UltrasoundPinFactor {
                layout,
                tracker: *m,
                point: *p,
                millimetres_per_pixel: self.config.millimetres_per_pixel,
                invariant_point: self.config.invariant_point,
            };
            problem.add_residual_block(3, &[PARAMETER_BLOCK], Box::new(factor), None);
        }
        let options = SolveOptions {
            max_iterations: self.config.max_iterations,
            ..Default::default()
        };
        let solution = solve_levenberg_marquardt(
            &problem,
            &na::DVector::from_vec(initial),
            options,
        )?;
        let parameters: Vec<f64> = solution.iter().copied().collect();
        let residual_rms = cost.get_residual(&cost.get_value(&parameters)?);
        info!(
            "ultrasound pin calibration on {} samples: residual {} -> {}",
            matrices.len(),
            initial_residual,
            residual_rms
        );
        debug!("parameters {:?}", parameters);

        let millimetres_per_pixel = cost.get_millimetres_per_pixel(&parameters);
        Ok(UltrasoundPinResult {
            rigid: cost.get_calibration_transformation(&parameters)?,
            scaling: make_scaling_matrix(millimetres_per_pixel[0], millimetres_per_pixel[1]),
            invariant_point: cost.get_invariant_point(&parameters),
            millimetres_per_pixel,
            residual_rms,
            parameters,
        })
    }
}
