pub mod factors;
pub mod linear;

use std::collections::HashMap;

use log::debug;
use nalgebra as na;
use tiny_solver::LevenbergMarquardtOptimizer;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;

use crate::error::{Result, TrackingError};

pub use linear::*;

/// Name of the single parameter block used by every problem here.
pub const PARAMETER_BLOCK: &str = "x";

#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    pub max_iterations: usize,
    pub min_error: f64,
    /// Stop once a step lowers the cost by less than this.
    pub min_abs_decrease: f64,
    pub min_rel_decrease: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            min_error: 1.0e-14,
            min_abs_decrease: 1.0e-14,
            min_rel_decrease: 1.0e-10,
        }
    }
}

impl SolveOptions {
    fn to_optimizer_options(self) -> OptimizerOptions {
        let mut opts = OptimizerOptions::default();
        opts.max_iteration = self.max_iterations;
        opts.min_error_threshold = self.min_error;
        opts.min_abs_error_decrease_threshold = self.min_abs_decrease;
        opts.min_rel_error_decrease_threshold = self.min_rel_decrease;
        opts.verbosity_level = 0;
        opts
    }
}

/// Runs Levenberg-Marquardt on a problem whose residual blocks all refer to
/// [`PARAMETER_BLOCK`].
pub fn solve_levenberg_marquardt(
    problem: &Problem,
    initial: &na::DVector<f64>,
    options: SolveOptions,
) -> Result<na::DVector<f64>> {
    let initial_values =
        HashMap::<String, na::DVector<f64>>::from([(PARAMETER_BLOCK.to_string(), initial.clone())]);
    let optimizer = LevenbergMarquardtOptimizer::default();
    let result = optimizer
        .optimize(problem, &initial_values, Some(options.to_optimizer_options()))
        .ok_or_else(|| TrackingError::SolverFailed("levenberg-marquardt did not converge".into()))?;
    let solution = result
        .get(PARAMETER_BLOCK)
        .cloned()
        .ok_or_else(|| TrackingError::SolverFailed("missing parameter block".into()))?;
    debug!("solved {} parameters", solution.len());
    Ok(solution)
}
