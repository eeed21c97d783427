use std::path::Path;

use log::{debug, info};
use nalgebra as na;
use rand::SeedableRng;
use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::data_loader::load_matrices_from_directory;
use crate::error::{Result, TrackingError};
use crate::optimization::solve_least_squares;
use crate::util::{make_translation_matrix, mean_and_std, rms_of_squared, transform_point};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotCalibrationConfig {
    /// Share of the poses used by each rerun, in percent.
    pub percentage: f64,
    pub reruns: usize,
    pub seed: u64,
}

impl Default for PivotCalibrationConfig {
    fn default() -> Self {
        Self {
            percentage: 100.0,
            reruns: 100,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotCalibrationResult {
    /// Tool tip in the tracked marker frame.
    pub offset: na::Vector3<f64>,
    /// Fixed pivot point in tracker space.
    pub pivot_point: na::Point3<f64>,
    pub residual_rms: f64,
    pub sample_count: usize,
    /// Translation by `offset`, i.e. tip to marker.
    pub transform: na::Matrix4<f64>,
}

/// Spread of repeated calibrations on random subsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotRerunStatistics {
    pub reruns: usize,
    pub subset_size: usize,
    pub residual_mean: f64,
    pub residual_std_dev: f64,
    pub offset_mean: na::Vector3<f64>,
    pub offset_std_dev: na::Vector3<f64>,
}

/// Finds the tool offset that stays put while the tool pivots.
///
/// Each pose contributes `R_i * offset - pivot = -t_i`; the stacked system
/// is solved in the least squares sense.
pub fn pivot_calibration(matrices: &[na::Matrix4<f64>]) -> Result<PivotCalibrationResult> {
    if matrices.is_empty() {
        return Err(TrackingError::EmptyInput("matrices"));
    }
    if matrices.len() < 3 {
        return Err(TrackingError::Degenerate(format!(
            "pivot calibration needs at least 3 poses, got {}",
            matrices.len()
        )));
    }
    let n = matrices.len();
    let mut a = na::DMatrix::<f64>::zeros(3 * n, 6);
    let mut b = na::DVector::<f64>::zeros(3 * n);
    for (i, m) in matrices.iter().enumerate() {
        a.view_mut((3 * i, 0), (3, 3))
            .copy_from(&m.fixed_view::<3, 3>(0, 0));
        a.view_mut((3 * i, 3), (3, 3))
            .copy_from(&(-na::Matrix3::<f64>::identity()));
        b.rows_mut(3 * i, 3)
            .copy_from(&(-m.fixed_view::<3, 1>(0, 3).into_owned()));
    }
    let x = solve_least_squares(&a, &b)
        .map_err(|e| TrackingError::Degenerate(format!("{} poses: {}", n, e)))?;
    let offset = na::Vector3::new(x[0], x[1], x[2]);
    let pivot_point = na::Point3::new(x[3], x[4], x[5]);

    let squared: Vec<f64> = matrices
        .iter()
        .map(|m| (transform_point(m, &na::Point3::from(offset)) - pivot_point).norm_squared())
        .collect();
    let residual_rms = rms_of_squared(&squared);
    debug!(
        "pivot calibration on {} poses: offset {:?}, residual {}",
        n,
        offset.as_slice(),
        residual_rms
    );
    Ok(PivotCalibrationResult {
        offset,
        pivot_point,
        residual_rms,
        sample_count: n,
        transform: make_translation_matrix(&offset),
    })
}

fn check_percentage(percentage: f64) -> Result<()> {
    if percentage > 0.0 && percentage <= 100.0 {
        Ok(())
    } else {
        Err(TrackingError::Degenerate(format!(
            "percentage must be in (0, 100], got {}",
            percentage
        )))
    }
}

/// Calibrates on `reruns` random subsets of `percentage` percent of the
/// poses, seeded for reproducibility.
pub fn pivot_rerun_statistics(
    matrices: &[na::Matrix4<f64>],
    config: &PivotCalibrationConfig,
) -> Result<PivotRerunStatistics> {
    check_percentage(config.percentage)?;
    if config.reruns == 0 {
        return Err(TrackingError::EmptyInput("reruns"));
    }
    let subset_size = ((matrices.len() as f64 * config.percentage / 100.0).round() as usize)
        .clamp(1, matrices.len().max(1));
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut residuals = Vec::with_capacity(config.reruns);
    let mut offsets = Vec::with_capacity(config.reruns);
    for _ in 0..config.reruns {
        let subset: Vec<na::Matrix4<f64>> = sample(&mut rng, matrices.len(), subset_size)
            .into_iter()
            .map(|i| matrices[i])
            .collect();
        let result = pivot_calibration(&subset)?;
        residuals.push(result.residual_rms);
        offsets.push(result.offset);
    }
    let (residual_mean, residual_std_dev) = mean_and_std(&residuals);
    let mut offset_mean = na::Vector3::<f64>::zeros();
    let mut offset_std_dev = na::Vector3::<f64>::zeros();
    for axis in 0..3 {
        let values: Vec<f64> = offsets.iter().map(|o| o[axis]).collect();
        let (mean, std_dev) = mean_and_std(&values);
        offset_mean[axis] = mean;
        offset_std_dev[axis] = std_dev;
    }
    Ok(PivotRerunStatistics {
        reruns: config.reruns,
        subset_size,
        residual_mean,
        residual_std_dev,
        offset_mean,
        offset_std_dev,
    })
}

/// Loads every matrix file in `dir` and calibrates on all of them. When
/// `percentage` is below 100 the subset statistics are computed as well.
pub fn calibrate_using_files_in_directory(
    dir: impl AsRef<Path>,
    config: &PivotCalibrationConfig,
) -> Result<(PivotCalibrationResult, Option<PivotRerunStatistics>)> {
    check_percentage(config.percentage)?;
    let dir = dir.as_ref();
    let matrices = load_matrices_from_directory(dir)?;
    info!("loaded {} matrices from {}", matrices.len(), dir.display());
    let result = pivot_calibration(&matrices)?;
    let statistics = if config.percentage < 100.0 {
        let statistics = pivot_rerun_statistics(&matrices, config)?;
        info!(
            "{} reruns on {} poses: residual {} +/- {}",
            statistics.reruns,
            statistics.subset_size,
            statistics.residual_mean,
            statistics.residual_std_dev
        );
        Some(statistics)
    } else {
        None
    };
    Ok((result, statistics))
}
