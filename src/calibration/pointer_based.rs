use log::debug;
use nalgebra as na;
use tiny_solver::problem::Problem;

use crate::error::{Result, TrackingError};
use crate::optimization::factors::{PointerCalibrationFactor, pointer_residual};
use crate::optimization::{
    PARAMETER_BLOCK, SolveOptions, project_to_so3, solve_least_squares, solve_levenberg_marquardt,
};
use crate::types::{RvecTvec, ToRvecTvec};
use crate::util::{make_scaling_matrix, rms_of_squared};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerCalibrationResult {
    pub rigid: na::Matrix4<f64>,
    pub scaling: na::Matrix4<f64>,
    /// `rigid * scaling`, image pixels to sensor space.
    pub calibration: na::Matrix4<f64>,
    pub residual_rms: f64,
}

/// Affine fit `sensor = a * u + b * v + t`, split into rotation and the
/// two column scales.
fn initial_estimate(
    image_points: &[na::Point3<f64>],
    sensor_points: &[na::Point3<f64>],
) -> Result<na::DVector<f64>> {
    let n = image_points.len();
    let mut a = na::DMatrix::<f64>::zeros(3 * n, 9);
    let mut b = na::DVector::<f64>::zeros(3 * n);
    for (i, (img, sensor)) in image_points.iter().zip(sensor_points).enumerate() {
        for axis in 0..3 {
            let row = 3 * i + axis;
            a[(row, axis)] = img.x;
            a[(row, 3 + axis)] = img.y;
            a[(row, 6 + axis)] = 1.0;
            b[row] = sensor[axis];
        }
    }
    let x = solve_least_squares(&a, &b)
        .map_err(|e| TrackingError::Degenerate(format!("{} point pairs: {}", n, e)))?;
    let col_u = na::Vector3::new(x[0], x[1], x[2]);
    let col_v = na::Vector3::new(x[3], x[4], x[5]);
    let t = na::Vector3::new(x[6], x[7], x[8]);
    let (sx, sy) = (col_u.norm(), col_v.norm());
    if sx < f64::EPSILON || sy < f64::EPSILON {
        return Err(TrackingError::Degenerate(
            "image points do not span both axes".to_string(),
        ));
    }
    let r0 = col_u / sx;
    let r1 = col_v / sy;
    let r = project_to_so3(&na::Matrix3::from_columns(&[r0, r1, r0.cross(&r1)]))?;

    let mut rigid = na::Matrix4::identity();
    rigid.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    rigid.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
    let mut params = rigid.to_rvec_tvec().to_params();
    params.extend([sx, sy]);
    Ok(na::DVector::from_vec(params))
}

/// Pointer based ultrasound calibration after Muratore et al. 2001.
///
/// Image points are pixels with `z = 0`, sensor points are the pointer tip
/// positions in the probe sensor frame. Solves for the rigid transform and
/// anisotropic scale with `sensor = R * S * image + t`.
pub fn pointer_based_calibration(
    image_points: &[na::Point3<f64>],
    sensor_points: &[na::Point3<f64>],
) -> Result<PointerCalibrationResult> {
    if image_points.is_empty() {
        return Err(TrackingError::EmptyInput("image points"));
    }
    if sensor_points.is_empty() {
        return Err(TrackingError::EmptyInput("sensor points"));
    }
    if image_points.len() != sensor_points.len() {
        return Err(TrackingError::SizeMismatch {
            what: "image and sensor points",
            left: image_points.len(),
            right: sensor_points.len(),
        });
    }
    if image_points.len() < 3 {
        return Err(TrackingError::Degenerate(format!(
            "need at least 3 point pairs, got {}",
            image_points.len()
        )));
    }

    let initial = initial_estimate(image_points, sensor_points)?;
    let mut problem = Problem::new();
    for (image, sensor) in image_points.iter().zip(sensor_points) {
        problem.add_residual_block(
            3,
            &[PARAMETER_BLOCK],
            Box::new(PointerCalibrationFactor {
                image: *image,
                sensor: *sensor,
            }),
            None,
        );
    }
    let p = solve_levenberg_marquardt(&problem, &initial, SolveOptions::default())?;

    let squared: Vec<f64> = image_points
        .iter()
        .zip(sensor_points)
        .map(|(image, sensor)| pointer_residual(&p, image, sensor).norm_squared())
        .collect();
    let residual_rms = rms_of_squared(&squared);
    debug!("pointer based calibration: residual {}", residual_rms);

    let params: Vec<f64> = p.iter().copied().collect();
    let rigid = RvecTvec::from_params(&params).to_matrix4();
    let scaling = make_scaling_matrix(params[6], params[7]);
    Ok(PointerCalibrationResult {
        rigid,
        scaling,
        calibration: rigid * scaling,
        residual_rms,
    })
}
