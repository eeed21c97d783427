//! Hand-eye calibration (AX = XB) with the Tsai-Lenz formulation.
//!
//! Tracker matrices are marker to world, `^W T_M`. Extrinsics are the
//! calibration grid in camera space, `^C T_G`. The unknown is the camera
//! in marker space, `^M T_C`.

use log::debug;
use nalgebra as na;

use crate::error::{Result, TrackingError};
use crate::optimization::{project_to_so3, solve_least_squares};
use crate::util::{matrix_to_isometry, rms_of_squared};

/// Relative motions rotating less than this do not constrain the axis.
pub const MIN_MOTION_ANGLE_DEG: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct MotionPair {
    rot_a: na::Matrix3<f64>,
    rot_b: na::Matrix3<f64>,
    tra_a: na::Vector3<f64>,
    tra_b: na::Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandEyeResult {
    pub camera_to_marker: na::Matrix4<f64>,
    /// Mean grid pose in world space implied by the calibration.
    pub grid_to_world: na::Matrix4<f64>,
    /// RMS distance of each per-pose grid origin from the mean, in world units.
    pub residual_rms: f64,
    pub pairs_used: usize,
}

fn log_so3(r: &na::Matrix3<f64>) -> na::Vector3<f64> {
    na::Rotation3::from_matrix_unchecked(*r).scaled_axis()
}

fn make_motion_pair(
    world_marker_a: &na::Isometry3<f64>,
    grid_camera_a: &na::Isometry3<f64>,
    world_marker_b: &na::Isometry3<f64>,
    grid_camera_b: &na::Isometry3<f64>,
) -> Result<MotionPair> {
    let a = world_marker_a.inverse() * world_marker_b;
    let b = grid_camera_a.inverse() * grid_camera_b;
    Ok(MotionPair {
        rot_a: project_to_so3(a.rotation.to_rotation_matrix().matrix())?,
        rot_b: project_to_so3(b.rotation.to_rotation_matrix().matrix())?,
        tra_a: a.translation.vector,
        tra_b: b.translation.vector,
    })
}

fn is_good_pair(pair: &MotionPair, min_angle: f64) -> bool {
    log_so3(&pair.rot_a).norm().min(log_so3(&pair.rot_b).norm()) >= min_angle
}

fn build_all_pairs(
    world_marker: &[na::Isometry3<f64>],
    grid_camera: &[na::Isometry3<f64>],
) -> Result<Vec<MotionPair>> {
    let n = world_marker.len();
    let min_angle = MIN_MOTION_ANGLE_DEG.to_radians();
    let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..(n - 1) {
        for j in (i + 1)..n {
            let pair = make_motion_pair(
                &world_marker[i],
                &grid_camera[i],
                &world_marker[j],
                &grid_camera[j],
            )?;
            if is_good_pair(&pair, min_angle) {
                pairs.push(pair);
            } else {
                debug!("skipping motion pair ({}, {})", i, j);
            }
        }
    }
    Ok(pairs)
}

fn quat_left(q: &na::UnitQuaternion<f64>) -> na::Matrix4<f64> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    na::Matrix4::new(w, -x, -y, -z, x, w, -z, y, y, z, w, -x, z, -y, x, w)
}

fn quat_right(q: &na::UnitQuaternion<f64>) -> na::Matrix4<f64> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    na::Matrix4::new(w, -x, -y, -z, x, w, z, -y, y, -z, w, x, z, y, -x, w)
}

fn estimate_rotation(pairs: &[MotionPair]) -> Result<na::Matrix3<f64>> {
    let mut m = na::DMatrix::<f64>::zeros(4 * pairs.len(), 4);
    for (idx, p) in pairs.iter().enumerate() {
        let qa = na::UnitQuaternion::from_rotation_matrix(
            &na::Rotation3::from_matrix_unchecked(p.rot_a),
        );
        let mut qb = na::UnitQuaternion::from_rotation_matrix(
            &na::Rotation3::from_matrix_unchecked(p.rot_b),
        );
        // A and B share a rotation angle, so their scalar parts agree once
        // the quaternion signs do.
        if qa.w * qb.w < 0.0 {
            qb = na::UnitQuaternion::new_unchecked(-qb.into_inner());
        }
        m.view_mut((4 * idx, 0), (4, 4))
            .copy_from(&(quat_left(&qa) - quat_right(&qb)));
    }
    let svd = m.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| TrackingError::SolverFailed("svd failed during hand-eye".into()))?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, s)| if *s < best.1 { (i, *s) } else { best });
    let q = v_t.row(smallest);
    let q = na::Quaternion::new(q[0], q[1], q[2], q[3]);
    Ok(*na::UnitQuaternion::from_quaternion(q)
        .to_rotation_matrix()
        .matrix())
}

fn estimate_translation(pairs: &[MotionPair], rot_x: &na::Matrix3<f64>) -> Result<na::Vector3<f64>> {
    let mut c = na::DMatrix::<f64>::zeros(3 * pairs.len(), 3);
    let mut w = na::DVector::<f64>::zeros(3 * pairs.len());
    for (idx, p) in pairs.iter().enumerate() {
        c.view_mut((3 * idx, 0), (3, 3))
            .copy_from(&(p.rot_a - na::Matrix3::identity()));
        w.rows_mut(3 * idx, 3)
            .copy_from(&(rot_x * p.tra_b - p.tra_a));
    }
    let t = solve_least_squares(&c, &w)?;
    Ok(na::Vector3::new(t[0], t[1], t[2]))
}

/// Solves for the camera to marker transform from paired tracker matrices
/// and grid extrinsics taken at the same instants.
pub fn handeye_calibration(
    tracker_matrices: &[na::Matrix4<f64>],
    extrinsics: &[na::Matrix4<f64>],
) -> Result<HandEyeResult> {
    if tracker_matrices.is_empty() {
        return Err(TrackingError::EmptyInput("tracking matrices"));
    }
    if tracker_matrices.len() != extrinsics.len() {
        return Err(TrackingError::SizeMismatch {
            what: "tracking matrices and extrinsics",
            left: tracker_matrices.len(),
            right: extrinsics.len(),
        });
    }
    if tracker_matrices.len() < 3 {
        return Err(TrackingError::Degenerate(format!(
            "hand-eye calibration needs at least 3 poses, got {}",
            tracker_matrices.len()
        )));
    }
    let world_marker: Vec<_> = tracker_matrices.iter().map(matrix_to_isometry).collect();
    // camera in grid space
    let grid_camera: Vec<_> = extrinsics
        .iter()
        .map(|e| matrix_to_isometry(e).inverse())
        .collect();

    let pairs = build_all_pairs(&world_marker, &grid_camera)?;
    if pairs.len() < 2 {
        return Err(TrackingError::Degenerate(format!(
            "only {} usable motion pair(s) from {} poses",
            pairs.len(),
            tracker_matrices.len()
        )));
    }
    let rot_x = estimate_rotation(&pairs)?;
    let t_x = estimate_translation(&pairs, &rot_x)?;
    let mut camera_to_marker = na::Matrix4::identity();
    camera_to_marker.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot_x);
    camera_to_marker.fixed_view_mut::<3, 1>(0, 3).copy_from(&t_x);

    let grids: Vec<na::Matrix4<f64>> = tracker_matrices
        .iter()
        .zip(extrinsics)
        .map(|(t, e)| t * camera_to_marker * e)
        .collect();
    let n = grids.len() as f64;
    let mut rotation_sum = na::Matrix3::<f64>::zeros();
    let mut translation_mean = na::Vector3::<f64>::zeros();
    for g in &grids {
        rotation_sum += g.fixed_view::<3, 3>(0, 0);
        translation_mean += g.fixed_view::<3, 1>(0, 3) / n;
    }
    let mut grid_to_world = na::Matrix4::identity();
    grid_to_world
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&project_to_so3(&rotation_sum)?);
    grid_to_world
        .fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&translation_mean);

    let squared: Vec<f64> = grids
        .iter()
        .map(|g| (g.fixed_view::<3, 1>(0, 3) - translation_mean).norm_squared())
        .collect();
    let residual_rms = rms_of_squared(&squared);
    debug!(
        "hand-eye from {} pairs, grid residual {}",
        pairs.len(),
        residual_rms
    );
    Ok(HandEyeResult {
        camera_to_marker,
        grid_to_world,
        residual_rms,
        pairs_used: pairs.len(),
    })
}
