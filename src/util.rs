use nalgebra as na;

/// Linearly blends translation and slerps rotation between two poses.
///
/// A proportion of exactly 0 or 1 returns the corresponding input verbatim.
pub fn interpolate_transformation_matrix(
    before: &na::Matrix4<f64>,
    after: &na::Matrix4<f64>,
    proportion: f64,
) -> na::Matrix4<f64> {
    if proportion <= 0.0 {
        return *before;
    }
    if proportion >= 1.0 {
        return *after;
    }
    let q0 = rotation_of(before);
    let q1 = rotation_of(after);
    let q = q0.try_slerp(&q1, proportion, 1.0e-12).unwrap_or_else(|| {
        log::debug!("slerp ill-defined, falling back to nearest rotation");
        if proportion < 0.5 { q0 } else { q1 }
    });
    let t0 = before.fixed_view::<3, 1>(0, 3).into_owned();
    let t1 = after.fixed_view::<3, 1>(0, 3).into_owned();
    let t = t0 * (1.0 - proportion) + t1 * proportion;

    let mut interpolated = na::Matrix4::identity();
    interpolated
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(q.to_rotation_matrix().matrix());
    interpolated.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
    interpolated
}

/// Closest unit quaternion to the upper-left 3x3 block.
pub fn rotation_of(m: &na::Matrix4<f64>) -> na::UnitQuaternion<f64> {
    let r = m.fixed_view::<3, 3>(0, 0).into_owned();
    na::UnitQuaternion::from_rotation_matrix(&na::Rotation3::from_matrix(&r))
}

pub fn matrix_to_isometry(m: &na::Matrix4<f64>) -> na::Isometry3<f64> {
    let t = na::Translation3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    na::Isometry3::from_parts(t, rotation_of(m))
}

/// Converts between left and right handed tracker frames by conjugating
/// with `diag(1, 1, -1, 1)`. Applying it twice is a no-op.
pub fn flip_matrix(m: &na::Matrix4<f64>) -> na::Matrix4<f64> {
    let flip = na::Matrix4::from_diagonal(&na::Vector4::new(1.0, 1.0, -1.0, 1.0));
    flip * m * flip
}

/// Rotation matrix of a Rodrigues vector, generic so solver factors can
/// differentiate through it.
///
/// Falls back to the first order expansion near zero, which keeps the
/// derivative exact at the identity.
pub fn rodrigues_rotation<T: na::RealField>(r: &na::Vector3<T>) -> na::Matrix3<T> {
    let theta2 = r.norm_squared();
    let skew = na::Matrix3::new(
        T::zero(),
        -r.z.clone(),
        r.y.clone(),
        r.z.clone(),
        T::zero(),
        -r.x.clone(),
        -r.y.clone(),
        r.x.clone(),
        T::zero(),
    );
    let eps: T = na::convert(1.0e-16);
    if theta2 < eps {
        return na::Matrix3::identity() + skew;
    }
    let theta = theta2.clone().sqrt();
    let a = theta.clone().sin() / theta.clone();
    let b = (T::one() - theta.cos()) / theta2;
    na::Matrix3::identity() + skew.clone() * a + (skew.clone() * skew) * b
}

/// 4x4 rigid transform from Rodrigues rotation and translation.
pub fn construct_rodrigues_transformation(
    rx: f64,
    ry: f64,
    rz: f64,
    tx: f64,
    ty: f64,
    tz: f64,
) -> na::Matrix4<f64> {
    let mut m = na::Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&rodrigues_rotation(&na::Vector3::new(rx, ry, rz)));
    m[(0, 3)] = tx;
    m[(1, 3)] = ty;
    m[(2, 3)] = tz;
    m
}

/// Anisotropic in-plane scaling, z left at 1.
pub fn make_scaling_matrix(sx: f64, sy: f64) -> na::Matrix4<f64> {
    na::Matrix4::from_diagonal(&na::Vector4::new(sx, sy, 1.0, 1.0))
}

pub fn make_translation_matrix(t: &na::Vector3<f64>) -> na::Matrix4<f64> {
    na::Matrix4::new_translation(t)
}

/// True when the rotation block is orthonormal with determinant +1 and the
/// bottom row is `[0 0 0 1]`, all within `tolerance`.
pub fn is_rigid(m: &na::Matrix4<f64>, tolerance: f64) -> bool {
    let r = m.fixed_view::<3, 3>(0, 0).into_owned();
    let orthonormal = (r.transpose() * r - na::Matrix3::identity()).abs().max() < tolerance;
    let det = (r.determinant() - 1.0).abs() < tolerance;
    let bottom = m[(3, 0)].abs() < tolerance
        && m[(3, 1)].abs() < tolerance
        && m[(3, 2)].abs() < tolerance
        && (m[(3, 3)] - 1.0).abs() < tolerance;
    orthonormal && det && bottom
}

pub fn transform_point(m: &na::Matrix4<f64>, p: &na::Point3<f64>) -> na::Point3<f64> {
    let h = m * p.to_homogeneous();
    na::Point3::new(h.x, h.y, h.z)
}

/// Square root of the mean of already squared residuals.
pub fn rms_of_squared(squared: &[f64]) -> f64 {
    if squared.is_empty() {
        return 0.0;
    }
    (squared.iter().sum::<f64>() / squared.len() as f64).sqrt()
}

/// Mean and population standard deviation.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}
