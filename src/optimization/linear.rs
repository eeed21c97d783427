use faer::linalg::solvers::SolveLstsqCore;
use nalgebra as na;

use crate::error::{Result, TrackingError};

/// Smallest to largest singular value ratio below which a system is
/// treated as rank deficient.
pub const RANK_TOLERANCE: f64 = 1.0e-10;

/// Solves the overdetermined system `a x = b` in the least squares sense
/// with a QR factorisation.
///
/// Fails when there are fewer equations than unknowns or `a` is rank
/// deficient.
pub fn solve_least_squares(a: &na::DMatrix<f64>, b: &na::DVector<f64>) -> Result<na::DVector<f64>> {
    let (rows, cols) = a.shape();
    if rows != b.len() {
        return Err(TrackingError::SizeMismatch {
            what: "equations and right hand side",
            left: rows,
            right: b.len(),
        });
    }
    if rows < cols {
        return Err(TrackingError::Degenerate(format!(
            "{} equations for {} unknowns",
            rows, cols
        )));
    }
    let singular_values = a.singular_values();
    let max = singular_values.max();
    let min = singular_values.min();
    if max <= 0.0 || min / max < RANK_TOLERANCE {
        return Err(TrackingError::Degenerate(format!(
            "rank deficient {}x{} system, singular values {:.3e}..{:.3e}",
            rows, cols, min, max
        )));
    }

    let fa: faer::Mat<f64> = faer::Mat::from_fn(rows, cols, |r, c| a[(r, c)]);
    let mut x: faer::Mat<f64> = faer::Mat::from_fn(rows, 1, |r, _| b[r]);
    fa.qr()
        .solve_lstsq_in_place_with_conj(faer::Conj::No, x.as_mut());
    Ok(na::DVector::from_fn(cols, |r, _| *x.get(r, 0)))
}

/// Closest rotation to `m` in the Frobenius sense.
pub fn project_to_so3(m: &na::Matrix3<f64>) -> Result<na::Matrix3<f64>> {
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(TrackingError::SolverFailed(
            "svd did not converge".to_string(),
        ));
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * v_t;
    }
    Ok(r)
}
