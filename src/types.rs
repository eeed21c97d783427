use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Nanosecond clock value as recorded in tracking file names and frame maps.
pub type TimeStamp = u64;

/// Signed difference between two time stamps, `query - matched`.
pub type TimeDelta = i64;

/// Signed difference `a - b` without overflowing on far-apart stamps.
pub fn time_delta(a: TimeStamp, b: TimeStamp) -> TimeDelta {
    if a >= b {
        (a - b).min(i64::MAX as u64) as i64
    } else {
        -((b - a).min(i64::MAX as u64) as i64)
    }
}

/// Rodrigues rotation vector and translation, the 6 rigid-body parameters
/// shared by every calibration in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RvecTvec {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl RvecTvec {
    pub fn new(rvec: &na::Vector3<f64>, tvec: &na::Vector3<f64>) -> RvecTvec {
        RvecTvec {
            rvec: [rvec.x, rvec.y, rvec.z],
            tvec: [tvec.x, tvec.y, tvec.z],
        }
    }

    /// Takes the first six entries of a parameter vector: rx, ry, rz, tx, ty, tz.
    pub fn from_params(params: &[f64]) -> RvecTvec {
        RvecTvec {
            rvec: [params[0], params[1], params[2]],
            tvec: [params[3], params[4], params[5]],
        }
    }

    pub fn na_rvec(&self) -> na::Vector3<f64> {
        na::Vector3::from(self.rvec)
    }

    pub fn na_tvec(&self) -> na::Vector3<f64> {
        na::Vector3::from(self.tvec)
    }

    pub fn to_na_isometry3(&self) -> na::Isometry3<f64> {
        na::Isometry3::new(self.na_tvec(), self.na_rvec())
    }

    pub fn to_matrix4(&self) -> na::Matrix4<f64> {
        self.to_na_isometry3().to_homogeneous()
    }

    pub fn to_params(&self) -> Vec<f64> {
        self.rvec.iter().chain(self.tvec.iter()).copied().collect()
    }
}

pub trait ToRvecTvec {
    fn to_rvec_tvec(&self) -> RvecTvec;
}

impl ToRvecTvec for na::Isometry3<f64> {
    fn to_rvec_tvec(&self) -> RvecTvec {
        RvecTvec::new(&self.rotation.scaled_axis(), &self.translation.vector)
    }
}

impl ToRvecTvec for na::Matrix4<f64> {
    fn to_rvec_tvec(&self) -> RvecTvec {
        crate::util::matrix_to_isometry(self).to_rvec_tvec()
    }
}
