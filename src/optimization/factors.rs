use nalgebra as na;
use tiny_solver::factors::Factor;

use crate::error::{Result, TrackingError};
use crate::util::rodrigues_rotation;

/// Which optional blocks follow the six rigid parameters of an ultrasound
/// pin parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinParameterLayout {
    pub number_of_parameters: usize,
    /// Percentage corrections of the pixel scale live at 6 and 7.
    pub optimise_scaling: bool,
    /// Start of the three invariant point coordinates, if optimised.
    pub invariant_point_index: Option<usize>,
}

impl PinParameterLayout {
    pub fn new(number_of_parameters: usize) -> Result<PinParameterLayout> {
        let (optimise_scaling, invariant_point_index) = match number_of_parameters {
            6 => (false, None),
            8 => (true, None),
            9 => (false, Some(6)),
            11 => (true, Some(8)),
            n => return Err(TrackingError::UnsupportedParameterCount(n)),
        };
        Ok(PinParameterLayout {
            number_of_parameters,
            optimise_scaling,
            invariant_point_index,
        })
    }
}

fn rigid_parts<T: na::RealField>(p: &na::DVector<T>) -> (na::Matrix3<T>, na::Vector3<T>) {
    let r = rodrigues_rotation(&na::Vector3::new(p[0].clone(), p[1].clone(), p[2].clone()));
    let t = na::Vector3::new(p[3].clone(), p[4].clone(), p[5].clone());
    (r, t)
}

fn transform_by<T: na::RealField>(m: &na::Matrix4<f64>, v: &na::Vector3<T>) -> na::Vector3<T> {
    let m: na::Matrix4<T> = m.map(|e| na::convert::<f64, T>(e));
    m.fixed_view::<3, 3>(0, 0).into_owned() * v + m.fixed_view::<3, 1>(0, 3).into_owned()
}

/// World position of one pin observation minus the invariant point.
///
/// `tracker * rigid * scaling * point`, where scaling is
/// `diag(sx, sy, 1)` and `rigid` comes from the first six parameters.
pub fn pin_residual<T: na::RealField>(
    p: &na::DVector<T>,
    layout: &PinParameterLayout,
    tracker: &na::Matrix4<f64>,
    point: &na::Point3<f64>,
    millimetres_per_pixel: [f64; 2],
    invariant_point: [f64; 3],
) -> na::Vector3<T> {
    let c = |v: f64| na::convert::<f64, T>(v);
    let (r, t) = rigid_parts(p);
    let (sx, sy) = if layout.optimise_scaling {
        let hundred = c(100.0);
        (
            c(millimetres_per_pixel[0]) * (hundred.clone() + p[6].clone()) / hundred.clone(),
            c(millimetres_per_pixel[1]) * (hundred.clone() + p[7].clone()) / hundred,
        )
    } else {
        (c(millimetres_per_pixel[0]), c(millimetres_per_pixel[1]))
    };
    let scaled = na::Vector3::new(sx * c(point.x), sy * c(point.y), c(point.z));
    let world = transform_by(tracker, &(r * scaled + t));
    let invariant = match layout.invariant_point_index {
        Some(i) => na::Vector3::new(p[i].clone(), p[i + 1].clone(), p[i + 2].clone()),
        None => na::Vector3::new(
            c(invariant_point[0]),
            c(invariant_point[1]),
            c(invariant_point[2]),
        ),
    };
    world - invariant
}

/// One tracked pin image as a solver residual block of size 3.
#[derive(Debug, Clone)]
pub struct UltrasoundPinFactor {
    pub layout: PinParameterLayout,
    pub tracker: na::Matrix4<f64>,
    pub point: na::Point3<f64>,
    pub millimetres_per_pixel: [f64; 2],
    pub invariant_point: [f64; 3],
}

impl<T: na::RealField> Factor<T> for UltrasoundPinFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        let r = pin_residual(
            &params[0],
            &self.layout,
            &self.tracker,
            &self.point,
            self.millimetres_per_pixel,
            self.invariant_point,
        );
        na::DVector::from_column_slice(r.as_slice())
    }
}

/// `R * diag(sx, sy, 1) * image + t - sensor` for parameters
/// `[rx, ry, rz, tx, ty, tz, sx, sy]`.
pub fn pointer_residual<T: na::RealField>(
    p: &na::DVector<T>,
    image: &na::Point3<f64>,
    sensor: &na::Point3<f64>,
) -> na::Vector3<T> {
    let c = |v: f64| na::convert::<f64, T>(v);
    let (r, t) = rigid_parts(p);
    let scaled = na::Vector3::new(
        p[6].clone() * c(image.x),
        p[7].clone() * c(image.y),
        c(image.z),
    );
    r * scaled + t - na::Vector3::new(c(sensor.x), c(sensor.y), c(sensor.z))
}

#[derive(Debug, Clone)]
pub struct PointerCalibrationFactor {
    pub image: na::Point3<f64>,
    pub sensor: na::Point3<f64>,
}

impl<T: na::RealField> Factor<T> for PointerCalibrationFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        let r = pointer_residual(&params[0], &self.image, &self.sensor);
        na::DVector::from_column_slice(r.as_slice())
    }
}

/// `tracker * camera_to_tracker * lens - world` for parameters
/// `[rx, ry, rz, tx, ty, tz, wx, wy, wz]`, the camera to tracker transform
/// followed by the world point.
pub fn reconstruction_residual<T: na::RealField>(
    p: &na::DVector<T>,
    tracker: &na::Matrix4<f64>,
    lens: &na::Point3<f64>,
) -> na::Vector3<T> {
    let c = |v: f64| na::convert::<f64, T>(v);
    let (r, t) = rigid_parts(p);
    let in_tracker = r * na::Vector3::new(c(lens.x), c(lens.y), c(lens.z)) + t;
    transform_by(tracker, &in_tracker)
        - na::Vector3::new(p[6].clone(), p[7].clone(), p[8].clone())
}

/// A point fixed in world space seen from the tracked camera at one frame.
#[derive(Debug, Clone)]
pub struct LensPointFactor {
    pub tracker: na::Matrix4<f64>,
    pub lens: na::Point3<f64>,
}

impl<T: na::RealField> Factor<T> for LensPointFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        let r = reconstruction_residual(&params[0], &self.tracker, &self.lens);
        na::DVector::from_column_slice(r.as_slice())
    }
}
