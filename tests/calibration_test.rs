use nalgebra as na;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use video_tracker_calibration::TrackingError;
use video_tracker_calibration::calibration::{
    PivotCalibrationConfig, SCALE_DERIVATIVE_STEP, UltrasoundPinCalibration, UltrasoundPinConfig,
    UltrasoundPinCostFunction, calibrate_using_files_in_directory, handeye_calibration,
    pivot_calibration, pivot_rerun_statistics, pointer_based_calibration,
};
use video_tracker_calibration::io::save_matrix4x4_to_file;
use video_tracker_calibration::synthetic::{pivot_poses, pose, random_rotation};
use video_tracker_calibration::types::RvecTvec;
use video_tracker_calibration::util::{is_rigid, make_scaling_matrix, transform_point};

fn pivot_data() -> (Vec<na::Matrix4<f64>>, na::Point3<f64>, na::Vector3<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let pivot = na::Point3::new(15.0, -40.0, -900.0);
    let offset = na::Vector3::new(1.5, -2.0, -160.0);
    (pivot_poses(&mut rng, 100, &pivot, &offset, 0.5), pivot, offset)
}

#[test]
fn test_pivot_calibration_recovers_offset() {
    let (matrices, pivot, offset) = pivot_data();
    let result = pivot_calibration(&matrices).unwrap();
    assert!((result.offset - offset).norm() < 1e-6);
    assert!((result.pivot_point - pivot).norm() < 1e-6);
    assert!(result.residual_rms < 1e-6);
    assert_eq!(result.sample_count, 100);
    assert_eq!(
        result.transform,
        na::Matrix4::new_translation(&result.offset)
    );
}

#[test]
fn test_pivot_calibration_rejects_too_few_poses() {
    let (matrices, _, _) = pivot_data();
    assert!(matches!(
        pivot_calibration(&[]),
        Err(TrackingError::EmptyInput(_))
    ));
    assert!(matches!(
        pivot_calibration(&matrices[..2]),
        Err(TrackingError::Degenerate(_))
    ));
}

#[test]
fn test_pivot_calibration_without_rotation_is_degenerate() {
    let still = vec![na::Matrix4::new_translation(&na::Vector3::new(1.0, 2.0, 3.0)); 10];
    assert!(pivot_calibration(&still).is_err());
}

#[test]
fn test_pivot_reruns_are_seeded() {
    let (matrices, _, offset) = pivot_data();
    let config = PivotCalibrationConfig {
        percentage: 50.0,
        reruns: 20,
        seed: 9,
    };
    let first = pivot_rerun_statistics(&matrices, &config).unwrap();
    let second = pivot_rerun_statistics(&matrices, &config).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.subset_size, 50);
    assert_eq!(first.reruns, 20);
    assert!((first.offset_mean - offset).norm() < 1e-6);
    assert!(first.offset_std_dev.norm() < 1e-6);

    let bad = PivotCalibrationConfig {
        percentage: 0.0,
        ..config.clone()
    };
    assert!(pivot_rerun_statistics(&matrices, &bad).is_err());
    let no_reruns = PivotCalibrationConfig { reruns: 0, ..config };
    assert!(matches!(
        pivot_rerun_statistics(&matrices, &no_reruns),
        Err(TrackingError::EmptyInput(_))
    ));
}

#[test]
fn test_pivot_calibration_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (matrices, pivot, offset) = pivot_data();
    for (i, m) in matrices.iter().enumerate() {
        save_matrix4x4_to_file(dir.path().join(format!("pose_{:03}.txt", i)), m).unwrap();
    }
    std::fs::write(dir.path().join("broken.txt"), "1 2 3").unwrap();

    let (result, statistics) =
        calibrate_using_files_in_directory(dir.path(), &PivotCalibrationConfig::default())
            .unwrap();
    assert_eq!(result.sample_count, matrices.len());
    assert!((result.offset - offset).norm() < 1e-6);
    assert!((result.pivot_point - pivot).norm() < 1e-6);
    assert!(statistics.is_none());

    let config = PivotCalibrationConfig {
        percentage: 30.0,
        reruns: 5,
        seed: 1,
    };
    let (_, statistics) = calibrate_using_files_in_directory(dir.path(), &config).unwrap();
    assert_eq!(statistics.unwrap().subset_size, 30);
}

#[test]
fn test_pivot_directory_rejects_percentage_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let (matrices, _, _) = pivot_data();
    for (i, m) in matrices.iter().take(10).enumerate() {
        save_matrix4x4_to_file(dir.path().join(format!("pose_{:03}.txt", i)), m).unwrap();
    }
    for percentage in [250.0, 0.0, -5.0, f64::NAN] {
        let config = PivotCalibrationConfig {
            percentage,
            ..Default::default()
        };
        assert!(matches!(
            calibrate_using_files_in_directory(dir.path(), &config),
            Err(TrackingError::Degenerate(_))
        ));
    }
    let full = PivotCalibrationConfig {
        percentage: 100.0,
        ..Default::default()
    };
    let (_, statistics) = calibrate_using_files_in_directory(dir.path(), &full).unwrap();
    assert!(statistics.is_none());
}

fn handeye_data(
    count: usize,
) -> (
    Vec<na::Matrix4<f64>>,
    Vec<na::Matrix4<f64>>,
    na::Matrix4<f64>,
    na::Matrix4<f64>,
) {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let camera_to_marker = pose(
        &random_rotation(&mut rng, 0.6),
        &na::Vector3::new(20.0, -35.0, 60.0),
    );
    let grid_to_world = pose(
        &random_rotation(&mut rng, 0.3),
        &na::Vector3::new(50.0, 100.0, -1200.0),
    );
    let mut trackers = Vec::with_capacity(count);
    let mut extrinsics = Vec::with_capacity(count);
    for _ in 0..count {
        let t = na::Vector3::new(
            rng.random_range(-100.0..100.0),
            rng.random_range(-100.0..100.0),
            rng.random_range(-1500.0..-1000.0),
        );
        let tracker = pose(&random_rotation(&mut rng, 0.5), &t);
        // grid seen by the camera mounted on the marker
        let extrinsic = (tracker * camera_to_marker).try_inverse().unwrap() * grid_to_world;
        trackers.push(tracker);
        extrinsics.push(extrinsic);
    }
    (trackers, extrinsics, camera_to_marker, grid_to_world)
}

#[test]
fn test_handeye_recovers_camera_to_marker() {
    let (trackers, extrinsics, camera_to_marker, grid_to_world) = handeye_data(12);
    let result = handeye_calibration(&trackers, &extrinsics).unwrap();
    assert!((result.camera_to_marker - camera_to_marker).abs().max() < 1e-6);
    assert!((result.grid_to_world - grid_to_world).abs().max() < 1e-6);
    assert!(result.residual_rms < 1e-6);
    assert!(result.pairs_used >= 2);
    assert!(is_rigid(&result.camera_to_marker, 1e-9));
}

#[test]
fn test_handeye_input_errors() {
    let (trackers, extrinsics, _, _) = handeye_data(5);
    assert!(matches!(
        handeye_calibration(&[], &[]),
        Err(TrackingError::EmptyInput(_))
    ));
    assert!(matches!(
        handeye_calibration(&trackers, &extrinsics[..4]),
        Err(TrackingError::SizeMismatch { left: 5, right: 4, .. })
    ));
    assert!(matches!(
        handeye_calibration(&trackers[..2], &extrinsics[..2]),
        Err(TrackingError::Degenerate(_))
    ));
    let still = vec![trackers[0]; 5];
    let same = vec![extrinsics[0]; 5];
    assert!(matches!(
        handeye_calibration(&still, &same),
        Err(TrackingError::Degenerate(_))
    ));
}

struct PinData {
    matrices: Vec<na::Matrix4<f64>>,
    points: Vec<na::Point3<f64>>,
    rigid: RvecTvec,
    millimetres_per_pixel: [f64; 2],
    invariant_point: na::Point3<f64>,
}

/// Pin images of a fixed point seen by a probe with known calibration.
fn pin_data(count: usize, millimetres_per_pixel: [f64; 2]) -> PinData {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let rigid = RvecTvec {
        rvec: [0.1, -0.2, 0.3],
        tvec: [10.0, 20.0, 30.0],
    };
    let invariant_point = na::Point3::new(100.0, -50.0, 300.0);
    let image_to_marker = rigid.to_matrix4()
        * make_scaling_matrix(millimetres_per_pixel[0], millimetres_per_pixel[1]);
    let mut matrices = Vec::with_capacity(count);
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let pixel = na::Point3::new(
            rng.random_range(0.0..400.0),
            rng.random_range(0.0..300.0),
            0.0,
        );
        let in_marker = transform_point(&image_to_marker, &pixel);
        let r = random_rotation(&mut rng, 0.8);
        let tracker = pose(&r, &(invariant_point.coords - r * in_marker.coords));
        matrices.push(tracker);
        points.push(pixel);
    }
    PinData {
        matrices,
        points,
        rigid,
        millimetres_per_pixel,
        invariant_point,
    }
}

#[test]
fn test_pin_cost_function_input_errors() {
    let data = pin_data(10, [0.2, 0.25]);
    assert!(matches!(
        UltrasoundPinCostFunction::new(&data.matrices, &data.points, 7),
        Err(TrackingError::UnsupportedParameterCount(7))
    ));
    let cost = UltrasoundPinCostFunction::new(&data.matrices, &data.points, 6).unwrap();
    assert!(matches!(
        cost.get_value(&[0.0; 5]),
        Err(TrackingError::ParameterCountMismatch { expected: 6, got: 5 })
    ));
    let empty = UltrasoundPinCostFunction::new(&[], &data.points, 6).unwrap();
    assert!(matches!(
        empty.get_value(&[0.0; 6]),
        Err(TrackingError::EmptyInput("matrices"))
    ));
    let no_points = UltrasoundPinCostFunction::new(&data.matrices, &[], 6).unwrap();
    assert!(matches!(
        no_points.get_value(&[0.0; 6]),
        Err(TrackingError::EmptyInput("points"))
    ));
    let short = UltrasoundPinCostFunction::new(&data.matrices, &data.points[..9], 6).unwrap();
    assert!(matches!(
        short.get_value(&[0.0; 6]),
        Err(TrackingError::SizeMismatch { left: 10, right: 9, .. })
    ));
}

#[test]
fn test_pin_cost_function_at_ground_truth() {
    let data = pin_data(20, [0.2, 0.25]);
    let mut cost = UltrasoundPinCostFunction::new(&data.matrices, &data.points, 6).unwrap();
    cost.set_millimetres_per_pixel(data.millimetres_per_pixel);
    cost.set_invariant_point([
        data.invariant_point.x,
        data.invariant_point.y,
        data.invariant_point.z,
    ]);
    assert_eq!(cost.number_of_parameters(), 6);
    assert_eq!(cost.number_of_values(), 20);

    let truth = data.rigid.to_params();
    let values = cost.get_value(&truth).unwrap();
    assert_eq!(values.len(), 20);
    assert!(values.iter().all(|v| *v < 1e-16));
    assert!(cost.get_residual(&values) < 1e-8);

    let mut off = truth.clone();
    off[3] += 1.0;
    let values = cost.get_value(&off).unwrap();
    assert!(cost.get_residual(&values) > 0.5);

    let derivative = cost.get_derivative(&off).unwrap();
    assert_eq!(derivative.shape(), (6, 20));
    assert!(derivative.row(3).iter().any(|d| d.abs() > 0.1));

    let rigid = cost.get_calibration_transformation(&truth).unwrap();
    assert!((rigid - data.rigid.to_matrix4()).abs().max() < 1e-12);
    assert_eq!(cost.get_millimetres_per_pixel(&truth), [0.2, 0.25]);
}

#[test]
fn test_pin_calibration_six_parameters() {
    let data = pin_data(30, [0.2, 0.25]);
    let mut initial = data.rigid.to_params();
    initial[0] += 0.05;
    initial[2] -= 0.04;
    initial[4] += 5.0;
    let config = UltrasoundPinConfig {
        number_of_parameters: 6,
        millimetres_per_pixel: data.millimetres_per_pixel,
        invariant_point: [
            data.invariant_point.x,
            data.invariant_point.y,
            data.invariant_point.z,
        ],
        initial_guess: initial,
        max_iterations: 200,
    };
    let result = UltrasoundPinCalibration::new(config)
        .calibrate(&data.matrices, &data.points)
        .unwrap();
    assert!(result.residual_rms < 1e-5);
    assert!((result.rigid - data.rigid.to_matrix4()).abs().max() < 1e-5);
    assert_eq!(result.millimetres_per_pixel, data.millimetres_per_pixel);
    assert_eq!(result.invariant_point, data.invariant_point);
    assert!(
        (result.calibration()
            - data.rigid.to_matrix4() * make_scaling_matrix(0.2, 0.25))
        .abs()
        .max()
            < 1e-5
    );
}

#[test]
fn test_pin_calibration_nine_parameters() {
    let data = pin_data(40, [0.2, 0.25]);
    let mut initial = data.rigid.to_params();
    initial[1] += 0.03;
    initial[5] -= 3.0;
    initial.extend([
        data.invariant_point.x + 4.0,
        data.invariant_point.y - 2.0,
        data.invariant_point.z + 3.0,
    ]);
    let config = UltrasoundPinConfig {
        number_of_parameters: 9,
        millimetres_per_pixel: data.millimetres_per_pixel,
        initial_guess: initial,
        max_iterations: 200,
        ..Default::default()
    };
    let result = UltrasoundPinCalibration::new(config)
        .calibrate(&data.matrices, &data.points)
        .unwrap();
    assert!(result.residual_rms < 1e-5);
    assert!((result.invariant_point - data.invariant_point).norm() < 1e-4);
    assert!((result.rigid - data.rigid.to_matrix4()).abs().max() < 1e-5);
    assert_eq!(result.parameters.len(), 9);
}

#[test]
fn test_pin_calibration_optimises_scale() {
    // recorded at 0.21 x 0.24 mm per pixel, configured as 0.2 x 0.25
    let data = pin_data(40, [0.21, 0.24]);
    let mut initial = data.rigid.to_params();
    initial[0] -= 0.02;
    initial[3] += 2.0;
    initial.extend([0.0, 0.0]);
    initial.extend([
        data.invariant_point.x,
        data.invariant_point.y,
        data.invariant_point.z,
    ]);
    let config = UltrasoundPinConfig {
        number_of_parameters: 11,
        millimetres_per_pixel: [0.2, 0.25],
        initial_guess: initial,
        max_iterations: 200,
        ..Default::default()
    };
    let result = UltrasoundPinCalibration::new(config)
        .calibrate(&data.matrices, &data.points)
        .unwrap();
    assert!(result.residual_rms < 1e-5);
    assert!((result.millimetres_per_pixel[0] - 0.21).abs() < 1e-6);
    assert!((result.millimetres_per_pixel[1] - 0.24).abs() < 1e-6);
    assert!((result.parameters[6] - 5.0).abs() < 1e-3);
    assert!((result.parameters[7] + 4.0).abs() < 1e-3);
}

#[test]
fn test_pin_calibration_eight_parameters() {
    // scale optimised, invariant point held at its configured value
    let data = pin_data(40, [0.21, 0.24]);
    let mut initial = data.rigid.to_params();
    initial[2] += 0.03;
    initial[4] -= 2.0;
    initial.extend([0.0, 0.0]);
    let config = UltrasoundPinConfig {
        number_of_parameters: 8,
        millimetres_per_pixel: [0.2, 0.25],
        invariant_point: [
            data.invariant_point.x,
            data.invariant_point.y,
            data.invariant_point.z,
        ],
        initial_guess: initial,
        max_iterations: 200,
    };
    let result = UltrasoundPinCalibration::new(config)
        .calibrate(&data.matrices, &data.points)
        .unwrap();
    assert_eq!(result.parameters.len(), 8);
    assert!(result.residual_rms < 1e-5);
    assert!((result.millimetres_per_pixel[0] - 0.21).abs() < 1e-6);
    assert!((result.millimetres_per_pixel[1] - 0.24).abs() < 1e-6);
    assert!((result.rigid - data.rigid.to_matrix4()).abs().max() < 1e-5);
    assert_eq!(result.invariant_point, data.invariant_point);
}

#[test]
fn test_pin_derivative_steps_for_eight_parameters() {
    let data = pin_data(15, [0.21, 0.24]);
    let mut cost = UltrasoundPinCostFunction::new(&data.matrices, &data.points, 8).unwrap();
    cost.set_millimetres_per_pixel([0.2, 0.25]);
    cost.set_invariant_point([
        data.invariant_point.x,
        data.invariant_point.y,
        data.invariant_point.z,
    ]);
    let layout = cost.layout();
    assert!(layout.optimise_scaling);
    assert_eq!(layout.invariant_point_index, None);

    let mut parameters = data.rigid.to_params();
    parameters.extend([1.0, -2.0]);
    let derivative = cost.get_derivative(&parameters).unwrap();
    assert_eq!(derivative.shape(), (8, 15));

    let current = cost.get_value(&parameters).unwrap();
    let forward_difference = |index: usize, step: f64| -> Vec<f64> {
        let mut forward = parameters.clone();
        forward[index] += step;
        cost.get_value(&forward)
            .unwrap()
            .iter()
            .zip(&current)
            .map(|(f, c)| (f - c) / step)
            .collect()
    };
    for index in [6, 7] {
        let expected = forward_difference(index, SCALE_DERIVATIVE_STEP);
        assert_eq!(derivative.row(index).iter().copied().collect::<Vec<_>>(), expected);
        assert_ne!(expected, forward_difference(index, 1.0));
    }
    for index in [0, 3] {
        let expected = forward_difference(index, 1.0);
        assert_eq!(derivative.row(index).iter().copied().collect::<Vec<_>>(), expected);
    }
}

#[test]
fn test_pin_calibration_rejects_bad_initial_guess() {
    let data = pin_data(10, [0.2, 0.25]);
    let config = UltrasoundPinConfig {
        number_of_parameters: 9,
        initial_guess: vec![0.0; 6],
        ..Default::default()
    };
    assert!(matches!(
        UltrasoundPinCalibration::new(config).calibrate(&data.matrices, &data.points),
        Err(TrackingError::ParameterCountMismatch { expected: 9, got: 6 })
    ));
}

#[test]
fn test_pointer_based_calibration() {
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let rigid = pose(
        &random_rotation(&mut rng, 0.7),
        &na::Vector3::new(-12.0, 40.0, 8.0),
    );
    let scaling = make_scaling_matrix(0.18, 0.22);
    let truth = rigid * scaling;
    let image_points: Vec<na::Point3<f64>> = (0..25)
        .map(|_| {
            na::Point3::new(
                rng.random_range(0.0..640.0),
                rng.random_range(0.0..480.0),
                0.0,
            )
        })
        .collect();
    let sensor_points: Vec<na::Point3<f64>> = image_points
        .iter()
        .map(|p| transform_point(&truth, p))
        .collect();

    let result = pointer_based_calibration(&image_points, &sensor_points).unwrap();
    assert!(result.residual_rms < 1e-6);
    assert!((result.calibration - truth).abs().max() < 1e-6);
    assert!((result.rigid - rigid).abs().max() < 1e-6);
    assert!((result.scaling[(0, 0)] - 0.18).abs() < 1e-9);
    assert!((result.scaling[(1, 1)] - 0.22).abs() < 1e-9);
}

#[test]
fn test_pointer_based_calibration_input_errors() {
    let p = vec![na::Point3::new(1.0, 2.0, 0.0); 4];
    assert!(matches!(
        pointer_based_calibration(&[], &p),
        Err(TrackingError::EmptyInput(_))
    ));
    assert!(matches!(
        pointer_based_calibration(&p, &p[..3]),
        Err(TrackingError::SizeMismatch { .. })
    ));
    assert!(matches!(
        pointer_based_calibration(&p[..2], &p[..2]),
        Err(TrackingError::Degenerate(_))
    ));
    // identical image points cannot fix the scale
    assert!(pointer_based_calibration(&p, &p).is_err());
}
