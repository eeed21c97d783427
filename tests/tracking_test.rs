use nalgebra as na;
use video_tracker_calibration::synthetic::pose;
use video_tracker_calibration::util::{interpolate_transformation_matrix, rotation_of};
use video_tracker_calibration::{TrackingAndTimeStampsContainer, TrackingError};

fn pose_about_z(angle: f64, x: f64) -> na::Matrix4<f64> {
    pose(
        &na::Rotation3::from_axis_angle(&na::Vector3::z_axis(), angle),
        &na::Vector3::new(x, 2.0 * x, -x),
    )
}

fn sample_container() -> TrackingAndTimeStampsContainer {
    [
        (1000, pose_about_z(0.0, 0.0)),
        (2000, pose_about_z(0.2, 10.0)),
        (3000, pose_about_z(0.4, 20.0)),
    ]
    .into_iter()
    .collect()
}

#[test]
fn test_interpolate_at_stored_stamp_is_exact() {
    let c = sample_container();
    for i in 0..c.len() {
        let t = c.get_time_stamp(i).unwrap();
        let lookup = c.interpolate_matrix(t).unwrap();
        assert_eq!(lookup.matrix, c.get_matrix(i).unwrap());
        assert_eq!(lookup.timing_error, 0);
        assert!(lookup.in_bounds);
    }
}

#[test]
fn test_interpolate_between_samples() {
    let c = sample_container();
    let lookup = c.interpolate_matrix(1250).unwrap();
    assert!(lookup.in_bounds);
    assert_eq!(lookup.timing_error, 250);
    assert!((lookup.matrix[(0, 3)] - 2.5).abs() < 1e-12);
    assert!((lookup.matrix[(1, 3)] - 5.0).abs() < 1e-12);
    let angle = rotation_of(&lookup.matrix).angle();
    assert!((angle - 0.05).abs() < 1e-12);
}

#[test]
fn test_out_of_bounds_returns_boundary() {
    let c = sample_container();
    let early = c.interpolate_matrix(10).unwrap();
    assert!(!early.in_bounds);
    assert_eq!(early.matrix, c.get_matrix(0).unwrap());
    assert_eq!(early.timing_error, -990);

    let late = c.interpolate_matrix(9000).unwrap();
    assert!(!late.in_bounds);
    assert_eq!(late.matrix, c.get_matrix(2).unwrap());
    assert_eq!(late.timing_error, 6000);

    let nearest = c.get_nearest_matrix(9000).unwrap();
    assert!(!nearest.in_bounds);
    assert_eq!(nearest.matrix, c.get_matrix(2).unwrap());
}

#[test]
fn test_nearest_matrix() {
    let c = sample_container();
    let lookup = c.get_nearest_matrix(2400).unwrap();
    assert!(lookup.in_bounds);
    assert_eq!(lookup.matrix, c.get_matrix(1).unwrap());
    assert_eq!(lookup.timing_error, 400);

    // equidistant goes to the earlier sample
    let lookup = c.get_nearest_matrix(2500).unwrap();
    assert_eq!(lookup.matrix, c.get_matrix(1).unwrap());
}

#[test]
fn test_out_of_order_insert_keeps_alignment() {
    let mut c = TrackingAndTimeStampsContainer::new();
    c.insert(3000, pose_about_z(0.0, 3.0));
    c.insert(1000, pose_about_z(0.0, 1.0));
    c.insert(2000, pose_about_z(0.0, 2.0));
    for (i, (t, m)) in c.iter().enumerate() {
        assert_eq!(t, 1000 * (i as u64 + 1));
        assert_eq!(m[(0, 3)], i as f64 + 1.0);
    }
}

#[test]
fn test_index_accessors_are_bounds_checked() {
    let c = sample_container();
    assert!(matches!(
        c.get_matrix(3),
        Err(TrackingError::IndexOutOfRange { index: 3, len: 3 })
    ));
    assert!(c.get_time_stamp(3).is_err());
    let empty = TrackingAndTimeStampsContainer::new();
    assert!(matches!(
        empty.interpolate_matrix(5),
        Err(TrackingError::EmptyContainer)
    ));
    assert!(empty.get_nearest_matrix(5).is_err());
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = sample_container();
    // values that need every digit to survive the text format
    c.insert(
        1_374_066_239_681_720_400,
        pose_about_z(0.123_456_789_012_345_6, 1.0 / 3.0),
    );
    assert_eq!(c.save_to_directory(dir.path()).unwrap(), 4);

    let mut loaded = TrackingAndTimeStampsContainer::new();
    assert_eq!(loaded.load_from_directory(dir.path()).unwrap(), 4);
    let original: Vec<_> = c.iter().map(|(t, m)| (t, *m)).collect();
    let reloaded: Vec<_> = loaded.iter().map(|(t, m)| (t, *m)).collect();
    assert_eq!(original, reloaded);
}

#[test]
fn test_load_skips_corrupt_files() {
    let dir = tempfile::tempdir().unwrap();
    sample_container().save_to_directory(dir.path()).unwrap();
    std::fs::write(dir.path().join("1500.txt"), "1 2 3\nnot a matrix\n").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let mut c = TrackingAndTimeStampsContainer::new();
    assert_eq!(c.load_from_directory(dir.path()).unwrap(), 3);
    assert_eq!(c.time_stamps().as_slice(), &[1000, 2000, 3000]);
}

#[test]
fn test_load_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = TrackingAndTimeStampsContainer::new();
    assert!(matches!(
        c.load_from_directory(dir.path().join("missing")),
        Err(TrackingError::Io { .. })
    ));
}

#[test]
fn test_interpolation_matches_util() {
    let c = sample_container();
    let lookup = c.interpolate_matrix(2700).unwrap();
    let expected = interpolate_transformation_matrix(
        &c.get_matrix(1).unwrap(),
        &c.get_matrix(2).unwrap(),
        700.0 / 1000.0,
    );
    assert!((lookup.matrix - expected).abs().max() < 1e-15);
    assert_eq!(lookup.timing_error, -300);
}
