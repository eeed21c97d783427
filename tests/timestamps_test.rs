use video_tracker_calibration::TrackingError;
use video_tracker_calibration::timestamps::TimeStampsContainer;

fn container(stamps: &[u64]) -> TimeStampsContainer {
    let mut c = TimeStampsContainer::new();
    for t in stamps {
        c.insert(*t);
    }
    c
}

#[test]
fn test_empty_container_queries_fail() {
    let c = TimeStampsContainer::new();
    assert!(c.is_empty());
    assert!(matches!(
        c.get_nearest_time_stamp(10),
        Err(TrackingError::EmptyContainer)
    ));
    assert!(matches!(
        c.get_bounding_time_stamps(10),
        Err(TrackingError::EmptyContainer)
    ));
    assert!(c.get_frame_number(10).is_none());
    assert!(matches!(
        c.get_time_stamp(0),
        Err(TrackingError::IndexOutOfRange { index: 0, len: 0 })
    ));
}

#[test]
fn test_clear_then_query_fails() {
    let mut c = container(&[100, 200]);
    c.clear();
    assert_eq!(c.get_size(), 0);
    assert!(c.get_nearest_time_stamp(150).is_err());
}

#[test]
fn test_exact_match_has_zero_delta() {
    let c = container(&[100, 200, 300, 400]);
    for (i, t) in c.iter().enumerate() {
        let nearest = c.get_nearest_time_stamp(t).unwrap();
        assert_eq!(nearest.time_stamp, t);
        assert_eq!(nearest.index, i);
        assert_eq!(nearest.delta, 0);
    }
}

#[test]
fn test_query_before_first_and_after_last() {
    let c = container(&[100, 200, 300]);
    let before = c.get_nearest_time_stamp(40).unwrap();
    assert_eq!(before.time_stamp, 100);
    assert_eq!(before.delta, -60);

    let after = c.get_nearest_time_stamp(1000).unwrap();
    assert_eq!(after.time_stamp, 300);
    assert_eq!(after.index, 2);
    assert_eq!(after.delta, 700);
}

#[test]
fn test_query_between_picks_closer() {
    let c = container(&[100, 200, 300]);
    let n = c.get_nearest_time_stamp(130).unwrap();
    assert_eq!(n.time_stamp, 100);
    assert_eq!(n.delta, 30);

    let n = c.get_nearest_time_stamp(171).unwrap();
    assert_eq!(n.time_stamp, 200);
    assert_eq!(n.delta, -29);
}

#[test]
fn test_tie_resolves_to_earlier() {
    let c = container(&[100, 200, 300]);
    let n = c.get_nearest_time_stamp(150).unwrap();
    assert_eq!(n.time_stamp, 100);
    assert_eq!(n.index, 0);
    assert_eq!(n.delta, 50);

    let n = c.get_nearest_time_stamp(250).unwrap();
    assert_eq!(n.time_stamp, 200);
}

#[test]
fn test_single_element() {
    let c = container(&[500]);
    for q in [0, 499, 500, 501, u64::MAX] {
        let n = c.get_nearest_time_stamp(q).unwrap();
        assert_eq!(n.time_stamp, 500);
        assert_eq!(n.index, 0);
    }
    let b = c.get_bounding_time_stamps(500).unwrap();
    assert!(b.in_bounds);
    assert_eq!(b.before_index, b.after_index);
    assert!(!c.get_bounding_time_stamps(501).unwrap().in_bounds);
}

#[test]
fn test_insert_keeps_order_and_duplicates() {
    let mut c = TimeStampsContainer::new();
    assert_eq!(c.insert(300), 0);
    assert_eq!(c.insert(100), 0);
    assert_eq!(c.insert(200), 1);
    assert_eq!(c.insert(400), 3);
    // a duplicate lands after the existing equal value
    assert_eq!(c.insert(200), 2);
    assert_eq!(c.as_slice(), &[100, 200, 200, 300, 400]);
    assert_eq!(c.first(), Some(100));
    assert_eq!(c.last(), Some(400));
}

#[test]
fn test_frame_number_is_exact_only() {
    let c = container(&[100, 200, 300]);
    assert_eq!(c.get_frame_number(200), Some(1));
    assert_eq!(c.get_frame_number(201), None);
    assert_eq!(c.get_frame_number(99), None);
}

#[test]
fn test_bounding_time_stamps() {
    let c = container(&[100, 200, 400]);
    let b = c.get_bounding_time_stamps(300).unwrap();
    assert_eq!((b.before, b.after), (200, 400));
    assert_eq!((b.before_index, b.after_index), (1, 2));
    assert!((b.proportion - 0.5).abs() < 1e-12);
    assert!(b.in_bounds);

    let b = c.get_bounding_time_stamps(125).unwrap();
    assert!((b.proportion - 0.25).abs() < 1e-12);

    let b = c.get_bounding_time_stamps(50).unwrap();
    assert!(!b.in_bounds);
    assert_eq!((b.before, b.after), (100, 100));

    let b = c.get_bounding_time_stamps(500).unwrap();
    assert!(!b.in_bounds);
    assert_eq!(b.before_index, 2);
}

#[test]
fn test_from_iterator_sorts() {
    let c: TimeStampsContainer = vec![5u64, 1, 3].into_iter().collect();
    assert_eq!(c.as_slice(), &[1, 3, 5]);
}
