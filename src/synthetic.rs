//! Synthetic recordings with known ground truth.

use std::path::Path;

use log::info;
use nalgebra as na;
use rand::Rng;

use crate::error::{Result, TrackingError};
use crate::matching::FrameMapEntry;
use crate::tracking::TrackingAndTimeStampsContainer;
use crate::types::TimeStamp;

pub const FRAME_MAP_HEADER: &str = "#framenumber_starting_at_zero sequencenumber channel timestamp";

/// Random rotation with each Rodrigues component in `[-max_angle, max_angle]`.
pub fn random_rotation<R: Rng>(rng: &mut R, max_angle: f64) -> na::Rotation3<f64> {
    na::Rotation3::from_scaled_axis(na::Vector3::new(
        rng.random_range(-max_angle..max_angle),
        rng.random_range(-max_angle..max_angle),
        rng.random_range(-max_angle..max_angle),
    ))
}

pub fn pose(rotation: &na::Rotation3<f64>, translation: &na::Vector3<f64>) -> na::Matrix4<f64> {
    let mut m = na::Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation.matrix());
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    m
}

/// Marker poses of a tool whose tip, `offset` in marker space, rests on
/// `pivot` while the tool is swung around.
pub fn pivot_poses<R: Rng>(
    rng: &mut R,
    count: usize,
    pivot: &na::Point3<f64>,
    offset: &na::Vector3<f64>,
    max_angle: f64,
) -> Vec<na::Matrix4<f64>> {
    (0..count)
        .map(|_| {
            let r = random_rotation(rng, max_angle);
            pose(&r, &(pivot.coords - r * offset))
        })
        .collect()
}

/// Samples `pose_at(i)` at `start + i * interval` for `count` samples.
pub fn evenly_spaced_stream<F>(
    start: TimeStamp,
    interval: TimeStamp,
    count: usize,
    pose_at: F,
) -> TrackingAndTimeStampsContainer
where
    F: Fn(usize) -> na::Matrix4<f64>,
{
    (0..count)
        .map(|i| (start + i as TimeStamp * interval, pose_at(i)))
        .collect()
}

/// Frame map entries for consecutive frames on channel 0.
pub fn frame_map_entries(time_stamps: &[TimeStamp]) -> Vec<FrameMapEntry> {
    time_stamps
        .iter()
        .enumerate()
        .map(|(i, t)| FrameMapEntry {
            frame_number: i as u32,
            sequence_number: i as u32,
            channel: 0,
            time_stamp: *t,
        })
        .collect()
}

pub fn frame_map_text(entries: &[FrameMapEntry]) -> String {
    let mut s = String::from(FRAME_MAP_HEADER);
    s += "\n";
    for e in entries {
        s += &format!(
            "{}\t{}\t{}\t{}\n",
            e.frame_number, e.sequence_number, e.channel, e.time_stamp
        );
    }
    s
}

/// Lays a recording out on disk: one directory per tool under `root` and a
/// `capture.framemap.log` next to them.
pub fn write_tracking_dataset(
    root: &Path,
    tools: &[(&str, &TrackingAndTimeStampsContainer)],
    frames: &[FrameMapEntry],
) -> Result<()> {
    std::fs::create_dir_all(root).map_err(|e| TrackingError::io(root, e))?;
    for (name, container) in tools {
        let written = container.save_to_directory(root.join(name))?;
        info!("wrote {} matrices for {}", written, name);
    }
    let frame_map = root.join("capture.framemap.log");
    std::fs::write(&frame_map, frame_map_text(frames)).map_err(|e| TrackingError::io(&frame_map, e))
}
