use std::path::Path;

use log::{info, warn};
use nalgebra as na;

use crate::data_loader::load_tracking_matrices;
use crate::error::{Result, TrackingError};
use crate::io::save_matrix4x4_to_file;
use crate::timestamps::{Bounding, NearestTimeStamp, TimeStampsContainer};
use crate::types::{TimeDelta, TimeStamp};
use crate::util::interpolate_transformation_matrix;

/// A pose picked or synthesised for a query time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixLookup {
    pub matrix: na::Matrix4<f64>,
    /// `query - nearest stored stamp`, or `query - boundary` out of range.
    pub timing_error: TimeDelta,
    /// False when the query lies outside the recorded range; the matrix is
    /// then the boundary sample, never an extrapolation.
    pub in_bounds: bool,
}

/// Time stamps and 4x4 tracking matrices kept index aligned.
///
/// Not thread-safe: callers serialise access, typically one matching
/// session per thread.
#[derive(Debug, Clone, Default)]
pub struct TrackingAndTimeStampsContainer {
    time_stamps: TimeStampsContainer,
    matrices: Vec<na::Matrix4<f64>>,
}

impl TrackingAndTimeStampsContainer {
    pub fn new() -> TrackingAndTimeStampsContainer {
        TrackingAndTimeStampsContainer::default()
    }

    pub fn clear(&mut self) {
        self.time_stamps.clear();
        self.matrices.clear();
    }

    /// Inserts both halves at the same sorted position.
    pub fn insert(&mut self, time_stamp: TimeStamp, matrix: na::Matrix4<f64>) {
        let idx = self.time_stamps.insert(time_stamp);
        self.matrices.insert(idx, matrix);
    }

    /// Replaces the contents with every parsable `<timestamp>.txt` file in
    /// `dir` and returns how many were loaded. Corrupt files are skipped.
    pub fn load_from_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let loaded = load_tracking_matrices(dir)?;
        self.clear();
        for (time_stamp, matrix) in loaded.entries {
            self.insert(time_stamp, matrix);
        }
        if loaded.skipped > 0 {
            warn!(
                "{}: skipped {} unreadable tracking file(s)",
                dir.display(),
                loaded.skipped
            );
        }
        info!("loaded {} tracking matrices from {}", self.len(), dir.display());
        Ok(self.len())
    }

    /// Writes one `<timestamp>.txt` per entry, creating `dir` if needed.
    pub fn save_to_directory(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| TrackingError::io(dir, e))?;
        for (time_stamp, matrix) in self.iter() {
            save_matrix4x4_to_file(dir.join(format!("{}.txt", time_stamp)), matrix)?;
        }
        Ok(self.len())
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn get_size(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn time_stamps(&self) -> &TimeStampsContainer {
        &self.time_stamps
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeStamp, &na::Matrix4<f64>)> + '_ {
        self.time_stamps.iter().zip(self.matrices.iter())
    }

    pub fn get_time_stamp(&self, frame_number: usize) -> Result<TimeStamp> {
        self.time_stamps.get_time_stamp(frame_number)
    }

    pub fn get_matrix(&self, frame_number: usize) -> Result<na::Matrix4<f64>> {
        self.matrices
            .get(frame_number)
            .copied()
            .ok_or(TrackingError::IndexOutOfRange {
                index: frame_number,
                len: self.matrices.len(),
            })
    }

    pub fn get_frame_number(&self, time_stamp: TimeStamp) -> Option<usize> {
        self.time_stamps.get_frame_number(time_stamp)
    }

    pub fn get_nearest_time_stamp(&self, query: TimeStamp) -> Result<NearestTimeStamp> {
        self.time_stamps.get_nearest_time_stamp(query)
    }

    pub fn get_bounding_time_stamps(&self, query: TimeStamp) -> Result<Bounding> {
        self.time_stamps.get_bounding_time_stamps(query)
    }

    /// Blends the two samples enclosing `query`.
    pub fn interpolate_matrix(&self, query: TimeStamp) -> Result<MatrixLookup> {
        let bounding = self.time_stamps.get_bounding_time_stamps(query)?;
        let nearest = self.time_stamps.get_nearest_time_stamp(query)?;
        let matrix = if bounding.before_index == bounding.after_index {
            self.matrices[bounding.before_index]
        } else {
            interpolate_transformation_matrix(
                &self.matrices[bounding.before_index],
                &self.matrices[bounding.after_index],
                bounding.proportion,
            )
        };
        Ok(MatrixLookup {
            matrix,
            timing_error: nearest.delta,
            in_bounds: bounding.in_bounds,
        })
    }

    /// Picks the single nearest sample.
    pub fn get_nearest_matrix(&self, query: TimeStamp) -> Result<MatrixLookup> {
        let nearest = self.time_stamps.get_nearest_time_stamp(query)?;
        let in_bounds = match (self.time_stamps.first(), self.time_stamps.last()) {
            (Some(first), Some(last)) => query >= first && query <= last,
            _ => false,
        };
        Ok(MatrixLookup {
            matrix: self.matrices[nearest.index],
            timing_error: nearest.delta,
            in_bounds,
        })
    }

    /// Rewrites every stored matrix in place, stamps untouched.
    pub fn apply_to_all<F: Fn(&na::Matrix4<f64>) -> na::Matrix4<f64>>(&mut self, f: F) {
        for m in self.matrices.iter_mut() {
            *m = f(m);
        }
    }
}

impl FromIterator<(TimeStamp, na::Matrix4<f64>)> for TrackingAndTimeStampsContainer {
    fn from_iter<I: IntoIterator<Item = (TimeStamp, na::Matrix4<f64>)>>(iter: I) -> Self {
        let mut container = TrackingAndTimeStampsContainer::new();
        for (time_stamp, matrix) in iter {
            container.insert(time_stamp, matrix);
        }
        container
    }
}
