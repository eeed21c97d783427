use std::path::{Path, PathBuf};

use glob::glob;
use indicatif::ParallelProgressIterator;
use log::{trace, warn};
use nalgebra as na;
use rayon::prelude::*;

use crate::error::{Result, TrackingError};
use crate::io::{load_doubles_from_file, load_matrix4x4_from_file, parse_matrix4x4};
use crate::types::TimeStamp;

pub const TRACKING_FILE_EXTENSION: &str = "txt";
pub const FRAME_MAP_SUFFIX: &str = ".framemap.log";

/// Tracking matrices read from one tool directory, sorted by time.
#[derive(Debug, Default)]
pub struct LoadedTracking {
    pub entries: Vec<(TimeStamp, na::Matrix4<f64>)>,
    pub skipped: usize,
}

/// Parses the timestamp from a file path.
///
/// The file stem must be all digits, e.g. `1374066239681720400.txt`.
pub fn path_to_timestamp(path: &Path) -> Option<TimeStamp> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn is_tracking_file(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|e| e.to_str()) == Some(TRACKING_FILE_EXTENSION)
        && path_to_timestamp(path).is_some()
}

fn tracking_file_filter(rp: glob::GlobResult) -> Option<PathBuf> {
    match rp {
        Ok(p) if is_tracking_file(&p) => Some(p),
        _ => None,
    }
}

fn glob_in(root: &Path, suffix: &str) -> Result<glob::Paths> {
    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        suffix
    );
    glob(&pattern).map_err(|e| TrackingError::parse(root, 0, e.to_string()))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(TrackingError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ))
    }
}

/// Sorted `<timestamp>.txt` files directly inside `dir`.
pub fn tracking_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;
    let mut paths: Vec<PathBuf> = glob_in(dir, "*.txt")?
        .filter_map(tracking_file_filter)
        .collect();
    paths.sort();
    Ok(paths)
}

pub fn directory_contains_tracking_matrices(dir: &Path) -> bool {
    tracking_files_in(dir).is_ok_and(|files| !files.is_empty())
}

/// Loads every tracking file in `dir`.
///
/// Files are parsed in parallel; the ones that cannot be read or do not hold
/// 16 numbers are logged and counted in `skipped`.
pub fn load_tracking_matrices(dir: &Path) -> Result<LoadedTracking> {
    let paths = tracking_files_in(dir)?;
    trace!("loading {} tracking files from {}", paths.len(), dir.display());
    let parsed: Vec<_> = paths
        .par_iter()
        .progress_count(paths.len() as u64)
        .map(|path| {
            let time_stamp = path_to_timestamp(path)?;
            match std::fs::read_to_string(path) {
                Ok(text) => match parse_matrix4x4(&text) {
                    Some(m) => Some((time_stamp, m)),
                    None => {
                        warn!("{} is not a 4x4 matrix, skipping", path.display());
                        None
                    }
                },
                Err(e) => {
                    warn!("failed to read {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();
    let skipped = parsed.iter().filter(|p| p.is_none()).count();
    let mut entries: Vec<_> = parsed.into_iter().flatten().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(LoadedTracking { entries, skipped })
}

/// Every directory below `root` (not `root` itself) holding tracking files.
pub fn find_tracking_matrix_directories(root: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(root)?;
    let mut dirs: Vec<PathBuf> = glob_in(root, "**/*")?
        .filter_map(|p| p.ok())
        .filter(|p| p.is_dir() && directory_contains_tracking_matrices(p))
        .collect();
    dirs.sort();
    Ok(dirs)
}

pub fn find_frame_maps(root: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(root)?;
    let mut maps: Vec<PathBuf> = glob_in(root, &format!("**/*{}", FRAME_MAP_SUFFIX))?
        .filter_map(|p| p.ok())
        .filter(|p| p.is_file())
        .collect();
    maps.sort();
    Ok(maps)
}

/// Loads `<timestamp>.txt` point files holding 2 (pixel, z = 0) or 3
/// numbers. Unreadable files are skipped with a warning.
pub fn load_timestamped_points(dir: &Path) -> Result<Vec<(TimeStamp, na::Point3<f64>)>> {
    let paths = tracking_files_in(dir)?;
    let mut points: Vec<_> = paths
        .par_iter()
        .progress_count(paths.len() as u64)
        .filter_map(|path| {
            let time_stamp = path_to_timestamp(path)?;
            match load_doubles_from_file(path) {
                Ok(v) if v.len() == 2 => Some((time_stamp, na::Point3::new(v[0], v[1], 0.0))),
                Ok(v) if v.len() == 3 => Some((time_stamp, na::Point3::new(v[0], v[1], v[2]))),
                Ok(v) => {
                    warn!("{} holds {} numbers, skipping", path.display(), v.len());
                    None
                }
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            }
        })
        .collect();
    points.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(points)
}

/// Every `*.txt` file in `dir` that holds a 4x4 matrix, in file name order.
/// Unlike tracking directories the names need not be time stamps.
pub fn load_matrices_from_directory(dir: &Path) -> Result<Vec<na::Matrix4<f64>>> {
    ensure_dir(dir)?;
    let mut paths: Vec<PathBuf> = glob_in(dir, "*.txt")?
        .filter_map(|p| p.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    let matrices: Vec<_> = paths
        .par_iter()
        .progress_count(paths.len() as u64)
        .map(|path| match load_matrix4x4_from_file(path) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("{}, skipping", e);
                None
            }
        })
        .collect();
    Ok(matrices.into_iter().flatten().collect())
}
