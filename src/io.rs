use std::io::Write;
use std::path::Path;

use nalgebra as na;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Result, TrackingError};

/// Serializes an object to a JSON file.
pub fn object_to_json<T: Serialize>(output_path: impl AsRef<Path>, object: &T) -> Result<()> {
    let output_path = output_path.as_ref();
    let j = serde_json::to_string_pretty(object)?;
    let mut file =
        std::fs::File::create(output_path).map_err(|e| TrackingError::io(output_path, e))?;
    file.write_all(j.as_bytes())
        .map_err(|e| TrackingError::io(output_path, e))
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let file_path = file_path.as_ref();
    let contents =
        std::fs::read_to_string(file_path).map_err(|e| TrackingError::io(file_path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Whitespace separated numbers up to the first token that is not one.
pub fn parse_doubles(text: &str) -> Vec<f64> {
    text.split_whitespace()
        .map_while(|token| token.parse::<f64>().ok())
        .collect()
}

pub fn load_doubles_from_file(file_path: impl AsRef<Path>) -> Result<Vec<f64>> {
    let file_path = file_path.as_ref();
    let contents =
        std::fs::read_to_string(file_path).map_err(|e| TrackingError::io(file_path, e))?;
    Ok(parse_doubles(&contents))
}

/// Parses 4 rows of 4 numbers, row-major. Trailing content is ignored.
pub fn parse_matrix4x4(text: &str) -> Option<na::Matrix4<f64>> {
    let values = parse_doubles(text);
    if values.len() < 16 || values[..16].iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(na::Matrix4::from_row_slice(&values[..16]))
}

pub fn load_matrix4x4_from_file(file_path: impl AsRef<Path>) -> Result<na::Matrix4<f64>> {
    let file_path = file_path.as_ref();
    let contents =
        std::fs::read_to_string(file_path).map_err(|e| TrackingError::io(file_path, e))?;
    parse_matrix4x4(&contents)
        .ok_or_else(|| TrackingError::parse(file_path, 1, "expected 16 finite numbers"))
}

pub fn format_matrix4x4(matrix: &na::Matrix4<f64>) -> String {
    let mut s = String::new();
    for r in 0..4 {
        let row: Vec<String> = (0..4).map(|c| format!("{}", matrix[(r, c)])).collect();
        s += &row.join(" ");
        s += "\n";
    }
    s
}

/// Writes the plain text 4x4 format. Values use the shortest representation
/// that reads back to the same `f64`.
pub fn save_matrix4x4_to_file(file_path: impl AsRef<Path>, matrix: &na::Matrix4<f64>) -> Result<()> {
    let file_path = file_path.as_ref();
    std::fs::write(file_path, format_matrix4x4(matrix)).map_err(|e| TrackingError::io(file_path, e))
}

/// Reads consecutive 4x4 matrices from one file, e.g. one camera to tracker
/// matrix per tracked tool.
pub fn load_matrices_from_file(file_path: impl AsRef<Path>) -> Result<Vec<na::Matrix4<f64>>> {
    let file_path = file_path.as_ref();
    let values = load_doubles_from_file(file_path)?;
    if values.is_empty() || values.len() % 16 != 0 {
        return Err(TrackingError::parse(
            file_path,
            1,
            format!("expected a multiple of 16 numbers, got {}", values.len()),
        ));
    }
    Ok(values
        .chunks_exact(16)
        .map(na::Matrix4::from_row_slice)
        .collect())
}

pub fn save_matrices_to_file(
    file_path: impl AsRef<Path>,
    matrices: &[na::Matrix4<f64>],
) -> Result<()> {
    let file_path = file_path.as_ref();
    let s: String = matrices.iter().map(format_matrix4x4).collect();
    std::fs::write(file_path, s).map_err(|e| TrackingError::io(file_path, e))
}

pub fn load_2d_point_from_file(file_path: impl AsRef<Path>) -> Result<na::Point2<f64>> {
    let file_path = file_path.as_ref();
    match load_doubles_from_file(file_path)?.as_slice() {
        [x, y] => Ok(na::Point2::new(*x, *y)),
        other => Err(TrackingError::parse(
            file_path,
            1,
            format!("expected 2 numbers, got {}", other.len()),
        )),
    }
}

pub fn load_3d_point_from_file(file_path: impl AsRef<Path>) -> Result<na::Point3<f64>> {
    let file_path = file_path.as_ref();
    match load_doubles_from_file(file_path)?.as_slice() {
        [x, y, z] => Ok(na::Point3::new(*x, *y, *z)),
        other => Err(TrackingError::parse(
            file_path,
            1,
            format!("expected 3 numbers, got {}", other.len()),
        )),
    }
}

/// Summary written next to a calibration matrix.
#[derive(Debug, serde::Serialize)]
pub struct CalibrationReport {
    pub timestamp: String,
    pub method: String,
    pub matrix: [[f64; 4]; 4],
    pub residual_rms: f64,
    pub sample_count: usize,
    pub extra: serde_json::Value,
}

impl CalibrationReport {
    pub fn new(
        method: &str,
        matrix: &na::Matrix4<f64>,
        residual_rms: f64,
        sample_count: usize,
    ) -> CalibrationReport {
        let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = matrix[(r, c)];
            }
        }
        CalibrationReport {
            timestamp: now.to_string(),
            method: method.to_string(),
            matrix: rows,
            residual_rms,
            sample_count,
            extra: serde_json::Value::Null,
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> CalibrationReport {
        self.extra = extra;
        self
    }
}


/// Writes a calibration matrix and, optionally, its JSON report.
///
/// The report is serialized before anything touches the disk. If the report
/// cannot be written the matrix file is removed again, so a failed run
/// leaves neither output behind.
pub fn write_calibration_outputs(
    matrix_path: impl AsRef<Path>,
    matrix: &na::Matrix4<f64>,
    report: Option<(&Path, &CalibrationReport)>,
) -> Result<()> {
    let matrix_path = matrix_path.as_ref();
    let report = match report {
        Some((path, r)) => Some((path, serde_json::to_string_pretty(r)?)),
        None => None,
    };
    save_matrix4x4_to_file(matrix_path, matrix)?;
    if let Some((path, json)) = report {
        if let Err(e) = std::fs::write(path, json) {
            let _ = std::fs::remove_file(matrix_path);
            return Err(TrackingError::io(path, e));
        }
    }
    Ok(())
}
