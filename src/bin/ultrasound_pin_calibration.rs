use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use log::{info, warn};
use video_tracker_calibration::TrackingAndTimeStampsContainer;
use video_tracker_calibration::calibration::{UltrasoundPinCalibration, UltrasoundPinConfig};
use video_tracker_calibration::cli;
use video_tracker_calibration::data_loader::load_timestamped_points;
use video_tracker_calibration::io::{
    CalibrationReport, write_calibration_outputs,
};

#[derive(Parser)]
#[command(version, about = "Ultrasound probe calibration from pin images", author)]
struct PinCli {
    /// directory of `<timestamp>.txt` probe tracking matrices
    #[arg(long)]
    matrix_directory: PathBuf,

    /// directory of `<timestamp>.txt` pin pixel locations
    #[arg(long)]
    point_directory: PathBuf,

    /// output matrix file, rigid * scaling
    #[arg(long)]
    output: PathBuf,

    /// drop points whose nearest tracking sample is further away than this
    #[arg(long)]
    max_timing_error_ms: Option<u64>,

    /// ultrasound pin config json
    #[arg(long)]
    config: Option<PathBuf>,

    /// optional json report
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    let cli = PinCli::parse();
    cli::run(|| {
        let config: UltrasoundPinConfig = cli::load_config(cli.config.as_deref())?;
        let mut tracking = TrackingAndTimeStampsContainer::new();
        tracking
            .load_from_directory(&cli.matrix_directory)
            .with_context(|| format!("reading {}", cli.matrix_directory.display()))?;
        let timed_points = load_timestamped_points(&cli.point_directory)?;

        let mut matrices = Vec::with_capacity(timed_points.len());
        let mut points = Vec::with_capacity(timed_points.len());
        for (time_stamp, point) in timed_points {
            let lookup = tracking.get_nearest_matrix(time_stamp)?;
            let limit_exceeded = cli
                .max_timing_error_ms
                .is_some_and(|ms| lookup.timing_error.unsigned_abs() > ms * 1_000_000);
            if limit_exceeded || !lookup.in_bounds {
                warn!(
                    "skipping point at {}, timing error {} ns",
                    time_stamp, lookup.timing_error
                );
                continue;
            }
            matrices.push(lookup.matrix);
            points.push(point);
        }
        if matrices.is_empty() {
            bail!("no points could be matched to tracking data");
        }
        info!("matched {} points", matrices.len());

        let result = UltrasoundPinCalibration::new(config).calibrate(&matrices, &points)?;
        println!("residual: {}", result.residual_rms);
        println!(
            "millimetres per pixel: {} {}",
            result.millimetres_per_pixel[0], result.millimetres_per_pixel[1]
        );
        println!(
            "invariant point: {} {} {}",
            result.invariant_point.x, result.invariant_point.y, result.invariant_point.z
        );

        let calibration = result.calibration();
        let report = cli.report.as_deref().map(|path| {
            let extra = serde_json::json!({
                "parameters": result.parameters,
                "millimetres_per_pixel": result.millimetres_per_pixel,
                "invariant_point": [
                    result.invariant_point.x,
                    result.invariant_point.y,
                    result.invariant_point.z
                ],
            });
            let r = CalibrationReport::new(
                "ultrasound pin",
                &calibration,
                result.residual_rms,
                matrices.len(),
            )
            .with_extra(extra);
            (path, r)
        });
        write_calibration_outputs(
            &cli.output,
            &calibration,
            report.as_ref().map(|(path, r)| (*path, r)),
        )?;
        Ok(())
    })
}
