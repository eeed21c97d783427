use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use video_tracker_calibration::TrackingAndTimeStampsContainer;
use video_tracker_calibration::calibration::handeye_calibration;
use video_tracker_calibration::cli;
use video_tracker_calibration::io::{
    CalibrationReport, load_matrices_from_file, write_calibration_outputs,
};

#[derive(Parser)]
#[command(version, about = "Hand-eye calibration of a tracked camera", author)]
struct HandEyeCli {
    /// directory of `<timestamp>.txt` marker tracking matrices
    #[arg(long)]
    tracking_directory: PathBuf,

    /// file of grid to camera matrices, one per tracking sample in time order
    #[arg(long)]
    extrinsics: PathBuf,

    /// output camera to marker matrix
    #[arg(long)]
    output: PathBuf,

    /// optional json report
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    let cli = HandEyeCli::parse();
    cli::run(|| {
        let mut tracking = TrackingAndTimeStampsContainer::new();
        tracking
            .load_from_directory(&cli.tracking_directory)
            .with_context(|| format!("reading {}", cli.tracking_directory.display()))?;
        let tracker_matrices: Vec<_> = tracking.iter().map(|(_, m)| *m).collect();
        let extrinsics = load_matrices_from_file(&cli.extrinsics)?;

        let result = handeye_calibration(&tracker_matrices, &extrinsics)?;
        println!("residual: {}", result.residual_rms);
        println!("motion pairs: {}", result.pairs_used);

        let report = cli.report.as_deref().map(|path| {
            let g = &result.grid_to_world;
            let grid_to_world: Vec<Vec<f64>> =
                (0..4).map(|r| (0..4).map(|c| g[(r, c)]).collect()).collect();
            let r = CalibrationReport::new(
                "hand-eye",
                &result.camera_to_marker,
                result.residual_rms,
                tracker_matrices.len(),
            )
            .with_extra(serde_json::json!({ "grid_to_world": grid_to_world }));
            (path, r)
        });
        write_calibration_outputs(
            &cli.output,
            &result.camera_to_marker,
            report.as_ref().map(|(path, r)| (*path, r)),
        )?;
        Ok(())
    })
}
