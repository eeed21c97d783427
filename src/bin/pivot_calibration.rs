use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;
use video_tracker_calibration::calibration::{
    PivotCalibrationConfig, calibrate_using_files_in_directory,
};
use video_tracker_calibration::cli;
use video_tracker_calibration::io::{
    CalibrationReport, write_calibration_outputs,
};

#[derive(Parser)]
#[command(version, about = "Pivot calibration of a tracked pointer", author)]
struct PivotCli {
    /// directory of 4x4 matrix files, one pose per file
    #[arg(long)]
    matrix_directory: PathBuf,

    /// output matrix file, translation from tip to marker
    #[arg(long)]
    output: PathBuf,

    /// percentage of poses used by each rerun
    #[arg(long)]
    percentage: Option<f64>,

    /// number of reruns on random subsets
    #[arg(long)]
    reruns: Option<usize>,

    /// pivot calibration config json
    #[arg(long)]
    config: Option<PathBuf>,

    /// optional json report
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    let cli = PivotCli::parse();
    cli::run(|| {
        let mut config: PivotCalibrationConfig = cli::load_config(cli.config.as_deref())?;
        if let Some(percentage) = cli.percentage {
            config.percentage = percentage;
        }
        if let Some(reruns) = cli.reruns {
            config.reruns = reruns;
        }
        let (result, statistics) =
            calibrate_using_files_in_directory(&cli.matrix_directory, &config)
                .with_context(|| format!("calibrating {}", cli.matrix_directory.display()))?;

        println!(
            "offset: {} {} {}",
            result.offset.x, result.offset.y, result.offset.z
        );
        println!(
            "pivot point: {} {} {}",
            result.pivot_point.x, result.pivot_point.y, result.pivot_point.z
        );
        println!("residual: {}", result.residual_rms);
        if let Some(s) = &statistics {
            println!(
                "{} reruns of {} poses: residual mean {}, std dev {}",
                s.reruns, s.subset_size, s.residual_mean, s.residual_std_dev
            );
        }

        let report = cli.report.as_deref().map(|path| {
            let extra = serde_json::json!({
                "pivot_point": [result.pivot_point.x, result.pivot_point.y, result.pivot_point.z],
                "reruns": statistics.map(|s| serde_json::json!({
                    "count": s.reruns,
                    "subset_size": s.subset_size,
                    "residual_mean": s.residual_mean,
                    "residual_std_dev": s.residual_std_dev,
                    "offset_std_dev": [s.offset_std_dev.x, s.offset_std_dev.y, s.offset_std_dev.z],
                })),
            });
            let r = CalibrationReport::new(
                "pivot",
                &result.transform,
                result.residual_rms,
                result.sample_count,
            )
            .with_extra(extra);
            (path, r)
        });
        write_calibration_outputs(
            &cli.output,
            &result.transform,
            report.as_ref().map(|(path, r)| (*path, r)),
        )?;
        info!("wrote {}", cli.output.display());
        Ok(())
    })
}
