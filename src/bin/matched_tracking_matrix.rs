use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use video_tracker_calibration::cli;
use video_tracker_calibration::io::{format_matrix4x4, save_matrix4x4_to_file};
use video_tracker_calibration::matching::load_lens_points;
use video_tracker_calibration::{MatchingConfig, MatchingMode, VideoTrackerMatching};

#[derive(Parser)]
#[command(version, about = "Tracking matrix matched to a video frame", author)]
struct MatchedCli {
    /// recording directory holding the frame map and tracker directories
    #[arg(long)]
    tracking_dir: PathBuf,

    /// video frame number
    #[arg(long)]
    frame: u32,

    #[arg(long, default_value_t = 0)]
    tracker_index: usize,

    /// file of camera to tracker matrices, one per tracker
    #[arg(long)]
    handeyes: Option<PathBuf>,

    /// convert tracker matrices between left and right handed frames
    #[arg(long)]
    flip: bool,

    /// interpolate between the enclosing samples instead of taking the nearest
    #[arg(long)]
    interpolate: bool,

    /// matching config json
    #[arg(long)]
    config: Option<PathBuf>,

    /// also write the matrix to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// `frame x y z` lines of a world-fixed point in lens coordinates
    #[arg(long)]
    lens_points: Option<PathBuf>,

    /// pick the video lag that best collapses the lens points
    #[arg(long)]
    temporal_calibration: bool,

    #[arg(long, default_value_t = -100, allow_hyphen_values = true)]
    window_low: i64,

    #[arg(long, default_value_t = 100, allow_hyphen_values = true)]
    window_high: i64,

    /// refine the camera to tracker matrix on the lens points
    #[arg(long)]
    optimise_handeye: bool,

    /// write the refined camera to tracker matrix here
    #[arg(long)]
    handeye_output: Option<PathBuf>,
}

fn main() {
    let cli = MatchedCli::parse();
    cli::run(|| {
        let mut config: MatchingConfig = cli::load_config(cli.config.as_deref())?;
        if cli.flip {
            config.flip_matrices = true;
        }
        if cli.interpolate {
            config.mode = MatchingMode::Interpolate;
        }
        let mut matching = VideoTrackerMatching::with_config(config);
        matching
            .initialise(&cli.tracking_dir)
            .with_context(|| format!("reading {}", cli.tracking_dir.display()))?;
        if let Some(handeyes) = &cli.handeyes {
            matching.set_camera_to_trackers(handeyes)?;
        }
        let mut refined_handeye = None;
        if cli.temporal_calibration || cli.optimise_handeye {
            let Some(path) = &cli.lens_points else {
                bail!("--lens-points is required for temporal or hand-eye calibration");
            };
            let lens_points = load_lens_points(path)?;
            if cli.temporal_calibration {
                let result = matching.temporal_calibration(
                    &lens_points,
                    (cli.window_low, cli.window_high),
                    cli.tracker_index,
                )?;
                println!(
                    "video lag: {} ms, spread {} over {} frames",
                    result.lag_ms, result.spread, result.frames_used
                );
            }
            if cli.optimise_handeye {
                let result = matching.optimise_handeye_calibration(&lens_points, cli.tracker_index)?;
                print!("{}", format_matrix4x4(&result.camera_to_tracker));
                println!(
                    "hand-eye residual: {} -> {}",
                    result.initial_residual_rms, result.residual_rms
                );
                refined_handeye = Some(result.camera_to_tracker);
            }
        }
        let lookup = matching.get_tracker_matrix(cli.frame, cli.tracker_index)?;
        print!("{}", format_matrix4x4(&lookup.matrix));
        println!("timing error: {} ns", lookup.timing_error);
        if !lookup.in_bounds {
            println!("frame {} lies outside the tracking data", cli.frame);
        }
        if let Some(output) = &cli.output {
            save_matrix4x4_to_file(output, &lookup.matrix)?;
        }
        if let (Some(output), Some(handeye)) = (&cli.handeye_output, &refined_handeye) {
            save_matrix4x4_to_file(output, handeye)?;
        }
        Ok(())
    })
}
