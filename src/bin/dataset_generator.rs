use std::path::PathBuf;

use clap::Parser;
use nalgebra as na;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use video_tracker_calibration::cli;
use video_tracker_calibration::io::object_to_json;
use video_tracker_calibration::synthetic::{
    evenly_spaced_stream, frame_map_entries, pivot_poses, write_tracking_dataset,
};

#[derive(Parser)]
#[command(version, about = "Generate a synthetic tracked pivot recording", author)]
struct GeneratorCli {
    /// output directory
    #[arg(short, long)]
    output: PathBuf,

    /// number of tracking samples
    #[arg(long, default_value_t = 100)]
    poses: usize,

    /// number of video frames, placed between tracking samples
    #[arg(long, default_value_t = 50)]
    frames: usize,

    /// tracking sample interval in milliseconds
    #[arg(long, default_value_t = 20)]
    interval_ms: u64,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Serialize)]
struct GroundTruth {
    offset: [f64; 3],
    pivot_point: [f64; 3],
    start_time_stamp: u64,
    interval_ns: u64,
}

fn main() {
    let cli = GeneratorCli::parse();
    cli::run(|| {
        let start: u64 = 1_374_066_239_681_720_400;
        let interval = cli.interval_ms * 1_000_000;
        let offset = na::Vector3::new(0.0, 0.0, -150.0);
        let pivot = na::Point3::new(10.0, -20.0, -1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
        let poses = pivot_poses(&mut rng, cli.poses, &pivot, &offset, 0.5);
        let stream = evenly_spaced_stream(start, interval, poses.len(), |i| poses[i]);

        // frames sit a third of the way into every other tracking interval
        let frame_times: Vec<u64> = (0..cli.frames)
            .map(|i| start + (2 * i as u64) * interval + interval / 3)
            .collect();
        write_tracking_dataset(
            &cli.output,
            &[("tracker0", &stream)],
            &frame_map_entries(&frame_times),
        )?;
        object_to_json(
            cli.output.join("ground_truth.json"),
            &GroundTruth {
                offset: [offset.x, offset.y, offset.z],
                pivot_point: [pivot.x, pivot.y, pivot.z],
                start_time_stamp: start,
                interval_ns: interval,
            },
        )?;
        println!(
            "generated {} poses and {} frames in {}",
            poses.len(),
            frame_times.len(),
            cli.output.display()
        );
        Ok(())
    })
}
