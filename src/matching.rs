use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use tiny_solver::problem::Problem;

use crate::data_loader::{find_frame_maps, find_tracking_matrix_directories};
use crate::error::{Result, TrackingError};
use crate::io::load_matrices_from_file;
use crate::optimization::factors::{LensPointFactor, reconstruction_residual};
use crate::optimization::{PARAMETER_BLOCK, SolveOptions, solve_levenberg_marquardt};
use crate::tracking::{MatrixLookup, TrackingAndTimeStampsContainer};
use crate::types::{RvecTvec, TimeDelta, TimeStamp, ToRvecTvec};
use crate::util::{flip_matrix, mean_and_std, rms_of_squared, transform_point};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchingMode {
    #[default]
    Nearest,
    Interpolate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub mode: MatchingMode,
    pub flip_matrices: bool,
    pub video_lag_ms: u64,
    pub video_leads_tracking: bool,
    pub max_timing_error_ns: Option<u64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            mode: MatchingMode::Nearest,
            flip_matrices: false,
            video_lag_ms: 0,
            video_leads_tracking: false,
            max_timing_error_ns: None,
        }
    }
}

/// One line of a `*.framemap.log` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMapEntry {
    pub frame_number: u32,
    pub sequence_number: u32,
    pub channel: u32,
    pub time_stamp: TimeStamp,
}

fn parse_frame_map_line(line: &str) -> Option<FrameMapEntry> {
    let mut fields = line.split_whitespace();
    Some(FrameMapEntry {
        frame_number: fields.next()?.parse().ok()?,
        sequence_number: fields.next()?.parse().ok()?,
        channel: fields.next()?.parse().ok()?,
        time_stamp: fields.next()?.parse().ok()?,
    })
}

/// Video frame number to capture time.
///
/// Entries are sorted by frame number with duplicates removed, the first
/// occurrence wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMap {
    entries: Vec<FrameMapEntry>,
}

impl FrameMap {
    /// Parses frame map text without touching the filesystem.
    ///
    /// Lines are `frame sequence channel timestamp`, whitespace separated.
    /// Comment lines start with `#`. Malformed lines are skipped with a
    /// warning; a map without a single valid line is an error.
    pub fn parse(text: &str, source: &Path) -> Result<FrameMap> {
        let mut entries = Vec::new();
        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_frame_map_line(line) {
                Some(entry) => entries.push(entry),
                None => warn!(
                    "{}:{}: malformed frame map line {:?}",
                    source.display(),
                    line_number + 1,
                    line
                ),
            }
        }
        if entries.is_empty() {
            return Err(TrackingError::parse(source, 0, "no frame map entries"));
        }
        entries.sort_by_key(|e| e.frame_number);
        let before = entries.len();
        entries.dedup_by_key(|e| e.frame_number);
        if entries.len() != before {
            warn!(
                "{}: dropped {} duplicate frame number(s)",
                source.display(),
                before - entries.len()
            );
        }
        Ok(FrameMap { entries })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<FrameMap> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TrackingError::io(path, e))?;
        FrameMap::parse(&text, path)
    }

    pub fn from_entries(mut entries: Vec<FrameMapEntry>) -> FrameMap {
        entries.sort_by_key(|e| e.frame_number);
        entries.dedup_by_key(|e| e.frame_number);
        FrameMap { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FrameMapEntry] {
        &self.entries
    }

    pub fn time_stamp_of(&self, frame_number: u32) -> Option<TimeStamp> {
        self.entries
            .binary_search_by_key(&frame_number, |e| e.frame_number)
            .ok()
            .map(|i| self.entries[i].time_stamp)
    }
}

/// Where the frame map and per-tool tracking directories of a recording are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingLayout {
    pub root: PathBuf,
    pub frame_maps: Vec<PathBuf>,
    pub tracking_directories: Vec<PathBuf>,
}

impl TrackingLayout {
    pub fn from_paths(
        root: impl Into<PathBuf>,
        mut frame_maps: Vec<PathBuf>,
        mut tracking_directories: Vec<PathBuf>,
    ) -> TrackingLayout {
        frame_maps.sort();
        tracking_directories.sort();
        TrackingLayout {
            root: root.into(),
            frame_maps,
            tracking_directories,
        }
    }

    /// Scans `root` recursively.
    pub fn discover(root: impl AsRef<Path>) -> Result<TrackingLayout> {
        let root = root.as_ref();
        let frame_maps = find_frame_maps(root)?;
        let tracking_directories = find_tracking_matrix_directories(root)?;
        debug!(
            "{}: {} frame map(s), {} tracking director(ies)",
            root.display(),
            frame_maps.len(),
            tracking_directories.len()
        );
        Ok(TrackingLayout::from_paths(root, frame_maps, tracking_directories))
    }

    /// Checks there is something to match and returns the frame map to use.
    pub fn validate(&self) -> Result<&Path> {
        if self.tracking_directories.is_empty() {
            return Err(TrackingError::NoTrackingData(self.root.clone()));
        }
        let Some(first) = self.frame_maps.first() else {
            return Err(TrackingError::NoFrameMap(self.root.clone()));
        };
        if self.frame_maps.len() > 1 {
            warn!(
                "found {} frame maps, using {} and ignoring {:?}",
                self.frame_maps.len(),
                first.display(),
                &self.frame_maps[1..]
            );
        }
        Ok(first)
    }
}

/// Clock offset between the video and one tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoLag {
    pub lag_ms: u64,
    pub video_leads_tracking: bool,
}

impl VideoLag {
    /// Tracking time corresponding to a video time stamp.
    pub fn apply(&self, video_time: TimeStamp) -> TimeStamp {
        let lag_ns = self.lag_ms.saturating_mul(1_000_000);
        if self.video_leads_tracking {
            video_time.saturating_add(lag_ns)
        } else {
            video_time.saturating_sub(lag_ns)
        }
    }
}

impl VideoLag {
    /// Positive values mean the video leads tracking.
    pub fn from_signed_ms(lag_ms: i64) -> VideoLag {
        VideoLag {
            lag_ms: lag_ms.unsigned_abs(),
            video_leads_tracking: lag_ms > 0,
        }
    }

    pub fn signed_ms(&self) -> i64 {
        let ms = self.lag_ms.min(i64::MAX as u64) as i64;
        if self.video_leads_tracking { ms } else { -ms }
    }
}

/// A point fixed in world space, given in camera lens coordinates at one
/// video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LensPoint {
    pub frame_number: u32,
    pub point: na::Point3<f64>,
}

fn parse_lens_point_line(line: &str) -> Option<LensPoint> {
    let mut fields = line.split_whitespace();
    let frame_number: u32 = fields.next()?.parse().ok()?;
    let mut coordinate = || fields.next()?.parse::<f64>().ok().filter(|v| v.is_finite());
    Some(LensPoint {
        frame_number,
        point: na::Point3::new(coordinate()?, coordinate()?, coordinate()?),
    })
}

/// Parses `frame x y z` lines; `#` starts a comment line.
pub fn parse_lens_points(text: &str, source: &Path) -> Result<Vec<LensPoint>> {
    let mut points = Vec::new();
    for (line_number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_lens_point_line(line) {
            Some(p) => points.push(p),
            None => warn!(
                "{}:{}: malformed lens point line {:?}",
                source.display(),
                line_number + 1,
                line
            ),
        }
    }
    if points.is_empty() {
        return Err(TrackingError::parse(source, 0, "no lens points"));
    }
    Ok(points)
}

pub fn load_lens_points(path: impl AsRef<Path>) -> Result<Vec<LensPoint>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| TrackingError::io(path, e))?;
    parse_lens_points(&text, path)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalCalibrationResult {
    /// Best lag, positive when the video leads tracking.
    pub lag_ms: i64,
    /// RMS distance of the reconstructed points from their centroid.
    pub spread: f64,
    pub world_point: na::Point3<f64>,
    pub frames_used: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandeyeOptimisationResult {
    pub camera_to_tracker: na::Matrix4<f64>,
    pub world_point: na::Point3<f64>,
    pub initial_residual_rms: f64,
    pub residual_rms: f64,
    pub frames_used: usize,
}

/// Centroid and RMS distance from it.
fn point_spread(points: &[na::Point3<f64>]) -> (na::Point3<f64>, f64) {
    let sum = points
        .iter()
        .fold(na::Vector3::zeros(), |acc, p| acc + p.coords);
    let centroid = na::Point3::from(sum / points.len().max(1) as f64);
    let squared: Vec<f64> = points
        .iter()
        .map(|p| (p - centroid).norm_squared())
        .collect();
    (centroid, rms_of_squared(&squared))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingErrorStats {
    pub mean: f64,
    pub std_dev: f64,
    pub max_abs: TimeDelta,
    pub frames_over_threshold: usize,
}

/// Binds video frame numbers to tracking matrices of one or more tools.
#[derive(Debug, Clone, Default)]
pub struct VideoTrackerMatching {
    config: MatchingConfig,
    frame_map: FrameMap,
    frame_map_path: Option<PathBuf>,
    tracking_directories: Vec<PathBuf>,
    trackers: Vec<TrackingAndTimeStampsContainer>,
    lags: Vec<VideoLag>,
    camera_to_tracker: Vec<Option<na::Matrix4<f64>>>,
    flipped: bool,
    ready: bool,
}

impl VideoTrackerMatching {
    pub fn new() -> VideoTrackerMatching {
        VideoTrackerMatching::default()
    }

    pub fn with_config(config: MatchingConfig) -> VideoTrackerMatching {
        VideoTrackerMatching {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Discovers and loads a recording directory.
    ///
    /// Fails unless at least one tool directory yields a matrix. Tool
    /// directories that load nothing are kept, with a warning, as long as
    /// another one has data.
    pub fn initialise(&mut self, directory: impl AsRef<Path>) -> Result<()> {
        let layout = TrackingLayout::discover(directory)?;
        let frame_map_path = layout.validate()?.to_path_buf();
        let frame_map = FrameMap::load(&frame_map_path)?;
        info!(
            "{} frames in {}",
            frame_map.len(),
            frame_map_path.display()
        );
        let mut trackers = Vec::with_capacity(layout.tracking_directories.len());
        for dir in &layout.tracking_directories {
            let mut container = TrackingAndTimeStampsContainer::new();
            if container.load_from_directory(dir)? == 0 {
                warn!("{} holds no readable tracking matrices", dir.display());
            }
            trackers.push(container);
        }
        if trackers.iter().all(|t| t.is_empty()) {
            return Err(TrackingError::NoTrackingData(layout.root));
        }
        self.install(frame_map, trackers);
        self.frame_map_path = Some(frame_map_path);
        self.tracking_directories = layout.tracking_directories;
        self.check_timing_errors();
        Ok(())
    }

    /// Builds a matcher from in-memory streams.
    pub fn from_streams(
        frame_map: FrameMap,
        trackers: Vec<TrackingAndTimeStampsContainer>,
        config: MatchingConfig,
    ) -> Result<VideoTrackerMatching> {
        if trackers.is_empty() {
            return Err(TrackingError::EmptyInput("tracking streams"));
        }
        if frame_map.is_empty() {
            return Err(TrackingError::EmptyInput("frame map"));
        }
        let mut matching = VideoTrackerMatching::with_config(config);
        matching.install(frame_map, trackers);
        matching.check_timing_errors();
        Ok(matching)
    }

    fn install(&mut self, frame_map: FrameMap, trackers: Vec<TrackingAndTimeStampsContainer>) {
        let count = trackers.len();
        self.frame_map = frame_map;
        self.trackers = trackers;
        self.lags = vec![
            VideoLag {
                lag_ms: self.config.video_lag_ms,
                video_leads_tracking: self.config.video_leads_tracking,
            };
            count
        ];
        self.camera_to_tracker = vec![None; count];
        self.flipped = false;
        if self.config.flip_matrices {
            self.flip_all();
        }
        self.ready = true;
    }

    fn flip_all(&mut self) {
        for tracker in self.trackers.iter_mut() {
            tracker.apply_to_all(flip_matrix);
        }
        self.flipped = !self.flipped;
    }

    /// Enables or disables the handedness flip, re-applying it to data that
    /// is already loaded.
    pub fn set_flip_matrices(&mut self, flip: bool) {
        self.config.flip_matrices = flip;
        if self.ready && self.flipped != flip {
            self.flip_all();
        }
    }

    pub fn set_mode(&mut self, mode: MatchingMode) {
        self.config.mode = mode;
    }

    /// Sets the lag for one tracker, or for all of them with `None`.
    pub fn set_video_lag(
        &mut self,
        lag_ms: u64,
        video_leads_tracking: bool,
        tracker_index: Option<usize>,
    ) -> Result<()> {
        let lag = VideoLag {
            lag_ms,
            video_leads_tracking,
        };
        match tracker_index {
            Some(index) => {
                self.check_tracker_index(index)?;
                self.lags[index] = lag;
            }
            None => {
                self.config.video_lag_ms = lag_ms;
                self.config.video_leads_tracking = video_leads_tracking;
                self.lags.iter_mut().for_each(|l| *l = lag);
            }
        }
        Ok(())
    }

    pub fn set_camera_to_tracker(
        &mut self,
        camera_to_tracker: na::Matrix4<f64>,
        tracker_index: Option<usize>,
    ) -> Result<()> {
        self.ensure_ready()?;
        match tracker_index {
            Some(index) => {
                self.check_tracker_index(index)?;
                self.camera_to_tracker[index] = Some(camera_to_tracker);
            }
            None => self
                .camera_to_tracker
                .iter_mut()
                .for_each(|m| *m = Some(camera_to_tracker)),
        }
        Ok(())
    }

    /// Reads one 4x4 matrix per tracker from `file`, in tracker order.
    pub fn set_camera_to_trackers(&mut self, file: impl AsRef<Path>) -> Result<()> {
        self.ensure_ready()?;
        let file = file.as_ref();
        let matrices = load_matrices_from_file(file)?;
        if matrices.len() != self.trackers.len() {
            warn!(
                "{} holds {} matrices for {} trackers",
                file.display(),
                matrices.len(),
                self.trackers.len()
            );
        }
        for (slot, m) in self.camera_to_tracker.iter_mut().zip(matrices) {
            *slot = Some(m);
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn number_of_frames(&self) -> usize {
        self.frame_map.len()
    }

    pub fn number_of_trackers(&self) -> usize {
        self.trackers.len()
    }

    pub fn frame_map(&self) -> &FrameMap {
        &self.frame_map
    }

    pub fn frame_map_path(&self) -> Option<&Path> {
        self.frame_map_path.as_deref()
    }

    pub fn tracking_directories(&self) -> &[PathBuf] {
        &self.tracking_directories
    }

    pub fn tracker(&self, tracker_index: usize) -> Result<&TrackingAndTimeStampsContainer> {
        self.check_tracker_index(tracker_index)?;
        Ok(&self.trackers[tracker_index])
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(TrackingError::NotInitialised)
        }
    }

    fn check_tracker_index(&self, index: usize) -> Result<()> {
        if index < self.trackers.len() {
            Ok(())
        } else {
            Err(TrackingError::InvalidTrackerIndex {
                index,
                count: self.trackers.len(),
            })
        }
    }

    /// Tracker matrix for a frame without any camera to tracker chain.
    pub fn get_raw_tracker_matrix(
        &self,
        frame_number: u32,
        tracker_index: usize,
    ) -> Result<MatrixLookup> {
        self.ensure_ready()?;
        self.check_tracker_index(tracker_index)?;
        let video_time = self
            .frame_map
            .time_stamp_of(frame_number)
            .ok_or(TrackingError::InvalidFrameNumber(frame_number))?;
        let query = self.lags[tracker_index].apply(video_time);
        let tracker = &self.trackers[tracker_index];
        let lookup = match self.config.mode {
            MatchingMode::Nearest => tracker.get_nearest_matrix(query)?,
            MatchingMode::Interpolate => tracker.interpolate_matrix(query)?,
        };
        if !lookup.in_bounds {
            debug!(
                "frame {} at {} lies outside tracker {} data",
                frame_number, query, tracker_index
            );
        }
        Ok(lookup)
    }

    /// Tracker matrix for a frame, post multiplied by the camera to tracker
    /// transform when one is set for `tracker_index`.
    pub fn get_tracker_matrix(&self, frame_number: u32, tracker_index: usize) -> Result<MatrixLookup> {
        let mut lookup = self.get_raw_tracker_matrix(frame_number, tracker_index)?;
        if let Some(camera_to_tracker) = &self.camera_to_tracker[tracker_index] {
            lookup.matrix *= camera_to_tracker;
        }
        Ok(lookup)
    }

    /// Camera pose in tracker space; fails if no chain is set.
    pub fn get_camera_tracking_matrix(
        &self,
        frame_number: u32,
        tracker_index: usize,
    ) -> Result<MatrixLookup> {
        let mut lookup = self.get_raw_tracker_matrix(frame_number, tracker_index)?;
        let camera_to_tracker = self.camera_to_tracker[tracker_index]
            .ok_or(TrackingError::MissingCameraToTracker(tracker_index))?;
        lookup.matrix *= camera_to_tracker;
        Ok(lookup)
    }

    /// Timing errors of every frame against one tracker.
    pub fn timing_error_statistics(&self, tracker_index: usize) -> Result<TimingErrorStats> {
        self.ensure_ready()?;
        self.check_tracker_index(tracker_index)?;
        let tracker = &self.trackers[tracker_index];
        let lag = self.lags[tracker_index];
        let mut errors = Vec::with_capacity(self.frame_map.len());
        for entry in self.frame_map.entries() {
            let nearest = tracker.get_nearest_time_stamp(lag.apply(entry.time_stamp))?;
            errors.push(nearest.delta);
        }
        let as_f64: Vec<f64> = errors.iter().map(|e| *e as f64).collect();
        let (mean, std_dev) = mean_and_std(&as_f64);
        let max_abs = errors.iter().map(|e| e.saturating_abs()).max().unwrap_or(0);
        let frames_over_threshold = match self.config.max_timing_error_ns {
            Some(limit) => errors.iter().filter(|e| e.unsigned_abs() > limit).count(),
            None => 0,
        };
        Ok(TimingErrorStats {
            mean,
            std_dev,
            max_abs,
            frames_over_threshold,
        })
    }

    fn camera_to_tracker_of(&self, tracker_index: usize) -> Result<na::Matrix4<f64>> {
        self.ensure_ready()?;
        self.check_tracker_index(tracker_index)?;
        self.camera_to_tracker[tracker_index]
            .ok_or(TrackingError::MissingCameraToTracker(tracker_index))
    }

    /// Raw tracker matrix paired with each lens point. Frames missing from
    /// the frame map or outside the tracking data are left out.
    fn match_lens_points(
        &self,
        lens_points: &[LensPoint],
        tracker_index: usize,
    ) -> Result<Vec<(na::Matrix4<f64>, na::Point3<f64>)>> {
        let mut matched = Vec::with_capacity(lens_points.len());
        for lens in lens_points {
            match self.get_raw_tracker_matrix(lens.frame_number, tracker_index) {
                Ok(lookup) if lookup.in_bounds => matched.push((lookup.matrix, lens.point)),
                Ok(_) | Err(TrackingError::InvalidFrameNumber(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(matched)
    }

    /// World positions of `lens_points` through the camera pose at each
    /// frame. Frames that cannot be matched are skipped.
    pub fn reconstruct_world_points(
        &self,
        lens_points: &[LensPoint],
        tracker_index: usize,
    ) -> Result<Vec<na::Point3<f64>>> {
        let camera_to_tracker = self.camera_to_tracker_of(tracker_index)?;
        Ok(self
            .match_lens_points(lens_points, tracker_index)?
            .iter()
            .map(|(tracker, lens)| transform_point(&(tracker * camera_to_tracker), lens))
            .collect())
    }

    /// Sweeps the video lag of one tracker over `window_ms` (inclusive, 1 ms
    /// steps, positive when the video leads tracking) and keeps the lag
    /// whose reconstructed world points lie closest together.
    ///
    /// The winning lag is left set on the tracker. On a tie the lower lag
    /// wins. If no lag matches at least two frames the previous lag is
    /// restored and an error returned.
    pub fn temporal_calibration(
        &mut self,
        lens_points: &[LensPoint],
        window_ms: (i64, i64),
        tracker_index: usize,
    ) -> Result<TemporalCalibrationResult> {
        self.camera_to_tracker_of(tracker_index)?;
        if lens_points.is_empty() {
            return Err(TrackingError::EmptyInput("lens points"));
        }
        let (low, high) = window_ms;
        if low > high {
            return Err(TrackingError::Degenerate(format!(
                "empty lag window [{}, {}] ms",
                low, high
            )));
        }
        let previous = self.lags[tracker_index];
        let mut best: Option<TemporalCalibrationResult> = None;
        for lag_ms in low..=high {
            self.lags[tracker_index] = VideoLag::from_signed_ms(lag_ms);
            let points = match self.reconstruct_world_points(lens_points, tracker_index) {
                Ok(points) => points,
                Err(e) => {
                    self.lags[tracker_index] = previous;
                    return Err(e);
                }
            };
            if points.len() < 2 {
                continue;
            }
            let (world_point, spread) = point_spread(&points);
            debug!("lag {} ms: spread {} over {} frames", lag_ms, spread, points.len());
            if best.is_none_or(|b| spread < b.spread) {
                best = Some(TemporalCalibrationResult {
                    lag_ms,
                    spread,
                    world_point,
                    frames_used: points.len(),
                });
            }
        }
        match best {
            Some(result) => {
                self.lags[tracker_index] = VideoLag::from_signed_ms(result.lag_ms);
                info!(
                    "tracker {}: video lag {} ms, spread {} over {} frames",
                    tracker_index, result.lag_ms, result.spread, result.frames_used
                );
                Ok(result)
            }
            None => {
                self.lags[tracker_index] = previous;
                Err(TrackingError::Degenerate(format!(
                    "no lag in [{}, {}] ms matches two or more frames",
                    low, high
                )))
            }
        }
    }

    /// Refines the camera to tracker transform of one tracker together with
    /// the world point so that the reconstructed lens points coincide. The
    /// current transform is the starting guess and is replaced on success.
    pub fn optimise_handeye_calibration(
        &mut self,
        lens_points: &[LensPoint],
        tracker_index: usize,
    ) -> Result<HandeyeOptimisationResult> {
        let camera_to_tracker = self.camera_to_tracker_of(tracker_index)?;
        if lens_points.is_empty() {
            return Err(TrackingError::EmptyInput("lens points"));
        }
        let matched = self.match_lens_points(lens_points, tracker_index)?;
        if matched.len() < 3 {
            return Err(TrackingError::Degenerate(format!(
                "need at least 3 matched frames, got {}",
                matched.len()
            )));
        }
        let world: Vec<na::Point3<f64>> = matched
            .iter()
            .map(|(tracker, lens)| transform_point(&(tracker * camera_to_tracker), lens))
            .collect();
        let (centroid, initial_residual_rms) = point_spread(&world);

        let mut initial = camera_to_tracker.to_rvec_tvec().to_params();
        initial.extend([centroid.x, centroid.y, centroid.z]);
        let mut problem = Problem::new();
        for (tracker, lens) in &matched {
            problem.add_residual_block(
                3,
                &[PARAMETER_BLOCK],
                Box::new(LensPointFactor {
                    tracker: *tracker,
                    lens: *lens,
                }),
                None,
            );
        }
        let p = solve_levenberg_marquardt(
            &problem,
            &na::DVector::from_vec(initial),
            SolveOptions::default(),
        )?;
        let squared: Vec<f64> = matched
            .iter()
            .map(|(tracker, lens)| reconstruction_residual(&p, tracker, lens).norm_squared())
            .collect();
        let residual_rms = rms_of_squared(&squared);

        let params: Vec<f64> = p.iter().copied().collect();
        let optimised = RvecTvec::from_params(&params).to_matrix4();
        self.camera_to_tracker[tracker_index] = Some(optimised);
        info!(
            "tracker {}: hand-eye residual {} -> {} over {} frames",
            tracker_index,
            initial_residual_rms,
            residual_rms,
            matched.len()
        );
        Ok(HandeyeOptimisationResult {
            camera_to_tracker: optimised,
            world_point: na::Point3::new(params[6], params[7], params[8]),
            initial_residual_rms,
            residual_rms,
            frames_used: matched.len(),
        })
    }

    fn check_timing_errors(&self) {
        for index in 0..self.trackers.len() {
            if self.trackers[index].is_empty() {
                continue;
            }
            match self.timing_error_statistics(index) {
                Ok(stats) => {
                    info!(
                        "tracker {}: timing error mean {:.0} ns, std dev {:.0} ns, max {} ns",
                        index, stats.mean, stats.std_dev, stats.max_abs
                    );
                    if stats.frames_over_threshold > 0 {
                        warn!(
                            "tracker {}: {} of {} frames exceed the timing error limit",
                            index,
                            stats.frames_over_threshold,
                            self.frame_map.len()
                        );
                    }
                }
                Err(e) => warn!("tracker {}: {}", index, e),
            }
        }
    }
}
