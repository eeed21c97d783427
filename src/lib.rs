pub mod calibration;
pub mod cli;
pub mod data_loader;
pub mod error;
pub mod io;
pub mod matching;
pub mod optimization;
pub mod synthetic;
pub mod timestamps;
pub mod tracking;
pub mod types;
pub mod util;

pub use error::{Result, TrackingError};
pub use matching::{MatchingConfig, MatchingMode, VideoTrackerMatching};
pub use timestamps::TimeStampsContainer;
pub use tracking::{MatrixLookup, TrackingAndTimeStampsContainer};
pub use types::{TimeDelta, TimeStamp};
